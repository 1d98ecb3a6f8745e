//! Config-driven wrapping of a composable with a timeout and retry.

use crate::retry::Retry;
use crate::timeout::Timeout;
use kumihimo_core::{
    shared, Composable, ConfigError, Duplicate, SharedComposable, StepConfig, StepName,
};
use tracing::debug;

/// Wraps `inner` according to a [`StepConfig`].
///
/// With a timeout configured, every attempt is bounded by it. With more than
/// one attempt configured, the result is wrapped in a [`Retry`], giving
/// `Retry(Timeout(inner))`. Wrappers are named after `inner` with `.timeout`
/// and `.retry` suffixes. A config with neither returns `inner` unchanged.
///
/// # Errors
///
/// Returns the configuration's validation error.
///
/// # Examples
///
/// ```
/// use kumihimo::prelude::*;
/// use std::time::Duration;
///
/// # fn main() -> Result<(), ConfigError> {
/// let config = StepConfig {
///     timeout: Some(Duration::from_millis(250)),
///     retry: RetryConfig::new(3, Backoff::fixed(Duration::from_millis(10))),
/// };
/// let charge = Step::from_fn("charge", |_ctx, cents: u64| Ok::<_, BoxError>(cents));
/// let guarded_charge = guarded(charge, &config)?;
///
/// assert_eq!(guarded_charge.name(), "charge.retry");
/// # Ok(())
/// # }
/// ```
pub fn guarded<T, C>(inner: C, config: &StepConfig) -> Result<SharedComposable<T>, ConfigError>
where
    T: Duplicate + Send + 'static,
    C: Composable<T> + 'static,
{
    config.validate()?;

    let base = inner.name().clone();
    let bounded: SharedComposable<T> = match config.timeout {
        Some(limit) => shared(Timeout::new(
            StepName::new(format!("{base}.timeout")),
            inner,
            limit,
        )),
        None => shared(inner),
    };

    if config.retry.max_attempts <= 1 {
        debug!("'{}' guarded with timeout {:?}", base, config.timeout);
        return Ok(bounded);
    }

    debug!(
        "'{}' guarded with timeout {:?} and {} attempts",
        base, config.timeout, config.retry.max_attempts
    );
    let retry = Retry::from_config(
        StepName::new(format!("{base}.retry")),
        bounded,
        &config.retry,
    )?;
    Ok(shared(retry))
}
