//! Repetition composition with optional backoff.

use async_trait::async_trait;
use kumihimo_core::{
    shared, Backoff, Cause, Composable, ConfigError, Context, Duplicate, Failure, RetryConfig,
    SharedComposable, Stage, StepName,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

type Schedule = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Re-invokes its inner composable until it succeeds or attempts run out.
///
/// Every attempt gets a fresh [`Duplicate`] of the original input. After a
/// failed attempt the retry pauses for `schedule(index)` (index 0 after the
/// first failure). The pause is skipped entirely, with a deadline failure,
/// when it would end past the context deadline; a cancellation during the
/// pause ends it at once with a cancellation failure.
///
/// Configuration failures are returned immediately without further attempts.
/// When every attempt fails, the last failure is returned with its cause
/// wrapped in [`Cause::Exhausted`] carrying the attempt count.
///
/// A success returns the inner value as is, so the number of attempts it took
/// is not part of the result. It is reported as the `attempts` field of an
/// `info` event on the `kumihimo::retry` target whenever more than one attempt
/// was needed. Callers that need it programmatically can count invocations in
/// the inner composable.
///
/// # Examples
///
/// ```
/// use kumihimo::prelude::*;
/// use std::time::Duration;
///
/// # fn main() -> Result<(), ConfigError> {
/// let flaky = Step::from_fn("flaky", |_ctx, n: u32| Ok::<_, BoxError>(n));
/// let retry = Retry::new("flaky_retry", flaky, 3)?
///     .with_backoff(Backoff::exponential(Duration::from_millis(20)));
/// assert_eq!(retry.max_attempts(), 3);
/// # Ok(())
/// # }
/// ```
pub struct Retry<T> {
    name: StepName,
    inner: SharedComposable<T>,
    max_attempts: u32,
    schedule: Option<Schedule>,
}

impl<T: Send + 'static> fmt::Debug for Retry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("name", &self.name)
            .field("inner", self.inner.name())
            .field("max_attempts", &self.max_attempts)
            .field("has_schedule", &self.schedule.is_some())
            .finish()
    }
}

impl<T: Duplicate + Send + 'static> Retry<T> {
    /// Creates a retry without pauses between attempts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroAttempts`] if `max_attempts` is 0.
    pub fn new<C: Composable<T> + 'static>(
        name: impl Into<StepName>,
        inner: C,
        max_attempts: u32,
    ) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }

        Ok(Self {
            name: name.into(),
            inner: shared(inner),
            max_attempts,
            schedule: None,
        })
    }

    /// Creates a retry from a [`RetryConfig`].
    ///
    /// # Errors
    ///
    /// Returns the configuration's validation error.
    pub fn from_config<C: Composable<T> + 'static>(
        name: impl Into<StepName>,
        inner: C,
        config: &RetryConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(name, inner, config.max_attempts)?.with_backoff(config.backoff.clone()))
    }

    /// Uses a [`Backoff`] schedule between attempts.
    pub fn with_backoff(self, backoff: Backoff) -> Self {
        match backoff {
            Backoff::None => Self {
                schedule: None,
                ..self
            },
            backoff => self.with_schedule(move |index| backoff.delay_for_attempt(index)),
        }
    }

    /// Uses an arbitrary schedule between attempts.
    pub fn with_schedule<F>(mut self, schedule: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.schedule = Some(Arc::new(schedule));
        self
    }

    /// Total number of attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay_after(&self, index: u32) -> Duration {
        self.schedule
            .as_ref()
            .map_or(Duration::ZERO, |schedule| schedule(index))
    }

    fn interrupted(&self, attempt: u32, cause: Cause) -> Failure {
        Failure::new(self.name.clone(), cause).within(Stage::attempt(self.name.clone(), attempt))
    }
}

#[async_trait]
impl<T: Duplicate + Send + 'static> Composable<T> for Retry<T> {
    fn name(&self) -> &StepName {
        &self.name
    }

    async fn process(&self, ctx: &Context, input: T) -> Result<T, Failure> {
        let mut attempt = 1;

        loop {
            if let Some(cause) = ctx.err() {
                return Err(self.interrupted(attempt, cause));
            }

            let failure = match self.inner.process(ctx, input.duplicate()).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            attempts = attempt,
                            max_attempts = self.max_attempts,
                            "'{}' succeeded on attempt {}/{}",
                            self.inner.name(),
                            attempt,
                            self.max_attempts
                        );
                    }
                    return Ok(value);
                }
                Err(failure) => failure.within(Stage::attempt(self.name.clone(), attempt)),
            };

            if failure.is_configuration() {
                return Err(failure);
            }

            if attempt >= self.max_attempts {
                warn!(
                    "'{}' failed after {} attempts: {}",
                    self.inner.name(),
                    attempt,
                    failure
                );
                return Err(failure.into_exhausted(attempt));
            }

            let delay = self.delay_after(attempt - 1);
            info!(
                "'{}' failed, retrying ({}/{}) in {:?}: {}",
                self.inner.name(),
                attempt + 1,
                self.max_attempts,
                delay,
                failure
            );

            if !delay.is_zero() {
                let resumes_at = Instant::now().checked_add(delay);
                if ctx
                    .deadline()
                    .is_some_and(|deadline| resumes_at.map_or(true, |at| at > deadline))
                {
                    warn!(
                        "'{}' gives up: a {:?} pause would pass the deadline",
                        self.name, delay
                    );
                    return Err(self.interrupted(attempt, Cause::DeadlineExceeded));
                }

                tokio::select! {
                    cause = ctx.done() => return Err(self.interrupted(attempt, cause)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kumihimo_core::{BoxError, FailureKind, Position, Step};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fails_times(calls: Arc<AtomicU32>, failures: u32) -> Step<u32> {
        Step::from_fn("flaky", move |_ctx, n: u32| {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= failures {
                Err::<u32, BoxError>(format!("attempt {call} failed").into())
            } else {
                Ok(n + call)
            }
        })
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = Retry::new("retry", fails_times(calls, 0), 0);
        assert!(matches!(result, Err(ConfigError::ZeroAttempts)));
    }

    #[test]
    fn test_debug_names_inner() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = Retry::new("retry", fails_times(calls, 0), 3).expect("valid retry");
        let rendered = format!("{retry:?}");
        assert!(rendered.contains("\"flaky\""));
        assert!(rendered.contains("max_attempts: 3"));
    }

    #[tokio::test]
    async fn test_retry_eventual_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = Retry::new("retry", fails_times(calls.clone(), 2), 3).expect("valid retry");

        let out = retry.process(&Context::new(), 10).await;
        assert_eq!(out.ok(), Some(13));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = Retry::new("retry", fails_times(calls.clone(), 2), 2).expect("valid retry");

        let failure = retry
            .process(&Context::new(), 10)
            .await
            .expect_err("out of attempts");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(failure.kind(), FailureKind::Exhausted);
        assert_eq!(failure.attempts(), Some(2));
        assert_eq!(failure.step_name(), "flaky");
        assert_eq!(failure.root_cause().to_string(), "attempt 2 failed");
        assert_eq!(
            failure.stage_path().as_slice()[0].position(),
            &Position::Attempt(2)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_pauses_between_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = Retry::new("retry", fails_times(calls.clone(), 2), 3)
            .expect("valid retry")
            .with_backoff(Backoff::exponential(Duration::from_millis(100)));

        let started = Instant::now();
        assert!(retry.process(&Context::new(), 0).await.is_ok());
        // 100ms after the first failure, 200ms after the second
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_millis(320));
    }

    #[tokio::test]
    async fn test_configuration_failures_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let misconfigured = Step::from_fn("lookup", move |_ctx, _n: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<u32, BoxError>(Box::new(Failure::configuration(
                "lookup",
                ConfigError::UnmappedRoute("nowhere".into()),
            )))
        });
        let retry = Retry::new("retry", misconfigured, 5).expect("valid retry");

        let failure = retry.process(&Context::new(), 0).await.expect_err("config");
        assert!(failure.is_configuration());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_pause_counts_as_past_deadline() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = Retry::new("retry", fails_times(calls.clone(), 10), 3)
            .expect("valid retry")
            .with_schedule(|_| Duration::MAX);

        let ctx = Context::new().with_timeout(Duration::from_secs(5));
        let started = Instant::now();
        let failure = retry.process(&ctx, 0).await.expect_err("pause too long");

        assert!(failure.is_timeout());
        assert_eq!(failure.step_name(), "retry");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_pause() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = Retry::new("retry", fails_times(calls.clone(), 10), 5)
            .expect("valid retry")
            .with_backoff(Backoff::fixed(Duration::from_secs(60)));

        let ctx = Context::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let failure = retry.process(&ctx, 0).await.expect_err("cancelled");
        assert!(failure.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
