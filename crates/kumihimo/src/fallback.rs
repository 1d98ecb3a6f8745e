//! Alternative composition.

use async_trait::async_trait;
use kumihimo_core::{
    shared, Composable, ConfigError, Context, Duplicate, Failure, SharedComposable, Stage,
    StepName,
};
use std::fmt;
use tracing::{debug, info};

/// Tries alternatives in order until one succeeds.
///
/// Each alternative receives its own [`Duplicate`] of the original input, so a
/// failed attempt cannot leak partial changes into the next one. When every
/// alternative fails, the last failure is returned. Configuration failures
/// and a done context end the fallback immediately.
///
/// # Examples
///
/// ```
/// use kumihimo::prelude::*;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), ConfigError> {
/// let rates = Fallback::builder("rates")
///     .or(Step::from_fn("live", |_ctx, _r: f64| Err::<f64, _>("feed offline")))
///     .or(Step::from_fn("cached", |_ctx, _r: f64| Ok::<_, BoxError>(1.08)))
///     .build()?;
///
/// assert_eq!(rates.process(&Context::new(), 0.0).await.ok(), Some(1.08));
/// # Ok(())
/// # }
/// ```
pub struct Fallback<T> {
    name: StepName,
    alternatives: Vec<SharedComposable<T>>,
}

impl<T: Send + 'static> fmt::Debug for Fallback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fallback")
            .field("name", &self.name)
            .field(
                "alternatives",
                &self.alternatives.iter().map(|a| a.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<T: Duplicate + Send + 'static> Fallback<T> {
    /// Starts building a fallback.
    pub fn builder(name: impl Into<StepName>) -> FallbackBuilder<T> {
        FallbackBuilder {
            name: name.into(),
            alternatives: Vec::new(),
        }
    }

    /// Names of the alternatives, in the order they are tried.
    pub fn alternative_names(&self) -> Vec<&StepName> {
        self.alternatives.iter().map(|a| a.name()).collect()
    }
}

#[async_trait]
impl<T: Duplicate + Send + 'static> Composable<T> for Fallback<T> {
    fn name(&self) -> &StepName {
        &self.name
    }

    async fn process(&self, ctx: &Context, input: T) -> Result<T, Failure> {
        let mut last = None;

        for (index, alternative) in self.alternatives.iter().enumerate() {
            if let Some(cause) = ctx.err() {
                return Err(Failure::new(self.name.clone(), cause)
                    .within(Stage::index(self.name.clone(), index)));
            }

            match alternative.process(ctx, input.duplicate()).await {
                Ok(value) => {
                    if index > 0 {
                        info!(
                            "Fallback '{}' recovered with alternative '{}'",
                            self.name,
                            alternative.name()
                        );
                    }
                    return Ok(value);
                }
                Err(failure) => {
                    let failure = failure.within(Stage::index(self.name.clone(), index));
                    if failure.is_configuration() {
                        return Err(failure);
                    }
                    debug!(
                        "Fallback '{}' alternative '{}' failed: {}",
                        self.name,
                        alternative.name(),
                        failure
                    );
                    last = Some(failure);
                }
            }
        }

        // the builder guarantees at least one alternative
        Err(last.unwrap_or_else(|| {
            Failure::configuration(self.name.clone(), ConfigError::Empty("fallback"))
        }))
    }
}

/// Builder for [`Fallback`].
pub struct FallbackBuilder<T> {
    name: StepName,
    alternatives: Vec<SharedComposable<T>>,
}

impl<T: Duplicate + Send + 'static> FallbackBuilder<T> {
    /// Adds the next alternative.
    pub fn or<C: Composable<T> + 'static>(mut self, alternative: C) -> Self {
        self.alternatives.push(shared(alternative));
        self
    }

    /// Builds the fallback.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Empty`] if no alternative was added.
    pub fn build(self) -> Result<Fallback<T>, ConfigError> {
        if self.alternatives.is_empty() {
            return Err(ConfigError::Empty("fallback"));
        }

        Ok(Fallback {
            name: self.name,
            alternatives: self.alternatives,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kumihimo_core::{BoxError, Step};
    use std::sync::{Arc, Mutex};

    fn recording(
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        succeed: bool,
    ) -> Step<Vec<String>> {
        Step::from_fn(name, move |_ctx, mut items: Vec<String>| {
            log.lock().expect("log lock").push(name);
            items.push(name.to_string());
            if succeed {
                Ok(items)
            } else {
                Err::<_, BoxError>(format!("{name} unavailable").into())
            }
        })
    }

    #[tokio::test]
    async fn test_alternatives_tried_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let fallback = Fallback::builder("lookup")
            .or(recording("a", log.clone(), false))
            .or(recording("b", log.clone(), false))
            .or(recording("c", log.clone(), true))
            .build()
            .expect("valid fallback");

        let out = fallback
            .process(&Context::new(), vec!["seed".to_string()])
            .await
            .expect("c succeeds");

        assert_eq!(*log.lock().expect("log lock"), vec!["a", "b", "c"]);
        // a and b pushed onto their own copies
        assert_eq!(out, vec!["seed".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_all_alternatives_fail() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let fallback = Fallback::builder("lookup")
            .or(recording("a", log.clone(), false))
            .or(recording("b", log.clone(), false))
            .build()
            .expect("valid fallback");

        let failure = fallback
            .process(&Context::new(), Vec::new())
            .await
            .expect_err("nothing works");

        assert_eq!(failure.step_name(), "b");
        assert_eq!(failure.stage_path().to_string(), "lookup[1]");
        assert_eq!(failure.root_cause().to_string(), "b unavailable");
    }

    #[tokio::test]
    async fn test_configuration_failure_stops_fallback() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let misconfigured = Step::from_fn("broken", |_ctx, _items: Vec<String>| {
            Err::<Vec<String>, BoxError>(Box::new(Failure::configuration(
                "broken",
                ConfigError::NoRoutes,
            )))
        });
        let fallback = Fallback::builder("lookup")
            .or(misconfigured)
            .or(recording("b", log.clone(), true))
            .build()
            .expect("valid fallback");

        let failure = fallback
            .process(&Context::new(), Vec::new())
            .await
            .expect_err("configuration failure");

        assert!(failure.is_configuration());
        assert!(log.lock().expect("log lock").is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_before_next_alternative_blames_the_fallback() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let fallback = Fallback::builder("lookup")
            .or(Step::from_fn("a", |ctx, _items: Vec<String>| {
                ctx.cancel();
                Err::<Vec<String>, _>("a unavailable")
            }))
            .or(recording("b", log.clone(), true))
            .build()
            .expect("valid fallback");

        let failure = fallback
            .process(&Context::new(), Vec::new())
            .await
            .expect_err("cancelled");

        assert!(failure.is_cancelled());
        assert_eq!(failure.step_name(), "lookup");
        assert_eq!(failure.stage_path().to_string(), "lookup[1]");
        assert!(log.lock().expect("log lock").is_empty());
    }

    #[test]
    fn test_debug_lists_alternatives() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let fallback = Fallback::builder("lookup")
            .or(recording("a", log.clone(), false))
            .or(recording("b", log, true))
            .build()
            .expect("valid fallback");
        let rendered = format!("{fallback:?}");
        assert!(rendered.starts_with("Fallback"));
        assert!(rendered.contains("\"a\"") && rendered.contains("\"b\""));
    }

    #[test]
    fn test_fallback_builder_validation() {
        let result = Fallback::<u32>::builder("empty").build();
        assert!(matches!(result, Err(ConfigError::Empty("fallback"))));
    }
}
