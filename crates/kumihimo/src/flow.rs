//! Sequential composition.

use async_trait::async_trait;
use kumihimo_core::{
    shared, Composable, ConfigError, Context, Failure, SharedComposable, Stage, StepName,
};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

type Steps<T> = Arc<Vec<SharedComposable<T>>>;

/// Runs its steps one after another, feeding each step's output to the next.
///
/// The first failing step stops the flow; the failure gets this flow's name
/// and the step's index prepended to its stage path. An empty flow returns its
/// input unchanged.
///
/// The step list may be changed through `&self` at any time. Every call to
/// `process` works on a snapshot taken when it starts, so mutations made while
/// a call is in flight only affect later calls.
///
/// # Examples
///
/// ```
/// use kumihimo::prelude::*;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let flow = Flow::new("normalize")
///     .then(Step::from_fn("trim", |_ctx, s: String| Ok::<_, BoxError>(s.trim().to_string())))
///     .then(Step::from_fn("lower", |_ctx, s: String| Ok::<_, BoxError>(s.to_lowercase())));
///
/// let out = flow.process(&Context::new(), "  Hello ".to_string()).await;
/// assert_eq!(out.ok().as_deref(), Some("hello"));
/// # }
/// ```
pub struct Flow<T> {
    name: StepName,
    steps: RwLock<Steps<T>>,
}

impl<T> fmt::Debug for Flow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("steps", &self.len())
            .finish()
    }
}

impl<T> Flow<T> {
    fn snapshot(&self) -> Steps<T> {
        self.steps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update<R>(&self, f: impl FnOnce(&mut Vec<SharedComposable<T>>) -> R) -> R {
        let mut guard = self.steps.write().unwrap_or_else(PoisonError::into_inner);
        f(Arc::make_mut(&mut guard))
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Returns `true` if the flow has no steps.
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl<T: Send + 'static> Flow<T> {
    /// Creates an empty flow.
    pub fn new(name: impl Into<StepName>) -> Self {
        Self::from_steps(name, Vec::new())
    }

    /// Creates a flow from already shared steps.
    pub fn from_steps(name: impl Into<StepName>, steps: Vec<SharedComposable<T>>) -> Self {
        Self {
            name: name.into(),
            steps: RwLock::new(Arc::new(steps)),
        }
    }

    /// Adds a step at the end, builder style.
    pub fn then<C: Composable<T> + 'static>(self, step: C) -> Self {
        self.append(step);
        self
    }

    /// Adds a step at the end.
    pub fn append<C: Composable<T> + 'static>(&self, step: C) {
        let step = shared(step);
        self.update(|steps| steps.push(step));
    }

    /// Adds a step at the front.
    pub fn prepend<C: Composable<T> + 'static>(&self, step: C) {
        let step = shared(step);
        self.update(|steps| steps.insert(0, step));
    }

    /// Inserts a step so that it ends up at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IndexOutOfRange`] if `index > len`.
    pub fn insert_at<C: Composable<T> + 'static>(
        &self,
        index: usize,
        step: C,
    ) -> Result<(), ConfigError> {
        let step = shared(step);
        self.update(|steps| {
            if index > steps.len() {
                return Err(ConfigError::IndexOutOfRange {
                    index,
                    len: steps.len(),
                });
            }
            steps.insert(index, step);
            Ok(())
        })
    }

    /// Replaces the step at `index`, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IndexOutOfRange`] if `index >= len`.
    pub fn replace<C: Composable<T> + 'static>(
        &self,
        index: usize,
        step: C,
    ) -> Result<SharedComposable<T>, ConfigError> {
        let step = shared(step);
        self.update(|steps| match steps.get_mut(index) {
            Some(slot) => Ok(std::mem::replace(slot, step)),
            None => Err(ConfigError::IndexOutOfRange {
                index,
                len: steps.len(),
            }),
        })
    }

    /// Returns the step names in execution order.
    pub fn step_names(&self) -> Vec<StepName> {
        self.snapshot()
            .iter()
            .map(|step| step.name().clone())
            .collect()
    }
}

#[async_trait]
impl<T: Send + 'static> Composable<T> for Flow<T> {
    fn name(&self) -> &StepName {
        &self.name
    }

    async fn process(&self, ctx: &Context, input: T) -> Result<T, Failure> {
        let steps = self.snapshot();
        let mut value = input;

        for (index, step) in steps.iter().enumerate() {
            if let Some(cause) = ctx.err() {
                warn!(
                    "Flow '{}' stopped before step '{}': {}",
                    self.name,
                    step.name(),
                    cause
                );
                return Err(Failure::new(self.name.clone(), cause)
                    .within(Stage::index(self.name.clone(), index)));
            }

            value = match step.process(ctx, value).await {
                Ok(next) => {
                    debug!("Step '{}' completed successfully", step.name());
                    next
                }
                Err(failure) => {
                    warn!("Flow '{}' failed at step {}: {}", self.name, index, failure);
                    return Err(failure.within(Stage::index(self.name.clone(), index)));
                }
            };
        }

        Ok(value)
    }
}
