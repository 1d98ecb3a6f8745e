//! Deadline composition.

use crate::linger::Lingering;
use async_trait::async_trait;
use kumihimo_core::{
    shared, Cause, Composable, Context, Failure, SharedComposable, Stage, StepName,
};
use std::fmt;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug_span, warn, Instrument};

/// Bounds how long its inner composable may run.
///
/// The inner composable runs on its own task under a child context whose
/// deadline is the sooner of the caller's deadline and `now + duration`. If it
/// finishes first, its result is returned unchanged. If the deadline passes
/// first, a deadline failure is returned right away.
///
/// Cancellation is cooperative: an inner composable that does not watch its
/// context keeps running after the caller has received the deadline failure.
/// Such work is handed to the [`Lingering`] tracker, which aborts it at its
/// next await point once the grace period runs out. Its result is always
/// discarded.
///
/// A panic inside the inner composable is resumed on the caller's task.
///
/// # Examples
///
/// ```
/// use kumihimo::prelude::*;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let lookup = Step::new("lookup", |_ctx, id: u64| async move { Ok::<_, BoxError>(id * 2) });
/// let bounded = Timeout::new("lookup_deadline", lookup, Duration::from_millis(50));
///
/// assert_eq!(bounded.process(&Context::new(), 21).await.ok(), Some(42));
/// # }
/// ```
pub struct Timeout<T> {
    name: StepName,
    inner: SharedComposable<T>,
    duration: Duration,
    lingering: Lingering,
}

impl<T: Send + 'static> fmt::Debug for Timeout<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeout")
            .field("name", &self.name)
            .field("inner", self.inner.name())
            .field("duration", &self.duration)
            .finish()
    }
}

impl<T: Send + 'static> Timeout<T> {
    /// Bounds `inner` to `duration`.
    pub fn new<C: Composable<T> + 'static>(
        name: impl Into<StepName>,
        inner: C,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            inner: shared(inner),
            duration,
            lingering: Lingering::default(),
        }
    }

    /// Shares a lingering tracker with other connectors.
    pub fn with_lingering(mut self, lingering: Lingering) -> Self {
        self.lingering = lingering;
        self
    }

    /// The time limit.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// The tracker that owns timed-out inner runs.
    pub fn lingering(&self) -> &Lingering {
        &self.lingering
    }
}

#[async_trait]
impl<T: Send + 'static> Composable<T> for Timeout<T> {
    fn name(&self) -> &StepName {
        &self.name
    }

    async fn process(&self, ctx: &Context, input: T) -> Result<T, Failure> {
        let bounded = ctx.with_timeout(self.duration);
        if let Some(cause) = bounded.err() {
            return Err(
                Failure::new(self.name.clone(), cause).within(Stage::whole(self.name.clone()))
            );
        }

        let inner = self.inner.clone();
        let inner_ctx = bounded.clone();
        let span = debug_span!("timeout", name = %self.name, limit = ?self.duration);

        let mut tasks = JoinSet::new();
        tasks.spawn(async move { inner.process(&inner_ctx, input).await }.instrument(span));

        tokio::select! {
            biased;
            joined = tasks.join_next() => match joined {
                Some(Ok(result)) => {
                    result.map_err(|failure| failure.within(Stage::whole(self.name.clone())))
                }
                Some(Err(error)) if error.is_panic() => {
                    std::panic::resume_unwind(error.into_panic())
                }
                // the set held one task and nothing aborts it while we wait
                _ => Err(Failure::new(self.name.clone(), Cause::Cancelled)
                    .within(Stage::whole(self.name.clone()))),
            },
            cause = bounded.done() => {
                warn!(
                    "'{}' gave up on '{}' after {:?}: {}",
                    self.name,
                    self.inner.name(),
                    self.duration,
                    cause
                );
                bounded.cancel();
                self.lingering.detach(&self.name, tasks);
                Err(Failure::new(self.name.clone(), cause).within(Stage::whole(self.name.clone())))
            }
        }
    }
}
