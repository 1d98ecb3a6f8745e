//! Concurrent composition: race and contest.

use crate::linger::Lingering;
use async_trait::async_trait;
use futures::FutureExt;
use kumihimo_core::{
    shared, BranchOutcome, BranchReason, Cause, Composable, ConfigError, Context, Duplicate,
    Failure, SharedComposable, Stage, StepName,
};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, debug_span, info, warn, Instrument};

type Accept<T> = Arc<dyn Fn(&Context, &T) -> bool + Send + Sync>;

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs every branch concurrently and returns the first acceptable success.
///
/// Each branch gets its own [`Duplicate`] of the input and a child context of
/// the caller's. Results are judged in completion order: in a race any
/// success wins; in a contest a success wins only if the acceptance predicate
/// holds for it.
///
/// When a winner is found, all other branch contexts are cancelled. Losing
/// branches stop only when they observe that cancellation; until then they are
/// owned by the connector's [`Lingering`] tracker and their results are
/// discarded. Because every branch works on its own copy, late finishers
/// cannot touch the winning value.
///
/// If no branch wins, the failure lists every branch in registration order
/// with the reason it lost. If the caller's context is cancelled or expires
/// first, all branches are cancelled and that is reported instead.
///
/// Branches are spawned on the ambient tokio runtime.
///
/// # Examples
///
/// ```
/// use kumihimo::prelude::*;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), ConfigError> {
/// let quote = Contest::builder("cheapest_fast_quote")
///     .branch(Step::from_fn("post", |_ctx, _q: u32| Ok::<_, BoxError>(900)))
///     .branch(Step::from_fn("courier", |_ctx, _q: u32| Ok::<_, BoxError>(450)))
///     .accept(|_ctx, cents: &u32| *cents < 500)
///     .build()?;
///
/// assert_eq!(quote.process(&Context::new(), 0).await.ok(), Some(450));
/// # Ok(())
/// # }
/// ```
pub struct Contest<T> {
    name: StepName,
    branches: Vec<SharedComposable<T>>,
    accept: Option<Accept<T>>,
    lingering: Lingering,
}

/// A contest without an acceptance predicate: the first success wins.
pub type Race<T> = Contest<T>;

impl<T: Send + 'static> fmt::Debug for Contest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contest")
            .field("name", &self.name)
            .field(
                "branches",
                &self.branches.iter().map(|b| b.name()).collect::<Vec<_>>(),
            )
            .field("has_accept", &self.accept.is_some())
            .finish()
    }
}

impl<T: Duplicate + Send + 'static> Contest<T> {
    /// Starts building a contest. Without [`accept`](ContestBuilder::accept) it
    /// behaves as a race.
    pub fn builder(name: impl Into<StepName>) -> ContestBuilder<T> {
        ContestBuilder {
            name: name.into(),
            branches: Vec::new(),
            accept: None,
            lingering: Lingering::default(),
        }
    }

    /// Starts building a race: the first success wins.
    pub fn race(name: impl Into<StepName>) -> ContestBuilder<T> {
        Self::builder(name)
    }

    /// The tracker that owns losing branches still running.
    pub fn lingering(&self) -> &Lingering {
        &self.lingering
    }

    /// Returns `true` if any success wins (no acceptance predicate).
    pub fn is_race(&self) -> bool {
        self.accept.is_none()
    }

    fn accepts(&self, ctx: &Context, value: &T) -> bool {
        self.accept.as_ref().map_or(true, |accept| accept(ctx, value))
    }

    fn no_winner(&self, mut outcomes: Vec<BranchOutcome>) -> Failure {
        outcomes.sort_by_key(|outcome| outcome.index);
        warn!(
            "Contest '{}' found no winner among {} branches",
            self.name,
            outcomes.len()
        );
        Failure::new(self.name.clone(), Cause::NoWinner(outcomes))
            .within(Stage::whole(self.name.clone()))
    }

    fn interrupted<R: Send + 'static>(
        &self,
        group: &Context,
        tasks: JoinSet<R>,
        cause: Cause,
    ) -> Failure {
        warn!("Contest '{}' interrupted: {}", self.name, cause);
        group.cancel();
        self.lingering.detach(&self.name, tasks);
        Failure::new(self.name.clone(), cause).within(Stage::whole(self.name.clone()))
    }

    /// Accounts for a branch task that ended without reporting an outcome.
    fn lost(&self, index: usize, error: JoinError) -> BranchOutcome {
        let reason = if error.is_panic() {
            panic_message(error.into_panic())
        } else {
            error.to_string()
        };
        warn!("Contest '{}' lost branch {}: {}", self.name, index, reason);
        BranchOutcome {
            name: self.branches[index].name().clone(),
            index,
            reason: BranchReason::Panicked(reason),
        }
    }
}

#[async_trait]
impl<T: Duplicate + Send + 'static> Composable<T> for Contest<T> {
    fn name(&self) -> &StepName {
        &self.name
    }

    async fn process(&self, ctx: &Context, input: T) -> Result<T, Failure> {
        if let Some(cause) = ctx.err() {
            return Err(
                Failure::new(self.name.clone(), cause).within(Stage::whole(self.name.clone()))
            );
        }

        let group = ctx.child();
        let mut tasks = JoinSet::new();
        let mut indices: HashMap<Id, usize> = HashMap::with_capacity(self.branches.len());

        for (index, branch) in self.branches.iter().enumerate() {
            let branch = branch.clone();
            let branch_ctx = group.child();
            let value = input.duplicate();
            let span = debug_span!("branch", contest = %self.name, branch = %branch.name());
            debug!("Contest '{}' starting branch '{}'", self.name, branch.name());
            let handle = tasks.spawn(
                async move {
                    let outcome =
                        AssertUnwindSafe(async { branch.process(&branch_ctx, value).await })
                            .catch_unwind()
                            .await
                            .map_err(panic_message);
                    (index, outcome)
                }
                .instrument(span),
            );
            indices.insert(handle.id(), index);
        }
        drop(input);

        let mut outcomes = Vec::with_capacity(self.branches.len());

        loop {
            let joined = tokio::select! {
                biased;
                joined = tasks.join_next() => joined,
                cause = ctx.done() => return Err(self.interrupted(&group, tasks, cause)),
            };

            let Some(joined) = joined else {
                // branches that saw the caller's cancellation may drain the set first
                if let Some(cause) = ctx.err() {
                    return Err(self.interrupted(&group, tasks, cause));
                }
                return Err(self.no_winner(outcomes));
            };

            match joined {
                Ok((index, Ok(Ok(value)))) => {
                    let branch_name = self.branches[index].name().clone();
                    if self.accepts(ctx, &value) {
                        info!("Contest '{}' won by branch '{}'", self.name, branch_name);
                        group.cancel();
                        self.lingering.detach(&self.name, tasks);
                        return Ok(value);
                    }
                    debug!(
                        "Contest '{}' rejected result of branch '{}'",
                        self.name, branch_name
                    );
                    outcomes.push(BranchOutcome {
                        name: branch_name,
                        index,
                        reason: BranchReason::Rejected,
                    });
                }
                Ok((index, Ok(Err(failure)))) => {
                    debug!("Contest '{}' branch {} failed: {}", self.name, index, failure);
                    outcomes.push(BranchOutcome {
                        name: self.branches[index].name().clone(),
                        index,
                        reason: BranchReason::Failed(failure),
                    });
                }
                Ok((index, Err(panic))) => {
                    warn!("Contest '{}' branch {} panicked: {}", self.name, index, panic);
                    outcomes.push(BranchOutcome {
                        name: self.branches[index].name().clone(),
                        index,
                        reason: BranchReason::Panicked(panic),
                    });
                }
                Err(error) => match indices.get(&error.id()) {
                    Some(&index) => outcomes.push(self.lost(index, error)),
                    None => warn!("Contest '{}' lost an unknown task: {}", self.name, error),
                },
            }
        }
    }
}

/// Builder for [`Contest`] and [`Race`].
pub struct ContestBuilder<T> {
    name: StepName,
    branches: Vec<SharedComposable<T>>,
    accept: Option<Accept<T>>,
    lingering: Lingering,
}

impl<T: Duplicate + Send + 'static> ContestBuilder<T> {
    /// Adds a branch.
    pub fn branch<C: Composable<T> + 'static>(mut self, branch: C) -> Self {
        self.branches.push(shared(branch));
        self
    }

    /// Sets the acceptance predicate a winning value must satisfy.
    pub fn accept<F>(mut self, accept: F) -> Self
    where
        F: Fn(&Context, &T) -> bool + Send + Sync + 'static,
    {
        self.accept = Some(Arc::new(accept));
        self
    }

    /// Shares a lingering tracker with other connectors.
    pub fn with_lingering(mut self, lingering: Lingering) -> Self {
        self.lingering = lingering;
        self
    }

    /// Builds the contest.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Empty`] if no branch was added.
    pub fn build(self) -> Result<Contest<T>, ConfigError> {
        if self.branches.is_empty() {
            return Err(ConfigError::Empty("contest"));
        }

        Ok(Contest {
            name: self.name,
            branches: self.branches,
            accept: self.accept,
            lingering: self.lingering,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kumihimo_core::{BoxError, BoxFuture, FailureKind, Step};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    /// Runs for ten seconds unless its context ends first.
    fn watcher(name: &'static str, saw_end: Arc<AtomicBool>) -> Step<u32> {
        Step::new(name, move |ctx: Context, n: u32| {
            let saw_end = saw_end.clone();
            async move {
                tokio::select! {
                    cause = ctx.done() => {
                        saw_end.store(true, Ordering::SeqCst);
                        Err::<u32, BoxError>(cause.into())
                    }
                    _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(n),
                }
            }
        })
    }

    /// Panics while being asked for its future, before any polling.
    struct PanicsOnCall(StepName);

    impl Composable<u32> for PanicsOnCall {
        fn name(&self) -> &StepName {
            &self.0
        }

        #[allow(clippy::panic)]
        fn process<'a, 'b, 'f>(
            &'a self,
            _ctx: &'b Context,
            _input: u32,
        ) -> BoxFuture<'f, Result<u32, Failure>>
        where
            'a: 'f,
            'b: 'f,
            Self: 'f,
        {
            panic!("refused")
        }
    }

    #[test]
    fn test_contest_builder_validation() {
        let result = Contest::<u32>::builder("empty").build();
        assert!(matches!(result, Err(ConfigError::Empty("contest"))));
    }

    #[tokio::test]
    async fn test_race_returns_a_success() {
        let race = Race::race("any")
            .branch(Step::from_fn("broken", |_ctx, _n: u32| Err::<u32, _>("down")))
            .branch(Step::from_fn("working", |_ctx, n: u32| Ok::<_, BoxError>(n + 1)))
            .build()
            .expect("valid race");

        assert!(race.is_race());
        assert_eq!(race.process(&Context::new(), 1).await.ok(), Some(2));
    }

    #[tokio::test]
    #[allow(clippy::panic)]
    async fn test_panicking_branch_is_reported() {
        let race = Race::race("any")
            .branch(Step::from_fn("explodes", |_ctx, _n: u32| -> Result<u32, BoxError> {
                panic!("kaboom")
            }))
            .build()
            .expect("valid race");

        let failure = race
            .process(&Context::new(), 1)
            .await
            .expect_err("no branch can win");
        assert_eq!(failure.kind(), FailureKind::NoWinner);
        assert!(matches!(
            failure.cause(),
            Cause::NoWinner(outcomes)
                if matches!(&outcomes[0].reason, BranchReason::Panicked(msg) if msg == "kaboom")
        ));
    }

    #[tokio::test]
    async fn test_cancelled_context_fails_fast() {
        let race = Race::race("any")
            .branch(Step::from_fn("working", |_ctx, n: u32| Ok::<_, BoxError>(n)))
            .build()
            .expect("valid race");
        let ctx = Context::new();
        ctx.cancel();

        let failure = race.process(&ctx, 1).await.expect_err("cancelled");
        assert!(failure.is_cancelled());
        assert_eq!(failure.stage_path().to_string(), "any");
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_deadline_interrupts_running_branches() {
        let first_saw_end = Arc::new(AtomicBool::new(false));
        let second_saw_end = Arc::new(AtomicBool::new(false));
        let race = Race::race("any")
            .branch(watcher("slow", first_saw_end.clone()))
            .branch(watcher("slower", second_saw_end.clone()))
            .build()
            .expect("valid race");

        let ctx = Context::new().with_timeout(Duration::from_millis(50));
        let started = Instant::now();
        let failure = race.process(&ctx, 1).await.expect_err("deadline passed");

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_millis(60));
        assert!(failure.is_timeout());
        assert_eq!(failure.step_name(), "any");
        assert_eq!(failure.stage_path().to_string(), "any");

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(first_saw_end.load(Ordering::SeqCst));
        assert!(second_saw_end.load(Ordering::SeqCst));
        assert_eq!(race.lingering().in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_interrupts_running_contest() {
        let saw_end = Arc::new(AtomicBool::new(false));
        let contest = Contest::builder("pick")
            .branch(watcher("slow", saw_end.clone()))
            .accept(|_ctx, n: &u32| *n > 0)
            .build()
            .expect("valid contest");

        let ctx = Context::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let failure = contest.process(&ctx, 1).await.expect_err("cancelled");

        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(started.elapsed() < Duration::from_millis(30));
        assert_eq!(failure.kind(), FailureKind::Cancelled);
        assert_eq!(failure.step_name(), "pick");

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(saw_end.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_branch_panicking_before_it_starts_is_reported() {
        let race = Race::race("any")
            .branch(Step::from_fn("broken", |_ctx, _n: u32| Err::<u32, _>("down")))
            .branch(PanicsOnCall(StepName::from("eager")))
            .build()
            .expect("valid race");

        let failure = race
            .process(&Context::new(), 1)
            .await
            .expect_err("no branch can win");

        assert!(matches!(
            failure.cause(),
            Cause::NoWinner(outcomes)
                if outcomes.len() == 2
                    && outcomes[1].name == "eager"
                    && matches!(&outcomes[1].reason, BranchReason::Panicked(msg) if msg == "refused")
        ));
    }

    #[tokio::test]
    #[allow(clippy::panic)]
    async fn test_lost_branch_task_keeps_its_place() {
        let race = Race::race("any")
            .branch(Step::from_fn("first", |_ctx, n: u32| Ok::<_, BoxError>(n)))
            .branch(Step::from_fn("second", |_ctx, n: u32| Ok::<_, BoxError>(n)))
            .build()
            .expect("valid race");

        let mut set: JoinSet<()> = JoinSet::new();
        set.spawn(async { panic!("torn down") });
        let error = set
            .join_next()
            .await
            .expect("one task")
            .expect_err("task panicked");

        let outcome = race.lost(1, error);
        assert_eq!(outcome.index, 1);
        assert_eq!(outcome.name, "second");
        assert!(matches!(&outcome.reason, BranchReason::Panicked(msg) if msg == "torn down"));
    }

    #[test]
    fn test_debug_lists_branches() {
        let race = Race::race("any")
            .branch(Step::from_fn("first", |_ctx, n: u32| Ok::<_, BoxError>(n)))
            .build()
            .expect("valid race");

        let rendered = format!("{race:?}");
        assert!(rendered.starts_with("Contest"));
        assert!(rendered.contains("\"first\""));
        assert!(rendered.contains("has_accept: false"));
    }
}
