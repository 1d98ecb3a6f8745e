//! Bounded tracking of work that outlives the call that started it.

use kumihimo_core::StepName;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Default time a detached task may keep running after its result was discarded.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(30);

/// Keeps track of tasks whose result is no longer wanted.
///
/// Cancellation is cooperative, so a losing contest branch or a timed-out
/// inner composition keeps running until it next observes its context. Such
/// tasks are handed to a `Lingering` tracker: it lets them finish for up to
/// `grace`, then aborts whatever is left at its next await point. Work that
/// never yields cannot be aborted and runs to completion regardless.
///
/// Clones share the same counter, so one tracker can be handed to several
/// connectors.
#[derive(Debug, Clone)]
pub struct Lingering {
    grace: Duration,
    in_flight: Arc<AtomicUsize>,
}

impl Default for Lingering {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}

impl Lingering {
    /// Creates a tracker that aborts detached tasks after `grace`.
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Maximum lifetime granted to detached tasks.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Number of detached tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Takes ownership of the still-running tasks in `tasks`.
    ///
    /// Results are discarded. Must be called from within a tokio runtime.
    pub fn detach<R: Send + 'static>(&self, owner: &StepName, mut tasks: JoinSet<R>) {
        let count = tasks.len();
        if count == 0 {
            return;
        }

        debug!("'{}' detached {} lingering task(s)", owner, count);
        self.in_flight.fetch_add(count, Ordering::SeqCst);

        let in_flight = self.in_flight.clone();
        let grace = self.grace;
        let owner = owner.clone();

        tokio::spawn(async move {
            let drained = tokio::time::timeout(grace, async {
                while tasks.join_next().await.is_some() {
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await;

            if drained.is_err() {
                warn!(
                    "'{}' aborting {} task(s) still running after {:?}",
                    owner,
                    tasks.len(),
                    grace
                );
                tasks.abort_all();
                while tasks.join_next().await.is_some() {
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            }
        });
    }
}
