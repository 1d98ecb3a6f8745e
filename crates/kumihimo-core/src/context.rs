//! Cancellation and deadline context threaded through every composition.

use crate::error::Cause;
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Carries a cancellation signal and an optional deadline.
///
/// A context is cheap to clone; clones share the same signal. Derived
/// contexts ([`child`](Context::child), [`with_deadline`](Context::with_deadline),
/// [`with_timeout`](Context::with_timeout)) are cancelled whenever their parent
/// is, and their deadline is never later than the parent's.
///
/// Cancellation is cooperative. Code that wants to stop early checks
/// [`is_done`](Context::is_done) at safe points or races its work against
/// [`done`](Context::done).
///
/// # Examples
///
/// ```
/// use kumihimo_core::Context;
/// use std::time::Duration;
///
/// let parent = Context::new().with_timeout(Duration::from_secs(5));
/// let child = parent.with_timeout(Duration::from_secs(60));
///
/// // The child keeps the parent's sooner deadline.
/// assert_eq!(child.deadline(), parent.deadline());
///
/// parent.cancel();
/// assert!(child.is_cancelled());
/// ```
#[derive(Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    started_at: Instant,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates a root context with no deadline.
    pub fn new() -> Self {
        Self::from_token(CancellationToken::new())
    }

    /// Creates a root context driven by an existing cancellation token.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
            started_at: Instant::now(),
        }
    }

    /// Derives a context that is cancelled with this one but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            started_at: Instant::now(),
        }
    }

    /// Derives a child whose deadline is the sooner of this context's deadline
    /// and `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut child = self.child();
        child.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        child
    }

    /// Derives a child that expires `timeout` from now, or earlier if this
    /// context expires first.
    ///
    /// A timeout too large to represent as an instant adds no deadline; the
    /// child keeps this context's deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.child(),
        }
    }

    /// Signals cancellation to this context and all of its descendants.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once this context or an ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left until the deadline, saturating at zero.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns `true` if the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| deadline <= Instant::now())
    }

    /// Returns `true` if the context is cancelled or expired.
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.is_expired()
    }

    /// Returns why the context is done, or `None` while it is still live.
    ///
    /// Cancellation takes precedence over expiry.
    pub fn err(&self) -> Option<Cause> {
        if self.is_cancelled() {
            Some(Cause::Cancelled)
        } else if self.is_expired() {
            Some(Cause::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Waits until the context is cancelled or its deadline passes.
    pub async fn done(&self) -> Cause {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Cause::Cancelled,
                    _ = sleep_until(deadline) => Cause::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                Cause::Cancelled
            }
        }
    }

    /// Returns a handle to the underlying cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Returns the time elapsed since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_child_inherits_cancellation() {
        let parent = Context::new();
        let child = parent.child();
        let grandchild = child.child();

        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(grandchild.is_cancelled());

        parent.cancel();
        assert!(parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_the_sooner_one() {
        let parent = Context::new().with_timeout(Duration::from_millis(100));
        let later = parent.with_timeout(Duration::from_secs(10));
        let sooner = parent.with_timeout(Duration::from_millis(10));

        assert_eq!(later.deadline(), parent.deadline());
        assert!(sooner.deadline() < parent.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_keeps_parent_deadline() {
        let unbounded = Context::new().with_timeout(Duration::MAX);
        assert_eq!(unbounded.deadline(), None);
        assert!(unbounded.err().is_none());

        let parent = Context::new().with_timeout(Duration::from_millis(100));
        let child = parent.with_timeout(Duration::MAX);
        assert_eq!(child.deadline(), parent.deadline());

        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_reports_deadline() {
        let ctx = Context::new().with_timeout(Duration::from_millis(50));
        assert!(ctx.err().is_none());

        let started = Instant::now();
        let cause = ctx.done().await;
        assert!(matches!(cause, Cause::DeadlineExceeded));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_millis(60));
        assert!(ctx.is_expired());
        assert!(matches!(ctx.err(), Some(Cause::DeadlineExceeded)));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_done_reports_cancellation() {
        let ctx = Context::new();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.done().await });

        ctx.cancel();
        let cause = handle.await.expect("waiter task");
        assert!(matches!(cause, Cause::Cancelled));
        assert!(matches!(ctx.err(), Some(Cause::Cancelled)));
    }
}
