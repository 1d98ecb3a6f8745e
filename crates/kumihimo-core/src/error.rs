//! Failure records and their causes.

use crate::stage::{RouteKey, Stage, StagePath};
use crate::step::StepName;
use std::fmt;
use thiserror::Error;
use tokio::time::Instant;

/// Boxed error returned by step bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Structural misuse, detected while assembling or dispatching a composition.
///
/// These are programming errors. Connectors never retry, race or fall back
/// past them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The classifier produced a key with no branch and there is no default.
    #[error("unmapped route '{0}' and no default branch")]
    UnmappedRoute(RouteKey),

    /// A router was built without any route or default.
    #[error("router has no routes and no default")]
    NoRoutes,

    /// A connector that needs children was built without any.
    #[error("{0} needs at least one branch")]
    Empty(&'static str),

    /// A flow mutation addressed an index outside the step list.
    #[error("index {index} out of range for flow of length {len}")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The flow length at the time of the call.
        len: usize,
    },

    /// A retry was configured with zero attempts.
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    /// Backoff parameters are invalid.
    #[error("invalid backoff: {0}")]
    InvalidBackoff(&'static str),
}

/// Why a contest branch did not win.
#[derive(Debug)]
#[non_exhaustive]
pub enum BranchReason {
    /// The branch returned a failure.
    Failed(Failure),
    /// The branch succeeded but its value did not satisfy the acceptance predicate.
    Rejected,
    /// The branch task panicked or was aborted.
    Panicked(String),
}

/// Outcome of a single contest branch that did not win.
#[derive(Debug)]
pub struct BranchOutcome {
    /// Branch name.
    pub name: StepName,
    /// Registration index of the branch.
    pub index: usize,
    /// Why the branch lost.
    pub reason: BranchReason,
}

impl fmt::Display for BranchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            BranchReason::Failed(failure) => write!(f, "{}: failed ({})", self.name, failure),
            BranchReason::Rejected => {
                write!(f, "{}: did not meet acceptance criterion", self.name)
            }
            BranchReason::Panicked(msg) => write!(f, "{}: panicked ({})", self.name, msg),
        }
    }
}

fn list_outcomes(outcomes: &[BranchOutcome]) -> String {
    outcomes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The underlying reason carried by a [`Failure`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Cause {
    /// Leaf business logic reported an error.
    #[error("{0}")]
    Step(#[source] BoxError),

    /// Structural misuse.
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    /// The governing context was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// A timeout or the context deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A retry ran out of attempts. `last` is the final attempt's cause.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Cause of the last attempt.
        #[source]
        last: Box<Cause>,
    },

    /// No contest branch succeeded and satisfied acceptance.
    #[error("no winner among {} branches: {}", .0.len(), list_outcomes(.0))]
    NoWinner(Vec<BranchOutcome>),
}

/// Coarse classification of a [`Failure`], one per [`Cause`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Leaf step error.
    Step,
    /// Configuration error.
    Configuration,
    /// Cancellation.
    Cancelled,
    /// Deadline or timeout.
    DeadlineExceeded,
    /// Retry exhaustion.
    Exhausted,
    /// Contest or race without a winner.
    NoWinner,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Step => "step",
            FailureKind::Configuration => "configuration",
            FailureKind::Cancelled => "cancelled",
            FailureKind::DeadlineExceeded => "deadline_exceeded",
            FailureKind::Exhausted => "exhausted",
            FailureKind::NoWinner => "no_winner",
        };
        f.write_str(label)
    }
}

impl Cause {
    /// Classifies this cause.
    pub fn kind(&self) -> FailureKind {
        match self {
            Cause::Step(_) => FailureKind::Step,
            Cause::Configuration(_) => FailureKind::Configuration,
            Cause::Cancelled => FailureKind::Cancelled,
            Cause::DeadlineExceeded => FailureKind::DeadlineExceeded,
            Cause::Exhausted { .. } => FailureKind::Exhausted,
            Cause::NoWinner(_) => FailureKind::NoWinner,
        }
    }
}

/// A structured failure: which step failed, the path of compositions it
/// travelled through, and why.
///
/// The stage path is ordered outermost first. A leaf step adds no stage of its
/// own; each composition forwarding the failure prepends one. A failure is
/// never mutated in place: [`within`](Failure::within) and
/// [`into_exhausted`](Failure::into_exhausted) consume it and return a new record.
///
/// # Examples
///
/// ```
/// use kumihimo_core::{Cause, Failure, FailureKind, Stage};
///
/// let failure = Failure::new("charge", Cause::DeadlineExceeded)
///     .within(Stage::index("payment", 1))
///     .within(Stage::index("checkout", 3));
///
/// assert_eq!(failure.step_name(), "charge");
/// assert_eq!(failure.stage_path().names(), vec!["checkout", "payment"]);
/// assert!(failure.is_timeout());
/// assert_eq!(
///     failure.to_string(),
///     "charge failed at checkout[3] > payment[1]: deadline exceeded"
/// );
/// ```
#[derive(Debug)]
pub struct Failure {
    step_name: StepName,
    stage_path: StagePath,
    cause: Cause,
    occurred_at: Instant,
}

impl Failure {
    /// Creates a failure attributed to `step_name` with an empty stage path.
    pub fn new(step_name: impl Into<StepName>, cause: Cause) -> Self {
        Self {
            step_name: step_name.into(),
            stage_path: StagePath::new(),
            cause,
            occurred_at: Instant::now(),
        }
    }

    /// Wraps an error returned by a step body.
    ///
    /// If the error already is a [`Failure`] (the body delegated to a nested
    /// composition) it is returned as is. A bare [`Cause`], typically the
    /// context's own from [`Context::done`](crate::Context::done), keeps its
    /// kind.
    pub fn from_step_error(step_name: impl Into<StepName>, error: BoxError) -> Self {
        let error = match error.downcast::<Failure>() {
            Ok(failure) => return *failure,
            Err(error) => error,
        };
        match error.downcast::<Cause>() {
            Ok(cause) => Self::new(step_name, *cause),
            Err(error) => Self::new(step_name, Cause::Step(error)),
        }
    }

    /// Creates a configuration failure.
    pub fn configuration(step_name: impl Into<StepName>, error: ConfigError) -> Self {
        Self::new(step_name, Cause::Configuration(error))
    }

    /// Returns this failure with `stage` prepended to its path.
    pub fn within(mut self, stage: Stage) -> Self {
        self.stage_path = self.stage_path.prepended(stage);
        self
    }

    /// Returns this failure with its cause wrapped as retry exhaustion.
    pub fn into_exhausted(mut self, attempts: u32) -> Self {
        let last = std::mem::replace(&mut self.cause, Cause::Cancelled);
        self.cause = Cause::Exhausted {
            attempts,
            last: Box::new(last),
        };
        self
    }

    /// Name of the step (or composition) the failure is attributed to.
    pub fn step_name(&self) -> &StepName {
        &self.step_name
    }

    /// Compositions the failure travelled through, outermost first.
    pub fn stage_path(&self) -> &StagePath {
        &self.stage_path
    }

    /// The direct cause.
    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    /// Consumes the failure and returns its cause.
    pub fn into_cause(self) -> Cause {
        self.cause
    }

    /// When the failure was first recorded.
    pub fn occurred_at(&self) -> Instant {
        self.occurred_at
    }

    /// Classification of the direct cause.
    pub fn kind(&self) -> FailureKind {
        self.cause.kind()
    }

    /// The cause with any retry exhaustion unwrapped.
    pub fn root_cause(&self) -> &Cause {
        let mut cause = &self.cause;
        while let Cause::Exhausted { last, .. } = cause {
            cause = last.as_ref();
        }
        cause
    }

    /// Number of attempts made, if this failure is a retry exhaustion.
    pub fn attempts(&self) -> Option<u32> {
        match &self.cause {
            Cause::Exhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Returns `true` if the root cause is an elapsed deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self.root_cause(), Cause::DeadlineExceeded)
    }

    /// Returns `true` if the root cause is cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), Cause::Cancelled)
    }

    /// Returns `true` if the root cause is a configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self.root_cause(), Cause::Configuration(_))
    }

    /// Downcasts the step body's error to a concrete type.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self.root_cause() {
            Cause::Step(error) => error.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stage_path.is_empty() {
            write!(f, "{} failed: {}", self.step_name, self.cause)
        } else {
            write!(
                f,
                "{} failed at {}: {}",
                self.step_name, self.stage_path, self.cause
            )
        }
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error, PartialEq)]
    #[error("amount {0} is negative")]
    struct NegativeAmount(i64);

    #[test]
    fn test_error_display() {
        let failure = Failure::new("validate", Cause::Step("bad email".into()));
        assert_eq!(failure.to_string(), "validate failed: bad email");

        let failure = failure.within(Stage::index("signup", 0));
        assert_eq!(failure.to_string(), "validate failed at signup[0]: bad email");
    }

    #[test]
    fn test_config_error_display() {
        assert_eq!(
            ConfigError::IndexOutOfRange { index: 4, len: 2 }.to_string(),
            "index 4 out of range for flow of length 2"
        );
        assert_eq!(
            ConfigError::UnmappedRoute(RouteKey::new("mars")).to_string(),
            "unmapped route 'mars' and no default branch"
        );
    }

    #[test]
    fn test_exhaustion_keeps_root_cause() {
        let failure = Failure::new("charge", Cause::DeadlineExceeded)
            .within(Stage::attempt("charge_retry", 3))
            .into_exhausted(3);

        assert_eq!(failure.kind(), FailureKind::Exhausted);
        assert_eq!(failure.attempts(), Some(3));
        assert!(failure.is_timeout());
        assert_eq!(
            failure.cause().to_string(),
            "gave up after 3 attempts: deadline exceeded"
        );
    }

    #[test]
    fn test_downcast_step_error() {
        let failure = Failure::from_step_error("debit", Box::new(NegativeAmount(-5)));
        assert_eq!(failure.downcast_ref::<NegativeAmount>(), Some(&NegativeAmount(-5)));
        assert!(failure.downcast_ref::<std::io::Error>().is_none());
    }

    #[test]
    fn test_context_cause_keeps_its_kind() {
        let failure = Failure::from_step_error("quote", Cause::DeadlineExceeded.into());
        assert_eq!(failure.step_name(), "quote");
        assert!(failure.is_timeout());

        let failure = Failure::from_step_error("quote", Box::new(Cause::Cancelled));
        assert!(failure.is_cancelled());
    }

    #[test]
    fn test_nested_failure_passes_through() {
        let inner = Failure::new("inner_step", Cause::Cancelled).within(Stage::index("sub", 2));
        let failure = Failure::from_step_error("wrapper", Box::new(inner));

        assert_eq!(failure.step_name(), "inner_step");
        assert_eq!(failure.stage_path().names(), vec!["sub"]);
        assert!(failure.is_cancelled());
    }

    #[test]
    fn test_no_winner_display() {
        let cause = Cause::NoWinner(vec![
            BranchOutcome {
                name: StepName::new("fast"),
                index: 0,
                reason: BranchReason::Rejected,
            },
            BranchOutcome {
                name: StepName::new("slow"),
                index: 1,
                reason: BranchReason::Failed(Failure::new("slow", Cause::Step("down".into()))),
            },
        ]);
        assert_eq!(
            cause.to_string(),
            "no winner among 2 branches: fast: did not meet acceptance criterion; \
             slow: failed (slow failed: down)"
        );
    }
}
