//! Compose named async steps into flows, routes, races, retries, fallbacks and
//! timeouts.
//!
//! Every connector implements the same [`Composable`] contract as a leaf
//! [`Step`], so they nest freely. A failure anywhere surfaces as a
//! [`Failure`] naming the step that failed and the path of compositions it
//! travelled through.
//!
//! # Example
//!
//! ```rust
//! use kumihimo::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), ConfigError> {
//!     let checkout = Flow::new("checkout")
//!         .then(Step::from_fn("validate", |_ctx, cents: u64| {
//!             if cents == 0 {
//!                 Err::<u64, BoxError>("empty cart".into())
//!             } else {
//!                 Ok(cents)
//!             }
//!         }))
//!         .then(Retry::new(
//!             "charge_retry",
//!             Step::from_fn("charge", |_ctx, cents: u64| Ok::<_, BoxError>(cents)),
//!             3,
//!         )?)
//!         .then(Timeout::new(
//!             "receipt_deadline",
//!             Step::from_fn("receipt", |_ctx, cents: u64| Ok::<_, BoxError>(cents)),
//!             Duration::from_secs(1),
//!         ));
//!
//!     let failure = checkout
//!         .process(&Context::new(), 0)
//!         .await
//!         .expect_err("empty cart");
//!     assert_eq!(failure.step_name(), "validate");
//!     assert_eq!(failure.stage_path().to_string(), "checkout[0]");
//!     Ok(())
//! }
//! ```
//!
//! # Cancellation
//!
//! Cancellation is cooperative. Contest losers and timed-out inner runs are
//! signalled through their [`Context`] but only stop when their own code
//! observes it. Until then they are owned by a [`Lingering`] tracker and
//! their results are discarded.

mod contest;
mod fallback;
mod flow;
mod guard;
mod linger;
mod retry;
mod router;
mod timeout;

// Re-export core types
pub use kumihimo_core::*;

pub use contest::{Contest, ContestBuilder, Race};
pub use fallback::{Fallback, FallbackBuilder};
pub use flow::Flow;
pub use guard::guarded;
pub use linger::{Lingering, DEFAULT_GRACE};
pub use retry::Retry;
pub use router::{Router, RouterBuilder};
pub use timeout::Timeout;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        guarded, Backoff, BoxError, Cause, Composable, ConfigError, Context, Contest, Duplicate,
        Failure, FailureKind, Fallback, Flow, Lingering, Race, Retry, RetryConfig, RouteKey,
        Router, SharedComposable, Step, StepConfig, StepName, Timeout,
    };
}
