//! Core traits and types for the kumihimo composition runtime.
//!
//! This crate holds the abstractions step authors depend on. The connectors
//! that combine steps live in the `kumihimo` crate.
//!
//! # Core Types
//!
//! - [`Composable`] - The single `process` contract every step and connector implements
//! - [`Step`] - A named leaf wrapping an async or sync body
//! - [`Context`] - Cooperative cancellation signal plus optional deadline
//! - [`Duplicate`] - Independent copies for values forked across branches
//! - [`Failure`] - Structured error naming the failing step and its stage path
//!
//! # Configuration
//!
//! - [`Backoff`], [`RetryConfig`], [`StepConfig`] - serde-ready retry and timeout settings

mod config;
mod context;
mod duplicate;
mod error;
mod stage;
mod step;
mod traits;

pub use config::{Backoff, RetryConfig, StepConfig};
pub use context::Context;
pub use duplicate::Duplicate;
pub use error::{BoxError, BranchOutcome, BranchReason, Cause, ConfigError, Failure, FailureKind};
pub use stage::{Position, RouteKey, Stage, StagePath};
pub use step::{BoxFuture, Step, StepName};
pub use traits::{shared, Composable, SharedComposable};
