//! Step names and the leaf [`Step`] composable.

use crate::context::Context;
use crate::error::{BoxError, Failure};
use crate::traits::Composable;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type-safe step name wrapper.
///
/// Names are diagnostic labels: they show up in failure records and logs and
/// are never compared for routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the step name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for StepName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for StepName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Boxed future returned by a step body.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type Body<T> = Arc<dyn Fn(Context, T) -> BoxFuture<'static, Result<T, BoxError>> + Send + Sync>;

/// A named leaf unit of work.
///
/// The body receives its own handle to the [`Context`] and the value, and
/// returns the transformed value or an error. Any error type convertible into
/// [`BoxError`] is accepted; it becomes the [`Cause::Step`](crate::Cause::Step)
/// of the resulting [`Failure`].
///
/// Cancellation is cooperative: a body that never looks at
/// [`Context::is_done`] or awaits [`Context::done`] runs to completion even
/// after its context was cancelled.
///
/// # Examples
///
/// ```
/// use kumihimo_core::{Composable, Context, Step};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let double = Step::new("double", |_ctx, n: u32| async move {
///     Ok::<_, std::io::Error>(n * 2)
/// });
///
/// let out = double.process(&Context::new(), 21).await;
/// assert_eq!(out.ok(), Some(42));
/// # }
/// ```
pub struct Step<T> {
    name: StepName,
    body: Body<T>,
}

impl<T> Clone for Step<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            body: self.body.clone(),
        }
    }
}

impl<T> fmt::Debug for Step<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

impl<T: Send + 'static> Step<T> {
    /// Wraps an async body under the given name.
    pub fn new<F, Fut, E>(name: impl Into<StepName>, body: F) -> Self
    where
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let body: Body<T> = Arc::new(move |ctx, input| {
            let fut = body(ctx, input);
            Box::pin(async move { fut.await.map_err(Into::into) })
        });
        Self {
            name: name.into(),
            body,
        }
    }

    /// Wraps a synchronous body under the given name.
    pub fn from_fn<F, E>(name: impl Into<StepName>, body: F) -> Self
    where
        F: Fn(&Context, T) -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let body: Body<T> = Arc::new(move |ctx, input| {
            let result = body(&ctx, input).map_err(Into::into);
            Box::pin(std::future::ready(result))
        });
        Self {
            name: name.into(),
            body,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Composable<T> for Step<T> {
    fn name(&self) -> &StepName {
        &self.name
    }

    async fn process(&self, ctx: &Context, input: T) -> Result<T, Failure> {
        (self.body)(ctx.clone(), input)
            .await
            .map_err(|err| Failure::from_step_error(self.name.clone(), err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use tokio_test::{assert_err, assert_ok, block_on};

    #[test]
    fn test_step_name() {
        let name = StepName::new("test");
        assert_eq!(name.as_str(), "test");

        let name: StepName = "test".into();
        assert_eq!(name, "test");
    }

    #[tokio::test]
    async fn test_step_transforms_value() {
        let step = Step::new("append", |_ctx, mut v: Vec<u8>| async move {
            v.push(1);
            Ok::<_, std::io::Error>(v)
        });

        let out = step.process(&Context::new(), vec![0]).await;
        assert_eq!(out.ok(), Some(vec![0, 1]));
        assert_eq!(step.name(), "append");
    }

    #[tokio::test]
    async fn test_step_failure_is_attributed() {
        let step = Step::from_fn("reject", |_ctx, _v: u8| Err::<u8, _>("bad input"));

        let failure = step
            .process(&Context::new(), 1)
            .await
            .expect_err("step should fail");
        assert_eq!(failure.step_name(), "reject");
        assert!(failure.stage_path().is_empty());
        assert_eq!(failure.kind(), FailureKind::Step);
        assert_eq!(failure.cause().to_string(), "bad input");
    }

    #[tokio::test]
    async fn test_step_body_sees_cancellation() {
        let step = Step::from_fn("peek", |ctx: &Context, _v: bool| {
            Ok::<_, BoxError>(ctx.is_done())
        });
        let ctx = Context::new();
        ctx.cancel();
        assert_eq!(step.process(&ctx, false).await.ok(), Some(true));
    }

    #[tokio::test]
    async fn test_nested_failure_passes_through() {
        let inner = Step::from_fn("inner", |_ctx, _v: u8| Err::<u8, _>("deep"));
        let outer = Step::new("outer", move |ctx: Context, v: u8| {
            let inner = inner.clone();
            async move { inner.process(&ctx, v).await.map_err(BoxError::from) }
        });

        let failure = assert_err!(outer.process(&Context::new(), 1).await);
        assert_eq!(failure.step_name(), "inner");
        assert_eq!(failure.cause().to_string(), "deep");
    }

    #[test]
    fn test_sync_step_with_block_on() {
        let step = Step::from_fn("double", |_ctx, v: u32| Ok::<_, BoxError>(v * 2));
        let out = assert_ok!(block_on(step.process(&Context::new(), 21)));
        assert_eq!(out, 42);
    }
}
