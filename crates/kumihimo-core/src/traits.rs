//! The uniform composition contract.

use crate::context::Context;
use crate::error::Failure;
use crate::step::StepName;
use async_trait::async_trait;
use std::sync::Arc;

/// Anything that turns a value into a (possibly transformed) value or a
/// [`Failure`] under a [`Context`].
///
/// Leaf steps and every connector implement this trait, so any of them can
/// nest inside any other. Implement it directly for steps that carry their own
/// state.
///
/// `process` consumes the input. On failure the value is discarded and only
/// the [`Failure`] is returned.
///
/// # Examples
///
/// ```
/// use kumihimo_core::{Composable, Context, Failure, StepName};
/// use async_trait::async_trait;
///
/// struct Shout {
///     name: StepName,
/// }
///
/// #[async_trait]
/// impl Composable<String> for Shout {
///     fn name(&self) -> &StepName {
///         &self.name
///     }
///
///     async fn process(&self, _ctx: &Context, input: String) -> Result<String, Failure> {
///         Ok(input.to_uppercase())
///     }
/// }
/// ```
#[async_trait]
pub trait Composable<T: Send + 'static>: Send + Sync {
    /// Returns the diagnostic name of this composable.
    fn name(&self) -> &StepName;

    /// Processes one value.
    async fn process(&self, ctx: &Context, input: T) -> Result<T, Failure>;
}

/// Shared handle to a composable, as stored by every connector.
pub type SharedComposable<T> = Arc<dyn Composable<T>>;

#[async_trait]
impl<T, C> Composable<T> for Arc<C>
where
    T: Send + 'static,
    C: Composable<T> + ?Sized,
{
    fn name(&self) -> &StepName {
        (**self).name()
    }

    async fn process(&self, ctx: &Context, input: T) -> Result<T, Failure> {
        (**self).process(ctx, input).await
    }
}

#[async_trait]
impl<T, C> Composable<T> for Box<C>
where
    T: Send + 'static,
    C: Composable<T> + ?Sized,
{
    fn name(&self) -> &StepName {
        (**self).name()
    }

    async fn process(&self, ctx: &Context, input: T) -> Result<T, Failure> {
        (**self).process(ctx, input).await
    }
}

/// Converts a composable into the shared form connectors store.
pub fn shared<T, C>(composable: C) -> SharedComposable<T>
where
    T: Send + 'static,
    C: Composable<T> + 'static,
{
    Arc::new(composable)
}
