//! Conditional composition.

use async_trait::async_trait;
use kumihimo_core::{
    shared, Composable, ConfigError, Context, Failure, RouteKey, SharedComposable, Stage, StepName,
};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

type Classifier<T> = Box<dyn Fn(&Context, &T) -> RouteKey + Send + Sync>;

/// Dispatches each value to exactly one branch chosen by a classifier.
///
/// The classifier must be a pure function of the value and context; it may run
/// again when the router sits inside a retry. A key without a branch falls
/// through to the default branch, and without a default it is reported as a
/// configuration failure naming the key.
///
/// # Examples
///
/// ```
/// use kumihimo::prelude::*;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), ConfigError> {
/// let router = Router::builder("by_sign", |_ctx, n: &i64| if *n < 0 { "neg" } else { "pos" })
///     .route("neg", Step::from_fn("abs", |_ctx, n: i64| Ok::<_, BoxError>(-n)))
///     .route("pos", Step::from_fn("keep", |_ctx, n: i64| Ok::<_, BoxError>(n)))
///     .build()?;
///
/// assert_eq!(router.process(&Context::new(), -4).await.ok(), Some(4));
/// # Ok(())
/// # }
/// ```
pub struct Router<T> {
    name: StepName,
    classify: Classifier<T>,
    routes: HashMap<RouteKey, SharedComposable<T>>,
    default: Option<SharedComposable<T>>,
}

impl<T> fmt::Debug for Router<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

impl<T: Send + 'static> Router<T> {
    /// Starts building a router around a classifier.
    pub fn builder<F, K>(name: impl Into<StepName>, classify: F) -> RouterBuilder<T>
    where
        F: Fn(&Context, &T) -> K + Send + Sync + 'static,
        K: Into<RouteKey>,
    {
        RouterBuilder {
            name: name.into(),
            classify: Box::new(move |ctx, value| classify(ctx, value).into()),
            routes: HashMap::new(),
            default: None,
        }
    }

    /// Returns `true` if a branch is registered for `key`.
    pub fn has_route(&self, key: &str) -> bool {
        self.routes.contains_key(key)
    }

    /// Returns the registered route keys.
    pub fn route_keys(&self) -> impl Iterator<Item = &RouteKey> {
        self.routes.keys()
    }
}

#[async_trait]
impl<T: Send + 'static> Composable<T> for Router<T> {
    fn name(&self) -> &StepName {
        &self.name
    }

    async fn process(&self, ctx: &Context, input: T) -> Result<T, Failure> {
        let key = (self.classify)(ctx, &input);

        let branch = match self.routes.get(&key).or(self.default.as_ref()) {
            Some(branch) => branch,
            None => {
                warn!("Router '{}' has no branch for route '{}'", self.name, key);
                return Err(Failure::configuration(
                    self.name.clone(),
                    ConfigError::UnmappedRoute(key.clone()),
                )
                .within(Stage::route(self.name.clone(), key)));
            }
        };

        debug!(
            "Router '{}' dispatching route '{}' to '{}'",
            self.name,
            key,
            branch.name()
        );
        branch
            .process(ctx, input)
            .await
            .map_err(|failure| failure.within(Stage::route(self.name.clone(), key)))
    }
}

/// Builder for [`Router`].
pub struct RouterBuilder<T> {
    name: StepName,
    classify: Classifier<T>,
    routes: HashMap<RouteKey, SharedComposable<T>>,
    default: Option<SharedComposable<T>>,
}

impl<T: Send + 'static> RouterBuilder<T> {
    /// Registers the branch for `key`, replacing any earlier one.
    pub fn route<C: Composable<T> + 'static>(
        mut self,
        key: impl Into<RouteKey>,
        branch: C,
    ) -> Self {
        self.routes.insert(key.into(), shared(branch));
        self
    }

    /// Sets the branch used for keys without a registered route.
    pub fn default_route<C: Composable<T> + 'static>(mut self, branch: C) -> Self {
        self.default = Some(shared(branch));
        self
    }

    /// Builds the router.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoRoutes`] if neither routes nor a default were
    /// registered.
    pub fn build(self) -> Result<Router<T>, ConfigError> {
        if self.routes.is_empty() && self.default.is_none() {
            return Err(ConfigError::NoRoutes);
        }

        Ok(Router {
            name: self.name,
            classify: self.classify,
            routes: self.routes,
            default: self.default,
        })
    }
}
