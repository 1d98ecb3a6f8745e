//! Breadcrumbs recorded as a failure travels out of nested compositions.

use crate::step::StepName;
use std::fmt;

/// Key produced by a router's classifier to pick a branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct RouteKey(String);

impl RouteKey {
    /// Creates a new RouteKey.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RouteKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RouteKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for RouteKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for RouteKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Where inside a composition the failure passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    /// Child index within a flow or fallback.
    Index(usize),
    /// Route selected by a router.
    Route(RouteKey),
    /// Attempt number (1-based) within a retry.
    Attempt(u32),
    /// The composition as a whole (contest, timeout).
    Whole,
}

/// One breadcrumb: a composition's name and the position that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    name: StepName,
    position: Position,
}

impl Stage {
    /// Creates a stage for an arbitrary position.
    pub fn new(name: impl Into<StepName>, position: Position) -> Self {
        Self {
            name: name.into(),
            position,
        }
    }

    /// Stage for a child at `index`.
    pub fn index(name: impl Into<StepName>, index: usize) -> Self {
        Self::new(name, Position::Index(index))
    }

    /// Stage for a selected route.
    pub fn route(name: impl Into<StepName>, key: RouteKey) -> Self {
        Self::new(name, Position::Route(key))
    }

    /// Stage for a retry attempt.
    pub fn attempt(name: impl Into<StepName>, attempt: u32) -> Self {
        Self::new(name, Position::Attempt(attempt))
    }

    /// Stage for a composition as a whole.
    pub fn whole(name: impl Into<StepName>) -> Self {
        Self::new(name, Position::Whole)
    }

    /// Name of the composition.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// Position within the composition.
    pub fn position(&self) -> &Position {
        &self.position
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.position {
            Position::Index(i) => write!(f, "{}[{}]", self.name, i),
            Position::Route(key) => write!(f, "{}{{{}}}", self.name, key),
            Position::Attempt(n) => write!(f, "{}#{}", self.name, n),
            Position::Whole => write!(f, "{}", self.name),
        }
    }
}

/// Ordered breadcrumbs, outermost composition first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagePath(Vec<Stage>);

impl StagePath {
    /// Creates an empty path.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Returns a path with `stage` in front of this one.
    pub(crate) fn prepended(mut self, stage: Stage) -> Self {
        self.0.insert(0, stage);
        self
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the failure originated in a leaf called directly.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates stages from outermost to innermost.
    pub fn iter(&self) -> std::slice::Iter<'_, Stage> {
        self.0.iter()
    }

    /// Returns the stages as a slice.
    pub fn as_slice(&self) -> &[Stage] {
        &self.0
    }

    /// Returns only the composition names, outermost first.
    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|stage| stage.name.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a StagePath {
    type Item = &'a Stage;
    type IntoIter = std::slice::Iter<'a, Stage>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for StagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" > ")?;
            }
            write!(f, "{stage}")?;
        }
        Ok(())
    }
}
