//! Independent copies for values forked across branches and attempts.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::{BuildHasher, Hash};

/// Produces a copy that shares no mutable state with the original.
///
/// Contests give every branch its own duplicate of the input, and retries and
/// fallbacks duplicate it for every attempt. After `duplicate`, mutating one
/// copy must never be observable through the other.
///
/// Shared-ownership types (`Arc`, `Rc`) have no implementation on purpose: a
/// value reaching branches through them would be shared, not duplicated.
/// Types whose `Clone` already copies all backing storage can opt in with
/// [`duplicate_via_clone!`](crate::duplicate_via_clone).
///
/// # Examples
///
/// ```
/// use kumihimo_core::Duplicate;
///
/// let original = vec![vec![1, 2], vec![3]];
/// let mut copy = original.duplicate();
/// copy[0].push(99);
///
/// assert_eq!(original[0], vec![1, 2]);
/// ```
pub trait Duplicate: Sized {
    /// Returns an independent copy of `self`.
    fn duplicate(&self) -> Self;
}

/// Implements [`Duplicate`] in terms of `Clone` for types whose clone is deep.
///
/// # Example
///
/// ```rust
/// use kumihimo_core::{duplicate_via_clone, Duplicate};
///
/// #[derive(Clone, Debug, PartialEq)]
/// pub struct Quote {
///     carrier: String,
///     cents: u64,
/// }
///
/// duplicate_via_clone!(Quote);
///
/// let quote = Quote { carrier: "post".into(), cents: 450 };
/// assert_eq!(quote.duplicate(), quote);
/// ```
#[macro_export]
macro_rules! duplicate_via_clone {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::Duplicate for $ty {
                fn duplicate(&self) -> Self {
                    ::std::clone::Clone::clone(self)
                }
            }
        )+
    };
}

duplicate_via_clone!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
    std::time::Duration,
);

impl<T: Duplicate> Duplicate for Option<T> {
    fn duplicate(&self) -> Self {
        self.as_ref().map(Duplicate::duplicate)
    }
}

impl<T: Duplicate> Duplicate for Box<T> {
    fn duplicate(&self) -> Self {
        Box::new((**self).duplicate())
    }
}

impl<T: Duplicate> Duplicate for Vec<T> {
    fn duplicate(&self) -> Self {
        self.iter().map(Duplicate::duplicate).collect()
    }
}

impl<T: Duplicate> Duplicate for VecDeque<T> {
    fn duplicate(&self) -> Self {
        self.iter().map(Duplicate::duplicate).collect()
    }
}

impl<K, V, S> Duplicate for HashMap<K, V, S>
where
    K: Duplicate + Eq + Hash,
    V: Duplicate,
    S: BuildHasher + Clone,
{
    fn duplicate(&self) -> Self {
        let mut copy = HashMap::with_capacity_and_hasher(self.len(), self.hasher().clone());
        copy.extend(self.iter().map(|(k, v)| (k.duplicate(), v.duplicate())));
        copy
    }
}

impl<T, S> Duplicate for HashSet<T, S>
where
    T: Duplicate + Eq + Hash,
    S: BuildHasher + Clone,
{
    fn duplicate(&self) -> Self {
        let mut copy = HashSet::with_capacity_and_hasher(self.len(), self.hasher().clone());
        copy.extend(self.iter().map(Duplicate::duplicate));
        copy
    }
}

impl<K: Duplicate + Ord, V: Duplicate> Duplicate for BTreeMap<K, V> {
    fn duplicate(&self) -> Self {
        self.iter()
            .map(|(k, v)| (k.duplicate(), v.duplicate()))
            .collect()
    }
}

impl<T: Duplicate + Ord> Duplicate for BTreeSet<T> {
    fn duplicate(&self) -> Self {
        self.iter().map(Duplicate::duplicate).collect()
    }
}

impl<A: Duplicate, B: Duplicate> Duplicate for (A, B) {
    fn duplicate(&self) -> Self {
        (self.0.duplicate(), self.1.duplicate())
    }
}

impl<A: Duplicate, B: Duplicate, C: Duplicate> Duplicate for (A, B, C) {
    fn duplicate(&self) -> Self {
        (self.0.duplicate(), self.1.duplicate(), self.2.duplicate())
    }
}

impl<A: Duplicate, B: Duplicate, C: Duplicate, D: Duplicate> Duplicate for (A, B, C, D) {
    fn duplicate(&self) -> Self {
        (
            self.0.duplicate(),
            self.1.duplicate(),
            self.2.duplicate(),
            self.3.duplicate(),
        )
    }
}
