//! Identity-based deduplication.
//!
//! When pages overlap (a refresh returning items the local list already
//! holds), the pager removes the local copies before merging. An
//! [`IdentityProvider`] defines what "the same item" means.

use std::sync::Arc;

/// Decides item identity for deduplication.
pub trait IdentityProvider<T>: Send + Sync {
    /// Returns `from` without the members identity-equal to any of
    /// `items`.
    fn delete(&self, from: Vec<T>, items: &[T]) -> Vec<T>;
}

impl<T, P> IdentityProvider<T> for Arc<P>
where
    P: IdentityProvider<T> + ?Sized,
{
    fn delete(&self, from: Vec<T>, items: &[T]) -> Vec<T> {
        self.as_ref().delete(from, items)
    }
}

/// Identity by an extracted key.
pub struct KeyIdentity<F> {
    key: F,
}

impl<F> KeyIdentity<F> {
    /// Identity provider comparing items by `key(item)`.
    pub fn new<T, Id>(key: F) -> Self
    where
        F: Fn(&T) -> Id,
        Id: PartialEq,
    {
        KeyIdentity { key }
    }
}

impl<T, Id, F> IdentityProvider<T> for KeyIdentity<F>
where
    Id: PartialEq,
    F: Fn(&T) -> Id + Send + Sync,
{
    fn delete(&self, from: Vec<T>, items: &[T]) -> Vec<T> {
        from.into_iter()
            .filter(|candidate| {
                let candidate_key = (self.key)(candidate);
                !items.iter().any(|item| (self.key)(item) == candidate_key)
            })
            .collect()
    }
}
