use std::hash::Hash;
use std::ops::Deref;

/// Extracts the lookup key from an element stored in a [`HashPool`][crate::HashPool].
///
/// The key is borrowed from the element, so the pool stores no separate copy of it.
pub trait KeyExtractor<T> {
    /// The key type. Two elements are duplicates if their keys compare equal.
    type Key: ?Sized + Hash + Eq;

    /// Returns the key of `item`.
    fn extract(item: &T) -> &Self::Key;
}

/// The element is its own key.
///
/// # Examples
///
/// ```
/// use slot_pool::{ByValue, HashPool};
///
/// let mut pool = HashPool::<u64, ByValue>::new();
/// pool.insert_value_slot(7).unwrap();
///
/// assert!(pool.find_value(&7).is_some());
/// ```
#[expect(clippy::exhaustive_structs, reason = "intentionally an empty struct")]
#[derive(Clone, Copy, Debug, Default)]
pub struct ByValue;

impl<T: Hash + Eq> KeyExtractor<T> for ByValue {
    type Key = T;

    #[inline]
    fn extract(item: &T) -> &T {
        item
    }
}

/// The key is whatever the element dereferences to, e.g. `str` for a `String` element.
///
/// # Examples
///
/// ```
/// use slot_pool::{ByDeref, HashPool};
///
/// let mut pool = HashPool::<String, ByDeref>::new();
/// pool.insert_value_slot("foo".to_string()).unwrap();
///
/// assert!(pool.find_value("foo").is_some());
/// ```
#[expect(clippy::exhaustive_structs, reason = "intentionally an empty struct")]
#[derive(Clone, Copy, Debug, Default)]
pub struct ByDeref;

impl<T> KeyExtractor<T> for ByDeref
where
    T: Deref,
    T::Target: Hash + Eq,
{
    type Key = T::Target;

    #[inline]
    fn extract(item: &T) -> &T::Target {
        item
    }
}

/// An element that carries its own lookup key, for use with [`ByKeyed`].
pub trait Keyed {
    /// The key type.
    type Key: ?Sized + Hash + Eq;

    /// Returns the key of this element.
    fn key(&self) -> &Self::Key;
}

/// The key is provided by the element's [`Keyed`] implementation.
///
/// # Examples
///
/// ```
/// use slot_pool::{ByKeyed, HashPool, Keyed};
///
/// struct Account {
///     name: String,
///     balance: i64,
/// }
///
/// impl Keyed for Account {
///     type Key = str;
///
///     fn key(&self) -> &str {
///         &self.name
///     }
/// }
///
/// let mut pool = HashPool::<Account, ByKeyed>::new();
/// pool.insert_value_slot(Account {
///     name: "alice".to_string(),
///     balance: 10,
/// })
/// .unwrap();
///
/// assert_eq!(pool.get_value("alice").unwrap().balance, 10);
/// ```
#[expect(clippy::exhaustive_structs, reason = "intentionally an empty struct")]
#[derive(Clone, Copy, Debug, Default)]
pub struct ByKeyed;

impl<T: Keyed> KeyExtractor<T> for ByKeyed {
    type Key = T::Key;

    #[inline]
    fn extract(item: &T) -> &T::Key {
        item.key()
    }
}
