use std::fmt;
use std::hash::Hash;

/// A structured cache key.
///
/// Keys compare structurally, so two requests for the same data must build
/// equal keys. `entity` names the kind of data and selects the fetcher.
pub trait CacheKey: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {
    fn entity(&self) -> &'static str;
}

/// Selects entries for invalidate, cancel and remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFilter<K> {
    /// Every entry in the store
    All,
    /// Every entry of one entity, whatever its qualifiers
    Entity(&'static str),
    /// Exactly one key
    Exact(K),
}

impl<K: CacheKey> KeyFilter<K> {
    pub fn matches(&self, key: &K) -> bool {
        match self {
            KeyFilter::All => true,
            KeyFilter::Entity(entity) => key.entity() == *entity,
            KeyFilter::Exact(exact) => exact == key,
        }
    }
}

impl<K: CacheKey> From<K> for KeyFilter<K> {
    fn from(key: K) -> Self {
        KeyFilter::Exact(key)
    }
}
