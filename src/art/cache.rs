use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use super::ArtHandle;

/// `"artist|title"`, exact and case-sensitive.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArtKey(String);

impl ArtKey {
    pub fn new(artist: &str, title: &str) -> Self {
        Self(format!("{}|{}", artist, title))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session-lifetime map of resolved artwork. Only successful resolutions are
/// stored; there is no eviction, only a wholesale [`ArtCache::clear`].
#[derive(Default)]
pub struct ArtCache {
    entries: RwLock<HashMap<ArtKey, ArtHandle>>,
}

impl ArtCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ArtKey) -> Option<ArtHandle> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    /// Idempotent: writing the same key again just replaces the handle.
    pub fn insert(&self, key: ArtKey, handle: ArtHandle) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, handle);
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_exact() {
        assert_eq!(ArtKey::new("Daft Punk", "Da Funk").as_str(), "Daft Punk|Da Funk");
        assert_ne!(ArtKey::new("daft punk", "Da Funk"), ArtKey::new("Daft Punk", "Da Funk"));
        assert_ne!(ArtKey::new("Daft Punk ", "Da Funk"), ArtKey::new("Daft Punk", "Da Funk"));
    }

    #[test]
    fn test_insert_get_clear() {
        let cache = ArtCache::new();
        let key = ArtKey::new("A", "T");
        assert!(cache.get(&key).is_none());

        cache.insert(key.clone(), ArtHandle::new(1));
        cache.insert(key.clone(), ArtHandle::new(1));
        assert_eq!(cache.get(&key), Some(ArtHandle::new(1)));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
