use std::{fmt, num::NonZeroUsize, sync::Arc};

use lru::LruCache;
use parking_lot::Mutex;

/// Nonces from our own version messages, most recent first.
/// Clones share the same cache, so every [crate::Connector] in a process can be handed one.
#[derive(Clone)]
pub struct NonceCache {
    inner: Arc<Mutex<LruCache<u64, ()>>>,
}

impl NonceCache {
    pub const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(50) {
        Some(capacity) => capacity,
        None => unreachable!(),
    };

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Evicts the least recently inserted nonce when full.
    pub fn insert(&self, nonce: u64) {
        self.inner.lock().put(nonce, ());
    }

    pub fn contains(&self, nonce: u64) -> bool {
        self.inner.lock().contains(&nonce)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NonceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NonceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("NonceCache")
            .field("len", &inner.len())
            .field("capacity", &inner.cap())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest() {
        let cache = NonceCache::new();
        for nonce in 0..=50 {
            cache.insert(nonce);
        }
        assert_eq!(cache.len(), 50);
        assert!(!cache.contains(0));
        assert!(cache.contains(1));
        assert!(cache.contains(50));
    }

    #[test]
    fn clones_share_entries() {
        let cache = NonceCache::with_capacity(NonZeroUsize::new(4).unwrap());
        let other = cache.clone();
        other.insert(7);
        assert!(cache.contains(7));
        assert!(!NonceCache::new().contains(7));
    }

    #[test]
    fn concurrent_inserts() {
        let cache = NonceCache::new();
        std::thread::scope(|scope| {
            for thread in 0..8u64 {
                let cache = cache.clone();
                scope.spawn(move || {
                    for i in 0..100 {
                        cache.insert(thread * 1000 + i);
                    }
                });
            }
        });
        assert_eq!(cache.len(), 50);
    }
}
