use crate::byte_view::ByteView;
use crate::lru::LruStore;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Eviction hook. Observability only: it can't veto or alter an eviction.
pub type OnEvicted = Arc<dyn Fn(&str, &ByteView) + Send + Sync + 'static>;

/// Thread-safe owner of a group's [`LruStore`].
///
/// The lock is taken for a single lookup or insertion and is never held while loading a value. The eviction hook
/// runs after the lock is released, so it may safely read from the same cache; a panic in the hook is logged and
/// swallowed.
pub struct MainCache {
    name:       String,
    lru:        Mutex<LruStore<ByteView>>,
    on_evicted: Option<OnEvicted>,
    evictions:  AtomicU64,
}

impl MainCache {
    pub fn new(name: impl Into<String>, max_bytes: u64, on_evicted: Option<OnEvicted>) -> Self {
        Self {
            name: name.into(),
            lru: Mutex::new(LruStore::new(max_bytes)),
            on_evicted,
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<ByteView> {
        self.lru.lock().get(key).cloned()
    }

    pub fn add(&self, key: &str, value: ByteView) {
        let evicted = self.lru.lock().add(key, value);

        if evicted.is_empty() {
            return;
        }

        self.evictions.fetch_add(evicted.len() as u64, Ordering::Relaxed);

        if let Some(ref on_evicted) = self.on_evicted {
            for (key, value) in evicted {
                if catch_unwind(AssertUnwindSafe(|| on_evicted(&key, &value))).is_err() {
                    warn!("[{}] eviction hook panicked on key '{key}'", self.name);
                }
            }
        }
    }

    /// Presence check which doesn't count as a use of the entry.
    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.lru.lock().contains(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.lru.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lru.lock().is_empty()
    }

    #[inline]
    pub fn nbytes(&self) -> u64 {
        self.lru.lock().nbytes()
    }

    #[inline]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MainCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lru = self.lru.lock();
        f.debug_struct("MainCache")
            .field("name", &self.name)
            .field("len", &lru.len())
            .field("nbytes", &lru.nbytes())
            .field("max_bytes", &lru.max_bytes())
            .finish()
    }
}
