use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of a [`Group`](crate::group::Group).
#[derive(Debug, Default)]
pub struct GroupStats {
    pub(crate) gets:            AtomicU64,
    pub(crate) cache_hits:      AtomicU64,
    pub(crate) loads:           AtomicU64,
    pub(crate) loads_deduped:   AtomicU64,
    pub(crate) peer_loads:      AtomicU64,
    pub(crate) peer_errors:     AtomicU64,
    pub(crate) local_loads:     AtomicU64,
    pub(crate) local_load_errs: AtomicU64,
    pub(crate) server_requests: AtomicU64,
}

/// Point-in-time copy of [`GroupStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Every `get`, including hits.
    pub gets:            u64,
    pub cache_hits:      u64,
    /// Misses that went into the coalescing layer.
    pub loads:           u64,
    /// Loads which were actually executed, i.e. after coalescing.
    pub loads_deduped:   u64,
    pub peer_loads:      u64,
    /// Failed remote fetches; each of them fell back to the local loader.
    pub peer_errors:     u64,
    pub local_loads:     u64,
    pub local_load_errs: u64,
    /// Requests received from other peers.
    pub server_requests: u64,
}

impl GroupStats {
    #[inline(always)]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            gets:            self.gets.load(Ordering::Relaxed),
            cache_hits:      self.cache_hits.load(Ordering::Relaxed),
            loads:           self.loads.load(Ordering::Relaxed),
            loads_deduped:   self.loads_deduped.load(Ordering::Relaxed),
            peer_loads:      self.peer_loads.load(Ordering::Relaxed),
            peer_errors:     self.peer_errors.load(Ordering::Relaxed),
            local_loads:     self.local_loads.load(Ordering::Relaxed),
            local_load_errs: self.local_load_errs.load(Ordering::Relaxed),
            server_requests: self.server_requests.load(Ordering::Relaxed),
        }
    }
}
