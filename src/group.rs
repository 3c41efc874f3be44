use crate::byte_view::ByteView;
use crate::cache::{MainCache, OnEvicted};
use crate::error::{CacheError, Result};
use crate::singleflight::CallGroup;
use crate::traits::{Loader, PeerGetter, PeerPicker};
use crate::types::{GroupStats, StatsSnapshot};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, LazyLock};
use tracing::{debug, instrument, warn};

// Groups are registered once and live as long as the process does.
static GROUPS: LazyLock<RwLock<HashMap<String, Arc<Group>>>> = LazyLock::new(|| RwLock::new(HashMap::new()));

/// Creates and registers a group. Shortcut for `Group::builder(name).max_bytes(max_bytes).loader(loader).register()`.
pub fn new_group(name: impl Into<String>, max_bytes: u64, loader: impl Loader) -> Result<Arc<Group>> {
    Group::builder(name).max_bytes(max_bytes).loader(loader).register()
}

/// Finds a registered group by its name.
pub fn get_group(name: &str) -> Option<Arc<Group>> {
    GROUPS.read().get(name).cloned()
}

/// A named cache namespace: local LRU, loader, peer routing and load coalescing in one read path.
///
/// ```ignore
/// let group = Group::builder("scores")
///     .max_bytes(2 << 10)
///     .loader(LoaderFn(|key: String| async move { slow_db_lookup(&key).await }))
///     .register()?;
/// group.register_peers(pool.clone());
///
/// let score = group.get("Tom").await?;
/// ```
pub struct Group {
    name:       String,
    loader:     Arc<dyn Loader>,
    main_cache: MainCache,
    peers:      RwLock<Option<Arc<dyn PeerPicker>>>,
    flight:     CallGroup<ByteView, CacheError>,
    stats:      GroupStats,
}

impl Group {
    pub fn builder(name: impl Into<String>) -> GroupBuilder {
        GroupBuilder {
            name:       name.into(),
            max_bytes:  0,
            loader:     None,
            on_evicted: None,
            peers:      None,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets up peer routing. Expected to be called once; a repeated call replaces the picker.
    pub fn register_peers(&self, peers: Arc<dyn PeerPicker>) {
        let mut guard = self.peers.write();
        if guard.is_some() {
            warn!("[{}] peers are registered more than once", self.name);
        }
        *guard = Some(peers);
    }

    /// Returns the value of `key`, loading it if needed.
    ///
    /// Locally owned keys are loaded with the group's loader and cached. Keys owned by another peer are fetched from
    /// that peer and not cached here; if the peer fails, the value is loaded locally instead.
    #[instrument(level = "trace", skip(self), fields(group = %self.name))]
    pub async fn get(&self, key: &str) -> Result<ByteView> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey);
        }

        GroupStats::bump(&self.stats.gets);

        if let Some(value) = self.main_cache.get(key) {
            debug!("[{}] HIT({key})", self.name);
            GroupStats::bump(&self.stats.cache_hits);
            return Ok(value);
        }

        self.load(key).await
    }

    async fn load(&self, key: &str) -> Result<ByteView> {
        GroupStats::bump(&self.stats.loads);

        self.flight
            .run(key, || async move {
                // Another flight for this key may have completed between our miss and now.
                if let Some(value) = self.main_cache.get(key) {
                    GroupStats::bump(&self.stats.cache_hits);
                    return Ok(value);
                }

                GroupStats::bump(&self.stats.loads_deduped);

                if let Some(peer) = self.pick_peer(key) {
                    match self.get_from_peer(peer.as_ref(), key).await {
                        Ok(value) => {
                            GroupStats::bump(&self.stats.peer_loads);
                            return Ok(value);
                        }
                        Err(err) => {
                            GroupStats::bump(&self.stats.peer_errors);
                            warn!(
                                "[{}] fetching '{key}' from peer {} failed, falling back to local load: {err}",
                                self.name,
                                peer.peer()
                            );
                        }
                    }
                }

                self.get_locally(key).await
            })
            .await
    }

    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        self.peers.read().as_ref().and_then(|peers| peers.pick_peer(key))
    }

    async fn get_from_peer(&self, peer: &dyn PeerGetter, key: &str) -> Result<ByteView> {
        debug!("[{}] PEER({key}) <- {}", self.name, peer.peer());
        let bytes = peer.get(&self.name, key).await?;
        Ok(ByteView::from(bytes))
    }

    async fn get_locally(&self, key: &str) -> Result<ByteView> {
        debug!("[{}] LOAD({key})", self.name);

        let bytes = match self.loader.load(key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                GroupStats::bump(&self.stats.local_load_errs);
                return Err(CacheError::loader(key, err));
            }
        };
        GroupStats::bump(&self.stats.local_loads);

        // The loader gave up its buffer, nothing else can alias it.
        let value = ByteView::from(bytes);
        self.main_cache.add(key, value.clone());
        Ok(value)
    }

    #[inline]
    pub(crate) fn note_server_request(&self) {
        GroupStats::bump(&self.stats.server_requests);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether `key` is held by this node's cache. Doesn't affect LRU order.
    pub fn is_cached(&self, key: &str) -> bool {
        self.main_cache.contains(key)
    }

    pub fn cache_len(&self) -> usize {
        self.main_cache.len()
    }

    pub fn cache_bytes(&self) -> u64 {
        self.main_cache.nbytes()
    }

    pub fn evictions(&self) -> u64 {
        self.main_cache.evictions()
    }
}

impl Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("main_cache", &self.main_cache)
            .field("has_peers", &self.peers.read().is_some())
            .field("flight", &self.flight)
            .finish()
    }
}

/// Builder object of [`Group`]. See [`Group::builder()`].
#[must_use]
pub struct GroupBuilder {
    name:       String,
    max_bytes:  u64,
    loader:     Option<Arc<dyn Loader>>,
    on_evicted: Option<OnEvicted>,
    peers:      Option<Arc<dyn PeerPicker>>,
}

impl GroupBuilder {
    /// Cache budget in bytes, counting both keys and values. `0` disables the limit.
    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn loader(mut self, loader: impl Loader) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn shared_loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Hook called for every entry evicted from the local cache. It runs outside of the cache lock.
    pub fn on_evicted<F>(mut self, on_evicted: F) -> Self
    where
        F: Fn(&str, &ByteView) + Send + Sync + 'static,
    {
        self.on_evicted = Some(Arc::new(on_evicted));
        self
    }

    pub fn peers(mut self, peers: Arc<dyn PeerPicker>) -> Self {
        self.peers = Some(peers);
        self
    }

    /// Creates a group without registering it; the peer protocol server won't be able to find it.
    pub fn build(self) -> Result<Arc<Group>> {
        let Some(loader) = self.loader
        else {
            return Err(CacheError::MissingLoader(self.name));
        };

        Ok(Arc::new(Group {
            main_cache: MainCache::new(self.name.clone(), self.max_bytes, self.on_evicted),
            name: self.name,
            loader,
            peers: RwLock::new(self.peers),
            flight: CallGroup::new(),
            stats: GroupStats::default(),
        }))
    }

    /// Creates a group and registers it process-wide under its name.
    pub fn register(self) -> Result<Arc<Group>> {
        let group = self.build()?;

        let mut groups = GROUPS.write();
        if groups.contains_key(group.name()) {
            return Err(CacheError::GroupExists(group.name().to_string()));
        }
        groups.insert(group.name().to_string(), group.clone());

        debug!("[{}] group registered", group.name());
        Ok(group)
    }
}
