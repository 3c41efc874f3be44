use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;

use crate::error::BoxError;
use crate::error::CacheError;

/// Anything the LRU store can account for.
pub trait ValueSize {
    /// Number of bytes the value occupies in the store's budget.
    fn size(&self) -> usize;
}

/// Source of truth for a [`Group`](crate::group::Group). Called only on a confirmed local miss of a key owned by this
/// node (or when the owning peer can't be reached).
#[async_trait]
pub trait Loader: Send + Sync + 'static {
    async fn load(&self, key: &str) -> Result<Vec<u8>, BoxError>;
}

/// Turns a closure into a [`Loader`].
///
/// ```ignore
/// let loader = LoaderFn(|key: String| async move {
///     db.get(&key).cloned().ok_or_else(|| format!("{key} not exist").into())
/// });
/// ```
pub struct LoaderFn<F>(pub F);

#[async_trait]
impl<F, Fut> Loader for LoaderFn<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>, BoxError>> + Send + 'static,
{
    async fn load(&self, key: &str) -> Result<Vec<u8>, BoxError> {
        (self.0)(key.to_string()).await
    }
}

/// Client side of the peer protocol: fetches a value from the peer that owns the key.
#[async_trait]
pub trait PeerGetter: Send + Sync + 'static {
    async fn get(&self, group: &str, key: &str) -> Result<Bytes, CacheError>;

    /// Peer address, for diagnostics.
    fn peer(&self) -> &str;
}

/// Routes a key to its owning peer.
pub trait PeerPicker: Send + Sync + 'static {
    /// Returns `None` if there are no peers or this node owns the key itself.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}
