use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Error type accepted from [`Loader`](crate::traits::Loader) implementations.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Everything that can go wrong on the read path or in the peer protocol.
///
/// The type is `Clone` because a single outcome of a coalesced load is handed out to every caller waiting on the same
/// key. Foreign errors are kept behind an `Arc` for the same reason.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("key must not be empty")]
    InvalidKey,

    #[error("failed to load key '{key}': {source}")]
    Loader {
        key:    String,
        #[source]
        source: Arc<dyn StdError + Send + Sync + 'static>,
    },

    #[error("peer {peer} transport error: {reason}")]
    Transport { peer: String, reason: String },

    #[error("no such group: '{0}'")]
    UnknownGroup(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("group '{0}' is created without a loader")]
    MissingLoader(String),

    #[error("group '{0}' is already registered")]
    GroupExists(String),

    #[error("failed to encode response: {0}")]
    Codec(String),

    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),
}

impl CacheError {
    pub(crate) fn loader(key: &str, source: BoxError) -> Self {
        Self::Loader {
            key:    key.to_string(),
            source: Arc::from(source),
        }
    }

    pub(crate) fn transport(peer: &str, reason: impl ToString) -> Self {
        Self::Transport {
            peer:   peer.to_string(),
            reason: reason.to_string(),
        }
    }

    #[inline]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<postcard::Error> for CacheError {
    fn from(err: postcard::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
