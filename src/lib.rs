//! # peer-cache
//!
//! Distributed read-through cache for immutable values keyed by strings.
//!
//! Every node keeps a byte-bounded LRU of the values it owns. Ownership is decided by a consistent hash ring shared
//! by the whole fleet, so that each key is ideally cached on exactly one node and reached either locally or over
//! HTTP. Misses are served by a user-supplied [`Loader`].
//!
//! # The Read Path
//!
//! ```text
//! Group::get(key)
//!   ├── local LRU hit ──────────────────────────────► value
//!   └── miss ─► CallGroup::run(key)                   (one load per key at a time)
//!                 ├── owned by a peer ─► HttpGetter ─► value (not cached locally)
//!                 │        └── peer failed ─┐
//!                 └── owned by this node ───┴─► Loader ─► LRU ─► value
//! ```
//!
//! - Concurrent misses of the same key are coalesced: the loader or the remote fetch is executed once and the result,
//!   whether a value or an error, is handed out to every waiter.
//! - A value fetched from its owner isn't cached on the requesting node. The owner's cache is the only one considered
//!   authoritative for a key.
//! - An unreachable peer isn't fatal. The group logs the failure and falls back to its own loader.
//!
//! # Example
//!
//! ```ignore
//! use peer_cache::prelude::*;
//!
//! let group = Group::builder("scores")
//!     .max_bytes(2 << 10)
//!     .loader(LoaderFn(|key: String| async move {
//!         db_lookup(&key).await.ok_or_else(|| format!("{key} not exist").into())
//!     }))
//!     .register()?;
//!
//! let pool = Arc::new(HttpPool::new("http://10.0.0.1:8001")?);
//! pool.set_peers(["http://10.0.0.1:8001", "http://10.0.0.2:8001", "http://10.0.0.3:8001"]);
//! group.register_peers(pool.clone());
//! tokio::spawn(pool.serve(TcpListener::bind("10.0.0.1:8001").await?));
//!
//! let score = group.get("Tom").await?;
//! ```

pub mod byte_view;
pub mod cache;
pub mod consistent_hash;
pub mod error;
pub mod group;
pub mod http;
pub mod lru;
pub mod protocol;
pub mod singleflight;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use byte_view::ByteView;
#[doc(inline)]
pub use error::{CacheError, Result};
#[doc(inline)]
pub use group::{get_group, new_group, Group};
#[doc(inline)]
pub use http::HttpPool;
#[doc(inline)]
pub use traits::{Loader, LoaderFn};

pub mod prelude {
    pub use crate::byte_view::ByteView;
    pub use crate::error::{BoxError, CacheError};
    pub use crate::group::{get_group, new_group, Group, GroupBuilder};
    pub use crate::http::{HttpPool, HttpPoolOptions};
    pub use crate::traits::{Loader, LoaderFn, PeerGetter, PeerPicker};
    pub use crate::types::StatsSnapshot;
}
