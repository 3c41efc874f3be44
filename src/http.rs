//! HTTP transport of the peer protocol.
//!
//! [`HttpPool`] is both sides of it: a server answering peers' requests for keys this node owns, and the registry of
//! [`HttpGetter`] clients used to reach the owners of other keys.

use crate::consistent_hash::HashRing;
use crate::error::{CacheError, Result};
use crate::group::get_group;
use crate::protocol::{self, FetchRequest, FetchResponse};
use crate::traits::{PeerGetter, PeerPicker};
use async_trait::async_trait;
use bytes::Bytes;
use fieldx::fxstruct;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_BASE_PATH: &str = "/_geecache/";
pub const DEFAULT_REPLICAS: usize = 50;
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables of an [`HttpPool`].
#[derive(Debug, Clone)]
#[fxstruct(no_new, default(off), get(copy))]
pub struct HttpPoolOptions {
    /// Path prefix of the peer protocol. Must start and end with `/`.
    #[fieldx(get(copy(off)))]
    base_path: String,

    /// Virtual nodes per peer on the hash ring.
    replicas: usize,

    /// Limit on a single remote fetch. `None` lets a hung peer stall the key's waiters until the connection dies.
    peer_timeout: Option<Duration>,
}

impl Default for HttpPoolOptions {
    fn default() -> Self {
        Self {
            base_path:    DEFAULT_BASE_PATH.to_string(),
            replicas:     DEFAULT_REPLICAS,
            peer_timeout: Some(DEFAULT_PEER_TIMEOUT),
        }
    }
}

impl HttpPoolOptions {
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_peer_timeout(mut self, peer_timeout: Option<Duration>) -> Self {
        self.peer_timeout = peer_timeout;
        self
    }
}

// Ring and clients are replaced together so that a lookup never mixes two generations of the peer set.
struct PeerSet {
    ring:    HashRing,
    getters: HashMap<String, Arc<HttpGetter>>,
}

pub struct HttpPool {
    self_addr: String,
    options:   HttpPoolOptions,
    client:    reqwest::Client,
    peers:     Mutex<PeerSet>,
}

impl HttpPool {
    /// `self_addr` is this node's base URL, e.g. `http://10.0.0.1:8001`, exactly as other nodes list it.
    pub fn new(self_addr: impl Into<String>) -> Result<Self> {
        Self::with_options(self_addr, HttpPoolOptions::default())
    }

    pub fn with_options(self_addr: impl Into<String>, options: HttpPoolOptions) -> Result<Self> {
        let self_addr = self_addr.into();

        let mut client = reqwest::Client::builder();
        if let Some(timeout) = options.peer_timeout() {
            client = client.timeout(timeout);
        }
        let client = client
            .build()
            .map_err(|err| CacheError::transport(&self_addr, format!("cannot create HTTP client: {err}")))?;

        Ok(Self {
            peers: Mutex::new(PeerSet {
                ring:    HashRing::new(options.replicas()),
                getters: HashMap::new(),
            }),
            self_addr,
            options,
            client,
        })
    }

    #[inline]
    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    #[inline]
    pub fn options(&self) -> &HttpPoolOptions {
        &self.options
    }

    /// Replaces the peer set. The list should include this node's own address, otherwise it owns no keys.
    pub fn set_peers<I, S>(&self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ring = HashRing::new(self.options.replicas());
        let mut getters = HashMap::new();

        for peer in peers {
            let peer = peer.as_ref();
            ring.add([peer]);
            getters.insert(
                peer.to_string(),
                Arc::new(HttpGetter::new(peer, self.options.base_path(), self.client.clone())),
            );
        }

        info!("[{}] peer set updated: {} peer(s)", self.self_addr, getters.len());
        *self.peers.lock() = PeerSet { ring, getters };
    }

    /// Addresses of the current peer set, sorted.
    pub fn peers(&self) -> Vec<String> {
        let mut peers = self.peers.lock().getters.keys().cloned().collect::<Vec<_>>();
        peers.sort();
        peers
    }

    /// The peer owning `key` according to the current ring, possibly this node.
    pub fn owner_of(&self, key: &str) -> Option<String> {
        self.peers.lock().ring.get(key).map(str::to_string)
    }

    /// Answers a peer protocol request for `path`.
    #[instrument(level = "trace", skip(self))]
    pub async fn handle(&self, path: &str) -> Response<Full<Bytes>> {
        match self.fetch_for_peer(path).await {
            Ok(body) => {
                let mut response = Response::new(Full::new(body));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(protocol::CONTENT_TYPE));
                response
            }
            Err(err) => {
                let status = match err {
                    CacheError::BadRequest(_) | CacheError::InvalidKey => StatusCode::BAD_REQUEST,
                    CacheError::UnknownGroup(_) => StatusCode::NOT_FOUND,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                debug!("[{}] {path} -> {status}: {err}", self.self_addr);

                let mut response = Response::new(Full::new(Bytes::from(err.to_string())));
                *response.status_mut() = status;
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
                response
            }
        }
    }

    async fn fetch_for_peer(&self, path: &str) -> Result<Bytes> {
        let request = FetchRequest::from_path(path, self.options.base_path())?;

        let Some(group) = get_group(&request.group)
        else {
            return Err(CacheError::UnknownGroup(request.group));
        };
        group.note_server_request();

        let value = group.get(&request.key).await?;
        let body = FetchResponse { value: value.to_vec() }.encode()?;

        Ok(Bytes::from(body))
    }

    /// Serves the peer protocol on `listener` until accepting a connection fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(
            "[{}] serving peer requests on {}{}",
            self.self_addr,
            listener.local_addr()?,
            self.options.base_path()
        );

        loop {
            let (stream, remote) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let pool = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let pool = pool.clone();
                    async move {
                        let path = req.uri().path().to_string();
                        Ok::<_, Infallible>(pool.handle(&path).await)
                    }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!("peer connection from {remote} failed: {err}");
                }
            });
        }
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let peers = self.peers.lock();
        match peers.ring.get(key) {
            Some(owner) if owner != self.self_addr => {
                debug!("[{}] picked peer {owner} for '{key}'", self.self_addr);
                peers
                    .getters
                    .get(owner)
                    .map(|getter| getter.clone() as Arc<dyn PeerGetter>)
            }
            _ => None,
        }
    }
}

impl Debug for HttpPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPool")
            .field("self_addr", &self.self_addr)
            .field("options", &self.options)
            .field("peers", &self.peers())
            .finish()
    }
}

/// Client for a single peer.
#[derive(Debug, Clone)]
pub struct HttpGetter {
    peer:      String,
    base_path: String,
    client:    reqwest::Client,
}

impl HttpGetter {
    pub fn new(peer: impl Into<String>, base_path: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            peer: peer.into(),
            base_path: base_path.into(),
            client,
        }
    }
}

#[async_trait]
impl PeerGetter for HttpGetter {
    async fn get(&self, group: &str, key: &str) -> Result<Bytes> {
        let url = format!(
            "{}{}",
            self.peer,
            FetchRequest::new(group, key).to_path(&self.base_path)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| CacheError::transport(&self.peer, err))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(CacheError::transport(&self.peer, format!("server returned {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| CacheError::transport(&self.peer, format!("reading response body: {err}")))?;

        let message = FetchResponse::decode(&body)
            .map_err(|err| CacheError::transport(&self.peer, format!("decoding response body: {err}")))?;

        Ok(Bytes::from(message.value))
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}
