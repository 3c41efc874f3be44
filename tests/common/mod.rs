#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use peer_cache::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// In-memory "database" which counts how many times each key was looked up.
pub struct CountingDb {
    name:    String,
    data:    HashMap<String, String>,
    latency: Duration,
    hits:    Mutex<HashMap<String, usize>>,
}

impl CountingDb {
    pub fn scores(name: &str) -> Arc<Self> {
        Self::with_latency(name, Duration::ZERO)
    }

    pub fn with_latency(name: &str, latency: Duration) -> Arc<Self> {
        let data = [("Tom", "630"), ("Jack", "589"), ("Sam", "567")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(Self {
            name: name.to_string(),
            data,
            latency,
            hits: Mutex::new(HashMap::new()),
        })
    }

    /// Makes every key of the form `key-N` resolvable to `<db name>:key-N`.
    pub fn answers_everything(&self, key: &str) -> Option<String> {
        self.data
            .get(key)
            .cloned()
            .or_else(|| key.starts_with("key-").then(|| format!("{}:{key}", self.name)))
    }

    pub fn hits(&self, key: &str) -> usize {
        self.hits.lock().get(key).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.hits.lock().values().sum()
    }
}

#[async_trait]
impl Loader for CountingDb {
    async fn load(&self, key: &str) -> Result<Vec<u8>, BoxError> {
        *self.hits.lock().entry(key.to_string()).or_default() += 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.answers_everything(key)
            .map(String::into_bytes)
            .ok_or_else(|| format!("{key} not exist").into())
    }
}

/// Binds a listener on a random local port and returns it along with the matching base URL.
pub async fn bind_node() -> Result<(TcpListener, String), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = format!("http://{}", listener.local_addr()?);
    Ok((listener, addr))
}

/// Base URL of a port nobody listens on.
pub async fn dead_addr() -> Result<String, Box<dyn std::error::Error>> {
    let (listener, addr) = bind_node().await?;
    drop(listener);
    Ok(addr)
}

/// First `key-N` which `pool` routes to `owner`.
pub fn key_owned_by(pool: &HttpPool, owner: &str) -> String {
    (0..10_000)
        .map(|i| format!("key-{i}"))
        .find(|key| pool.owner_of(key).as_deref() == Some(owner))
        .expect("no key is routed to the owner")
}
