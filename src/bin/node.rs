//! Demo cache node.
//!
//! Serves a `scores` group backed by a deliberately slow in-memory "database". Start a few nodes sharing the same peer
//! list, enable the API on one of them and query it:
//!
//! ```text
//! peer-cache-node --port 8001 --peers http://127.0.0.1:8001,http://127.0.0.1:8002,http://127.0.0.1:8003
//! peer-cache-node --port 8002 --peers http://127.0.0.1:8001,http://127.0.0.1:8002,http://127.0.0.1:8003
//! peer-cache-node --port 8003 --peers http://127.0.0.1:8001,http://127.0.0.1:8002,http://127.0.0.1:8003 --api
//! curl "http://127.0.0.1:9999/api?key=Tom"
//! ```

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use fieldx::fxstruct;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use peer_cache::prelude::*;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Debug, Clone, clap::Parser)]
#[fxstruct(no_new, get(copy))]
#[clap(about, version, name = "peer-cache-node")]
struct Cli {
    /// Host this node listens on and advertises to its peers.
    #[fieldx(get(clone))]
    #[clap(long, env = "PEERCACHE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port of the peer protocol server.
    #[clap(long, short, env = "PEERCACHE_PORT", default_value_t = 8001)]
    port: u16,

    /// Base URLs of all nodes of the fleet, this one included. Comma-separated.
    #[fieldx(get(clone))]
    #[clap(long, env = "PEERCACHE_PEERS", value_delimiter = ',')]
    peers: Vec<String>,

    /// Start the front API server.
    #[clap(long, env = "PEERCACHE_API", default_value_t = false)]
    api: bool,

    #[clap(long, env = "PEERCACHE_API_PORT", default_value_t = 9999)]
    api_port: u16,

    /// Name of the cache group.
    #[fieldx(get(clone))]
    #[clap(long, env = "PEERCACHE_GROUP", default_value = "scores")]
    group: String,

    /// Cache budget of the group in bytes.
    #[clap(long, env = "PEERCACHE_MAX_BYTES", default_value_t = 2 << 10)]
    max_bytes: u64,

    /// Remote fetch timeout in seconds; 0 disables it.
    #[clap(long, env = "PEERCACHE_PEER_TIMEOUT", default_value_t = 10)]
    peer_timeout: u64,

    /// Log level used when RUST_LOG isn't set.
    #[fieldx(get(clone))]
    #[clap(long, env = "PEERCACHE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(cli.log_level()))
        .context("invalid log filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    Ok(())
}

fn slow_db() -> HashMap<String, String> {
    [("Tom", "630"), ("Jack", "589"), ("Sam", "567")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn create_group(cli: &Cli) -> anyhow::Result<Arc<Group>> {
    let db = Arc::new(slow_db());

    let group = Group::builder(cli.group())
        .max_bytes(cli.max_bytes())
        .loader(LoaderFn(move |key: String| {
            let db = db.clone();
            async move {
                info!("[SlowDB] search key {key}");
                tokio::time::sleep(Duration::from_millis(100)).await;
                let value: Result<Vec<u8>, BoxError> = match db.get(&key) {
                    Some(v) => Ok(v.as_bytes().to_vec()),
                    None => Err(format!("{key} not exist").into()),
                };
                value
            }
        }))
        .on_evicted(|key, value| info!("evicted {key} ({} bytes)", value.len()))
        .register()?;

    Ok(group)
}

async fn api_response(group: &Group, query: Option<&str>) -> Response<Full<Bytes>> {
    let key = query
        .and_then(|q| q.split('&').find_map(|kv| kv.strip_prefix("key=")))
        .and_then(|k| urlencoding::decode(k).ok())
        .map(|k| k.into_owned())
        .unwrap_or_default();

    let (status, body, content_type) = match group.get(&key).await {
        Ok(value) => (StatusCode::OK, value.to_bytes(), "application/octet-stream"),
        Err(err @ CacheError::InvalidKey) => (StatusCode::BAD_REQUEST, Bytes::from(err.to_string()), "text/plain"),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Bytes::from(err.to_string()),
            "text/plain",
        ),
    };

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

async fn run_api_server(port: u16, group: Arc<Group>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("cannot bind API server to port {port}"))?;

    info!("API server is running at http://{}", listener.local_addr()?);

    loop {
        let (stream, remote) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let group = group.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let group = group.clone();
                async move {
                    let response = if req.uri().path() == "/api" {
                        api_response(&group, req.uri().query()).await
                    }
                    else {
                        let mut response = Response::new(Full::new(Bytes::from("not found")));
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        response
                    };
                    Ok::<_, Infallible>(response)
                }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("API connection from {remote} failed: {err}");
            }
        });
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let self_addr = format!("http://{}:{}", cli.host(), cli.port());
    let mut peers = cli.peers();
    if peers.is_empty() {
        peers.push(self_addr.clone());
    }

    let timeout = match cli.peer_timeout() {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let pool = Arc::new(HttpPool::with_options(
        self_addr.clone(),
        HttpPoolOptions::default().with_peer_timeout(timeout),
    )?);
    pool.set_peers(&peers);

    let group = create_group(&cli)?;
    group.register_peers(pool.clone());

    let listener = TcpListener::bind((cli.host().as_str(), cli.port()))
        .await
        .with_context(|| format!("cannot bind peer server to {self_addr}"))?;

    info!("peer-cache node {self_addr} is up; peers: {}", peers.join(", "));

    let api = async {
        if cli.api() {
            run_api_server(cli.api_port(), group.clone()).await
        }
        else {
            std::future::pending().await
        }
    };

    tokio::select! {
        res = pool.clone().serve(listener) => res.context("peer server failed")?,
        res = api => res?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    Ok(())
}
