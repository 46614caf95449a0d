//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
    service::TowerToHyperService,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use gateway_proxy::config::ListenerConfig;
use gateway_proxy::lifecycle::{LifecycleState, Shutdown, ShutdownCoordinator, ShutdownError};
use gateway_proxy::net::Listener;

/// A mock backend serving an axum router on an ephemeral port.
pub struct Backend {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    peak_open: Arc<AtomicUsize>,
}

impl Backend {
    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    /// Absolute URI for `path` on this backend.
    pub fn uri(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// TCP connections currently open.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Most connections that were open at the same time.
    pub fn peak_open_connections(&self) -> usize {
        self.peak_open.load(Ordering::SeqCst)
    }
}

/// Start a backend serving `router`, counting accepted connections.
pub async fn start_backend(router: Router) -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let open = Arc::new(AtomicUsize::new(0));
    let peak_open = Arc::new(AtomicUsize::new(0));

    tokio::spawn({
        let connections = connections.clone();
        let open = open.clone();
        let peak_open = peak_open.clone();
        async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                connections.fetch_add(1, Ordering::SeqCst);
                let now_open = open.fetch_add(1, Ordering::SeqCst) + 1;
                peak_open.fetch_max(now_open, Ordering::SeqCst);

                let service = TowerToHyperService::new(router.clone());
                let open = open.clone();
                tokio::spawn(async move {
                    let _ = auto::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                    open.fetch_sub(1, Ordering::SeqCst);
                });
            }
        }
    });

    Backend {
        addr,
        connections,
        open,
        peak_open,
    }
}

/// Backend answering every path with `body` after `delay`.
pub async fn start_delayed_backend(delay: Duration, body: &'static str) -> Backend {
    start_backend(Router::new().fallback(move || async move {
        tokio::time::sleep(delay).await;
        (StatusCode::OK, body)
    }))
    .await
}

/// Backend answering `/` with 200 "ok" immediately.
pub async fn start_ok_backend() -> Backend {
    start_backend(Router::new().route("/", get(|| async { "ok" }))).await
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// A router served under a shutdown coordinator.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub state: watch::Receiver<LifecycleState>,
    pub handle: JoinHandle<Result<(), ShutdownError>>,
}

pub async fn start_server(router: Router, grace_period: Duration) -> RunningServer {
    let listener = Listener::bind(&ListenerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        max_connections: 1024,
    })
    .await
    .unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let coordinator = ShutdownCoordinator::new(grace_period);
    let state = coordinator.watch_state();
    let signal = shutdown.signal();

    let handle = tokio::spawn(async move { coordinator.serve(listener, router, signal).await });

    RunningServer {
        addr,
        shutdown,
        state,
        handle,
    }
}

/// Plain HTTP client without pooling, so each request opens its own connection.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
