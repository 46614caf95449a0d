//! Upstream transport subsystem.
//!
//! # Data Flow
//! ```text
//! ReverseProxyClient::send
//!     → Transport::round_trip
//!         → direct.rs (pooled TCP connections straight to the backend)
//!         → bus.rs    (NATS request/reply, one message per HTTP transaction)
//!
//! Far side of the bus:
//!     responder.rs (NATS subscription → local backend → reply)
//! ```
//!
//! # Design Decisions
//! - Transport is a closed enum chosen once at construction, never swapped
//! - Construction is fail-fast: bad addresses and unreachable buses error out
//! - Redirects are never followed; the first-hop response is the response

pub mod bus;
pub mod connector;
pub mod direct;
pub mod envelope;
pub mod responder;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use thiserror::Error;

pub use bus::BusTunnelTransport;
pub use connector::{UpstreamConnector, TLS_HANDSHAKE_TIMEOUT};
pub use direct::DirectDialTransport;
pub use responder::{BusTunnelResponder, TunnelExecutor};

/// Longest per-request timeout a client accepts.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Reject timeouts outside `(0, MAX_TIMEOUT]`.
pub fn check_timeout(timeout: Duration) -> Result<(), ConstructionError> {
    if timeout.is_zero() || timeout > MAX_TIMEOUT {
        return Err(ConstructionError::InvalidTimeout);
    }
    Ok(())
}

/// Errors raised while building a transport or client.
#[derive(Debug, Error)]
pub enum ConstructionError {
    /// The configured timeout was zero or beyond [`MAX_TIMEOUT`].
    #[error("upstream timeout must be greater than zero and at most {:?}", MAX_TIMEOUT)]
    InvalidTimeout,

    /// The base URL could not be used as an upstream address.
    #[error("invalid upstream base url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// The base URL uses a scheme the transport cannot speak.
    #[error("unsupported upstream scheme {0:?}, expected \"http\" or \"https\"")]
    UnsupportedScheme(String),

    /// The TLS client configuration could not be built.
    #[error("failed to build TLS client configuration: {0}")]
    Tls(#[source] rustls::Error),

    /// The message bus could not be reached at construction time.
    #[error("message bus at {endpoint} is unreachable: {source}")]
    BusUnreachable {
        endpoint: String,
        #[source]
        source: async_nats::ConnectError,
    },
}

/// Errors raised while executing a single request.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection refused, reset, or a protocol failure on a direct connection.
    #[error("upstream request failed: {0}")]
    Http(#[from] hyper_util::client::legacy::Error),

    /// The bus request could not be delivered or answered.
    #[error("bus request on {subject} failed: {reason}")]
    Bus { subject: String, reason: String },

    /// The request could not be expressed as a bus message.
    #[error("cannot encode request for the bus: {0}")]
    Encode(String),

    /// The bus reply was not a valid tunnelled response.
    #[error("malformed tunnelled response: {0}")]
    Decode(String),
}

/// Selected transport configuration. Exactly one variant per client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    DirectDial {
        timeout: Duration,
        max_idle_conns: usize,
        max_idle_conns_per_host: usize,
    },
    BusTunnel {
        address: String,
        port: u16,
        subject_prefix: String,
    },
}

/// The capability to execute one HTTP request and return one HTTP response.
#[derive(Debug, Clone)]
pub enum Transport {
    DirectDial(DirectDialTransport),
    BusTunnel(BusTunnelTransport),
}

impl Transport {
    /// Build the transport selected by `config`.
    ///
    /// `timeout` bounds bus connection establishment; the direct-dial variant
    /// carries its own timeout in the config.
    pub async fn build(
        base_url: &url::Url,
        config: &TransportConfig,
        timeout: Duration,
    ) -> Result<Self, ConstructionError> {
        match config {
            TransportConfig::DirectDial {
                timeout,
                max_idle_conns,
                max_idle_conns_per_host,
            } => DirectDialTransport::new(
                base_url,
                *timeout,
                *max_idle_conns,
                *max_idle_conns_per_host,
            )
            .map(Transport::DirectDial),
            TransportConfig::BusTunnel {
                address,
                port,
                subject_prefix,
            } => BusTunnelTransport::connect(address, *port, subject_prefix, timeout)
                .await
                .map(Transport::BusTunnel),
        }
    }

    /// Execute one request. Never follows redirects.
    pub async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>, TransportError> {
        match self {
            Transport::DirectDial(t) => t.round_trip(request).await,
            Transport::BusTunnel(t) => t.round_trip(request).await,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Transport::DirectDial(_) => "direct_dial",
            Transport::BusTunnel(_) => "bus_tunnel",
        }
    }
}
