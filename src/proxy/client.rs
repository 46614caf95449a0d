//! Reverse-proxy client with per-request deadlines.
//!
//! # Responsibilities
//! - Own exactly one transport for the client's lifetime
//! - Bound every request by the configured timeout and the caller's deadline
//! - Return the first-hop response, including redirects, untouched
//!
//! # Design Decisions
//! - Deadline covers the time to response headers; the body then streams
//! - Timing out drops the in-flight future, which aborts the request
//! - Errors go back to the caller; nothing is logged or retried here

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use thiserror::Error;
use tokio::time::Instant;
use url::Url;

use crate::config::UpstreamConfig;
use crate::transport::{check_timeout, ConstructionError, Transport, TransportConfig, TransportError};

/// Caller-supplied deadline, attached as a request extension.
///
/// When present and earlier than `now + timeout`, it wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(pub Instant);

impl Deadline {
    /// Deadline `after` from now. Saturates instead of overflowing.
    pub fn after(after: Duration) -> Self {
        let now = Instant::now();
        Self(now.checked_add(after).unwrap_or_else(|| far_future(now)))
    }
}

/// Stand-in for "no deadline" when `now + duration` does not fit in an `Instant`.
fn far_future(now: Instant) -> Instant {
    // About 30 years, as tokio does for its own timers.
    now + Duration::from_secs(86400 * 365 * 30)
}

/// Per-request failures returned by [`ReverseProxyClient::send`].
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No response headers arrived before the deadline.
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ProxyError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Timeout(_) => "timeout",
            ProxyError::Transport(_) => "transport",
        }
    }
}

/// Forwards requests to a backend over a single, fixed transport.
///
/// Immutable after construction and safe to share behind an `Arc`.
#[derive(Debug)]
pub struct ReverseProxyClient {
    transport: Transport,
    timeout: Duration,
}

impl ReverseProxyClient {
    /// Wrap an already built transport.
    pub fn new(transport: Transport, timeout: Duration) -> Result<Self, ConstructionError> {
        check_timeout(timeout)?;
        Ok(Self { transport, timeout })
    }

    /// Client that dials `base_url` directly with a bounded idle pool.
    pub fn direct_dial(
        base_url: &Url,
        timeout: Duration,
        max_idle_conns: usize,
        max_idle_conns_per_host: usize,
    ) -> Result<Self, ConstructionError> {
        let transport = crate::transport::DirectDialTransport::new(
            base_url,
            timeout,
            max_idle_conns,
            max_idle_conns_per_host,
        )?;
        Self::new(Transport::DirectDial(transport), timeout)
    }

    /// Client that tunnels over the NATS server at `address:port`.
    pub async fn bus_tunnel(
        timeout: Duration,
        address: &str,
        port: u16,
        subject_prefix: &str,
    ) -> Result<Self, ConstructionError> {
        let transport =
            crate::transport::BusTunnelTransport::connect(address, port, subject_prefix, timeout).await?;
        Self::new(Transport::BusTunnel(transport), timeout)
    }

    /// Client for the configured upstream and transport.
    pub async fn from_config(config: &UpstreamConfig) -> Result<Self, ConstructionError> {
        let base_url = config.parsed_base_url()?;
        let timeout = config.timeout();
        let transport_config: TransportConfig = config.transport_config();
        let transport = Transport::build(&base_url, &transport_config, timeout).await?;

        tracing::info!(
            base_url = %base_url,
            transport = transport.kind(),
            timeout = ?timeout,
            "Upstream client ready"
        );

        Self::new(transport, timeout)
    }

    /// Execute `request` under the combined deadline.
    ///
    /// Any 3xx is returned as-is; `Location` is never followed.
    pub async fn send(&self, request: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let start = Instant::now();
        let deadline = self.deadline_for(&request, start);

        match tokio::time::timeout_at(deadline, self.transport.round_trip(request)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProxyError::Timeout(deadline.saturating_duration_since(start))),
        }
    }

    /// Configured per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    fn deadline_for(&self, request: &Request<Body>, now: Instant) -> Instant {
        let budget = now.checked_add(self.timeout).unwrap_or_else(|| far_future(now));
        match request.extensions().get::<Deadline>() {
            Some(Deadline(caller)) => budget.min(*caller),
            None => budget,
        }
    }
}
