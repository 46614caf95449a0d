//! Direct-dial transport.
//!
//! # Responsibilities
//! - Dial the backend over TCP with a bounded connect timeout
//! - Speak TLS to `https` upstreams (see [`super::connector`])
//! - Reuse a bounded pool of idle keep-alive connections

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use hyper_util::{
    client::legacy::Client,
    rt::{TokioExecutor, TokioTimer},
};
use url::Url;

use super::connector::{UpstreamConnector, TLS_HANDSHAKE_TIMEOUT};
use super::{check_timeout, ConstructionError, TransportError};

/// Idle pooled connections are closed after this long.
pub const IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);

/// Per-host idle limit used when the configured value is zero.
pub const DEFAULT_MAX_IDLE_CONNS_PER_HOST: usize = 2;

/// Transport that dials the backend directly.
///
/// Cloning is cheap and clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct DirectDialTransport {
    client: Client<UpstreamConnector, Body>,
    max_idle_per_host: usize,
}

impl DirectDialTransport {
    /// Build a direct-dial transport for `base_url`.
    ///
    /// Dial timeout and TCP keep-alive both equal `timeout`; TLS handshakes
    /// are bounded by [`TLS_HANDSHAKE_TIMEOUT`]. A zero
    /// `max_idle_conns` means no overall limit; a zero
    /// `max_idle_conns_per_host` means [`DEFAULT_MAX_IDLE_CONNS_PER_HOST`].
    pub fn new(
        base_url: &Url,
        timeout: Duration,
        max_idle_conns: usize,
        max_idle_conns_per_host: usize,
    ) -> Result<Self, ConstructionError> {
        check_timeout(timeout)?;
        validate_base_url(base_url)?;

        let connector = UpstreamConnector::new(timeout, TLS_HANDSHAKE_TIMEOUT)?;

        let max_idle_per_host = effective_idle_limit(max_idle_conns, max_idle_conns_per_host);

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(IDLE_CONN_TIMEOUT)
            .pool_max_idle_per_host(max_idle_per_host)
            .build(connector);

        tracing::debug!(
            base_url = %base_url,
            timeout = ?timeout,
            max_idle_per_host,
            "Direct-dial transport ready"
        );

        Ok(Self {
            client,
            max_idle_per_host,
        })
    }

    /// Execute one request on a pooled or freshly dialed connection.
    pub async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>, TransportError> {
        let response = self.client.request(request).await?;
        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }

    /// Idle connections kept per backend host.
    pub fn max_idle_per_host(&self) -> usize {
        self.max_idle_per_host
    }
}

/// Reject base URLs this transport cannot dial.
pub(crate) fn validate_base_url(base_url: &Url) -> Result<(), ConstructionError> {
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(ConstructionError::UnsupportedScheme(base_url.scheme().to_string()));
    }
    if base_url.host_str().map_or(true, str::is_empty) {
        return Err(ConstructionError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(())
}

// Only one backend host is ever dialed, so the overall cap and the per-host
// cap collapse into one number.
fn effective_idle_limit(max_idle_conns: usize, max_idle_conns_per_host: usize) -> usize {
    let per_host = if max_idle_conns_per_host == 0 {
        DEFAULT_MAX_IDLE_CONNS_PER_HOST
    } else {
        max_idle_conns_per_host
    };
    if max_idle_conns == 0 {
        per_host
    } else {
        per_host.min(max_idle_conns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn idle_limit_takes_smaller_cap() {
        assert_eq!(effective_idle_limit(1024, 1024), 1024);
        assert_eq!(effective_idle_limit(10, 100), 10);
        assert_eq!(effective_idle_limit(100, 10), 10);
    }

    #[test]
    fn idle_limit_zero_values() {
        assert_eq!(effective_idle_limit(0, 50), 50);
        assert_eq!(effective_idle_limit(0, 0), DEFAULT_MAX_IDLE_CONNS_PER_HOST);
        assert_eq!(effective_idle_limit(1, 0), 1);
    }

    #[tokio::test]
    async fn rejects_zero_timeout() {
        let err = DirectDialTransport::new(&url("http://127.0.0.1:8080"), Duration::ZERO, 1, 1)
            .unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidTimeout));
    }

    #[tokio::test]
    async fn rejects_timeout_beyond_limit() {
        let err = DirectDialTransport::new(
            &url("http://127.0.0.1:8080"),
            crate::transport::MAX_TIMEOUT + Duration::from_secs(1),
            1,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidTimeout));
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let err = DirectDialTransport::new(&url("ftp://backend:21"), Duration::from_secs(1), 1, 1)
            .unwrap_err();
        assert!(matches!(err, ConstructionError::UnsupportedScheme(s) if s == "ftp"));
    }

    #[tokio::test]
    async fn builds_for_https() {
        let transport =
            DirectDialTransport::new(&url("https://backend:8443/"), Duration::from_secs(5), 0, 0).unwrap();
        assert_eq!(transport.max_idle_per_host(), DEFAULT_MAX_IDLE_CONNS_PER_HOST);
    }

    #[tokio::test]
    async fn builds_for_plain_http() {
        let transport =
            DirectDialTransport::new(&url("http://gateway:8080/"), Duration::from_secs(5), 1024, 64)
                .unwrap();
        assert_eq!(transport.max_idle_per_host(), 64);
    }
}
