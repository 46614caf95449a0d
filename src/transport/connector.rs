//! Upstream connector for the direct-dial transport.
//!
//! # Responsibilities
//! - Dial TCP with the configured connect timeout, keep-alive and dual-stack fallback
//! - For `https` upstreams, run the TLS handshake under its own bound
//! - Verify upstream certificates against the platform's root store
//!
//! # Design Decisions
//! - The handshake bound starts once TCP is connected, so a slow dial does
//!   not eat into it
//! - Missing native roots are logged, not fatal: plain `http` keeps working

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::{uri::Scheme, Uri};
use hyper_rustls::{DefaultServerNameResolver, MaybeHttpsStream, ResolveServerName};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioIo;
use rustls::{ClientConfig, RootCertStore};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tower::Service;

use super::ConstructionError;

/// Upper bound on the TLS handshake with an upstream.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before racing the fallback address family.
pub const DUAL_STACK_FALLBACK_DELAY: Duration = Duration::from_millis(300);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The TLS handshake did not finish in time.
#[derive(Debug, Error)]
#[error("TLS handshake did not complete within {0:?}")]
pub struct HandshakeTimeout(pub Duration);

/// Connector yielding plain or TLS streams depending on the URI scheme.
#[derive(Clone)]
pub struct UpstreamConnector {
    http: HttpConnector,
    tls: TlsConnector,
    handshake_timeout: Duration,
}

impl UpstreamConnector {
    /// Connector whose dial timeout and TCP keep-alive both equal `connect_timeout`.
    pub fn new(connect_timeout: Duration, handshake_timeout: Duration) -> Result<Self, ConstructionError> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(connect_timeout));
        http.set_keepalive(Some(connect_timeout));
        http.set_happy_eyeballs_timeout(Some(DUAL_STACK_FALLBACK_DELAY));
        http.set_nodelay(true);

        let tls = TlsConnector::from(Arc::new(client_tls_config()?));

        Ok(Self {
            http,
            tls,
            handshake_timeout,
        })
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }
}

impl fmt::Debug for UpstreamConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConnector")
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

impl Service<Uri> for UpstreamConnector {
    type Response = MaybeHttpsStream<TokioIo<TcpStream>>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.http.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let server_name = if uri.scheme() == Some(&Scheme::HTTPS) {
            match DefaultServerNameResolver::default().resolve(&uri) {
                Ok(name) => Some(name),
                Err(e) => return Box::pin(async move { Err(e) }),
            }
        } else {
            None
        };

        let connecting = self.http.call(uri);
        let tls = self.tls.clone();
        let handshake_timeout = self.handshake_timeout;

        Box::pin(async move {
            let tcp = connecting.await?;
            let Some(server_name) = server_name else {
                return Ok(MaybeHttpsStream::Http(tcp));
            };

            let stream = tokio::time::timeout(handshake_timeout, tls.connect(server_name, TokioIo::new(tcp)))
                .await
                .map_err(|_| HandshakeTimeout(handshake_timeout))??;
            Ok(MaybeHttpsStream::Https(TokioIo::new(stream)))
        })
    }
}

fn client_tls_config() -> Result<ClientConfig, ConstructionError> {
    let native = rustls_native_certs::load_native_certs();
    if !native.errors.is_empty() {
        tracing::warn!(errors = ?native.errors, "Some native root certificates could not be loaded");
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    if added == 0 {
        tracing::warn!("No native root certificates found, https upstreams will fail verification");
    }
    tracing::debug!(added, ignored, "Loaded native root certificates");

    let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(ConstructionError::Tls)?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(config)
}
