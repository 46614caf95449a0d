//! Far side of the bus tunnel.
//!
//! # Responsibilities
//! - Consume tunnelled requests from `<prefix>.>` in a shared queue group
//! - Execute each one against the local backend with a direct-dial client
//! - Publish the backend's response to the request's reply subject
//!
//! # Design Decisions
//! - Backend failures become HTTP error replies (502/504), so the gateway
//!   side always receives a well-formed response rather than a bus timeout
//! - On shutdown the subscription is dropped first, then in-flight replies
//!   finish under the backend client's own timeout

use std::sync::Arc;

use async_nats::HeaderMap as BusHeaders;
use axum::body::Body;
use axum::http::{Response, StatusCode};
use bytes::Bytes;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::task::JoinSet;
use url::Url;

use super::{envelope, TransportError};
use crate::lifecycle::ShutdownSignal;
use crate::proxy::handler::strip_hop_by_hop;
use crate::proxy::{upstream_uri, ProxyError, ReverseProxyClient};

/// Queue group shared by all responders on a prefix.
pub const QUEUE_GROUP: &str = "gateway-responders";

#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("failed to subscribe to {subject}: {source}")]
    Subscribe {
        subject: String,
        #[source]
        source: async_nats::SubscribeError,
    },
}

/// Runs tunnelled requests against the local backend.
#[derive(Debug, Clone)]
pub struct TunnelExecutor {
    backend: Arc<ReverseProxyClient>,
    backend_url: Url,
}

impl TunnelExecutor {
    pub fn new(backend: Arc<ReverseProxyClient>, backend_url: Url) -> Self {
        Self { backend, backend_url }
    }

    pub fn backend_url(&self) -> &Url {
        &self.backend_url
    }

    /// Decode `message`, run it against the backend and return the response.
    ///
    /// Never fails: undecodable requests answer 400, backend timeouts 504
    /// and other backend failures 502.
    pub async fn execute(&self, message: async_nats::Message) -> Response<Body> {
        let mut request = match envelope::decode_request(message.headers.as_ref(), message.payload) {
            Ok(request) => request,
            Err(e) => return plain_response(StatusCode::BAD_REQUEST, e.to_string()),
        };

        let uri = match upstream_uri(&self.backend_url, request.uri()) {
            Ok(uri) => uri,
            Err(e) => return plain_response(StatusCode::BAD_REQUEST, e.to_string()),
        };
        *request.uri_mut() = uri;

        tracing::debug!(
            method = %request.method(),
            uri = %request.uri(),
            "Executing tunnelled request"
        );

        match self.backend.send(request).await {
            Ok(response) => response,
            Err(e @ ProxyError::Timeout(_)) => plain_response(StatusCode::GATEWAY_TIMEOUT, e.to_string()),
            Err(e @ ProxyError::Transport(_)) => plain_response(StatusCode::BAD_GATEWAY, e.to_string()),
        }
    }
}

/// Serves tunnelled requests from the bus against a local backend.
#[derive(Debug, Clone)]
pub struct BusTunnelResponder {
    bus: async_nats::Client,
    subject_prefix: String,
    executor: TunnelExecutor,
}

impl BusTunnelResponder {
    pub fn new(
        bus: async_nats::Client,
        subject_prefix: &str,
        backend: Arc<ReverseProxyClient>,
        backend_url: Url,
    ) -> Self {
        Self {
            bus,
            subject_prefix: subject_prefix.to_string(),
            executor: TunnelExecutor::new(backend, backend_url),
        }
    }

    /// Serve until `signal` fires or the subscription closes.
    pub async fn run(self, mut signal: ShutdownSignal) -> Result<(), ResponderError> {
        let subject = envelope::wildcard_subject(&self.subject_prefix);
        let mut subscription = self
            .bus
            .queue_subscribe(subject.clone(), QUEUE_GROUP.to_string())
            .await
            .map_err(|source| ResponderError::Subscribe {
                subject: subject.clone(),
                source,
            })?;

        tracing::info!(
            subject = %subject,
            backend = %self.executor.backend_url(),
            "Tunnel responder listening"
        );

        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                _ = signal.cancelled() => {
                    tracing::info!("Tunnel responder received shutdown signal");
                    break;
                }
                message = subscription.next() => {
                    let Some(message) = message else {
                        tracing::warn!(subject = %subject, "Subscription closed by server");
                        break;
                    };
                    let this = self.clone();
                    in_flight.spawn(async move { this.respond(message).await });
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        if let Err(e) = subscription.unsubscribe().await {
            tracing::debug!(error = %e, "Unsubscribe failed");
        }
        while in_flight.join_next().await.is_some() {}

        tracing::info!("Tunnel responder stopped");
        Ok(())
    }

    async fn respond(&self, message: async_nats::Message) {
        let Some(reply_to) = message.reply.clone() else {
            tracing::warn!(subject = %message.subject, "Dropping tunnelled request without reply subject");
            return;
        };

        let response = self.executor.execute(message).await;
        let max_payload = self.bus.server_info().max_payload;

        let (headers, payload) = match encode_reply(response, max_payload).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "Backend response does not fit the tunnel");
                error_reply(StatusCode::BAD_GATEWAY, &e.to_string())
            }
        };

        if let Err(e) = self.bus.publish_with_headers(reply_to, headers, payload).await {
            tracing::warn!(error = %e, "Failed to publish tunnelled response");
        }
    }
}

/// Encode a backend response as reply headers plus a payload that fits in
/// one `max_payload` message.
pub async fn encode_reply(
    response: Response<Body>,
    max_payload: usize,
) -> Result<(BusHeaders, Bytes), TransportError> {
    let (mut parts, body) = response.into_parts();
    // The body is re-framed as one bus message.
    strip_hop_by_hop(&mut parts.headers);

    let headers = envelope::encode_response(&parts)?;
    let payload = envelope::buffer_body(body, &headers, max_payload).await?;
    Ok((headers, payload))
}

fn plain_response(status: StatusCode, message: String) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

fn error_reply(status: StatusCode, message: &str) -> (BusHeaders, Bytes) {
    let mut headers = BusHeaders::new();
    headers.insert(envelope::STATUS_HEADER, status.as_str());
    (headers, Bytes::from(message.to_string()))
}
