//! Bus-tunnel transport.
//!
//! # Responsibilities
//! - Hold one persistent NATS connection per client
//! - Relay each HTTP transaction as a single NATS request/reply
//! - Address requests by `<prefix>.<host>` so responders can partition work
//!
//! # Design Decisions
//! - Connects eagerly; an unreachable server is a construction error
//! - Bodies are buffered up to what `max_payload` leaves after the headers,
//!   never truncated
//! - `timeout` bounds connection establishment only

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};

use super::{check_timeout, envelope, ConstructionError, TransportError};

/// Connection name reported to the NATS server.
const CLIENT_NAME: &str = "gateway-proxy";

/// Transport relaying HTTP over NATS request/reply.
#[derive(Debug, Clone)]
pub struct BusTunnelTransport {
    client: async_nats::Client,
    subject_prefix: String,
}

impl BusTunnelTransport {
    /// Connect to the NATS server at `address:port`.
    ///
    /// Fails immediately if the server cannot be reached within `timeout`.
    pub async fn connect(
        address: &str,
        port: u16,
        subject_prefix: &str,
        timeout: Duration,
    ) -> Result<Self, ConstructionError> {
        check_timeout(timeout)?;
        let endpoint = format!("{address}:{port}");

        let client = async_nats::ConnectOptions::new()
            .name(CLIENT_NAME)
            .connection_timeout(timeout)
            // Requests are bounded by the client deadline instead.
            .request_timeout(None)
            .connect(endpoint.as_str())
            .await
            .map_err(|source| ConstructionError::BusUnreachable {
                endpoint: endpoint.clone(),
                source,
            })?;

        tracing::info!(
            endpoint = %endpoint,
            subject_prefix = %subject_prefix,
            "Bus tunnel connected"
        );

        Ok(Self::from_client(client, subject_prefix))
    }

    /// Wrap an already connected NATS client.
    pub fn from_client(client: async_nats::Client, subject_prefix: &str) -> Self {
        Self {
            client,
            subject_prefix: subject_prefix.to_string(),
        }
    }

    /// Relay one request and wait for the tunnelled response.
    pub async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>, TransportError> {
        let subject = envelope::subject_for(&self.subject_prefix, request.uri())?;
        let (parts, body) = request.into_parts();
        let headers = envelope::encode_request(&parts)?;

        let max_payload = self.client.server_info().max_payload;
        let payload = envelope::buffer_body(body, &headers, max_payload).await?;

        let reply = self
            .client
            .request_with_headers(subject.clone(), headers, payload)
            .await
            .map_err(|e| TransportError::Bus {
                subject,
                reason: e.to_string(),
            })?;

        envelope::decode_response(reply.headers.as_ref(), reply.payload)
    }

    /// Handle to the underlying NATS connection.
    pub fn client(&self) -> async_nats::Client {
        self.client.clone()
    }

    pub fn subject_prefix(&self) -> &str {
        &self.subject_prefix
    }
}
