//! Catch-all forwarding handler.
//!
//! # Responsibilities
//! - Rewrite every inbound request onto the upstream base URL
//! - Maintain forwarding headers (X-Forwarded-Host, X-Call-Id, X-Start-Time)
//! - Strip hop-by-hop headers in both directions
//! - Map client errors to gateway status codes (504 timeout, 502 otherwise)

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::State,
    http::{
        header::{self, HeaderMap, HeaderName, HeaderValue},
        Request, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use url::Url;
use uuid::Uuid;

use super::{upstream_uri, ProxyError, ReverseProxyClient};
use crate::observability::metrics;

pub const X_CALL_ID: &str = "x-call-id";
pub const X_START_TIME: &str = "x-start-time";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Headers meaningful only for a single transport-level connection.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Application state injected into the handler.
#[derive(Clone)]
pub struct ForwardState {
    pub client: Arc<ReverseProxyClient>,
    pub base_url: Arc<Url>,
}

/// Router forwarding every path and method to `base_url` through `client`.
pub fn router(client: Arc<ReverseProxyClient>, base_url: Url) -> Router {
    let state = ForwardState {
        client,
        base_url: Arc::new(base_url),
    };

    Router::new()
        .route("/{*path}", any(forward))
        .route("/", any(forward))
        .with_state(state)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

async fn forward(State(state): State<ForwardState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let transport = state.client.transport().kind();
    let (parts, body) = request.into_parts();
    let method = parts.method.clone();

    let uri = match upstream_uri(&state.base_url, &parts.uri) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(uri = %parts.uri, error = %e, "Cannot map request onto upstream");
            return (StatusCode::BAD_REQUEST, "Invalid request path").into_response();
        }
    };

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    add_forwarding_headers(&mut headers);

    let mut upstream = Request::new(body);
    *upstream.method_mut() = parts.method;
    *upstream.uri_mut() = uri;
    *upstream.headers_mut() = headers;

    tracing::debug!(method = %method, uri = %upstream.uri(), transport, "Forwarding request");

    match state.client.send(upstream).await {
        Ok(mut response) => {
            strip_hop_by_hop(response.headers_mut());
            metrics::record_forward(transport, method.as_str(), response.status().as_u16(), start);
            response
        }
        Err(e) => {
            tracing::warn!(method = %method, transport, error = %e, "Upstream request failed");
            metrics::record_forward_error(transport, e.kind(), start);
            let status = match e {
                ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                ProxyError::Transport(_) => StatusCode::BAD_GATEWAY,
            };
            (status, e.to_string()).into_response()
        }
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

fn add_forwarding_headers(headers: &mut HeaderMap) {
    if let Some(host) = headers.remove(header::HOST) {
        headers.insert(X_FORWARDED_HOST, host);
    }

    if !headers.contains_key(X_CALL_ID) {
        if let Ok(call_id) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            headers.insert(X_CALL_ID, call_id);
        }
    }

    if !headers.contains_key(X_START_TIME) {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        if let Ok(start) = HeaderValue::from_str(&nanos.to_string()) {
            headers.insert(X_START_TIME, start);
        }
    }
}
