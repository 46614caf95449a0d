//! Upstream forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request (axum)
//!     → handler.rs (rewrite URI onto base URL, forwarding headers)
//!     → client.rs  (combined deadline, single transport)
//!     → transport  (direct dial or bus tunnel)
//!     → handler.rs (strip hop-by-hop headers, map errors to 502/504)
//! ```

pub mod client;
pub mod handler;

use axum::http::uri::{InvalidUri, Uri};
use url::Url;

pub use client::{Deadline, ProxyError, ReverseProxyClient};
pub use handler::router;

/// Join an inbound request's path and query onto `base_url`.
///
/// Any path on the base URL is kept as a prefix.
pub fn upstream_uri(base_url: &Url, inbound: &Uri) -> Result<Uri, InvalidUri> {
    let path = inbound.path_and_query().map_or("/", |pq| pq.as_str());
    let port = base_url.port().map(|p| format!(":{p}")).unwrap_or_default();
    format!(
        "{}://{}{}{}{}",
        base_url.scheme(),
        base_url.host_str().unwrap_or_default(),
        port,
        base_url.path().trim_end_matches('/'),
        path
    )
    .parse()
}
