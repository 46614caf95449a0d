//! Gateway reverse-proxy library.
//!
//! Forwards inbound HTTP to an upstream over a direct-dial or NATS bus-tunnel
//! transport, bounds every forwarded request with a deadline, and drains the
//! server within a grace period on shutdown.

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod transport;

pub use config::GatewayConfig;
pub use lifecycle::{LifecycleState, Shutdown, ShutdownCoordinator};
pub use proxy::{Deadline, ProxyError, ReverseProxyClient};
pub use transport::{Transport, TransportConfig};
