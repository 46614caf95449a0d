//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     Shutdown::trigger → ShutdownSignal fires
//!     → ShutdownCoordinator: stop accepting → drain (bounded) → Stopped
//! ```
//!
//! # Design Decisions
//! - One cancellation signal shared by every long-running task
//! - Shutdown has a deadline: connections still open afterwards are aborted
//! - Failures are returned to the caller; only `main` decides to exit

pub mod shutdown;
pub mod signals;

pub use shutdown::{
    LifecycleState, Shutdown, ShutdownCoordinator, ShutdownError, ShutdownSignal, DEFAULT_GRACE_PERIOD,
};
