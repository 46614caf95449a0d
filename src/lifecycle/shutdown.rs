//! Shutdown coordination for the gateway.
//!
//! # State Transitions
//! ```text
//! Serving → ShuttingDown: cancellation signal fired; listener dropped,
//!                         open connections told to finish and close
//! ShuttingDown → Stopped: all connections drained, or grace period expired
//!                         (remaining connections aborted)
//! ```
//!
//! # Design Decisions
//! - States only move forward; a stopped coordinator cannot serve again
//! - Grace-period expiry is returned as an error, never a process exit
//! - The coordinator bounds the wait; it cannot cancel single requests

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto, graceful::GracefulShutdown},
    service::TowerToHyperService,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::net::{ConnectionTracker, Listener};

/// Grace period used when none is configured.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Process-wide cancellation source.
///
/// Clones share one signal. Once triggered it stays triggered, so
/// subscribers created afterwards observe it immediately.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to the cancellation signal.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Fire the cancellation signal.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of [`Shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once the signal has fired. Cancel safe.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|fired| *fired).await.is_err() {
            // Every `Shutdown` handle is gone, nothing can fire any more.
            std::future::pending::<()>().await;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Lifecycle of a served listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Serving,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Serving => "serving",
            LifecycleState::ShuttingDown => "shutting-down",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Connections were still open when the grace period ran out.
    #[error("{in_flight} connection(s) still open after {grace:?} grace period")]
    GraceExpired { grace: Duration, in_flight: usize },

    /// `serve` was called on a coordinator that already left `Serving`.
    #[error("coordinator is {0}, cannot serve again")]
    NotServing(LifecycleState),

    /// Another `serve` call owns this coordinator.
    #[error("coordinator is already serving")]
    AlreadyServing,
}

/// Runs the accept loop and drives it through a bounded shutdown.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    grace_period: Duration,
    state: watch::Sender<LifecycleState>,
    tracker: ConnectionTracker,
    started: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(grace_period: Duration) -> Self {
        let (state, _) = watch::channel(LifecycleState::Serving);
        Self {
            grace_period,
            state,
            tracker: ConnectionTracker::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Connections currently open.
    pub fn open_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Serve `router` on `listener` until `signal` fires, then drain.
    ///
    /// Returns `Ok` when every connection finished within the grace period.
    /// A coordinator serves at most once.
    pub async fn serve(
        &self,
        listener: Listener,
        router: Router,
        mut signal: ShutdownSignal,
    ) -> Result<(), ShutdownError> {
        let state = self.state();
        if state != LifecycleState::Serving {
            return Err(ShutdownError::NotServing(state));
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ShutdownError::AlreadyServing);
        }

        let builder = auto::Builder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();
        let service = TowerToHyperService::new(router);
        let mut connections = JoinSet::new();

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, "Start listening for HTTP requests");
        }

        loop {
            tokio::select! {
                biased;
                _ = signal.cancelled() => break,
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(error = %e, "Connection task panicked");
                        }
                    }
                }
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                            continue;
                        }
                    };

                    let guard = self.tracker.track();
                    let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service.clone());
                    let conn = graceful.watch(conn.into_owned());

                    connections.spawn(async move {
                        let _permit = permit;
                        if let Err(e) = conn.await {
                            tracing::debug!(connection_id = %guard.id(), peer = %peer, error = %e, "Connection closed with error");
                        }
                    });
                }
            }
        }

        drop(listener);
        self.advance(LifecycleState::ShuttingDown);
        tracing::info!(
            open_connections = self.open_connections(),
            grace_period = ?self.grace_period,
            "Shutdown signal received, draining connections"
        );

        let drained = tokio::time::timeout(self.grace_period, async {
            graceful.shutdown().await;
            while connections.join_next().await.is_some() {}
        })
        .await;

        let result = match drained {
            Ok(()) => {
                tracing::info!("All connections drained");
                Ok(())
            }
            Err(_) => {
                let in_flight = connections.len();
                connections.abort_all();
                while connections.join_next().await.is_some() {}
                tracing::error!(
                    in_flight,
                    grace_period = ?self.grace_period,
                    "Grace period expired, closed remaining connections"
                );
                Err(ShutdownError::GraceExpired {
                    grace: self.grace_period,
                    in_flight,
                })
            }
        };

        self.advance(LifecycleState::Stopped);
        result
    }

    /// Move to `next` if it is ahead of the current state.
    fn advance(&self, next: LifecycleState) -> bool {
        self.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        })
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_only_move_forward() {
        let coordinator = ShutdownCoordinator::default();
        assert_eq!(coordinator.state(), LifecycleState::Serving);

        assert!(coordinator.advance(LifecycleState::ShuttingDown));
        assert!(!coordinator.advance(LifecycleState::Serving));
        assert_eq!(coordinator.state(), LifecycleState::ShuttingDown);

        assert!(coordinator.advance(LifecycleState::Stopped));
        assert!(!coordinator.advance(LifecycleState::ShuttingDown));
        assert_eq!(coordinator.state(), LifecycleState::Stopped);
    }

    #[test]
    fn default_grace_period_is_one_second() {
        assert_eq!(ShutdownCoordinator::default().grace_period(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn late_subscriber_sees_fired_signal() {
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let mut signal = shutdown.signal();
        assert!(signal.is_cancelled());
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("fired signal resolves immediately");
    }

    #[tokio::test]
    async fn signal_pends_until_triggered() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.signal();

        let pending = tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(pending.is_err());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("triggered signal resolves");
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn stopped_coordinator_refuses_to_serve() {
        let coordinator = ShutdownCoordinator::default();
        coordinator.advance(LifecycleState::Stopped);

        let listener = Listener::bind(&crate::config::ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_connections: 4,
        })
        .await
        .unwrap();

        let err = coordinator
            .serve(listener, Router::new(), Shutdown::new().signal())
            .await
            .unwrap_err();
        assert!(matches!(err, ShutdownError::NotServing(LifecycleState::Stopped)));
    }

    async fn local_listener() -> Listener {
        Listener::bind(&crate::config::ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_connections: 4,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn second_concurrent_serve_is_refused() {
        let coordinator = Arc::new(ShutdownCoordinator::default());
        let shutdown = Shutdown::new();

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            let signal = shutdown.signal();
            let listener = local_listener().await;
            async move { coordinator.serve(listener, Router::new(), signal).await }
        });
        // Let the first call claim the coordinator.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = coordinator
            .serve(local_listener().await, Router::new(), shutdown.signal())
            .await
            .unwrap_err();
        assert!(matches!(err, ShutdownError::AlreadyServing));
        assert_eq!(coordinator.state(), LifecycleState::Serving);

        shutdown.trigger();
        first.await.unwrap().unwrap();
        assert_eq!(coordinator.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn open_connections_follows_accepted_streams() {
        let coordinator = Arc::new(ShutdownCoordinator::default());
        let shutdown = Shutdown::new();
        let listener = local_listener().await;
        let addr = listener.local_addr().unwrap();

        let serving = tokio::spawn({
            let coordinator = coordinator.clone();
            let signal = shutdown.signal();
            async move { coordinator.serve(listener, Router::new(), signal).await }
        });
        assert_eq!(coordinator.open_connections(), 0);

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while coordinator.open_connections() != 1 {
            assert!(tokio::time::Instant::now() < deadline, "connection never tracked");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(stream);
        shutdown.trigger();
        serving.await.unwrap().unwrap();
        assert_eq!(coordinator.open_connections(), 0);
    }
}
