//! Graceful shutdown of the serving loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use gateway_proxy::lifecycle::{LifecycleState, ShutdownError};
use tokio::net::TcpStream;
use tokio::sync::Notify;

mod common;

/// Router whose `/slow` handler signals `started` and then sleeps for `delay`.
fn slow_router(started: Arc<Notify>, delay: Duration) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route(
            "/slow",
            get(move || {
                let started = started.clone();
                async move {
                    started.notify_one();
                    tokio::time::sleep(delay).await;
                    "finished"
                }
            }),
        )
}

#[tokio::test]
async fn idle_server_stops_after_signal() {
    let server = common::start_server(slow_router(Arc::new(Notify::new()), Duration::ZERO), Duration::from_secs(1)).await;

    let response = common::http_client()
        .get(format!("http://{}/", server.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(*server.state.borrow(), LifecycleState::Serving);

    let start = Instant::now();
    server.shutdown.trigger();
    let result = server.handle.await.unwrap();

    assert!(result.is_ok(), "got {result:?}");
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(*server.state.borrow(), LifecycleState::Stopped);
    assert!(TcpStream::connect(server.addr).await.is_err(), "listener still accepting");
}

#[tokio::test]
async fn in_flight_request_finishes_within_grace_period() {
    let started = Arc::new(Notify::new());
    let mut server = common::start_server(
        slow_router(started.clone(), Duration::from_millis(400)),
        Duration::from_secs(1),
    )
    .await;

    let url = format!("http://{}/slow", server.addr);
    let request = tokio::spawn(async move { common::http_client().get(url).send().await });
    started.notified().await;

    server.shutdown.trigger();
    tokio::time::timeout(
        Duration::from_millis(200),
        server.state.wait_for(|s| *s >= LifecycleState::ShuttingDown),
    )
    .await
    .expect("coordinator should start draining")
    .unwrap();

    // Draining: the listener is gone, in-flight work continues.
    assert!(TcpStream::connect(server.addr).await.is_err(), "new connection accepted while draining");

    let response = request.await.unwrap().expect("in-flight request should complete");
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "finished");

    let result = server.handle.await.unwrap();
    assert!(result.is_ok(), "got {result:?}");
    assert_eq!(*server.state.borrow(), LifecycleState::Stopped);
}

#[tokio::test]
async fn grace_period_expiry_is_reported_not_fatal() {
    let started = Arc::new(Notify::new());
    let grace = Duration::from_millis(300);
    let server = common::start_server(slow_router(started.clone(), Duration::from_secs(5)), grace).await;

    let url = format!("http://{}/slow", server.addr);
    let request = tokio::spawn(async move { common::http_client().get(url).send().await });
    started.notified().await;

    let start = Instant::now();
    server.shutdown.trigger();
    let result = server.handle.await.unwrap();
    let elapsed = start.elapsed();

    match result {
        Err(ShutdownError::GraceExpired { grace: reported, in_flight }) => {
            assert_eq!(reported, grace);
            assert_eq!(in_flight, 1);
        }
        other => panic!("expected grace expiry, got {other:?}"),
    }
    assert!(elapsed >= grace, "stopped before the grace period: {elapsed:?}");
    assert!(elapsed < grace + Duration::from_millis(700), "stopped late: {elapsed:?}");
    assert_eq!(*server.state.borrow(), LifecycleState::Stopped);

    // The cut-off request fails rather than hanging for the full 5s.
    let outcome = tokio::time::timeout(Duration::from_secs(1), request).await.unwrap().unwrap();
    assert!(outcome.is_err());
}
