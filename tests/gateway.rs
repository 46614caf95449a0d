//! End-to-end forwarding through the gateway router.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use axum::routing::get;
use axum::Router;
use gateway_proxy::proxy::{self, ReverseProxyClient};

mod common;

fn header_echo() -> Router {
    Router::new()
        .route(
            "/fn/headers",
            get(|headers: HeaderMap| async move {
                let get = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-")
                        .to_string()
                };
                format!(
                    "forwarded-host={} call-id={} start-time={} connection={}",
                    get("x-forwarded-host"),
                    get("x-call-id") != "-",
                    get("x-start-time") != "-",
                    get("connection"),
                )
            }),
        )
        .route(
            "/fn/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                "late"
            }),
        )
        .route(
            "/fn/redirect",
            get(|| async { axum::response::Redirect::temporary("/fn/headers") }),
        )
}

async fn gateway_for(base: url::Url, timeout: Duration) -> common::RunningServer {
    let client = Arc::new(ReverseProxyClient::direct_dial(&base, timeout, 64, 64).unwrap());
    common::start_server(proxy::router(client, base), Duration::from_secs(1)).await
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn forwards_with_forwarding_headers() {
    let backend = common::start_backend(header_echo()).await;
    let gateway = gateway_for(backend.url(), Duration::from_secs(2)).await;

    let response = client()
        .get(format!("http://{}/fn/headers", gateway.addr))
        .header("connection", "keep-alive")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    let body = response.text().await.unwrap();
    assert_eq!(
        body,
        format!(
            "forwarded-host={} call-id=true start-time=true connection=-",
            gateway.addr
        )
    );

    gateway.shutdown.trigger();
    gateway.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn redirect_passes_through_unfollowed() {
    let backend = common::start_backend(header_echo()).await;
    let gateway = gateway_for(backend.url(), Duration::from_secs(2)).await;

    let response = client()
        .get(format!("http://{}/fn/redirect", gateway.addr))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 307);
    assert_eq!(response.headers()["location"], "/fn/headers");

    gateway.shutdown.trigger();
    gateway.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn upstream_timeout_maps_to_gateway_timeout() {
    let backend = common::start_backend(header_echo()).await;
    let gateway = gateway_for(backend.url(), Duration::from_secs(1)).await;

    let response = client()
        .get(format!("http://{}/fn/slow", gateway.addr))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 504);

    gateway.shutdown.trigger();
    gateway.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn unreachable_upstream_maps_to_bad_gateway() {
    let addr = common::closed_port().await;
    let gateway = gateway_for(url::Url::parse(&format!("http://{addr}")).unwrap(), Duration::from_secs(1)).await;

    let response = client()
        .get(format!("http://{}/anything", gateway.addr))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);

    gateway.shutdown.trigger();
    gateway.handle.await.unwrap().unwrap();
}
