use std::sync::Arc;
use std::time::Instant;

use reqwest::Client;
use tokio::net::UdpSocket;
use turnstile_core::{Clock, MemoryStore};
use turnstile_server::api::create_router;
use turnstile_server::api::handlers::AppState;
use turnstile_server::replication::ReplicatedStore;

async fn spawn_app() -> String {
    let socket = Arc::new(
        UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind UDP socket"),
    );
    let store = ReplicatedStore::new(MemoryStore::new(Clock::system()), socket, Vec::new());

    let prometheus_handle =
        match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(_) => metrics_exporter_prometheus::PrometheusBuilder::new()
                .build_recorder()
                .handle(),
        };

    let state = AppState {
        store,
        clock: Clock::system(),
        prometheus_handle,
        start_time: Instant::now(),
    };

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

fn client() -> Client {
    Client::new()
}

async fn take(base_url: &str, path_and_query: &str) -> (u16, String) {
    let resp = client()
        .post(format!("{}{}", base_url, path_and_query))
        .send()
        .await
        .expect("Failed to send take request");
    let status = resp.status().as_u16();
    let body = resp.text().await.expect("Failed to read body");
    (status, body)
}

#[tokio::test]
async fn take_rejects_oversized_bucket_names() {
    let base_url = spawn_app().await;
    let name = "A".repeat(232);

    let (status, body) = take(&base_url, &format!("/take/{}", name)).await;
    assert_eq!(status, 400);
    assert_eq!(body, "bucket name larger than 231");
}

#[tokio::test]
async fn take_without_rate_admits_nothing() {
    let base_url = spawn_app().await;

    let (status, body) = take(&base_url, "/take/default-rate").await;
    assert_eq!(status, 429);
    assert_eq!(body, "0");
}

#[tokio::test]
async fn take_count_defaults_to_one() {
    let base_url = spawn_app().await;

    let (status, body) = take(&base_url, "/take/default-count?rate=2:s").await;
    assert_eq!(status, 200);
    assert_eq!(body, "1");
}

#[tokio::test]
async fn take_admits_within_rate() {
    let base_url = spawn_app().await;

    let (status, body) = take(&base_url, "/take/pass?rate=2:s&count=1").await;
    assert_eq!(status, 200);
    assert_eq!(body, "1");
}

#[tokio::test]
async fn take_denies_zero_frequency() {
    let base_url = spawn_app().await;

    let (status, body) = take(&base_url, "/take/fail?rate=0:s&count=1").await;
    assert_eq!(status, 429);
    assert_eq!(body, "0");
}

#[tokio::test]
async fn take_rejects_malformed_rate() {
    let base_url = spawn_app().await;

    let (status, body) = take(&base_url, "/take/bad-rate?rate=abc:1s").await;
    assert_eq!(status, 400);
    assert!(
        body.contains("invalid frequency"),
        "unexpected body: {body:?}"
    );
}

#[tokio::test]
async fn take_denies_counts_beyond_capacity() {
    let base_url = spawn_app().await;

    // A fresh 2:s bucket holds 2 tokens; asking for 5 leaves them untouched.
    let (status, body) = take(&base_url, "/take/greedy?rate=2:s&count=5").await;
    assert_eq!(status, 429);
    assert_eq!(body, "2");
}

#[tokio::test]
async fn take_exhausts_the_burst() {
    let base_url = spawn_app().await;

    for i in 0..5 {
        let (status, _) = take(&base_url, "/take/burst?rate=5:1m&count=1").await;
        assert_eq!(status, 200, "take {i} denied");
    }
    let (status, body) = take(&base_url, "/take/burst?rate=5:1m&count=1").await;
    assert_eq!(status, 429);
    assert_eq!(body, "0");
}

#[tokio::test]
async fn health_returns_ok() {
    let base_url = spawn_app().await;

    let resp = client()
        .get(format!("{}/health", base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["peers"], 0);
}

#[tokio::test]
async fn buckets_lists_taken_state() {
    let base_url = spawn_app().await;

    take(&base_url, "/take/listed?rate=10:1s&count=3").await;

    let resp = client()
        .get(format!("{}/buckets", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    let listed = body
        .as_array()
        .unwrap()
        .iter()
        .find(|b| b["name"] == "listed")
        .expect("bucket missing from listing");
    assert_eq!(listed["taken"], 3.0);
    assert_eq!(listed["tokens"], 7);
}

#[tokio::test]
async fn metrics_endpoint_renders() {
    let base_url = spawn_app().await;

    take(&base_url, "/take/metered?rate=1:s").await;

    let resp = client()
        .get(format!("{}/metrics", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}
