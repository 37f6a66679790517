//! Prometheus metrics recording.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};

use turnstile_core::MemoryStore;

/// Records HTTP request metrics.
pub fn record_request(method: &str, path: &str, status: u16, duration: Duration) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];
    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Records the outcome of one take operation.
pub fn record_take(admitted: bool) {
    counter!(
        "turnstile_takes_total",
        "admitted" => if admitted { "true" } else { "false" }
    )
    .increment(1);
}

/// Records an incast broadcast for a previously unknown bucket.
pub fn record_incast() {
    counter!("turnstile_incasts_total").increment(1);
}

/// Records a failed broadcast send to one peer.
pub fn record_broadcast_error(peer: SocketAddr) {
    counter!("turnstile_broadcast_errors_total", "peer" => peer.to_string()).increment(1);
}

/// Records one received replication datagram by kind
/// (`update`, `incast_request`, or `invalid`).
pub fn record_packet(kind: &'static str) {
    counter!("turnstile_replication_packets_total", "kind" => kind).increment(1);
}

/// Updates store-level gauges.
pub fn update_store_metrics(store: &MemoryStore) {
    gauge!("turnstile_buckets_total").set(store.len() as f64);
}
