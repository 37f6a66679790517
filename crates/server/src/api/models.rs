//! Response data transfer objects.

use serde::Serialize;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub buckets: usize,
    pub peers: usize,
}

/// Point-in-time view of one bucket, as listed by `GET /buckets`.
#[derive(Debug, Serialize)]
pub struct BucketView {
    pub name: String,
    pub added: f64,
    pub taken: f64,
    pub elapsed_ns: u64,
    pub tokens: u64,
}
