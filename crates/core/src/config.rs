//! Global configuration constants for turnstile.
//!
//! All protocol limits and server defaults are defined here. These are
//! compile-time constants; runtime configuration is handled via CLI arguments
//! in the server crate.

/// Number of bytes the fixed portion of a bucket marshals to:
/// added + taken + elapsed + name length.
pub const BUCKET_FIXED_SIZE: usize = 8 + 8 + 8 + 1;

/// Size of a UDP packet carrying a bucket state update.
///
/// Capped so a datagram fits unfragmented in a single IPv4 packet even on
/// pessimistic MTUs. Implementations must never fragment or chain datagrams.
pub const BUCKET_PACKET_SIZE: usize = 256;

/// Maximum length in bytes of a bucket name.
pub const MAX_BUCKET_NAME_LEN: usize = BUCKET_PACKET_SIZE - BUCKET_FIXED_SIZE;

/// Default HTTP API bind address.
pub const DEFAULT_API_ADDR: &str = "0.0.0.0:8080";

/// Default UDP replication bind address.
pub const DEFAULT_CLUSTER_ADDR: &str = "0.0.0.0:9090";

/// Read deadline on the replication socket. Bounds how long shutdown of the
/// receive loop can take.
pub const REPLICATION_READ_TIMEOUT_SECS: u64 = 3;

/// Per-request timeout in seconds on the HTTP API.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default graceful shutdown budget in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Interval (in seconds) between refreshes of store-level gauges.
pub const METRICS_REFRESH_INTERVAL_SECS: u64 = 15;
