//! # turnstile-server
//!
//! The network surface of the turnstile rate-limiting side-car: an Axum HTTP
//! API translating `POST /take/:name` into core bucket operations, and a UDP
//! replication layer that broadcasts bucket state to a static peer list and
//! merges whatever arrives back.
//!
//! The binary (`turnstile`) wires these together with a signal watcher and a
//! bounded graceful shutdown; see `main.rs`.

/// HTTP API: router, handlers, errors, DTOs, and metrics.
pub mod api;
/// Static peer list resolution.
pub mod cluster;
/// UDP replication: broadcast, incast, and the receive loop.
pub mod replication;
