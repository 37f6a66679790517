//! # turnstile-core
//!
//! The state machine behind the turnstile rate-limiting side-car: a
//! token-bucket whose replicated counters form a state-based CRDT, the
//! `freq:duration` rate type that drives it, and a thread-safe in-memory
//! store of buckets keyed by name.
//!
//! ## Design
//!
//! ```text
//! Rate   — freq per duration; derives the inter-token interval
//! Bucket — PN-counter (added/taken) + G-counter (elapsed) + local anchor
//! Store  — name → Bucket, create-on-miss, merge-on-upsert, no eviction
//! ```
//!
//! Merging takes the per-field maximum of the replicated counters, so state
//! exchanged between nodes converges under arbitrary reordering, duplication,
//! and delay, without synchronized clocks. Each node keeps its own `created`
//! anchor; only relative `elapsed` advances ever replicate.
//!
//! Networking lives in the server crate; this crate is synchronous and holds
//! no sockets.

/// The token bucket, its CRDT merge, and the fixed-size wire codec.
pub mod bucket;
/// Protocol limits and server defaults.
pub mod config;
/// The `freq:duration` rate value type and its parser.
pub mod rate;
/// The thread-safe bucket map and clock source.
pub mod store;

pub use bucket::{Bucket, BucketState, WireError};
pub use rate::{Rate, RateError};
pub use store::{Clock, MemoryStore};
