//! Best-effort UDP replication of bucket state.
//!
//! Every upsert broadcasts the merged bucket to all peers as one datagram of
//! at most 256 bytes. The first local miss of a bucket name triggers an
//! **incast**: a zero-valued bucket carrying only the name, which peers that
//! hold state answer with a unicast of their own copy. Replication never
//! fails a take — send errors are logged and counted, and lost datagrams are
//! repaired by whatever broadcast touches the bucket next.

/// The datagram receive loop.
pub mod receiver;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::net::UdpSocket;

use turnstile_core::{Bucket, MemoryStore};

use crate::api::metrics;

/// A bucket store that replicates local changes over UDP.
///
/// Wraps a [`MemoryStore`] with one bound socket (shared between reads and
/// writes) and a fixed peer list. Cloning produces another handle to the
/// same store and socket.
#[derive(Clone)]
pub struct ReplicatedStore {
    local: MemoryStore,
    socket: Arc<UdpSocket>,
    peers: Arc<Vec<SocketAddr>>,
    /// Names with an incast currently in flight.
    inflight: Arc<Mutex<HashSet<String>>>,
}

impl ReplicatedStore {
    /// Creates a replicated store broadcasting to `peers` over `socket`.
    pub fn new(local: MemoryStore, socket: Arc<UdpSocket>, peers: Vec<SocketAddr>) -> Self {
        Self {
            local,
            socket,
            peers: Arc::new(peers),
            inflight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// The wrapped local store.
    pub fn local(&self) -> &MemoryStore {
        &self.local
    }

    /// Number of replication peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Returns the named bucket, creating it on miss.
    ///
    /// A miss additionally kicks off an asynchronous incast so the fresh
    /// bucket converges with whatever state peers already hold; the caller
    /// gets the (initially empty) bucket immediately.
    pub fn get_bucket(&self, name: &str) -> (Bucket, bool) {
        let (bucket, existed) = self.local.get_bucket(name);
        if !existed {
            self.spawn_incast(name);
        }
        (bucket, existed)
    }

    /// Upserts into the local store, then broadcasts the merged bucket.
    pub async fn upsert_bucket(&self, bucket: &Bucket) -> (Bucket, bool) {
        let (stored, existed) = self.local.upsert_bucket(bucket);
        self.broadcast(&stored).await;
        (stored, existed)
    }

    /// Sends the marshalled bucket to every peer, addressing all of them
    /// concurrently. Returns once each peer has been attempted; per-peer
    /// failures are logged and counted, never propagated.
    pub async fn broadcast(&self, bucket: &Bucket) {
        if self.peers.is_empty() {
            return;
        }

        let data = match bucket.encode() {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(bucket = %bucket.name(), "not broadcasting: {}", e);
                return;
            }
        };

        let sends = self.peers.iter().map(|&peer| {
            let socket = Arc::clone(&self.socket);
            let data = &data;
            async move {
                if let Err(e) = socket.send_to(data, peer).await {
                    metrics::record_broadcast_error(peer);
                    tracing::warn!(%peer, "broadcast failed: {}", e);
                }
            }
        });
        join_all(sends).await;
    }

    /// Broadcasts a zero-valued probe for `name`, collapsed to at most one
    /// outstanding incast per name per process.
    fn spawn_incast(&self, name: &str) {
        if self.peers.is_empty() {
            return;
        }
        if !self.inflight.lock().insert(name.to_string()) {
            return;
        }

        metrics::record_incast();
        let store = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            store.broadcast(&Bucket::zero(name.as_str())).await;
            store.inflight.lock().remove(&name);
        });
    }
}
