//! The replication receive loop: consumes datagrams from peers and applies
//! them to the local store.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use turnstile_core::config::{BUCKET_PACKET_SIZE, REPLICATION_READ_TIMEOUT_SECS};
use turnstile_core::Bucket;

use super::ReplicatedStore;
use crate::api::metrics;

impl ReplicatedStore {
    /// Consumes replication datagrams until `shutdown` flips or a fatal
    /// socket error occurs.
    ///
    /// Each read carries a deadline so cancellation is observed within
    /// [`REPLICATION_READ_TIMEOUT_SECS`] even if `shutdown` is never
    /// signalled. Deadline expiries and transient I/O errors continue the
    /// loop; any other I/O error is returned and should take the process
    /// down with it.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let deadline = Duration::from_secs(REPLICATION_READ_TIMEOUT_SECS);
        let mut buf = [0u8; BUCKET_PACKET_SIZE];

        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                read = timeout(deadline, self.socket.recv_from(&mut buf)) => {
                    let (len, from) = match read {
                        Err(_) => continue, // read deadline
                        Ok(Err(e)) if is_transient(&e) => continue,
                        Ok(Err(e)) => return Err(e),
                        Ok(Ok(read)) => read,
                    };
                    self.apply(&buf[..len], from).await;
                }
            }
        }
    }

    /// Applies one datagram: merge a state update, or answer an incast
    /// request with our own copy of the named bucket.
    async fn apply(&self, datagram: &[u8], from: SocketAddr) {
        let bucket = match Bucket::decode(datagram) {
            Ok(bucket) => bucket,
            Err(e) => {
                metrics::record_packet("invalid");
                tracing::debug!(%from, "dropping malformed datagram: {}", e);
                return;
            }
        };

        if !bucket.is_zero() {
            metrics::record_packet("update");
            self.local().upsert_bucket(&bucket);
            return;
        }

        // All-zero counters make the datagram an incast request. Unicast our
        // state back to the sender if we hold anything worth sharing.
        metrics::record_packet("incast_request");
        let Some(local) = self.local().peek(&bucket.name()) else {
            return;
        };
        if local.is_zero() {
            return;
        }

        match local.encode() {
            Ok(data) => {
                if let Err(e) = self.socket.send_to(&data, from).await {
                    tracing::warn!(%from, "incast reply failed: {}", e);
                }
            }
            Err(e) => tracing::warn!(%from, "incast reply not encodable: {}", e),
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
