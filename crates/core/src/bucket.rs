//! The token bucket and its replication wire form.
//!
//! A [`Bucket`] is a token bucket whose replicated state is a CRDT: `added`
//! and `taken` are two grow-only counters combined as a PN-counter, and
//! `elapsed` is an independent grow-only counter. [`Bucket::merge`] takes the
//! per-field maximum, which makes replication tolerate arbitrary reordering,
//! duplication, and loss of updates.
//!
//! Time is anchored to a node-local `created` timestamp that never goes on
//! the wire; only the relative `elapsed` advance replicates. Cluster members
//! can therefore disagree on wall clocks and still converge on how far a
//! bucket has moved through its own timeline.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;

use crate::config::{BUCKET_FIXED_SIZE, MAX_BUCKET_NAME_LEN};
use crate::rate::Rate;

/// Error marshalling a bucket to or from its wire form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The name does not fit in a single replication datagram.
    #[error("bucket name larger than 231")]
    NameTooLarge,
    /// The datagram is shorter than its header or declared name length.
    #[error("short buffer")]
    ShortBuffer,
    /// The name bytes are not valid UTF-8.
    #[error("bucket name is not valid utf-8")]
    InvalidName,
}

/// A bucket's counters plus the node-local creation anchor.
///
/// `created` is set once per process when the bucket is first instantiated
/// on this node and is deliberately absent from the wire form; a bucket
/// decoded from a datagram has no anchor until a store installs one.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BucketState {
    /// Cluster-wide identity; immutable after creation.
    pub name: String,
    /// Tokens ever added by refill. Monotonically non-decreasing.
    pub added: f64,
    /// Tokens ever consumed. Monotonically non-decreasing.
    pub taken: f64,
    /// Total time consumed by successful takes since creation.
    pub elapsed: Duration,
    /// Node-local creation time; never replicated.
    #[serde(skip)]
    pub created: Option<SystemTime>,
}

/// A named token bucket with CRDT merge semantics.
///
/// `Bucket` is a cheap cloneable handle; all clones share one state behind a
/// reader-writer lock, so hot and cold buckets never contend with each other.
#[derive(Debug, Clone)]
pub struct Bucket {
    state: Arc<RwLock<BucketState>>,
}

impl PartialEq for Bucket {
    fn eq(&self, other: &Self) -> bool {
        *self.state.read() == *other.state.read()
    }
}

impl Bucket {
    /// Creates a fresh bucket anchored at `created`.
    pub fn new(name: impl Into<String>, created: SystemTime) -> Self {
        Self::from_state(BucketState {
            name: name.into(),
            added: 0.0,
            taken: 0.0,
            elapsed: Duration::ZERO,
            created: Some(created),
        })
    }

    /// Creates a zero-valued, unanchored bucket carrying only a name.
    ///
    /// This is the shape of an incast request on the wire.
    pub fn zero(name: impl Into<String>) -> Self {
        Self::from_state(BucketState {
            name: name.into(),
            added: 0.0,
            taken: 0.0,
            elapsed: Duration::ZERO,
            created: None,
        })
    }

    /// Wraps an existing state in a handle.
    pub fn from_state(state: BucketState) -> Self {
        Self { state: Arc::new(RwLock::new(state)) }
    }

    /// The bucket's name.
    pub fn name(&self) -> String {
        self.state.read().name.clone()
    }

    /// A point-in-time copy of the bucket's state.
    pub fn snapshot(&self) -> BucketState {
        self.state.read().clone()
    }

    /// The number of whole tokens currently in the bucket.
    pub fn tokens(&self) -> u64 {
        let s = self.state.read();
        (s.added - s.taken) as u64
    }

    /// Returns true if all replicated counters are zero.
    ///
    /// A zero-valued bucket on the wire is an incast request: a peer asking
    /// whoever holds state for this name to unicast it back.
    pub fn is_zero(&self) -> bool {
        let s = self.state.read();
        s.added == 0.0 && s.taken == 0.0 && s.elapsed.is_zero()
    }

    /// Sets the creation anchor if the bucket does not have one yet.
    pub(crate) fn ensure_created(&self, now: SystemTime) {
        let mut s = self.state.write();
        if s.created.is_none() {
            s.created = Some(now);
        }
    }

    /// Attempts to take `n` tokens out of the bucket, refilled at `rate`, at
    /// time `now`. Returns the number of remaining tokens and whether the
    /// take was admitted. State mutates only on admission.
    pub fn take(&self, now: SystemTime, rate: Rate, n: u64) -> (u64, bool) {
        let mut s = self.state.write();

        // Capacity is the number of tokens that can be taken out of the
        // bucket in a single call, also known as burstiness.
        let capacity = rate.freq as f64;

        // A bucket that has never refilled nor been taken from starts full.
        if s.added == 0.0 {
            s.added = capacity;
        }

        if s.created.is_none() {
            s.created = Some(now);
        }
        let anchor = s.created.unwrap_or(now);

        // The bucket's current position in its own virtual timeline.
        let mut last = anchor + s.elapsed;
        if now < last {
            // Retrograde wall clock; never accrue negative elapsed time.
            last = now;
        }

        let tokens = s.added - s.taken;
        let delta = now.duration_since(last).unwrap_or_default();

        // Refill due to elapsed time, capped so tokens never exceed capacity.
        // The cap floors at zero: a merge may have overfilled the bucket, and
        // refill must not shrink the grow-only `added` counter.
        let mut refill = rate.tokens(delta);
        let missing = capacity - tokens;
        if refill > missing {
            refill = missing.max(0.0);
        }

        // No single take may draw more than capacity, even from a bucket a
        // merge has overfilled. This is also what makes a zero rate (capacity
        // zero) admit nothing regardless of leftover tokens.
        let have = (tokens + refill).min(capacity);

        let want = n as f64;
        if want > have {
            return (have as u64, false);
        }

        s.elapsed += delta;
        s.added += refill;
        s.taken += want;

        ((s.added - s.taken) as u64, true)
    }

    /// Merges `other` into this bucket by taking the per-field maximum of
    /// the replicated counters. `name` and `created` are never touched.
    /// Merging a handle into itself is a no-op.
    pub fn merge(&self, other: &Bucket) {
        if Arc::ptr_eq(&self.state, &other.state) {
            return;
        }

        // Copy under other's read lock, then update under ours; holding both
        // at once could deadlock against a concurrent opposite-order merge.
        let (added, taken, elapsed) = {
            let o = other.state.read();
            (o.added, o.taken, o.elapsed)
        };

        let mut s = self.state.write();
        if s.added < added {
            s.added = added;
        }
        if s.taken < taken {
            s.taken = taken;
        }
        if s.elapsed < elapsed {
            s.elapsed = elapsed;
        }
    }

    /// Marshals the bucket to its fixed wire form:
    ///
    /// | offset | size | field       | encoding                      |
    /// |--------|------|-------------|-------------------------------|
    /// | 0      | 8    | added       | IEEE-754 binary64, big-endian |
    /// | 8      | 8    | taken       | IEEE-754 binary64, big-endian |
    /// | 16     | 8    | elapsed     | nanoseconds, big-endian       |
    /// | 24     | 1    | name length | u8                            |
    /// | 25     | ≤231 | name        | raw UTF-8                     |
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let s = self.state.read();
        if s.name.len() > MAX_BUCKET_NAME_LEN {
            return Err(WireError::NameTooLarge);
        }

        let mut data = Vec::with_capacity(BUCKET_FIXED_SIZE + s.name.len());
        data.extend_from_slice(&s.added.to_be_bytes());
        data.extend_from_slice(&s.taken.to_be_bytes());
        data.extend_from_slice(&(s.elapsed.as_nanos() as u64).to_be_bytes());
        data.push(s.name.len() as u8);
        data.extend_from_slice(s.name.as_bytes());
        Ok(data)
    }

    /// Unmarshals a bucket from its wire form. The result carries no
    /// creation anchor; the store installs one on upsert.
    pub fn decode(data: &[u8]) -> Result<Bucket, WireError> {
        if data.len() < BUCKET_FIXED_SIZE {
            return Err(WireError::ShortBuffer);
        }

        let added = read_f64(&data[0..8]);
        let taken = read_f64(&data[8..16]);
        let elapsed = Duration::from_nanos(read_u64(&data[16..24]));

        let name_len = data[24] as usize;
        if data.len() < BUCKET_FIXED_SIZE + name_len {
            return Err(WireError::ShortBuffer);
        }
        let name = std::str::from_utf8(&data[BUCKET_FIXED_SIZE..BUCKET_FIXED_SIZE + name_len])
            .map_err(|_| WireError::InvalidName)?
            .to_string();

        Ok(Bucket::from_state(BucketState {
            name,
            added,
            taken,
            elapsed,
            created: None,
        }))
    }
}

fn read_f64(data: &[u8]) -> f64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[..8]);
    f64::from_be_bytes(bytes)
}

fn read_u64(data: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[..8]);
    u64::from_be_bytes(bytes)
}
