//! The in-memory bucket store and the clock it stamps creations with.
//!
//! Buckets live in a single map guarded by a reader-writer lock. The map is
//! read-mostly: new buckets are rare while takes are frequent, so lookups
//! acquire the map lock in shared mode, release it, and mutate under the
//! individual bucket's own lock. Buckets are created on first lookup and
//! never removed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;

use crate::bucket::Bucket;

/// Wall-clock source with an optional constant offset.
///
/// The offset exists to exercise cluster behaviour under unsynchronized
/// clocks; production deployments run without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clock {
    offset: Duration,
}

impl Clock {
    /// The unmodified system clock.
    pub fn system() -> Self {
        Self::default()
    }

    /// A clock that runs `offset` ahead of the system clock.
    pub fn with_offset(offset: Duration) -> Self {
        Self { offset }
    }

    /// The current (possibly offset) wall-clock time.
    pub fn now(&self) -> SystemTime {
        SystemTime::now() + self.offset
    }
}

/// Thread-safe mapping from bucket name to [`Bucket`], created on miss.
///
/// Cloning a `MemoryStore` produces a new handle to the same shared map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    buckets: Arc<RwLock<HashMap<String, Bucket>>>,
    clock: Clock,
}

impl MemoryStore {
    /// Creates an empty store that stamps new buckets with `clock`.
    pub fn new(clock: Clock) -> Self {
        Self { buckets: Arc::default(), clock }
    }

    /// Creates a store pre-populated with `seed` buckets.
    pub fn with_buckets(clock: Clock, seed: impl IntoIterator<Item = Bucket>) -> Self {
        let store = Self::new(clock);
        {
            let mut buckets = store.buckets.write();
            for bucket in seed {
                bucket.ensure_created(clock.now());
                buckets.insert(bucket.name(), bucket);
            }
        }
        store
    }

    /// Returns the named bucket and whether it already existed, creating it
    /// with `created = clock.now()` on miss.
    pub fn get_bucket(&self, name: &str) -> (Bucket, bool) {
        if let Some(bucket) = self.buckets.read().get(name) {
            return (bucket.clone(), true);
        }

        let mut buckets = self.buckets.write();
        // Racing creators: the first insert wins.
        if let Some(bucket) = buckets.get(name) {
            return (bucket.clone(), true);
        }
        let bucket = Bucket::new(name, self.clock.now());
        buckets.insert(name.to_string(), bucket.clone());
        (bucket, false)
    }

    /// Installs `bucket` if its name is unknown, or merges it into the
    /// stored bucket otherwise. Returns the stored bucket and whether it
    /// already existed.
    ///
    /// Handing back the very handle obtained from [`get_bucket`] is the
    /// common path; its merge degenerates to the identity no-op.
    pub fn upsert_bucket(&self, bucket: &Bucket) -> (Bucket, bool) {
        let name = bucket.name();

        if let Some(stored) = self.buckets.read().get(&name) {
            stored.merge(bucket);
            return (stored.clone(), true);
        }

        let mut buckets = self.buckets.write();
        if let Some(stored) = buckets.get(&name) {
            stored.merge(bucket);
            return (stored.clone(), true);
        }
        bucket.ensure_created(self.clock.now());
        buckets.insert(name, bucket.clone());
        (bucket.clone(), false)
    }

    /// Returns the named bucket without creating it on miss.
    pub fn peek(&self, name: &str) -> Option<Bucket> {
        self.buckets.read().get(name).cloned()
    }

    /// Handles to all buckets, in no particular order.
    pub fn buckets(&self) -> Vec<Bucket> {
        self.buckets.read().values().cloned().collect()
    }

    /// Number of buckets in the store.
    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    /// Returns true if no bucket has been created yet.
    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }

    /// The clock new buckets are stamped with.
    pub fn clock(&self) -> Clock {
        self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::BucketState;
    use crate::rate::Rate;
    use std::thread;

    #[test]
    fn get_bucket_creates_on_miss() {
        let store = MemoryStore::new(Clock::system());

        let (bucket, existed) = store.get_bucket("a");
        assert!(!existed);
        assert!(bucket.snapshot().created.is_some());

        let (again, existed) = store.get_bucket("a");
        assert!(existed);
        assert_eq!(store.len(), 1);

        // Both lookups return handles to the same bucket.
        again.take(store.clock().now(), Rate::parse("5:1s").unwrap(), 1);
        assert_eq!(bucket.tokens(), 4);
    }

    #[test]
    fn upsert_installs_unknown_buckets_and_anchors_them() {
        let store = MemoryStore::new(Clock::system());

        // A decoded bucket arrives without a creation anchor.
        let incoming = Bucket::from_state(BucketState {
            name: "wire".into(),
            added: 10.0,
            taken: 4.0,
            elapsed: Duration::from_secs(1),
            created: None,
        });

        let (stored, existed) = store.upsert_bucket(&incoming);
        assert!(!existed);
        assert!(stored.snapshot().created.is_some());
        assert_eq!(store.peek("wire").unwrap().tokens(), 6);
    }

    #[test]
    fn upsert_merges_into_existing_bucket() {
        let store = MemoryStore::new(Clock::system());
        let (bucket, _) = store.get_bucket("m");
        bucket.take(store.clock().now(), Rate::parse("10:1s").unwrap(), 3);

        let incoming = Bucket::from_state(BucketState {
            name: "m".into(),
            added: 10.0,
            taken: 7.0,
            elapsed: Duration::ZERO,
            created: None,
        });
        let (stored, existed) = store.upsert_bucket(&incoming);
        assert!(existed);
        assert_eq!(stored.snapshot().taken, 7.0);
        // The store still holds one bucket, not the incoming handle.
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn upsert_same_handle_is_identity() {
        let store = MemoryStore::new(Clock::system());
        let (bucket, _) = store.get_bucket("id");
        bucket.take(store.clock().now(), Rate::parse("5:1s").unwrap(), 2);

        let before = bucket.snapshot();
        let (stored, existed) = store.upsert_bucket(&bucket);
        assert!(existed);
        let after = stored.snapshot();
        assert_eq!(
            (before.added, before.taken, before.elapsed),
            (after.added, after.taken, after.elapsed)
        );
    }

    #[test]
    fn peek_does_not_create() {
        let store = MemoryStore::new(Clock::system());
        assert!(store.peek("ghost").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn offset_clock_runs_ahead() {
        let skewed = Clock::with_offset(Duration::from_secs(3600));
        let system = Clock::system();
        let ahead = skewed
            .now()
            .duration_since(system.now())
            .expect("skewed clock behind system clock");
        assert!(ahead >= Duration::from_secs(3599));
    }

    #[test]
    fn concurrent_takes_keep_invariants() {
        let store = MemoryStore::new(Clock::system());
        let rate = Rate::parse("1000000:1s").unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let name = if i % 2 == 0 { "hot" } else { "cold" };
                    let (bucket, _) = store.get_bucket(name);
                    bucket.take(store.clock().now(), rate, 1);
                    store.upsert_bucket(&bucket);
                }
            }));
        }
        for handle in handles {
            handle.join().expect("worker panicked");
        }

        assert_eq!(store.len(), 2);
        for bucket in store.buckets() {
            let s = bucket.snapshot();
            assert!(s.added >= s.taken, "added {} < taken {}", s.added, s.taken);
        }
    }
}
