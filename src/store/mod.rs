//! The duplicate store.
//!
//! [`DuplicateStore`] owns three maps behind a single reader/writer lock:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       DuplicateStore                         │
//! │  ┌────────────────┐  ┌─────────────────┐  ┌───────────────┐  │
//! │  │ oracles        │  │ hashes          │  │ hits          │  │
//! │  │ key -> Oracle  │  │ "key/hash" LRU  │  │ "key/window"  │  │
//! │  │ (lazy, never   │  │ (bounded)       │  │ -> counter    │  │
//! │  │  replaced)     │  │                 │  │ (swept)       │  │
//! │  └────────────────┘  └─────────────────┘  └───────────────┘  │
//! │                    one RwLock over all                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Queries only ever read local state. When the store is shared (see
//! [`DuplicateStore::into_shared`]) every local `see` also enqueues a
//! [`PublishMessage`] for peers; updates received from peers are applied
//! without being published again.
//!
//! # Lock Poisoning
//!
//! Poisoning is handled fail-open: queries answer `false`, records are
//! skipped and `hit` admits. Duplicate detection and rate limiting are
//! best-effort and must never take a crawl worker down.

mod rate_limit;

pub use rate_limit::{DEFAULT_PERMITS, DEFAULT_WINDOW, RateLimitConfig, window_start};

use crate::config::StoreConfig;
use crate::models::{Kind, PublishMessage, ReplicatedUpdate};
use crate::oracle::{HammingOracleFactory, Oracle, OracleFactory};
use lru::LruCache;
use rate_limit::HitBuckets;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::instrument;

/// Where an observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// A caller in this process; published to peers when shared.
    Local,
    /// A peer; applied locally only.
    Replica,
}

impl Origin {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Replica => "replica",
        }
    }
}

/// Maps guarded by the store lock.
struct StoreState {
    oracles: HashMap<String, Arc<dyn Oracle>>,
    hashes: LruCache<String, ()>,
    hits: HitBuckets,
}

/// Point-in-time sizes of the store's maps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Keys with an oracle.
    pub oracles: usize,
    /// Exact hashes currently retained.
    pub hashes: usize,
    /// Live rate limiter buckets.
    pub hit_buckets: usize,
}

/// Replication traffic handled by one store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    /// Local updates handed to the publisher task.
    pub published: u64,
    /// Peer updates applied locally.
    pub applied: u64,
}

/// Concurrent seen-content store and rate limiter.
///
/// Construct one per service and share it as `Arc<DuplicateStore>`.
///
/// # Example
///
/// ```rust
/// use seenstore::{DuplicateStore, Kind, StoreConfig};
///
/// let store = DuplicateStore::new(&StoreConfig::default());
///
/// assert!(!store.seen("example.com", Kind::Oracle, 0xff, 3));
/// store.see("example.com", Kind::Oracle, 0xff);
/// assert!(store.seen("example.com", Kind::Oracle, 0xfe, 3));
/// ```
pub struct DuplicateStore {
    state: RwLock<StoreState>,
    oracle_factory: Arc<dyn OracleFactory>,
    rate_limit: RateLimitConfig,
    pub(crate) channel_capacity: usize,
    /// Application queue drained by the publisher task. `None` when standalone.
    pub(crate) publisher: Option<mpsc::UnboundedSender<PublishMessage>>,
    published: AtomicU64,
    applied: AtomicU64,
}

impl DuplicateStore {
    /// Creates a standalone store using [`HammingOracle`](crate::HammingOracle)s.
    ///
    /// A standalone store publishes nothing and spawns no tasks. Call
    /// [`into_shared`](Self::into_shared) to enable replication.
    #[must_use]
    pub fn new(config: &StoreConfig) -> Self {
        let capacity = NonZeroUsize::new(config.hash_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: RwLock::new(StoreState {
                oracles: HashMap::new(),
                hashes: LruCache::new(capacity),
                hits: HitBuckets::default(),
            }),
            oracle_factory: Arc::new(HammingOracleFactory),
            rate_limit: config.rate_limit,
            channel_capacity: config.replication.channel_capacity.max(1),
            publisher: None,
            published: AtomicU64::new(0),
            applied: AtomicU64::new(0),
        }
    }

    /// Builder method to set the oracle factory.
    #[must_use]
    pub fn with_oracle_factory(mut self, factory: Arc<dyn OracleFactory>) -> Self {
        self.oracle_factory = factory;
        self
    }

    /// Returns true if local observations are published to peers.
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        self.publisher.is_some()
    }

    /// Returns the rate limiter parameters.
    #[must_use]
    pub const fn rate_limit(&self) -> RateLimitConfig {
        self.rate_limit
    }

    /// Records an observation.
    ///
    /// Never blocks on replication: when shared, the update is handed to
    /// the publisher task and this call returns immediately.
    pub fn see(&self, key: &str, kind: Kind, fingerprint: u64) {
        self.record(key, kind, fingerprint, Origin::Local);
    }

    /// Records an observation given the kind's wire name.
    ///
    /// Unknown kinds are ignored.
    pub fn see_named(&self, key: &str, kind: &str, fingerprint: u64) {
        if let Some(kind) = Kind::parse(kind) {
            self.see(key, kind, fingerprint);
        } else {
            tracing::debug!(kind, "Ignoring see for unknown kind");
        }
    }

    /// Returns true if an equivalent observation was recorded.
    ///
    /// For [`Kind::Oracle`] the key's oracle decides using `tolerance`; for
    /// [`Kind::Hash`] the match is exact and `tolerance` is ignored. `false`
    /// means "not proven seen", never "proven unseen".
    #[instrument(
        level = "debug",
        skip(self, fingerprint),
        fields(operation = "seen", kind = %kind)
    )]
    pub fn seen(&self, key: &str, kind: Kind, fingerprint: u64, tolerance: u8) -> bool {
        let found = match kind {
            Kind::Oracle => self
                .lookup_oracle(key)
                .is_some_and(|oracle| oracle.is_near(fingerprint, tolerance)),
            Kind::Hash => {
                let bucket = hash_bucket(key, fingerprint);
                self.read_state()
                    .is_some_and(|state| state.hashes.contains(&bucket))
            },
        };

        metrics::counter!(
            "seenstore_seen_total",
            "kind" => kind.as_str(),
            "found" => if found { "true" } else { "false" }
        )
        .increment(1);

        found
    }

    /// Queries by the kind's wire name. Unknown kinds answer `false`.
    pub fn seen_named(&self, key: &str, kind: &str, fingerprint: u64, tolerance: u8) -> bool {
        Kind::parse(kind).is_some_and(|kind| self.seen(key, kind, fingerprint, tolerance))
    }

    /// Counts a hit against `key` in the current window.
    ///
    /// Returns true if the caller may proceed.
    pub fn hit(&self, key: &str) -> bool {
        self.hit_at(key, SystemTime::now())
    }

    /// Counts a hit against `key` in the window containing `now`.
    #[instrument(level = "debug", skip(self, now), fields(operation = "hit"))]
    pub fn hit_at(&self, key: &str, now: SystemTime) -> bool {
        let window_secs = self.rate_limit.window_secs();
        let start = window_start(now, window_secs);

        let Some(mut state) = self.write_state() else {
            return true;
        };

        let swept = state.hits.sweep(start, window_secs);
        if swept > 0 {
            tracing::debug!(swept, window_start = start, "Swept stale hit buckets");
            metrics::counter!("seenstore_hit_buckets_swept_total").increment(swept as u64);
        }

        let admitted = state.hits.admit(key, start, self.rate_limit.permits);
        let buckets = state.hits.len();
        drop(state);

        metrics::gauge!("seenstore_hit_buckets").set(buckets as f64);
        metrics::counter!(
            "seenstore_hit_total",
            "admitted" => if admitted { "true" } else { "false" }
        )
        .increment(1);

        if !admitted {
            tracing::debug!(window_start = start, "Rate limit exhausted");
        }
        admitted
    }

    /// Returns the current map sizes.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.read_state()
            .map(|state| StoreStats {
                oracles: state.oracles.len(),
                hashes: state.hashes.len(),
                hit_buckets: state.hits.len(),
            })
            .unwrap_or_default()
    }

    /// Returns replication counters. Both are zero for a standalone store.
    #[must_use]
    pub fn replication_stats(&self) -> ReplicationStats {
        ReplicationStats {
            published: self.published.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
        }
    }

    /// Applies an update received from a peer without publishing it.
    pub(crate) fn apply_replicated(&self, update: &ReplicatedUpdate) {
        self.record(&update.key, update.kind, update.fingerprint, Origin::Replica);
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    #[instrument(
        level = "debug",
        skip(self, fingerprint),
        fields(operation = "see", kind = %kind, origin = origin.as_str())
    )]
    fn record(&self, key: &str, kind: Kind, fingerprint: u64, origin: Origin) {
        match kind {
            Kind::Oracle => {
                if let Some(oracle) = self.oracle_for(key) {
                    oracle.record(fingerprint);
                }
            },
            Kind::Hash => {
                let bucket = hash_bucket(key, fingerprint);
                if let Some(mut state) = self.write_state() {
                    state.hashes.put(bucket, ());
                    let len = state.hashes.len();
                    drop(state);
                    metrics::gauge!("seenstore_hashes").set(len as f64);
                }
            },
        }

        metrics::counter!(
            "seenstore_see_total",
            "kind" => kind.as_str(),
            "origin" => origin.as_str()
        )
        .increment(1);

        if origin == Origin::Local {
            self.publish(kind, key, fingerprint);
        }
    }

    /// Hands a local update to the publisher task, if any.
    fn publish(&self, kind: Kind, key: &str, fingerprint: u64) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        if publisher
            .send(PublishMessage::see(kind, key, fingerprint))
            .is_ok()
        {
            self.published.fetch_add(1, Ordering::Relaxed);
        } else {
            tracing::debug!("Publisher stopped, dropping replicated update");
        }
    }

    fn lookup_oracle(&self, key: &str) -> Option<Arc<dyn Oracle>> {
        self.read_state()?.oracles.get(key).cloned()
    }

    /// Returns the oracle for `key`, creating it under the write lock.
    ///
    /// The map is re-checked after acquiring the write lock so concurrent
    /// first observations of a key share one oracle.
    fn oracle_for(&self, key: &str) -> Option<Arc<dyn Oracle>> {
        if let Some(oracle) = self.lookup_oracle(key) {
            return Some(oracle);
        }

        let mut state = self.write_state()?;
        let oracle = state
            .oracles
            .entry(key.to_string())
            .or_insert_with(|| {
                tracing::debug!("Creating oracle for new key");
                self.oracle_factory.create(key)
            })
            .clone();
        let len = state.oracles.len();
        drop(state);

        metrics::gauge!("seenstore_oracles").set(len as f64);
        Some(oracle)
    }

    fn read_state(&self) -> Option<RwLockReadGuard<'_, StoreState>> {
        match self.state.read() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::warn!("Store lock poisoned, failing open");
                None
            },
        }
    }

    fn write_state(&self) -> Option<RwLockWriteGuard<'_, StoreState>> {
        match self.state.write() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::warn!("Store lock poisoned, failing open");
                None
            },
        }
    }
}

impl Default for DuplicateStore {
    fn default() -> Self {
        Self::new(&StoreConfig::default())
    }
}

/// Set entry for an exact hash: `key + "/" + decimal(hash)`.
fn hash_bucket(key: &str, hash: u64) -> String {
    format!("{key}/{hash}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, UNIX_EPOCH};

    /// Oracle stub that answers a fixed value and counts calls.
    #[derive(Default)]
    struct StubOracle {
        answer: bool,
        records: AtomicUsize,
    }

    impl Oracle for StubOracle {
        fn record(&self, _fingerprint: u64) {
            self.records.fetch_add(1, Ordering::SeqCst);
        }

        fn is_near(&self, _fingerprint: u64, _tolerance: u8) -> bool {
            self.answer
        }
    }

    fn store() -> DuplicateStore {
        DuplicateStore::new(&StoreConfig::default())
    }

    #[test]
    fn test_hash_see_then_seen() {
        let store = store();
        store.see("example.com", Kind::Hash, 42);

        assert!(store.seen("example.com", Kind::Hash, 42, 0));
        assert!(!store.seen("example.com", Kind::Hash, 43, 0));
        assert!(!store.seen("other.com", Kind::Hash, 42, 0));
    }

    #[test]
    fn test_hash_tolerance_ignored() {
        let store = store();
        store.see("k", Kind::Hash, 0b1000);
        assert!(!store.seen("k", Kind::Hash, 0b1001, 64));
        assert!(store.seen("k", Kind::Hash, 0b1000, 0));
    }

    #[test]
    fn test_hash_see_is_idempotent() {
        let store = store();
        for _ in 0..10 {
            store.see("k", Kind::Hash, 7);
        }
        assert!(store.seen("k", Kind::Hash, 7, 0));
        assert_eq!(store.stats().hashes, 1);
    }

    #[test]
    fn test_hash_bucket_format() {
        assert_eq!(hash_bucket("example.com", 42), "example.com/42");
        assert_eq!(hash_bucket("", u64::MAX), "/18446744073709551615");
    }

    #[test]
    fn test_hash_capacity_evicts_least_recent() {
        let config = StoreConfig::default().with_hash_capacity(2);
        let store = DuplicateStore::new(&config);

        store.see("k", Kind::Hash, 1);
        store.see("k", Kind::Hash, 2);
        store.see("k", Kind::Hash, 1); // refresh
        store.see("k", Kind::Hash, 3);

        assert!(store.seen("k", Kind::Hash, 1, 0));
        assert!(!store.seen("k", Kind::Hash, 2, 0));
        assert!(store.seen("k", Kind::Hash, 3, 0));
        assert_eq!(store.stats().hashes, 2);
    }

    #[test]
    fn test_oracle_unseen_key_is_false() {
        let stub = Arc::new(StubOracle {
            answer: true,
            ..StubOracle::default()
        });
        let factory_stub = Arc::clone(&stub);
        let store = store().with_oracle_factory(Arc::new(move |_key: &str| -> Arc<dyn Oracle> {
            factory_stub.clone()
        }));

        assert!(!store.seen("k", Kind::Oracle, 1, 3));
        assert_eq!(store.stats().oracles, 0);
    }

    #[test]
    fn test_oracle_delegation() {
        for answer in [true, false] {
            let stub = Arc::new(StubOracle {
                answer,
                ..StubOracle::default()
            });
            let factory_stub = Arc::clone(&stub);
            let store = store().with_oracle_factory(Arc::new(
                move |_key: &str| -> Arc<dyn Oracle> { factory_stub.clone() },
            ));

            store.see("k", Kind::Oracle, 1);
            assert_eq!(store.seen("k", Kind::Oracle, 99, 0), answer);
            assert_eq!(stub.records.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_default_oracle_near_duplicate() {
        let store = store();
        store.see("example.com", Kind::Oracle, 0xf0f0);

        assert!(store.seen("example.com", Kind::Oracle, 0xf0f1, 1));
        assert!(!store.seen("example.com", Kind::Oracle, 0xf0f1, 0));
        assert!(!store.seen("other.com", Kind::Oracle, 0xf0f0, 64));
    }

    #[test]
    fn test_kinds_are_separate() {
        let store = store();
        store.see("k", Kind::Hash, 5);
        assert!(!store.seen("k", Kind::Oracle, 5, 0));

        store.see("k", Kind::Oracle, 9);
        assert!(!store.seen("k", Kind::Hash, 9, 0));
    }

    #[test]
    fn test_unknown_kind_by_name() {
        let store = store();
        store.see_named("k", "bogus", 1);
        assert_eq!(store.stats(), StoreStats::default());
        assert!(!store.seen_named("k", "bogus", 1, 0));

        store.see_named("k", "hash", 1);
        assert!(store.seen_named("k", "hash", 1, 0));
        assert!(!store.seen_named("k", "bogus", 1, 0));
    }

    #[test]
    fn test_standalone_is_not_shared() {
        let store = store();
        store.see("k", Kind::Hash, 1);
        assert!(!store.is_shared());
        assert_eq!(store.replication_stats(), ReplicationStats::default());
    }

    #[test]
    fn test_hit_limits_per_window() {
        let store = store();
        let t0 = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        for i in 0..5 {
            assert!(store.hit_at("example.com", t0), "hit {i} should be admitted");
        }
        assert!(!store.hit_at("example.com", t0));
        assert!(!store.hit_at("example.com", t0 + Duration::from_secs(4)));

        // Next window.
        assert!(store.hit_at("example.com", t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_hit_window_is_epoch_aligned() {
        let store = store();
        // 1_700_000_004 is the last second of the window starting at ...000.
        let late = UNIX_EPOCH + Duration::from_secs(1_700_000_004);
        for _ in 0..5 {
            assert!(store.hit_at("k", late));
        }
        assert!(!store.hit_at("k", late));
        // One second later is a new window: up to twice the rate across the boundary.
        let next = late + Duration::from_secs(1);
        for _ in 0..5 {
            assert!(store.hit_at("k", next));
        }
        assert!(!store.hit_at("k", next));
    }

    #[test]
    fn test_hit_custom_limits() {
        let config = StoreConfig::default().with_rate_limit(
            RateLimitConfig::default()
                .with_permits(2)
                .with_window(Duration::from_secs(60)),
        );
        let store = DuplicateStore::new(&config);
        let t0 = UNIX_EPOCH + Duration::from_secs(120);

        assert!(store.hit_at("k", t0));
        assert!(store.hit_at("k", t0 + Duration::from_secs(59)));
        assert!(!store.hit_at("k", t0 + Duration::from_secs(30)));
        assert!(store.hit_at("k", t0 + Duration::from_secs(60)));
    }

    #[test]
    fn test_stale_hit_buckets_swept() {
        let store = store();
        let t0 = UNIX_EPOCH + Duration::from_secs(1_000);

        store.hit_at("a", t0);
        store.hit_at("b", t0);
        assert_eq!(store.stats().hit_buckets, 2);

        store.hit_at("a", t0 + Duration::from_secs(5));
        assert_eq!(store.stats().hit_buckets, 3);

        store.hit_at("a", t0 + Duration::from_secs(10));
        // Buckets from t0 are two windows old now.
        assert_eq!(store.stats().hit_buckets, 2);
    }

    #[test]
    fn test_hit_real_clock() {
        let store = store();
        assert!(store.hit("example.com"));
    }

    #[test]
    fn test_concurrent_first_see_creates_one_oracle() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let store = Arc::new(store().with_oracle_factory(Arc::new(
            move |_key: &str| -> Arc<dyn Oracle> {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(StubOracle::default())
            },
        )));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.see("shared-key", Kind::Oracle, i))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(store.stats().oracles, 1);
    }
}
