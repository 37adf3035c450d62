//! Property-based tests for store invariants.
//!
//! Uses proptest to verify invariants across random inputs:
//! - A recorded hash is always seen, an unrecorded one never is
//! - Oracle answers match a linear Hamming scan
//! - Wire messages decode back to the observation that produced them
//! - The rate limiter never admits more than its permits per window

#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use seenstore::store::window_start;
use seenstore::{DuplicateStore, Kind, PublishMessage, RateLimitConfig, StoreConfig};
use std::time::{Duration, UNIX_EPOCH};

proptest! {
    /// Property: hash membership is exact.
    #[test]
    fn prop_hash_membership_exact(
        key in "[a-z.]{1,20}",
        recorded in prop::collection::hash_set(any::<u64>(), 1..50),
        probe in any::<u64>(),
    ) {
        let store = DuplicateStore::default();
        for hash in &recorded {
            store.see(&key, Kind::Hash, *hash);
        }

        for hash in &recorded {
            prop_assert!(store.seen(&key, Kind::Hash, *hash, 0));
        }
        prop_assert_eq!(store.seen(&key, Kind::Hash, probe, 0), recorded.contains(&probe));
        prop_assert_eq!(store.stats().hashes, recorded.len());
    }

    /// Property: the default oracle agrees with a brute-force Hamming scan.
    #[test]
    fn prop_oracle_matches_linear_scan(
        recorded in prop::collection::vec(any::<u64>(), 1..64),
        probe in any::<u64>(),
        tolerance in 0_u8..16,
    ) {
        let store = DuplicateStore::default();
        for fingerprint in &recorded {
            store.see("k", Kind::Oracle, *fingerprint);
        }

        let expected = recorded
            .iter()
            .any(|fingerprint| (fingerprint ^ probe).count_ones() <= u32::from(tolerance));
        prop_assert_eq!(store.seen("k", Kind::Oracle, probe, tolerance), expected);
    }

    /// Property: a `See` message decodes to the observation that built it.
    #[test]
    fn prop_publish_message_decodes(
        key in ".{0,40}",
        fingerprint in any::<u64>(),
        hash in any::<bool>(),
    ) {
        let kind = if hash { Kind::Hash } else { Kind::Oracle };
        let payload = PublishMessage::see(kind, &key, fingerprint).to_bytes().unwrap();
        let update = PublishMessage::from_bytes(&payload).unwrap().decode().unwrap();

        prop_assert_eq!(update.kind, kind);
        prop_assert_eq!(update.key, key);
        prop_assert_eq!(update.fingerprint, fingerprint);
    }

    /// Property: admissions per window never exceed the permit count.
    #[test]
    fn prop_rate_limit_bounded(
        permits in 1_u32..10,
        offsets in prop::collection::vec(0_u64..30, 1..100),
    ) {
        let rate_limit = RateLimitConfig::default().with_permits(permits);
        let store = DuplicateStore::new(&StoreConfig::default().with_rate_limit(rate_limit));
        let base = 1_700_000_000_u64;

        let mut sorted = offsets;
        sorted.sort_unstable();

        let mut per_window = std::collections::HashMap::new();
        for offset in sorted {
            let now = UNIX_EPOCH + Duration::from_secs(base + offset);
            if store.hit_at("k", now) {
                *per_window
                    .entry(window_start(now, rate_limit.window_secs()))
                    .or_insert(0_u32) += 1;
            }
        }

        for admitted in per_window.values() {
            prop_assert!(*admitted <= permits);
        }
    }
}
