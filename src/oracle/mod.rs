//! Near-duplicate oracles.
//!
//! An [`Oracle`] accumulates the fingerprints recorded against one key and
//! answers whether a new fingerprint is close to any of them. The store
//! creates one oracle per key through an [`OracleFactory`] and never
//! replaces it.
//!
//! The default implementation, [`HammingOracle`], treats fingerprints as
//! 64-bit simhashes and measures closeness as Hamming distance.
//!
//! # Example
//!
//! ```rust
//! use seenstore::{HammingOracle, Oracle};
//!
//! let oracle = HammingOracle::new();
//! oracle.record(0b1010);
//! assert!(oracle.is_near(0b1011, 1));
//! assert!(!oracle.is_near(0b0101, 2));
//! ```

mod hamming;

pub use hamming::{HammingOracle, HammingOracleFactory, hamming_distance};

use std::sync::Arc;

/// Per-key near-duplicate accumulator.
///
/// Implementations must be safe to call concurrently: the store holds no
/// lock while invoking these methods.
pub trait Oracle: Send + Sync {
    /// Records a fingerprint.
    fn record(&self, fingerprint: u64);

    /// Returns true if a recorded fingerprint is within `tolerance` of
    /// `fingerprint`. The meaning of `tolerance` is defined by the oracle.
    fn is_near(&self, fingerprint: u64, tolerance: u8) -> bool;
}

/// Creates the oracle for a key on first use.
pub trait OracleFactory: Send + Sync {
    /// Creates an empty oracle for `key`.
    fn create(&self, key: &str) -> Arc<dyn Oracle>;
}

impl<F> OracleFactory for F
where
    F: Fn(&str) -> Arc<dyn Oracle> + Send + Sync,
{
    fn create(&self, key: &str) -> Arc<dyn Oracle> {
        self(key)
    }
}
