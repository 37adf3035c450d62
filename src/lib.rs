//! # Seenstore
//!
//! A concurrency-safe, optionally replicated in-memory store that lets a
//! fleet of crawl workers answer two questions cheaply:
//!
//! - "have I already recorded something equivalent to X?" (exact and
//!   near-duplicate detection)
//! - "am I hitting this target too often?" (fixed-window rate limiting)
//!
//! ## Features
//!
//! - One store instance shared by every worker in the process
//! - Per-key near-duplicate oracles behind the [`Oracle`] trait
//! - Bounded exact-hash set with LRU eviction
//! - Epoch-aligned fixed-window rate limiter with stale bucket sweeping
//! - Best-effort replication to peer processes over any byte-message channel
//!
//! ## Example
//!
//! ```rust
//! use seenstore::{DuplicateStore, Kind, StoreConfig};
//!
//! let store = DuplicateStore::new(&StoreConfig::default());
//! store.see("example.com", Kind::Hash, 42);
//! assert!(store.seen("example.com", Kind::Hash, 42, 0));
//! assert!(!store.seen("example.com", Kind::Hash, 43, 0));
//! assert!(store.hit("example.com"));
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod cli;
pub mod config;
pub mod models;
pub mod observability;
pub mod oracle;
pub mod replication;
pub mod store;

// Re-exports for convenience
pub use config::{ReplicationConfig, StoreConfig};
pub use models::{Function, Kind, PublishMessage, ReplicatedUpdate};
pub use oracle::{HammingOracle, HammingOracleFactory, Oracle, OracleFactory};
pub use replication::{LocalBus, ReplicationChannels, ReplicationHandle, SharedStore};
pub use store::{DuplicateStore, RateLimitConfig, ReplicationStats, StoreStats};

/// Error type for seenstore operations.
///
/// Store operations (`see`, `seen`, `hit`) never return errors. These
/// variants only surface from construction, configuration, observability
/// setup and the command line.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed replication payloads, unparsable script lines, bad config values |
/// | `OperationFailed` | I/O errors, missing tokio runtime, subscriber/recorder install failures |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for seenstore operations.
pub type Result<T> = std::result::Result<T, Error>;
