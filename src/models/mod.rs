//! Data models for seenstore.
//!
//! Observation kinds and the replication wire message.

mod kind;
mod message;

pub use kind::{Function, Kind};
pub use message::{PublishMessage, ReplicatedUpdate};
