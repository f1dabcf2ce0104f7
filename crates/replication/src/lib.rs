//! Replication policy for the Trinity cluster.
//!
//! This crate provides the pluggable replication strategy abstraction and
//! the concrete policy Trinity uses: N=3 owners for `Set`/`Get`/`IsSet`,
//! primary-only for `Delete`.

pub mod policy;
pub mod strategy;

pub use policy::{primary_only_strategy, replicated_strategy, REPLICATION_FACTOR};
pub use strategy::{ReplicationStrategy, SimpleStrategy};
