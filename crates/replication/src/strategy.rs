//! Replication strategy abstractions.
//!
//! A replication strategy determines which nodes should hold a copy of a
//! given key. Grounded in `crates/replication/src/strategy/simple.rs` of the
//! teacher crate, but delegating the actual ring walk to
//! [`trinity_core::Ring::owners_of`] rather than re-deriving it from a
//! sorted token list — the teacher's `Ring` had no such method yet, so its
//! `SimpleStrategy` did the walk itself; ours doesn't need to.

use trinity_core::{NodeId, Position, Ring};

/// A pluggable policy for choosing which nodes replicate a key.
///
/// Implementations must be thread-safe, since a single policy is shared
/// across every connection the cluster server handles.
pub trait ReplicationStrategy: Send + Sync {
    /// Number of distinct owners this strategy targets for a key.
    fn replication_factor(&self) -> usize;

    /// Find the owning nodes for `key_hash`, primary first.
    fn owners_for(&self, ring: &Ring, key_hash: Position) -> Vec<NodeId>;

    /// Human-readable strategy name, for logging.
    fn name(&self) -> &'static str;
}

/// Places replicas on the N nodes encountered walking clockwise from the
/// key's position, skipping nodes already seen — the ring's native virtual
/// node walk, with no topology awareness (no rack/datacenter placement).
#[derive(Debug, Clone, Copy)]
pub struct SimpleStrategy {
    replication_factor: usize,
}

impl SimpleStrategy {
    pub fn new(replication_factor: usize) -> Self {
        Self { replication_factor }
    }
}

impl ReplicationStrategy for SimpleStrategy {
    fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    fn owners_for(&self, ring: &Ring, key_hash: Position) -> Vec<NodeId> {
        ring.owners_of(key_hash, self.replication_factor)
    }

    fn name(&self) -> &'static str {
        "SimpleStrategy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trinity_core::NetworkNode;

    #[test]
    fn replication_factor_is_reported() {
        let strategy = SimpleStrategy::new(3);
        assert_eq!(strategy.replication_factor(), 3);
    }

    #[test]
    fn owners_for_walks_the_ring() {
        let ring = Ring::new();
        for i in 0..3 {
            ring.add_node(NetworkNode::new(format!("n{i}:1"))).unwrap();
        }
        let strategy = SimpleStrategy::new(3);
        let owners = strategy.owners_for(&ring, Position::random());
        assert_eq!(owners.len(), 3);
    }
}
