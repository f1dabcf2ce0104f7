//! Node identity and network-node records.
//!
//! A `NodeId` identifies a Trinity process instance for the lifetime of that
//! process. It is generated once at startup (see [`crate::rng`]) and never
//! changes; it is both the peer's cluster identity and a ring key type.

use crate::position::Position;
use crate::rng::random_u128;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of virtual-node positions a physical node distributes across the ring.
pub const DISTRIBUTION_SIZE: usize = 512;

/// Opaque 128-bit identifier for a node in the cluster.
///
/// Newtype over `u128` so comparisons and hashing are cheap. Display renders
/// as 32 lowercase hex digits, matching the byte-comparable [`Position`] type
/// it is frequently paired with.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(pub u128);

impl NodeId {
    /// Generates a new random node id from the process-lifetime RNG.
    pub fn random() -> Self {
        Self(random_u128())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A node's full ring membership record, as exchanged in the `DISTRIBUTION`
/// identity packet (`spec.md` §3, §4.4).
///
/// Serialization preserves `id`, `host_addr` and the full 512-entry
/// `distribution` array, matching the original's `ServerNetworkNode` struct
/// (`consistenthash/server_node.go`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkNode {
    pub id: NodeId,
    pub host_addr: String,
    pub distribution: Vec<Position>,
}

impl NetworkNode {
    /// Builds a network node with a freshly generated id and a fresh random
    /// distribution of [`DISTRIBUTION_SIZE`] positions.
    pub fn new(host_addr: impl Into<String>) -> Self {
        let id = NodeId::random();
        let distribution = (0..DISTRIBUTION_SIZE).map(|_| Position::random()).collect();
        Self {
            id,
            host_addr: host_addr.into(),
            distribution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_display_is_32_hex_chars() {
        let id = NodeId(0xdead_beef);
        let s = id.to_string();
        assert_eq!(s.len(), 32);
        assert!(s.ends_with("deadbeef"));
    }

    #[test]
    fn network_node_has_full_distribution() {
        let node = NetworkNode::new("localhost:13531");
        assert_eq!(node.distribution.len(), DISTRIBUTION_SIZE);
    }

    #[test]
    fn random_node_ids_are_distinct() {
        assert_ne!(NodeId::random(), NodeId::random());
    }
}
