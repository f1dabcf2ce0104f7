//! Cluster networking: frame codec, peer state machine, cluster server,
//! TLS/identity material, and the memcached-compatible client front-end.

pub mod codec;
pub mod error;
pub mod memcache;
pub mod peer;
pub mod server;
pub mod tls;

pub use codec::{KvOp, Packet, PacketCodec, PacketId, Payload};
pub use error::{Error, Result};
pub use memcache::MemcacheServer;
pub use peer::{Peer, PeerEventHandler, PeerState};
pub use server::ClusterServer;
