//! Cluster server: peer mesh lifecycle plus replicated KV routing
//! (`spec.md` §4.5).
//!
//! Grounded in `network/server.go` / `network/tls_server.go`. The original's
//! `connections map[ch.NodeId]*Peer` guarded by a mutex becomes a
//! `DashMap<NodeId, Arc<Peer>>`: reads and the `NotifyAllPeers` snapshot
//! never hold a lock across I/O, since a `DashMap` iteration only holds one
//! shard lock at a time and `Set`/`Get`/`IsSet`/`Delete` only ever clone an
//! `Arc<Peer>` out before awaiting anything.

use crate::codec::{
    KvOp, Packet, PacketCodec, PacketId, Payload, CMD_DISTRIBUTION, CMD_KVSTORE, CMD_KVSTORE_ACK,
    CMD_KVSTORE_NOT_FOUND, CMD_PEERLIST, KV_DELETE, KV_GET, KV_IS_SET, KV_SET,
};
use crate::error::{Error, Result};
use crate::peer::{Peer, PeerEventHandler};
use async_trait::async_trait;
use dashmap::DashMap;
use rustls::{ClientConfig, ServerConfig};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::codec::{FramedRead, FramedWrite};
use trinity_core::{hash_key, KvStore, NetworkNode, NodeId, Ring};
use trinity_replication::{primary_only_strategy, replicated_strategy, ReplicationStrategy};

/// The cluster-facing half of a Trinity node: owns the ring, the KV store,
/// the peer table and the TLS material needed to grow the mesh.
pub struct ClusterServer {
    pub local_node: NetworkNode,
    pub ring: Arc<Ring>,
    pub kv: Arc<KvStore>,
    peers: DashMap<NodeId, Arc<Peer>>,
    server_tls: Arc<ServerConfig>,
    client_tls: Arc<ClientConfig>,
    shutdown: Notify,
    heartbeat_enabled: bool,
    /// A weak self-reference so the [`PeerEventHandler`] impl (which only
    /// borrows `&self`) can still drive new outbound connections in
    /// response to gossiped peer lists, which need an owned `Arc<Self>`.
    weak_self: Weak<ClusterServer>,
}

impl ClusterServer {
    pub fn new(
        local_node: NetworkNode,
        ring: Arc<Ring>,
        kv: Arc<KvStore>,
        server_tls: Arc<ServerConfig>,
        client_tls: Arc<ClientConfig>,
        heartbeat_enabled: bool,
    ) -> Result<Arc<Self>> {
        ring.add_node(local_node.clone())?;
        Ok(Arc::new_cyclic(|weak_self| Self {
            local_node,
            ring,
            kv,
            peers: DashMap::new(),
            server_tls,
            client_tls,
            shutdown: Notify::new(),
            heartbeat_enabled,
            weak_self: weak_self.clone(),
        }))
    }

    /// Binds `addr` and accepts inbound peer connections until [`Self::stop`]
    /// is called (`spec.md` §4.5/§4.10). Each accepted connection performs a
    /// TLS handshake requiring a valid client certificate before any
    /// application data is exchanged.
    pub async fn listen(self: &Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await.map_err(Error::Io)?;
        let acceptor = TlsAcceptor::from(Arc::clone(&self.server_tls));
        tracing::info!(%addr, "cluster server listening");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    tracing::info!("cluster server stopping accept loop");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let this = Arc::clone(self);
                    let acceptor = acceptor.clone();
                    tokio::spawn(async move {
                        if let Err(e) = this.accept_one(acceptor, stream, remote_addr).await {
                            tracing::warn!(%remote_addr, error = %e, "peer handshake failed");
                        }
                    });
                }
            }
        }
    }

    async fn accept_one(
        self: &Arc<Self>,
        acceptor: TlsAcceptor,
        stream: TcpStream,
        remote_addr: SocketAddr,
    ) -> Result<()> {
        let tls_stream = acceptor.accept(stream).await.map_err(Error::Io)?;
        let (_, conn) = tls_stream.get_ref();
        if conn.peer_certificates().map(|c| c.is_empty()).unwrap_or(true) {
            return Err(Error::NoPeerCertificate);
        }
        let (read_half, write_half) = tokio::io::split(tls_stream);
        let framed_read = FramedRead::new(read_half, PacketCodec::new());
        let framed_write = FramedWrite::new(write_half, PacketCodec::new());

        let peer = Peer::spawn(remote_addr, true, framed_write);
        peer.set_state(crate::peer::PeerState::Handshake);
        // Announce our own identity first, matching the original's
        // `SendDistribution` call immediately after a connection is
        // accepted or dialled.
        peer.send_packet(Packet::new(
            CMD_DISTRIBUTION,
            Payload::NetworkNode(self.local_node.clone()),
        ))?;

        let handler: Arc<dyn PeerEventHandler> = self.clone() as Arc<dyn PeerEventHandler>;
        tokio::spawn(peer.run(framed_read, handler));
        Ok(())
    }

    /// Dials `addr`, refusing self-connection (`spec.md` §4.5 — the original
    /// compares the target host address against its own before dialling).
    pub async fn connect_to(self: &Arc<Self>, addr: &str) -> Result<()> {
        if addr == self.local_node.host_addr {
            return Err(Error::SelfConnect);
        }
        let remote_addr: SocketAddr = addr
            .parse()
            .map_err(|_| Error::Config(format!("invalid peer address: {addr}")))?;

        let stream = TcpStream::connect(remote_addr).await.map_err(Error::Io)?;
        let connector = TlsConnector::from(Arc::clone(&self.client_tls));
        let server_name = rustls::pki_types::ServerName::try_from("trinity-peer")
            .map_err(|_| Error::Config("invalid TLS server name".to_string()))?
            .to_owned();
        let tls_stream = connector.connect(server_name, stream).await.map_err(Error::Io)?;

        let (read_half, write_half) = tokio::io::split(tls_stream);
        let framed_read = FramedRead::new(read_half, PacketCodec::new());
        let framed_write = FramedWrite::new(write_half, PacketCodec::new());

        let peer = Peer::spawn(remote_addr, false, framed_write);
        peer.set_state(crate::peer::PeerState::Handshake);
        peer.send_packet(Packet::new(
            CMD_DISTRIBUTION,
            Payload::NetworkNode(self.local_node.clone()),
        ))?;

        let handler: Arc<dyn PeerEventHandler> = self.clone() as Arc<dyn PeerEventHandler>;
        tokio::spawn(peer.run(framed_read, handler));
        Ok(())
    }

    /// Sends every connected peer the set of all *other* connected peers, so
    /// the mesh converges without a central directory (`spec.md` §4.5,
    /// grounded in `NotifyAllPeers`).
    pub fn notify_all_peers(&self) {
        let snapshot: Vec<(NodeId, Arc<Peer>)> = self
            .peers
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();

        for (id, peer) in &snapshot {
            let others: HashMap<NodeId, String> = snapshot
                .iter()
                .filter(|(other_id, _)| other_id != id)
                .filter_map(|(other_id, other_peer)| {
                    other_peer.host_addr().map(|addr| (*other_id, addr))
                })
                .collect();
            if others.is_empty() {
                continue;
            }
            let _ = peer.send_packet(Packet::new(CMD_PEERLIST, Payload::PeerList(others)));
        }
    }

    fn connected_peer(&self, id: NodeId) -> Option<Arc<Peer>> {
        self.peers.get(&id).map(|p| Arc::clone(p.value()))
    }

    async fn kv_round_trip(&self, owner: NodeId, op: KvOp) -> Option<Packet> {
        if owner == self.local_node.id {
            return Some(self.apply_local(op));
        }
        let peer = self.connected_peer(owner)?;
        let request = Packet::new(CMD_KVSTORE, Payload::KvOp(op));
        match peer.send_and_await(request).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                tracing::warn!(%owner, error = %e, "kv round-trip failed");
                None
            }
        }
    }

    fn apply_local(&self, op: KvOp) -> Packet {
        match op.sub_command {
            KV_SET => {
                let expires_at = op
                    .expires_at_millis
                    .map(|ms| SystemTime::UNIX_EPOCH + std::time::Duration::from_millis(ms));
                self.kv.set(&op.key, op.data, op.flags, expires_at);
                Packet::response(CMD_KVSTORE_ACK, PacketId::ZERO, Payload::None)
            }
            KV_GET => match self.kv.get(&op.key) {
                Some((data, flags)) => {
                    let reply_op = KvOp {
                        sub_command: KV_GET,
                        key: op.key,
                        key_hash: op.key_hash,
                        data,
                        flags,
                        expires_at_millis: None,
                        target_id: op.target_id,
                    };
                    Packet::response(CMD_KVSTORE_ACK, PacketId::ZERO, Payload::KvOp(reply_op))
                }
                None => Packet::response(CMD_KVSTORE_NOT_FOUND, PacketId::ZERO, Payload::None),
            },
            KV_IS_SET => {
                if self.kv.is_set(&op.key) {
                    Packet::response(CMD_KVSTORE_ACK, PacketId::ZERO, Payload::None)
                } else {
                    Packet::response(CMD_KVSTORE_NOT_FOUND, PacketId::ZERO, Payload::None)
                }
            }
            KV_DELETE => {
                self.kv.delete(&op.key);
                Packet::response(CMD_KVSTORE_ACK, PacketId::ZERO, Payload::None)
            }
            _ => Packet::response(CMD_KVSTORE_NOT_FOUND, PacketId::ZERO, Payload::None),
        }
    }

    fn owners(&self, strategy: &dyn ReplicationStrategy, key: &str) -> Vec<NodeId> {
        let hash = hash_key(key);
        strategy.owners_for(&self.ring, hash)
    }

    /// Replicates `set` to the top-3 owners of `key` (`spec.md` §4.5).
    pub async fn set(&self, key: &str, data: Vec<u8>, flags: i16, expires_at: Option<SystemTime>) {
        let strategy = replicated_strategy();
        let owners = self.owners(&strategy, key);
        let expires_at_millis = expires_at.map(|t| {
            t.duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0)
        });
        for owner in owners {
            let op = KvOp {
                sub_command: KV_SET,
                key: key.to_string(),
                key_hash: hash_key(key),
                data: data.clone(),
                flags,
                expires_at_millis,
                target_id: owner,
            };
            self.kv_round_trip(owner, op).await;
        }
    }

    /// Walks the top-3 owners of `key`, returning the first hit
    /// (`spec.md` §4.5's "walk-until-first-hit" semantics).
    pub async fn get(&self, key: &str) -> Option<(Vec<u8>, i16)> {
        let strategy = replicated_strategy();
        let owners = self.owners(&strategy, key);
        for owner in owners {
            let op = KvOp {
                sub_command: KV_GET,
                key: key.to_string(),
                key_hash: hash_key(key),
                data: Vec::new(),
                flags: 0,
                expires_at_millis: None,
                target_id: owner,
            };
            if let Some(reply) = self.kv_round_trip(owner, op).await {
                if reply.command == CMD_KVSTORE_ACK {
                    if let Payload::KvOp(reply_op) = reply.payload {
                        return Some((reply_op.data, reply_op.flags));
                    }
                }
            }
        }
        None
    }

    /// Walks the top-3 owners of `key`, same order as [`Self::get`].
    pub async fn is_set(&self, key: &str) -> bool {
        let strategy = replicated_strategy();
        let owners = self.owners(&strategy, key);
        for owner in owners {
            let op = KvOp {
                sub_command: KV_IS_SET,
                key: key.to_string(),
                key_hash: hash_key(key),
                data: Vec::new(),
                flags: 0,
                expires_at_millis: None,
                target_id: owner,
            };
            if let Some(reply) = self.kv_round_trip(owner, op).await {
                if reply.command == CMD_KVSTORE_ACK {
                    return true;
                }
            }
        }
        false
    }

    /// Deletes `key` from its primary owner only (`spec.md` §4.5 Open
    /// Question — ghost entries are intentionally left on replicas; see
    /// `DESIGN.md`).
    pub async fn delete(&self, key: &str) -> bool {
        let strategy = primary_only_strategy();
        let owners = self.owners(&strategy, key);
        let Some(&primary) = owners.first() else {
            return false;
        };
        let op = KvOp {
            sub_command: KV_DELETE,
            key: key.to_string(),
            key_hash: hash_key(key),
            data: Vec::new(),
            flags: 0,
            expires_at_millis: None,
            target_id: primary,
        };
        matches!(
            self.kv_round_trip(primary, op).await,
            Some(reply) if reply.command == CMD_KVSTORE_ACK
        )
    }

    /// Snapshot of every connected peer's `(id, incoming, remote_addr,
    /// state)`, for the `SIGUSR1` status dump (`spec.md` §6,
    /// `SPEC_FULL.md` §4.10).
    pub fn peer_statuses(&self) -> Vec<(NodeId, bool, SocketAddr, crate::peer::PeerState)> {
        self.peers
            .iter()
            .map(|e| {
                let peer = e.value();
                (*e.key(), peer.incoming, peer.remote_addr, peer.state())
            })
            .collect()
    }

    /// Signals the accept loop to stop and disconnects every peer. Does not
    /// stop the KV store; that is the caller's responsibility (`spec.md`
    /// §4.10 shutdown order).
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
        for entry in self.peers.iter() {
            entry.value().disconnect();
        }
    }
}

#[async_trait]
impl PeerEventHandler for ClusterServer {
    async fn on_distribution(&self, peer: &Arc<Peer>, node: NetworkNode) {
        if peer.id().is_some() {
            tracing::warn!(node_id = %node.id, "identity already exchanged on this connection, ignoring");
            return;
        }
        if node.id == self.local_node.id {
            if peer.incoming {
                tracing::debug!("peer dialled back to ourselves, disconnecting");
            } else {
                tracing::warn!("connected to ourselves, disconnecting");
            }
            peer.disconnect();
            return;
        }
        if self.ring.contains(node.id) {
            tracing::warn!(node_id = %node.id, "node already registered, ignoring duplicate connection");
            peer.disconnect();
            return;
        }

        peer.set_identity(node.clone());
        if let Err(e) = self.ring.add_node(node.clone()) {
            tracing::warn!(node_id = %node.id, error = %e, "failed to register peer in ring");
            peer.disconnect();
            return;
        }
        self.peers.insert(node.id, Arc::clone(peer));
        peer.set_state(crate::peer::PeerState::Connected);
        if self.heartbeat_enabled {
            if let Some(this) = self.weak_self.upgrade() {
                peer.spawn_heartbeat(this as Arc<dyn PeerEventHandler>);
            }
        }
        tracing::info!(node_id = %node.id, host_addr = %node.host_addr, "peer connected");
        self.notify_all_peers();
    }

    async fn on_peerlist(&self, _peer: &Arc<Peer>, list: HashMap<NodeId, String>) {
        for (id, host_addr) in list {
            if id == self.local_node.id {
                continue;
            }
            if self.peers.contains_key(&id) {
                continue;
            }
            let Some(this) = self.weak_self.upgrade() else {
                continue;
            };
            tracing::debug!(%id, %host_addr, "discovered peer via gossip, connecting");
            tokio::spawn(async move {
                if let Err(e) = this.connect_to(&host_addr).await {
                    tracing::debug!(%host_addr, error = %e, "gossip-driven connect failed");
                }
            });
        }
    }

    async fn on_kv_op(&self, peer: &Arc<Peer>, request_id: PacketId, op: KvOp) {
        let reply = self.apply_local(op);
        let reply = Packet {
            request_id,
            ..reply
        };
        if let Err(e) = peer.send_packet(reply) {
            tracing::debug!(error = %e, "failed to reply to kv op");
        }
    }

    /// Removes a disconnected peer from the connection map and the ring, so
    /// `owners_of`/`notify_all_peers` stop seeing it and a fresh
    /// `DISTRIBUTION` from the same node id is accepted instead of being
    /// rejected as a duplicate (`spec.md` §4.4, §8).
    async fn on_disconnect(&self, peer: &Arc<Peer>) {
        let Some(id) = peer.id() else {
            return;
        };
        if self.peers.remove(&id).is_none() {
            return;
        }
        if let Err(e) = self.ring.remove_node(id) {
            tracing::debug!(%id, error = %e, "failed to remove disconnected peer from ring");
        }
        tracing::info!(%id, "peer disconnected, removed from ring");
    }
}
