//! Peer connection state machine (`spec.md` §4.4).
//!
//! Grounded in `network/peer.go`, `network/peer_CMD_DISTRIBUTION.go` and
//! `network/peer_CMD_PEERLIST.go`. The original's `Peer.process()` reader
//! loop and its `Replies map[[16]byte]chan(*packets.Packet)` rendezvous
//! table are kept structurally: a reader task owns the framed stream, first
//! checking whether an inbound packet answers a pending `send_and_await`,
//! then dispatching unsolicited commands to a [`PeerEventHandler`] supplied
//! by the cluster server (the original dispatches directly into global
//! server state; here that coupling is a trait object instead, so `peer.rs`
//! has no dependency on `server.rs`).

use crate::codec::{Packet, PacketCodec, PacketId, Payload, CMD_HEARTBEAT, CMD_KVSTORE};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use trinity_core::{NetworkNode, NodeId};

/// Heartbeats are sent on this cadence once a peer is connected.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
/// No heartbeat for this long: the peer is flagged [`PeerState::Defib`].
pub const DEFIB_THRESHOLD: Duration = Duration::from_secs(5);
/// No heartbeat for this long: the peer is disconnected outright.
pub const DISCONNECT_THRESHOLD: Duration = Duration::from_secs(10);
/// How long `send_and_await` waits for a reply before giving up.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle states a peer connection moves through (`spec.md` §3, §4.4).
///
/// `Syncing` is reserved for a future snapshot-transfer feature; today it is
/// never entered and behaves identically to `Connected` wherever it would
/// matter (matches the original, which declares the state but never sets
/// it from a reachable code path).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PeerState {
    Disconnected,
    Connecting,
    Handshake,
    Connected,
    Syncing,
    Defib,
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PeerState::Disconnected => "disconnected",
            PeerState::Connecting => "connecting",
            PeerState::Handshake => "handshake",
            PeerState::Connected => "connected",
            PeerState::Syncing => "syncing",
            PeerState::Defib => "defib",
        };
        f.write_str(s)
    }
}

/// Called back by a peer's reader loop for commands it cannot answer on its
/// own (everything but direct replies to `send_and_await`, which are routed
/// internally via the `pending` table).
#[async_trait]
pub trait PeerEventHandler: Send + Sync {
    async fn on_distribution(&self, peer: &Arc<Peer>, node: NetworkNode);
    async fn on_peerlist(&self, peer: &Arc<Peer>, list: HashMap<NodeId, String>);
    async fn on_kv_op(&self, peer: &Arc<Peer>, request_id: PacketId, op: crate::codec::KvOp);
    /// Called once a peer has gone `Disconnected`, whether from the reader
    /// loop exiting or the heartbeat ticker timing out (`spec.md` §4.4: the
    /// server must drop the peer from its connection map and the ring).
    async fn on_disconnect(&self, peer: &Arc<Peer>);
}

/// A connection to one remote cluster member.
///
/// Outbound packets are handed to an internal `mpsc` channel consumed by a
/// dedicated writer task, so `send_packet` never blocks on network I/O
/// (matches the original's `SendPacket`, which writes from whichever
/// goroutine calls it under a per-peer mutex — the channel here serializes
/// writes without needing a lock).
pub struct Peer {
    pub remote_addr: SocketAddr,
    pub incoming: bool,
    id: RwLock<Option<NodeId>>,
    host_addr: RwLock<Option<String>>,
    net_node: RwLock<Option<NetworkNode>>,
    state: RwLock<PeerState>,
    last_heartbeat: RwLock<Instant>,
    pending: DashMap<PacketId, oneshot::Sender<Packet>>,
    outbox: mpsc::UnboundedSender<Packet>,
    alive: AtomicBool,
}

impl Peer {
    /// Builds a peer shell and its writer task, wired to `sink`.
    ///
    /// Returns the peer handle; the caller is responsible for spawning
    /// [`Peer::run`] against the corresponding read half.
    pub fn spawn<S>(remote_addr: SocketAddr, incoming: bool, sink: FramedWrite<S, PacketCodec>) -> Arc<Peer>
    where
        S: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Arc::new(Peer {
            remote_addr,
            incoming,
            id: RwLock::new(None),
            host_addr: RwLock::new(None),
            net_node: RwLock::new(None),
            state: RwLock::new(PeerState::Connecting),
            last_heartbeat: RwLock::new(Instant::now()),
            pending: DashMap::new(),
            outbox: tx,
            alive: AtomicBool::new(true),
        });
        tokio::spawn(Self::writer_loop(sink, rx));
        peer
    }

    async fn writer_loop<S>(mut sink: FramedWrite<S, PacketCodec>, mut rx: mpsc::UnboundedReceiver<Packet>)
    where
        S: tokio::io::AsyncWrite + Unpin,
    {
        while let Some(packet) = rx.recv().await {
            if sink.send(packet).await.is_err() {
                break;
            }
        }
    }

    pub fn id(&self) -> Option<NodeId> {
        *self.id.read()
    }

    pub fn host_addr(&self) -> Option<String> {
        self.host_addr.read().clone()
    }

    pub fn net_node(&self) -> Option<NetworkNode> {
        self.net_node.read().clone()
    }

    pub fn state(&self) -> PeerState {
        *self.state.read()
    }

    pub fn set_state(&self, state: PeerState) {
        tracing::debug!(remote = %self.remote_addr, ?state, "peer state change");
        *self.state.write() = state;
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), PeerState::Connected | PeerState::Syncing)
    }

    /// Records identity learned from a `DISTRIBUTION` packet (`spec.md`
    /// §4.4's identity-exchange rules live in the handler; this just stores
    /// the result once the handler has decided to accept it).
    pub fn set_identity(&self, node: NetworkNode) {
        *self.host_addr.write() = Some(node.host_addr.clone());
        *self.id.write() = Some(node.id);
        *self.net_node.write() = Some(node);
    }

    fn touch_heartbeat(&self) {
        *self.last_heartbeat.write() = Instant::now();
    }

    /// Sends a packet without waiting for a reply.
    pub fn send_packet(&self, packet: Packet) -> Result<()> {
        self.outbox.send(packet).map_err(|_| Error::NotConnected)
    }

    /// Sends a packet and waits up to [`REPLY_TIMEOUT`] for the reply packet
    /// carrying the same id as `request_id`.
    ///
    /// Mirrors `SendPacketWaitReply` in the original: a rendezvous channel
    /// keyed by the outgoing packet's id, registered before the packet is
    /// sent so a fast reply can never race the registration.
    pub async fn send_and_await(&self, packet: Packet) -> Result<Packet> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let id = packet.id;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        if let Err(e) = self.send_packet(packet) {
            self.pending.remove(&id);
            return Err(e);
        }
        match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::StreamClosed),
            Err(_) => {
                self.pending.remove(&id);
                Err(Error::ReplyTimeout)
            }
        }
    }

    /// Spawns the 1-second heartbeat ticker (`spec.md` §4.4). Sends a
    /// `HEARTBEAT` packet on every tick while connected, and downgrades the
    /// peer to [`PeerState::Defib`] at 5s of silence and disconnects it at
    /// 10s, exactly as `network/peer.go`'s `heartbeat()` does.
    pub fn spawn_heartbeat(self: &Arc<Self>, handler: Arc<dyn PeerEventHandler>) {
        let peer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                if !peer.alive.load(Ordering::SeqCst) {
                    return;
                }
                if peer.state() == PeerState::Disconnected {
                    return;
                }
                let elapsed = peer.last_heartbeat.read().elapsed();
                if elapsed >= DISCONNECT_THRESHOLD {
                    tracing::warn!(remote = %peer.remote_addr, "peer missed heartbeats, disconnecting");
                    peer.disconnect();
                    handler.on_disconnect(&peer).await;
                    return;
                } else if elapsed >= DEFIB_THRESHOLD {
                    peer.set_state(PeerState::Defib);
                } else if let Err(e) = peer.send_packet(Packet::new(CMD_HEARTBEAT, Payload::None)) {
                    tracing::debug!(remote = %peer.remote_addr, error = %e, "heartbeat send failed");
                }
            }
        });
    }

    /// Idempotent disconnect: marks the peer dead and drops its writer
    /// channel so the writer task exits. Tolerant of being called on a peer
    /// that never completed identity exchange (`net_node` still `None`),
    /// matching the original's nil-safe `Disconnect()`.
    ///
    /// Also drains any `send_and_await` waiters still parked in `pending`:
    /// dropping their `oneshot::Sender` wakes each caller immediately with
    /// `StreamClosed` instead of leaving them to hang for the full
    /// `REPLY_TIMEOUT` (`spec.md` §5).
    pub fn disconnect(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.set_state(PeerState::Disconnected);
            self.pending.clear();
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Runs the reader loop until the stream closes or an unrecoverable
    /// codec error occurs. Every inbound packet first checks `pending`
    /// (answers a `send_and_await`); anything left over is dispatched to
    /// `handler`.
    pub async fn run<S>(
        self: Arc<Self>,
        mut source: FramedRead<S, PacketCodec>,
        handler: Arc<dyn PeerEventHandler>,
    ) where
        S: tokio::io::AsyncRead + Unpin,
    {
        while let Some(frame) = source.next().await {
            let packet = match frame {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(remote = %self.remote_addr, error = %e, "peer stream error");
                    break;
                }
            };
            self.touch_heartbeat();
            if self.state() == PeerState::Defib {
                self.set_state(PeerState::Connected);
            }

            if packet.request_id != PacketId::ZERO {
                if let Some((_, tx)) = self.pending.remove(&packet.request_id) {
                    let _ = tx.send(packet);
                    continue;
                }
            }

            match packet.command {
                CMD_HEARTBEAT => continue,
                crate::codec::CMD_DISTRIBUTION => {
                    if let Payload::NetworkNode(node) = packet.payload {
                        handler.on_distribution(&self, node).await;
                    }
                }
                crate::codec::CMD_PEERLIST => {
                    if let Payload::PeerList(list) = packet.payload {
                        handler.on_peerlist(&self, list).await;
                    }
                }
                CMD_KVSTORE => {
                    if let Payload::KvOp(op) = packet.payload {
                        handler.on_kv_op(&self, packet.id, op).await;
                    }
                }
                other => {
                    tracing::debug!(remote = %self.remote_addr, command = other, "unrecognized command");
                }
            }
        }
        self.disconnect();
        handler.on_disconnect(&self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_peer_is_connecting_and_alive() {
        let (tx, _rx) = mpsc::unbounded_channel::<Packet>();
        let peer = Peer {
            remote_addr: "127.0.0.1:1".parse().unwrap(),
            incoming: false,
            id: RwLock::new(None),
            host_addr: RwLock::new(None),
            net_node: RwLock::new(None),
            state: RwLock::new(PeerState::Connecting),
            last_heartbeat: RwLock::new(Instant::now()),
            pending: DashMap::new(),
            outbox: tx,
            alive: AtomicBool::new(true),
        };
        assert_eq!(peer.state(), PeerState::Connecting);
        assert!(peer.is_alive());
        assert!(!peer.is_connected());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let (tx, _rx) = mpsc::unbounded_channel::<Packet>();
        let peer = Peer {
            remote_addr: "127.0.0.1:1".parse().unwrap(),
            incoming: false,
            id: RwLock::new(None),
            host_addr: RwLock::new(None),
            net_node: RwLock::new(None),
            state: RwLock::new(PeerState::Connected),
            last_heartbeat: RwLock::new(Instant::now()),
            pending: DashMap::new(),
            outbox: tx,
            alive: AtomicBool::new(true),
        };
        peer.disconnect();
        peer.disconnect();
        assert_eq!(peer.state(), PeerState::Disconnected);
    }

    #[tokio::test]
    async fn send_and_await_times_out_when_unanswered() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Packet>();
        let peer = Arc::new(Peer {
            remote_addr: "127.0.0.1:1".parse().unwrap(),
            incoming: false,
            id: RwLock::new(None),
            host_addr: RwLock::new(None),
            net_node: RwLock::new(None),
            state: RwLock::new(PeerState::Connected),
            last_heartbeat: RwLock::new(Instant::now()),
            pending: DashMap::new(),
            outbox: tx,
            alive: AtomicBool::new(true),
        });
        let packet = Packet::new(CMD_HEARTBEAT, Payload::None);
        let result = tokio::time::timeout(
            Duration::from_millis(50),
            peer.send_and_await(packet),
        )
        .await;
        // the outer timeout races send_and_await's own 5s timeout; what
        // matters here is that the packet was actually placed on the wire.
        assert!(result.is_err());
        assert!(rx.try_recv().is_ok());
    }
}
