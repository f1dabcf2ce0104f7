//! Frame codec: a self-describing, length-delimited `Packet` envelope
//! (`spec.md` §4.3, §6).
//!
//! Grounded in `packets/packet.go`, `packets/kvstore_packet.go` and
//! `packets/peerlist_packet.go`. The original relies on Go's `encoding/gob`,
//! which self-describes types on the wire via a process-wide type registry
//! (`gob.Register`) — the "global mutable state" the spec's Design Notes ask
//! to eliminate. Here the tagged union is a plain `enum Payload` with
//! `serde`+`bincode`; there is no registry and no plugin surface, matching
//! "Recognized payload tags" exactly as enumerated in §4.3.
//!
//! Framing itself is a 4-byte big-endian length prefix, via
//! `tokio_util::codec::LengthDelimitedCodec`, with `bincode` serializing the
//! `Packet` into/out of each frame's payload.

use crate::error::{Error, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};
use trinity_core::{NetworkNode, NodeId, Position};

pub const CMD_HEARTBEAT: u16 = 1;
pub const CMD_DISTRIBUTION: u16 = 2;
pub const CMD_PEERLIST: u16 = 3;
pub const CMD_KVSTORE: u16 = 10;
pub const CMD_KVSTORE_ACK: u16 = 11;
pub const CMD_KVSTORE_NOT_FOUND: u16 = 12;

pub const KV_SET: u8 = 1;
pub const KV_GET: u8 = 2;
pub const KV_DELETE: u8 = 3;
pub const KV_IS_SET: u8 = 4;

/// A 128-bit packet/request correlation id.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct PacketId(pub u128);

impl PacketId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(u128::from_be_bytes(bytes))
    }

    /// The zero id, used for `request_id` on unsolicited packets.
    pub const ZERO: PacketId = PacketId(0);
}

/// KV sub-operation carried inside a `KVSTORE` packet (`spec.md` §4.3, §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KvOp {
    pub sub_command: u8,
    pub key: String,
    pub key_hash: Position,
    pub data: Vec<u8>,
    pub flags: i16,
    /// Absolute expiry, as unix-epoch milliseconds; `None` for no expiry.
    pub expires_at_millis: Option<u64>,
    pub target_id: NodeId,
}

/// Tagged union of recognized payload shapes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Payload {
    /// Heartbeat: carries no data.
    None,
    /// Identity exchange (`spec.md` §4.4).
    NetworkNode(NetworkNode),
    /// Gossiped peer list: NodeId -> advertised host address.
    PeerList(HashMap<NodeId, String>),
    /// A KV sub-operation request or reply.
    KvOp(KvOp),
}

/// A single wire packet (`spec.md` §3, §4.3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Packet {
    pub command: u16,
    pub id: PacketId,
    pub request_id: PacketId,
    pub sent_at_millis: u64,
    pub payload: Payload,
}

impl Packet {
    /// Builds a new, unsolicited packet (`request_id` is zero).
    pub fn new(command: u16, payload: Payload) -> Self {
        Self {
            command,
            id: PacketId::random(),
            request_id: PacketId::ZERO,
            sent_at_millis: now_millis(),
            payload,
        }
    }

    /// Builds a response packet carrying the request it answers.
    pub fn response(command: u16, request_id: PacketId, payload: Payload) -> Self {
        Self {
            command,
            id: PacketId::random(),
            request_id,
            sent_at_millis: now_millis(),
            payload,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Encodes/decodes whole `Packet`s over a length-delimited byte stream.
///
/// Stateless per message (`spec.md` §4.3): nothing here survives between
/// calls to `decode`/`encode` besides the inner framing codec's own partial
/// read buffer.
pub struct PacketCodec {
    framing: LengthDelimitedCodec,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketCodec {
    pub fn new() -> Self {
        Self {
            framing: LengthDelimitedCodec::new(),
        }
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Packet>> {
        let Some(frame) = self
            .framing
            .decode(src)
            .map_err(|e| Error::Codec(e.to_string()))?
        else {
            return Ok(None);
        };
        let packet: Packet =
            bincode::deserialize(&frame).map_err(|e| Error::Codec(e.to_string()))?;
        Ok(Some(packet))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = Error;

    fn encode(&mut self, item: Packet, dst: &mut bytes::BytesMut) -> Result<()> {
        let bytes = bincode::serialize(&item).map_err(|e| Error::Codec(e.to_string()))?;
        self.framing
            .encode(bytes::Bytes::from(bytes), dst)
            .map_err(|e| Error::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn round_trips_heartbeat() {
        let mut codec = PacketCodec::new();
        let packet = Packet::new(CMD_HEARTBEAT, Payload::None);
        let id = packet.id;

        let mut buf = BytesMut::new();
        codec.encode(packet, &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.command, CMD_HEARTBEAT);
        assert_eq!(decoded.id, id);
        assert_eq!(decoded.request_id, PacketId::ZERO);
        matches!(decoded.payload, Payload::None);
    }

    #[test]
    fn round_trips_kvop_with_expiry() {
        let mut codec = PacketCodec::new();
        let op = KvOp {
            sub_command: KV_SET,
            key: "foo".to_string(),
            key_hash: Position(42),
            data: b"hello".to_vec(),
            flags: 7,
            expires_at_millis: Some(1_000_000),
            target_id: NodeId(9),
        };
        let packet = Packet::new(CMD_KVSTORE, Payload::KvOp(op));

        let mut buf = BytesMut::new();
        codec.encode(packet, &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        match decoded.payload {
            Payload::KvOp(op) => {
                assert_eq!(op.key, "foo");
                assert_eq!(op.expires_at_millis, Some(1_000_000));
            }
            _ => panic!("wrong payload variant"),
        }
    }

    #[test]
    fn partial_frame_returns_none_until_complete() {
        let mut codec = PacketCodec::new();
        let packet = Packet::new(CMD_HEARTBEAT, Payload::None);

        let mut full = BytesMut::new();
        codec.encode(packet, &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }
}
