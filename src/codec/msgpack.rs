//! MsgPack codec using `rmp-serde`.
//!
//! Each packet becomes exactly one binary fragment holding a MessagePack map:
//!
//! ```text
//! { "type": u8, "nsp": str, "data"?: any, "id"?: u64, "attachments"?: [bin] }
//! ```
//!
//! **Always** `to_vec_named`: peers expect struct-as-map, not positional
//! arrays. Attachments travel inline as MessagePack `bin` values, so the
//! decoder never has to reconstruct across chunks.
//!
//! # Example
//!
//! ```
//! use nspwire::codec::MsgPackCodec;
//! use nspwire::packet::Packet;
//! use serde_json::json;
//!
//! let packet = Packet::event("/chat", json!(["message", "hi"]));
//! let bytes = MsgPackCodec::encode_packet(&packet).unwrap();
//! let decoded = MsgPackCodec::decode_packet(&bytes).unwrap();
//! assert_eq!(decoded, packet);
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{BoxFuture, PacketCodec, PacketDecoder};
use crate::error::{NspwireError, Result};
use crate::packet::{Fragment, Packet, PacketType};

/// MessagePack codec for packets.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

/// Named-field wire shape of a packet.
#[derive(Serialize, Deserialize)]
struct WirePacket {
    #[serde(rename = "type")]
    packet_type: PacketType,
    nsp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<Bytes>,
}

impl MsgPackCodec {
    /// Create a MessagePack codec.
    pub fn new() -> Self {
        Self
    }

    /// Encode a packet to MsgPack bytes.
    #[inline]
    pub fn encode_packet(packet: &Packet) -> Result<Bytes> {
        let wire = WirePacket {
            packet_type: packet.packet_type,
            nsp: packet.nsp.clone(),
            data: packet.data.clone(),
            id: packet.id,
            attachments: packet.attachments.clone(),
        };
        // to_vec_named, NOT to_vec
        Ok(Bytes::from(rmp_serde::to_vec_named(&wire)?))
    }

    /// Decode MsgPack bytes to a packet.
    #[inline]
    pub fn decode_packet(bytes: &[u8]) -> Result<Packet> {
        let wire: WirePacket = rmp_serde::from_slice(bytes)?;
        Ok(Packet {
            packet_type: wire.packet_type,
            nsp: wire.nsp,
            data: wire.data,
            id: wire.id,
            attachments: wire.attachments,
        })
    }
}

impl PacketCodec for MsgPackCodec {
    fn encode(&self, packet: Packet) -> BoxFuture<'static, Result<Vec<Fragment>>> {
        let result = Self::encode_packet(&packet).map(|b| vec![Fragment::Binary(b)]);
        Box::pin(async move { result })
    }

    fn decoder(&self) -> Box<dyn PacketDecoder> {
        Box::new(MsgPackDecoder)
    }
}

/// Stateless decoder: one binary fragment, one packet.
struct MsgPackDecoder;

impl PacketDecoder for MsgPackDecoder {
    fn add(&mut self, chunk: Fragment) -> Result<Vec<Packet>> {
        match chunk {
            Fragment::Binary(bytes) => Ok(vec![MsgPackCodec::decode_packet(&bytes)?]),
            Fragment::Text(_) => Err(NspwireError::Decode(
                "msgpack codec expects binary fragments".to_string(),
            )),
        }
    }

    fn destroy(&mut self) {}
}
