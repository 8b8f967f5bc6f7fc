//! Packet model shared by the codecs, the client and the namespace layer.
//!
//! A [`Packet`] is the logical unit exchanged between a namespace socket and
//! its peer. Codecs turn packets into ordered [`Fragment`]s, the unit a
//! transport writes. Fragments carry no namespace tag of their own; the
//! namespace travels inside the encoded packet only.
//!
//! # Example
//!
//! ```
//! use nspwire::packet::{Packet, PacketType};
//! use serde_json::json;
//!
//! let packet = Packet::event("/chat", json!(["message", "hi"]));
//! assert_eq!(packet.packet_type, PacketType::Event);
//! assert_eq!(packet.nsp, "/chat");
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NspwireError, Result};

/// Root namespace name.
pub const ROOT_NAMESPACE: &str = "/";

/// Packet kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PacketType {
    Connect = 0,
    Disconnect = 1,
    Event = 2,
    Ack = 3,
    Error = 4,
    BinaryEvent = 5,
    BinaryAck = 6,
}

impl PacketType {
    /// Whether packets of this kind carry binary attachments.
    #[inline]
    pub fn is_binary(self) -> bool {
        matches!(self, PacketType::BinaryEvent | PacketType::BinaryAck)
    }
}

impl From<PacketType> for u8 {
    fn from(t: PacketType) -> u8 {
        t as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = NspwireError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => PacketType::Connect,
            1 => PacketType::Disconnect,
            2 => PacketType::Event,
            3 => PacketType::Ack,
            4 => PacketType::Error,
            5 => PacketType::BinaryEvent,
            6 => PacketType::BinaryAck,
            other => {
                return Err(NspwireError::Decode(format!("unknown packet type {}", other)))
            }
        })
    }
}

/// A logical packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Packet kind.
    pub packet_type: PacketType,
    /// Namespace this packet belongs to.
    pub nsp: String,
    /// Payload, semantics owned by the namespace socket layer.
    pub data: Option<Value>,
    /// Acknowledgement id.
    pub id: Option<u64>,
    /// Binary attachments for `BinaryEvent` / `BinaryAck`.
    pub attachments: Vec<Bytes>,
}

impl Packet {
    /// Create a packet with no payload.
    pub fn new(packet_type: PacketType, nsp: impl Into<String>) -> Self {
        Self {
            packet_type,
            nsp: nsp.into(),
            data: None,
            id: None,
            attachments: Vec::new(),
        }
    }

    /// CONNECT packet for a namespace.
    pub fn connect(nsp: impl Into<String>) -> Self {
        Self::new(PacketType::Connect, nsp)
    }

    /// DISCONNECT packet for a namespace.
    pub fn disconnect(nsp: impl Into<String>) -> Self {
        Self::new(PacketType::Disconnect, nsp)
    }

    /// ERROR packet carrying a diagnostic message.
    pub fn error(nsp: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(PacketType::Error, nsp).with_data(Value::String(message.into()))
    }

    /// EVENT packet; `data` is the `[name, ...args]` array.
    pub fn event(nsp: impl Into<String>, data: Value) -> Self {
        Self::new(PacketType::Event, nsp).with_data(data)
    }

    /// BINARY_EVENT packet with attachments.
    pub fn binary_event(nsp: impl Into<String>, data: Value, attachments: Vec<Bytes>) -> Self {
        Self {
            attachments,
            ..Self::new(PacketType::BinaryEvent, nsp).with_data(data)
        }
    }

    /// ACK packet answering `id`.
    pub fn ack(nsp: impl Into<String>, id: u64, data: Value) -> Self {
        Self::new(PacketType::Ack, nsp).with_data(data).with_id(id)
    }

    /// Set the payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Set the acknowledgement id.
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Event name for EVENT / BINARY_EVENT packets.
    pub fn event_name(&self) -> Option<&str> {
        match self.packet_type {
            PacketType::Event | PacketType::BinaryEvent => self
                .data
                .as_ref()
                .and_then(|d| d.as_array())
                .and_then(|a| a.first())
                .and_then(|v| v.as_str()),
            _ => None,
        }
    }
}

/// One wire-ready unit produced by a codec and written by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    Binary(Bytes),
}

impl Fragment {
    /// Length of the fragment payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            Fragment::Text(s) => s.len(),
            Fragment::Binary(b) => b.len(),
        }
    }

    /// Check if the fragment is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text content, if this is a text fragment.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Fragment::Text(s) => Some(s),
            Fragment::Binary(_) => None,
        }
    }
}

impl From<String> for Fragment {
    fn from(s: String) -> Self {
        Fragment::Text(s)
    }
}

impl From<&str> for Fragment {
    fn from(s: &str) -> Self {
        Fragment::Text(s.to_string())
    }
}

impl From<Bytes> for Fragment {
    fn from(b: Bytes) -> Self {
        Fragment::Binary(b)
    }
}
