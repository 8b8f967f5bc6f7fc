//! Text codec - one text header fragment plus binary attachment fragments.
//!
//! Header layout:
//!
//! ```text
//! <type>[<attachments>-][<nsp>,][<id>][<json data>]
//! ```
//!
//! - `type` is a single digit (see [`PacketType`])
//! - `attachments-` appears only for binary packet types
//! - `nsp,` is omitted for the root namespace
//! - `id` is the acknowledgement id, if any
//!
//! A binary packet with `N` attachments is followed by exactly `N` binary
//! fragments. The decoder is a state machine:
//! - `WaitingForPacket`: next text fragment starts a new packet
//! - `Reconstructing`: header parsed, collecting `remaining` attachments
//!
//! # Example
//!
//! ```
//! use nspwire::codec::TextCodec;
//! use nspwire::packet::{Packet, PacketType};
//! use serde_json::json;
//!
//! let packet = Packet::event("/chat", json!(["message", "hi"])).with_id(7);
//! let header = TextCodec::encode_header(&packet).unwrap();
//! assert_eq!(header, r#"2/chat,7["message","hi"]"#);
//!
//! let decoded = TextCodec::decode_header(&header).unwrap();
//! assert_eq!(decoded.0.packet_type, PacketType::Event);
//! assert_eq!(decoded.0.id, Some(7));
//! ```

use serde_json::Value;

use super::{BoxFuture, PacketCodec, PacketDecoder};
use crate::error::{NspwireError, Result};
use crate::packet::{Fragment, Packet, PacketType, ROOT_NAMESPACE};

/// Default maximum attachments accepted per binary packet.
pub const DEFAULT_MAX_ATTACHMENTS: usize = 10;

/// Text codec.
#[derive(Debug, Clone)]
pub struct TextCodec {
    /// Maximum attachments accepted by decoders created from this codec.
    max_attachments: usize,
}

impl TextCodec {
    /// Create a text codec with default limits.
    pub fn new() -> Self {
        Self {
            max_attachments: DEFAULT_MAX_ATTACHMENTS,
        }
    }

    /// Create a text codec accepting at most `max_attachments` per packet.
    pub fn with_max_attachments(max_attachments: usize) -> Self {
        Self { max_attachments }
    }

    /// Encode a packet into its text header plus attachment fragments.
    pub fn encode_packet(packet: &Packet) -> Result<Vec<Fragment>> {
        let header = Self::encode_header(packet)?;
        let mut fragments = Vec::with_capacity(1 + packet.attachments.len());
        fragments.push(Fragment::Text(header));
        fragments.extend(packet.attachments.iter().cloned().map(Fragment::Binary));
        Ok(fragments)
    }

    /// Encode the text header for a packet.
    ///
    /// EVENT / ACK packets carrying attachments are promoted to their
    /// binary counterparts.
    pub fn encode_header(packet: &Packet) -> Result<String> {
        let packet_type = match packet.packet_type {
            PacketType::Event if !packet.attachments.is_empty() => PacketType::BinaryEvent,
            PacketType::Ack if !packet.attachments.is_empty() => PacketType::BinaryAck,
            other => other,
        };

        let mut out = u8::from(packet_type).to_string();

        if packet_type.is_binary() {
            out.push_str(&packet.attachments.len().to_string());
            out.push('-');
        }

        if !packet.nsp.is_empty() && packet.nsp != ROOT_NAMESPACE {
            out.push_str(&packet.nsp);
            out.push(',');
        }

        if let Some(id) = packet.id {
            out.push_str(&id.to_string());
        }

        if let Some(data) = &packet.data {
            out.push_str(&serde_json::to_string(data)?);
        }

        Ok(out)
    }

    /// Decode a text header.
    ///
    /// Returns the packet (without attachments) and the number of attachment
    /// fragments that follow it.
    pub fn decode_header(s: &str) -> Result<(Packet, usize)> {
        let bytes = s.as_bytes();
        let mut i = 0;

        let type_digit = bytes
            .first()
            .filter(|b| b.is_ascii_digit())
            .ok_or_else(|| NspwireError::Decode(format!("invalid packet type in {:?}", s)))?;
        let packet_type = PacketType::try_from(type_digit - b'0')?;
        i += 1;

        let mut attachments = 0usize;
        if packet_type.is_binary() {
            let start = i;
            while i < bytes.len() && bytes[i] != b'-' {
                i += 1;
            }
            if i >= bytes.len() {
                return Err(NspwireError::Decode("illegal attachments".to_string()));
            }
            attachments = s[start..i]
                .parse()
                .map_err(|_| NspwireError::Decode("illegal attachments".to_string()))?;
            i += 1;
        }

        let mut nsp = ROOT_NAMESPACE.to_string();
        if bytes.get(i) == Some(&b'/') {
            let start = i;
            while i < bytes.len() && bytes[i] != b',' {
                i += 1;
            }
            nsp = s[start..i].to_string();
            if i < bytes.len() {
                i += 1;
            }
        }

        let mut id = None;
        if bytes.get(i).is_some_and(|b| b.is_ascii_digit()) {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            id = Some(
                s[start..i]
                    .parse::<u64>()
                    .map_err(|_| NspwireError::Decode("invalid ack id".to_string()))?,
            );
        }

        let data = if i < bytes.len() {
            Some(serde_json::from_str::<Value>(&s[i..])?)
        } else {
            None
        };

        let packet = Packet {
            packet_type,
            nsp,
            data,
            id,
            attachments: Vec::new(),
        };

        if !is_payload_valid(&packet) {
            return Err(NspwireError::Decode(format!(
                "invalid payload for {:?} packet",
                packet.packet_type
            )));
        }

        Ok((packet, attachments))
    }
}

impl Default for TextCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketCodec for TextCodec {
    fn encode(&self, packet: Packet) -> BoxFuture<'static, Result<Vec<Fragment>>> {
        let result = Self::encode_packet(&packet);
        Box::pin(async move { result })
    }

    fn decoder(&self) -> Box<dyn PacketDecoder> {
        Box::new(TextDecoder::new(self.max_attachments))
    }
}

fn is_payload_valid(packet: &Packet) -> bool {
    let data = packet.data.as_ref();
    match packet.packet_type {
        PacketType::Connect => data.map_or(true, Value::is_object),
        PacketType::Disconnect => data.is_none(),
        PacketType::Error => data.map_or(false, |d| d.is_string() || d.is_object()),
        PacketType::Event | PacketType::BinaryEvent => data
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .map_or(false, |first| first.is_string() || first.is_number()),
        PacketType::Ack | PacketType::BinaryAck => data.map_or(false, Value::is_array),
    }
}

/// State machine for packet reconstruction.
#[derive(Debug)]
enum State {
    /// Waiting for the next text header.
    WaitingForPacket,
    /// Header parsed, waiting for binary attachments.
    Reconstructing { packet: Packet, remaining: usize },
}

/// Streaming decoder for [`TextCodec`].
#[derive(Debug)]
pub struct TextDecoder {
    state: State,
    max_attachments: usize,
}

impl TextDecoder {
    fn new(max_attachments: usize) -> Self {
        Self {
            state: State::WaitingForPacket,
            max_attachments,
        }
    }

    /// Check whether a binary packet is partially reconstructed.
    pub fn is_reconstructing(&self) -> bool {
        matches!(self.state, State::Reconstructing { .. })
    }
}

impl PacketDecoder for TextDecoder {
    fn add(&mut self, chunk: Fragment) -> Result<Vec<Packet>> {
        match chunk {
            Fragment::Text(text) => {
                if self.is_reconstructing() {
                    return Err(NspwireError::Decode(
                        "got plaintext data when reconstructing a packet".to_string(),
                    ));
                }

                let (packet, attachments) = TextCodec::decode_header(&text)?;

                if attachments > self.max_attachments {
                    return Err(NspwireError::Decode(format!(
                        "too many attachments: {} exceeds maximum {}",
                        attachments, self.max_attachments
                    )));
                }

                if attachments == 0 {
                    return Ok(vec![packet]);
                }

                self.state = State::Reconstructing {
                    packet,
                    remaining: attachments,
                };
                Ok(Vec::new())
            }

            Fragment::Binary(data) => match &mut self.state {
                State::WaitingForPacket => Err(NspwireError::Decode(
                    "got binary data when not reconstructing a packet".to_string(),
                )),
                State::Reconstructing { packet, remaining } => {
                    packet.attachments.push(data);
                    *remaining -= 1;
                    if *remaining > 0 {
                        return Ok(Vec::new());
                    }

                    match std::mem::replace(&mut self.state, State::WaitingForPacket) {
                        State::Reconstructing { packet, .. } => Ok(vec![packet]),
                        State::WaitingForPacket => Ok(Vec::new()),
                    }
                }
            },
        }
    }

    fn destroy(&mut self) {
        self.state = State::WaitingForPacket;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    #[test]
    fn test_encode_root_namespace_omitted() {
        let header = TextCodec::encode_header(&Packet::connect("/")).unwrap();
        assert_eq!(header, "0");
    }

    #[test]
    fn test_encode_error_packet() {
        let header =
            TextCodec::encode_header(&Packet::error("/bogus", "Invalid namespace")).unwrap();
        assert_eq!(header, r#"4/bogus,"Invalid namespace""#);
    }

    #[test]
    fn test_encode_binary_event() {
        let packet = Packet::binary_event(
            "/",
            json!(["file", {"_placeholder": true, "num": 0}]),
            vec![Bytes::from_static(b"\x01\x02")],
        );
        let fragments = TextCodec::encode_packet(&packet).unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(
            fragments[0],
            Fragment::from(r#"51-["file",{"_placeholder":true,"num":0}]"#)
        );
        assert_eq!(fragments[1], Fragment::Binary(Bytes::from_static(b"\x01\x02")));
    }

    #[test]
    fn test_event_with_attachments_promoted() {
        let mut packet = Packet::event("/", json!(["x"]));
        packet.attachments.push(Bytes::from_static(b"a"));
        let header = TextCodec::encode_header(&packet).unwrap();
        assert!(header.starts_with("51-"));
    }

    #[test]
    fn test_decode_header_fields() {
        let (packet, attachments) = TextCodec::decode_header(r#"3/chat,12["ok"]"#).unwrap();
        assert_eq!(packet.packet_type, PacketType::Ack);
        assert_eq!(packet.nsp, "/chat");
        assert_eq!(packet.id, Some(12));
        assert_eq!(packet.data, Some(json!(["ok"])));
        assert_eq!(attachments, 0);
    }

    #[test]
    fn test_decode_connect_without_comma() {
        let (packet, _) = TextCodec::decode_header("0/admin").unwrap();
        assert_eq!(packet.packet_type, PacketType::Connect);
        assert_eq!(packet.nsp, "/admin");
        assert!(packet.data.is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(TextCodec::decode_header("").is_err());
        assert!(TextCodec::decode_header("x").is_err());
        assert!(TextCodec::decode_header("9").is_err());
        assert!(TextCodec::decode_header("2[").is_err());
        assert!(TextCodec::decode_header("5abc").is_err());
    }

    #[test]
    fn test_decode_rejects_invalid_payloads() {
        // events need a non-empty array with a name first
        assert!(TextCodec::decode_header("2[]").is_err());
        assert!(TextCodec::decode_header(r#"2{"a":1}"#).is_err());
        // disconnect carries nothing
        assert!(TextCodec::decode_header(r#"1"bye""#).is_err());
        // connect payload must be an object
        assert!(TextCodec::decode_header("0[1]").is_err());
    }

    #[test]
    fn test_decoder_reconstructs_binary_across_chunks() {
        let mut decoder = TextCodec::new().decoder();

        let out = decoder
            .add(Fragment::from(r#"52-/files,["upload",{"_placeholder":true,"num":0},{"_placeholder":true,"num":1}]"#))
            .unwrap();
        assert!(out.is_empty());

        let out = decoder.add(Fragment::Binary(Bytes::from_static(b"one"))).unwrap();
        assert!(out.is_empty());

        let out = decoder.add(Fragment::Binary(Bytes::from_static(b"two"))).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].nsp, "/files");
        assert_eq!(out[0].attachments.len(), 2);
        assert_eq!(&out[0].attachments[1][..], b"two");

        // ready for the next packet
        let out = decoder.add(Fragment::from("1/files,")).unwrap();
        assert_eq!(out[0].packet_type, PacketType::Disconnect);
    }

    #[test]
    fn test_decoder_rejects_binary_without_header() {
        let mut decoder = TextCodec::new().decoder();
        assert!(decoder.add(Fragment::Binary(Bytes::from_static(b"x"))).is_err());
    }

    #[test]
    fn test_decoder_rejects_text_while_reconstructing() {
        let mut decoder = TextCodec::new().decoder();
        decoder
            .add(Fragment::from(r#"51-["a",{"_placeholder":true,"num":0}]"#))
            .unwrap();
        assert!(decoder.add(Fragment::from("0")).is_err());
    }

    #[test]
    fn test_decoder_max_attachments() {
        let mut decoder = TextCodec::with_max_attachments(1).decoder();
        assert!(decoder.add(Fragment::from(r#"52-["a"]"#)).is_err());
    }

    #[test]
    fn test_destroy_drops_partial_packet() {
        let mut decoder = TextCodec::new().decoder();
        decoder.add(Fragment::from(r#"51-["a"]"#)).unwrap();
        decoder.destroy();
        assert!(decoder.add(Fragment::Binary(Bytes::from_static(b"x"))).is_err());
    }

    #[tokio::test]
    async fn test_codec_encode_is_ordered() {
        let codec = TextCodec::new();
        let packet = Packet::binary_event(
            "/",
            json!(["pair"]),
            vec![Bytes::from_static(b"1"), Bytes::from_static(b"2")],
        );
        let fragments = codec.encode(packet).await.unwrap();
        assert_eq!(fragments.len(), 3);
        assert!(fragments[0].as_text().is_some());
        assert_eq!(fragments[2], Fragment::Binary(Bytes::from_static(b"2")));
    }
}
