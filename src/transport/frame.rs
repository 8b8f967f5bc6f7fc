//! Fragment framing on a byte stream.
//!
//! Implements the 5-byte frame header:
//! ```text
//! ┌────────┬──────────┐
//! │ Kind   │ Length   │
//! │ 1 byte │ 4 bytes  │
//! │        │ uint32 BE│
//! └────────┴──────────┘
//! ```
//!
//! `Kind` is `1` for text (UTF-8) fragments and `2` for binary fragments.

use bytes::Bytes;

use crate::error::{NspwireError, Result};
use crate::packet::Fragment;

/// Frame header size in bytes (fixed, exactly 5).
pub const FRAME_HEADER_SIZE: usize = 5;

/// Default maximum payload size (100 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 100 * 1024 * 1024;

/// Fragment kind on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text = 1,
    Binary = 2,
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Fragment kind.
    pub kind: FrameKind,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new header.
    pub fn new(kind: FrameKind, payload_length: u32) -> Self {
        Self {
            kind,
            payload_length,
        }
    }

    /// Header describing a fragment.
    pub fn for_fragment(fragment: &Fragment) -> Self {
        let kind = match fragment {
            Fragment::Text(_) => FrameKind::Text,
            Fragment::Binary(_) => FrameKind::Binary,
        };
        Self::new(kind, fragment.len() as u32)
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use nspwire::transport::{FrameHeader, FrameKind};
    ///
    /// let header = FrameHeader::new(FrameKind::Text, 100);
    /// assert_eq!(header.encode(), [1, 0, 0, 0, 100]);
    /// ```
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0] = self.kind as u8;
        buf[1..5].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode header from bytes.
    ///
    /// Returns `Ok(None)` if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let kind = match buf[0] {
            1 => FrameKind::Text,
            2 => FrameKind::Binary,
            other => {
                return Err(NspwireError::Protocol(format!(
                    "Unknown frame kind {}",
                    other
                )))
            }
        };
        Ok(Some(Self {
            kind,
            payload_length: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
        }))
    }

    /// Turn a payload of this kind into a fragment.
    pub fn into_fragment(self, payload: Bytes) -> Result<Fragment> {
        match self.kind {
            FrameKind::Binary => Ok(Fragment::Binary(payload)),
            FrameKind::Text => String::from_utf8(payload.to_vec())
                .map(Fragment::Text)
                .map_err(|_| NspwireError::Protocol("Text frame is not valid UTF-8".to_string())),
        }
    }
}

/// Build a complete frame (header + payload) for a fragment.
pub fn build_frame(fragment: &Fragment) -> Vec<u8> {
    let header = FrameHeader::for_fragment(fragment);
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + fragment.len());
    out.extend_from_slice(&header.encode());
    match fragment {
        Fragment::Text(s) => out.extend_from_slice(s.as_bytes()),
        Fragment::Binary(b) => out.extend_from_slice(b),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_big_endian() {
        let header = FrameHeader::new(FrameKind::Binary, 0x01020304);
        assert_eq!(header.encode(), [2, 1, 2, 3, 4]);
    }

    #[test]
    fn test_header_decode() {
        let header = FrameHeader::decode(&[1, 0, 0, 1, 0]).unwrap().unwrap();
        assert_eq!(header.kind, FrameKind::Text);
        assert_eq!(header.payload_length, 256);
    }

    #[test]
    fn test_header_decode_short() {
        assert!(FrameHeader::decode(&[1, 0]).unwrap().is_none());
    }

    #[test]
    fn test_header_decode_unknown_kind() {
        let err = FrameHeader::decode(&[7, 0, 0, 0, 0]).unwrap_err();
        assert!(err.to_string().contains("Unknown frame kind"));
    }

    #[test]
    fn test_build_frame_text() {
        let frame = build_frame(&Fragment::from("0"));
        assert_eq!(frame, vec![1, 0, 0, 0, 1, b'0']);
    }

    #[test]
    fn test_invalid_utf8_text() {
        let header = FrameHeader::new(FrameKind::Text, 2);
        assert!(header
            .into_fragment(Bytes::from_static(&[0xff, 0xfe]))
            .is_err());
    }
}
