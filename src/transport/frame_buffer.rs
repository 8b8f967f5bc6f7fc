//! Reassembly of framed fragments from arbitrary read boundaries.
//!
//! A read may end mid-header, mid-payload, or carry several frames at once.
//! The buffer keeps leftover bytes in a `BytesMut` and remembers a decoded
//! header until its payload is complete, so each header is parsed once.
//!
//! # Example
//!
//! ```
//! use nspwire::packet::Fragment;
//! use nspwire::transport::{build_frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let bytes = build_frame(&Fragment::from("2[\"hi\"]"));
//!
//! assert!(buffer.push(&bytes[..3]).unwrap().is_empty());
//! let fragments = buffer.push(&bytes[3..]).unwrap();
//! assert_eq!(fragments, vec![Fragment::from("2[\"hi\"]")]);
//! ```

use bytes::BytesMut;

use super::frame::{FrameHeader, DEFAULT_MAX_PAYLOAD_SIZE, FRAME_HEADER_SIZE};
use crate::error::{NspwireError, Result};
use crate::packet::Fragment;

/// Initial read buffer capacity.
const INITIAL_CAPACITY: usize = 16 * 1024;

/// Incremental frame decoder for one connection.
pub struct FrameBuffer {
    buffer: BytesMut,
    /// Header whose payload is still arriving.
    pending: Option<FrameHeader>,
    max_payload_size: u32,
}

impl FrameBuffer {
    /// Frame buffer accepting payloads up to 100 MB.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            pending: None,
            max_payload_size,
        }
    }

    /// Append `data` and return every fragment it completes, in order.
    ///
    /// # Errors
    ///
    /// [`NspwireError::Protocol`] for an oversized payload, an unknown kind
    /// byte, or a text payload that is not UTF-8. The buffer is unusable
    /// afterwards.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Fragment>> {
        self.buffer.extend_from_slice(data);

        let mut fragments = Vec::new();
        while let Some(header) = self.next_header()? {
            let len = header.payload_length as usize;
            if self.buffer.len() < len {
                self.pending = Some(header);
                break;
            }
            let payload = self.buffer.split_to(len).freeze();
            fragments.push(header.into_fragment(payload)?);
        }
        Ok(fragments)
    }

    /// The pending header, or the next one decoded from the buffer.
    fn next_header(&mut self) -> Result<Option<FrameHeader>> {
        if let Some(header) = self.pending.take() {
            return Ok(Some(header));
        }

        let Some(header) = FrameHeader::decode(&self.buffer)? else {
            return Ok(None);
        };
        if header.payload_length > self.max_payload_size {
            return Err(NspwireError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                header.payload_length, self.max_payload_size
            )));
        }

        let _ = self.buffer.split_to(FRAME_HEADER_SIZE);
        Ok(Some(header))
    }

    /// Buffered bytes not yet part of a returned fragment.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Whether a header was read and its payload is incomplete.
    pub fn is_mid_frame(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop buffered bytes and any partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending = None;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::frame::{build_frame, FrameKind};
    use bytes::Bytes;

    #[test]
    fn test_multiple_fragments_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = build_frame(&Fragment::from("0"));
        combined.extend(build_frame(&Fragment::Binary(Bytes::from_static(b"\x00\x01"))));
        combined.extend(build_frame(&Fragment::from("1/chat,")));

        let fragments = buffer.push(&combined).unwrap();

        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0], Fragment::from("0"));
        assert_eq!(fragments[1], Fragment::Binary(Bytes::from_static(b"\x00\x01")));
        assert_eq!(fragments[2], Fragment::from("1/chat,"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_payload() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(&Fragment::from("this payload arrives in two reads"));

        let split = FRAME_HEADER_SIZE + 6;
        assert!(buffer.push(&bytes[..split]).unwrap().is_empty());
        assert!(buffer.is_mid_frame());

        let fragments = buffer.push(&bytes[split..]).unwrap();
        assert_eq!(fragments.len(), 1);
        assert!(!buffer.is_mid_frame());
    }

    #[test]
    fn test_empty_payload() {
        let mut buffer = FrameBuffer::new();
        let fragments = buffer.push(&build_frame(&Fragment::from(""))).unwrap();
        assert_eq!(fragments, vec![Fragment::from("")]);
    }

    #[test]
    fn test_max_payload_validation() {
        let mut buffer = FrameBuffer::with_max_payload(100);
        let header = FrameHeader::new(FrameKind::Binary, 1000);

        let result = buffer.push(&header.encode());

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(&Fragment::from("partial"));
        buffer.push(&bytes[..FRAME_HEADER_SIZE + 2]).unwrap();
        assert!(buffer.is_mid_frame());

        buffer.clear();

        assert!(!buffer.is_mid_frame());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(&Fragment::from("hi"));

        let mut all = Vec::new();
        for byte in &bytes {
            all.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all, vec![Fragment::from("hi")]);
    }
}
