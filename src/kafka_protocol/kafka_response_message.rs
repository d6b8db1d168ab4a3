//! Defines [`Response`], the value written back to a client, and its wire
//! encoding per spec §6:
//!
//! `i32 size` (big-endian, includes `correlationId`), `i32 correlationId`,
//! then the payload chunks concatenated.

use bytes::{BufMut, Bytes, BytesMut};

/// A response to a single request, identified by `correlation_id`.
///
/// `payload_chunks` lets a dispatcher assemble a response out of several
/// owned buffers without forcing an extra copy into one contiguous buffer
/// ahead of encoding.
#[derive(Debug, Clone)]
pub struct Response {
    pub correlation_id: i32,
    pub payload_chunks: Vec<Bytes>,
}

impl Response {
    pub fn new(correlation_id: i32) -> Self {
        Self {
            correlation_id,
            payload_chunks: Vec::new(),
        }
    }

    pub fn with_payload(correlation_id: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            correlation_id,
            payload_chunks: vec![payload.into()],
        }
    }

    fn payload_len(&self) -> usize {
        self.payload_chunks.iter().map(Bytes::len).sum()
    }

    /// Encodes this response to its wire form: `[size][correlationId][payload...]`.
    pub fn encode(&self) -> Bytes {
        let payload_len = self.payload_len();
        // size covers correlationId (4 bytes) + payload.
        let size = payload_len as i32 + 4;

        let mut buf = BytesMut::with_capacity(4 + 4 + payload_len);
        buf.put_i32(size);
        buf.put_i32(self.correlation_id);
        for chunk in &self.payload_chunks {
            buf.put_slice(chunk);
        }
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_empty_payload() {
        let resp = Response::new(7);
        let encoded = resp.encode();
        assert_eq!(&encoded[0..4], &4i32.to_be_bytes());
        assert_eq!(&encoded[4..8], &7i32.to_be_bytes());
        assert_eq!(encoded.len(), 8);
    }

    #[test]
    fn encodes_payload_chunks_in_order() {
        let resp = Response {
            correlation_id: 42,
            payload_chunks: vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")],
        };
        let encoded = resp.encode();
        assert_eq!(&encoded[0..4], &8i32.to_be_bytes()); // 4 (correlation id) + 4 (payload)
        assert_eq!(&encoded[8..], b"abcd");
    }
}
