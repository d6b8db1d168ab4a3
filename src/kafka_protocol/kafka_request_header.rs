//! # KafkaRequestHeader Module
//!
//! Parses the fixed portion of a Kafka request frame: `api_key`, `api_version`,
//! `correlation_id`, and an optional length-delimited `client_id`. This is the
//! header shape spec §6 defines for every request regardless of `api_version`
//! (unlike the real Kafka protocol's per-version header layouts, which are out
//! of scope here per spec §1's "full Kafka request/response message codecs for
//! every API" non-goal).
//!
//! Parsing reads directly off the connection (`AsyncRead`) rather than from a
//! pre-buffered byte slice, since the framer (spec §4.2) reads the header as
//! one of several suspension points in the request pipeline.

use crate::kafka_protocol::kafka_error::{KafkaBrokerError, KafkaResult};
use crate::kafka_protocol::kafka_error_codes::INVALID_REQUEST;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace, warn};

/// The on-wire client-id length is `i16`; per spec §3: `-1` means null,
/// `0` means empty string, positive values give the byte count.
const CLIENT_ID_NULL: i16 = -1;

/// A parsed Kafka request header, common to every `api_key`/`api_version`.
#[derive(Debug, Clone)]
pub struct KafkaRequestHeader {
    pub api_key: i16,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: Option<String>,
}

impl KafkaRequestHeader {
    /// Reads the header's fixed fields (8 bytes) followed by the
    /// length-delimited `client_id`, per spec §4.2 step 4.
    ///
    /// Returns the header along with the number of bytes consumed, so the
    /// framer can subtract it from the frame's total `size` to compute the
    /// remaining opaque payload length.
    ///
    /// # Errors
    ///
    /// EOF at any point while reading the header or a non-UTF-8 `client_id`
    /// are both fatal framing errors (spec §7).
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> KafkaResult<(Self, usize)> {
        let api_key = reader.read_i16().await.map_err(eof_err("api_key"))?;
        let api_version = reader.read_i16().await.map_err(eof_err("api_version"))?;
        let correlation_id = reader.read_i32().await.map_err(eof_err("correlation_id"))?;

        debug!(api_key, api_version, correlation_id, "parsed common header fields");

        let (client_id, client_id_bytes) = read_client_id(reader).await?;

        Ok((
            Self {
                api_key,
                api_version,
                correlation_id,
                client_id,
            },
            // api_key + api_version + correlation_id + client_id_len prefix + client_id bytes
            2 + 2 + 4 + 2 + client_id_bytes,
        ))
    }
}

fn eof_err(field: &'static str) -> impl FnOnce(std::io::Error) -> KafkaBrokerError {
    move |_| KafkaBrokerError::MalformedRequest {
        code: INVALID_REQUEST,
        reason: format!("unexpected EOF reading {field}"),
    }
}

/// Reads a length-delimited `client_id`: a 2-byte signed length followed by
/// that many UTF-8 bytes. Returns the parsed string (or `None` for a `-1`
/// length) and the number of bytes read, including the length prefix.
async fn read_client_id<R: AsyncRead + Unpin>(reader: &mut R) -> KafkaResult<(Option<String>, usize)> {
    let len = reader.read_i16().await.map_err(eof_err("client_id length"))?;

    if len == CLIENT_ID_NULL {
        trace!("client_id is null");
        return Ok((None, 2));
    }

    if len < 0 {
        warn!(len, "client_id length is negative but not -1");
        return Err(KafkaBrokerError::MalformedRequest {
            code: INVALID_REQUEST,
            reason: format!("invalid client_id length {len}"),
        });
    }

    let len = len as usize;
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(eof_err("client_id bytes"))?;

    let client_id = String::from_utf8(buf).map_err(|_| {
        warn!("client_id bytes are not valid UTF-8");
        KafkaBrokerError::MalformedRequest {
            code: INVALID_REQUEST,
            reason: "client_id is not valid UTF-8".to_string(),
        }
    })?;

    trace!(client_id = %client_id, "parsed client_id");
    Ok((Some(client_id), 2 + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame(api_key: i16, api_version: i16, correlation_id: i32, client_id: Option<&str>) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&api_key.to_be_bytes());
        buf.extend_from_slice(&api_version.to_be_bytes());
        buf.extend_from_slice(&correlation_id.to_be_bytes());
        match client_id {
            None => buf.extend_from_slice(&(-1i16).to_be_bytes()),
            Some(s) => {
                buf.extend_from_slice(&(s.len() as i16).to_be_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
        }
        buf
    }

    #[tokio::test]
    async fn parses_null_client_id() {
        let bytes = frame(1, 0, 7, None);
        let mut cursor = Cursor::new(bytes);
        let (header, consumed) = KafkaRequestHeader::read_from(&mut cursor).await.unwrap();
        assert_eq!(header.client_id, None);
        assert_eq!(header.correlation_id, 7);
        assert_eq!(consumed, 8 + 2);
    }

    #[tokio::test]
    async fn parses_empty_client_id() {
        let bytes = frame(1, 0, 7, Some(""));
        let mut cursor = Cursor::new(bytes);
        let (header, consumed) = KafkaRequestHeader::read_from(&mut cursor).await.unwrap();
        assert_eq!(header.client_id, Some(String::new()));
        assert_eq!(consumed, 8 + 2);
    }

    #[tokio::test]
    async fn parses_32_byte_client_id() {
        let id = "x".repeat(32);
        let bytes = frame(1, 0, 7, Some(&id));
        let mut cursor = Cursor::new(bytes);
        let (header, consumed) = KafkaRequestHeader::read_from(&mut cursor).await.unwrap();
        assert_eq!(header.client_id.as_deref(), Some(id.as_str()));
        assert_eq!(consumed, 8 + 2 + 32);
    }

    #[tokio::test]
    async fn rejects_non_utf8_client_id() {
        let mut buf = frame(1, 0, 7, None);
        // Overwrite the null-length marker with a positive length followed by
        // invalid UTF-8 bytes.
        let len_pos = buf.len() - 2;
        buf[len_pos..].copy_from_slice(&(2i16).to_be_bytes());
        buf.extend_from_slice(&[0xff, 0xfe]);
        let mut cursor = Cursor::new(buf);
        let result = KafkaRequestHeader::read_from(&mut cursor).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn eof_mid_header_is_fatal() {
        let mut cursor = Cursor::new(vec![0u8; 3]);
        let result = KafkaRequestHeader::read_from(&mut cursor).await;
        assert!(result.is_err());
    }
}
