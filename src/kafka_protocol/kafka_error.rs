use std::io;
use thiserror::Error;

use super::kafka_error_codes::{
    INVALID_REQUEST, MESSAGE_TOO_LARGE, REQUEST_TIMED_OUT, UNKNOWN_SERVER_ERROR,
};

/// A specialized `Result` type for Kafka broker operations.
pub type KafkaResult<T> = std::result::Result<T, KafkaBrokerError>;

/// Represents the kinds of errors that can occur in your Kafka broker.
/// Each variant can (optionally) carry the Kafka error code to be returned
/// in a future response message.
#[derive(Error, Debug)]
pub enum KafkaBrokerError {
    /// The request is malformed or otherwise invalid: bad size, short read,
    /// non-UTF-8 client id, unsupported header version. Fatal to the
    /// connection (spec §7: "Framing... fatal to the connection").
    #[error("Invalid request: {reason}")]
    MalformedRequest {
        /// The Kafka error code for an invalid request (often `INVALID_REQUEST`).
        code: i16,
        /// A human-readable description of what went wrong.
        reason: String,
    },

    /// The request's admission-estimated memory meets or exceeds the
    /// shard's `maxRequestMemory`. Fatal to the connection per spec §7.
    #[error("Request rejected by admission policy: {reason}")]
    AdmissionDenied { reason: String },

    /// A dispatcher-reported timeout, or a heartbeat RPC that did not
    /// complete by its deadline.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// A generic internal server error, or an unexpected situation.
    /// By default, we might map this to `UNKNOWN_SERVER_ERROR`.
    #[error("Internal server error: {0}")]
    InternalServerError(String),

    /// Wrapping an I/O error (such as from the socket),
    /// so we can unify `io::Error` under this custom type.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// If you ever want to wrap `anyhow::Error` explicitly, you can do so.
    /// But often you'll convert directly into more specific errors instead.
    #[error("Unhandled error: {0}")]
    Other(#[from] anyhow::Error),
}

impl KafkaBrokerError {
    /// Returns the best matching Kafka error code for each variant.
    /// This helps you embed the correct code in a future response.
    pub fn error_code(&self) -> i16 {
        match self {
            KafkaBrokerError::MalformedRequest { code, .. } => *code,
            KafkaBrokerError::AdmissionDenied { .. } => MESSAGE_TOO_LARGE,
            KafkaBrokerError::Timeout(_) => REQUEST_TIMED_OUT,
            KafkaBrokerError::InternalServerError(_) => UNKNOWN_SERVER_ERROR,
            KafkaBrokerError::Io(_) => UNKNOWN_SERVER_ERROR,
            KafkaBrokerError::Other(_) => UNKNOWN_SERVER_ERROR,
        }
    }

    /// Whether this error must terminate the connection it occurred on
    /// (spec §7: framing and admission errors are fatal; dispatch and
    /// quota errors are not represented by this type at all, since they
    /// are handled without ever constructing one).
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            KafkaBrokerError::MalformedRequest { .. }
                | KafkaBrokerError::AdmissionDenied { .. }
                | KafkaBrokerError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::kafka_error_codes::INVALID_REQUEST as CODE;

    #[test]
    fn malformed_request_is_fatal() {
        let err = KafkaBrokerError::MalformedRequest {
            code: CODE,
            reason: "bad size".into(),
        };
        assert!(err.is_fatal_to_connection());
        assert_eq!(err.error_code(), CODE);
    }

    #[test]
    fn internal_error_is_not_fatal() {
        let err = KafkaBrokerError::InternalServerError("oops".into());
        assert!(!err.is_fatal_to_connection());
    }
}
