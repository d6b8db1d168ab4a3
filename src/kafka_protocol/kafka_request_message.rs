//! # KafkaRequestMessage Module
//!
//! Defines [`Request`]: a fully framed, admitted Kafka request ready for
//! dispatch. Per spec §3, a `Request` owns its admission-memory reservation
//! for its full lifetime; release happens when the owning [`AdmissionPermit`]
//! is dropped, which [`crate::connection`] ties to response completion.

use crate::admission::AdmissionPermit;
use crate::kafka_protocol::kafka_request_header::KafkaRequestHeader;
use bytes::Bytes;
use std::time::Duration;

/// A fully parsed, admitted request awaiting dispatch.
#[derive(Debug)]
pub struct Request {
    pub header: KafkaRequestHeader,
    pub payload: Bytes,
    /// The admission-memory reservation for this request's whole lifetime.
    pub admission: AdmissionPermit,
    /// The throttle delay computed by the quota manager for this request.
    /// On a first violation this is informational only (spec §4.4); the
    /// dispatcher may choose to surface it to the client.
    pub assigned_throttle_delay: Duration,
}

impl Request {
    pub fn correlation_id(&self) -> i32 {
        self.header.correlation_id
    }
}
