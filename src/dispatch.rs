//! The Request Dispatcher (spec §4.5): opaque to this core spec beyond the
//! contract that it yields a single [`Response`] per request and may
//! complete in any order relative to other requests on the same connection.
//!
//! Production dispatch (to the storage engine, metadata cache, controller
//! dispatcher, group router, partition manager) is out of scope per spec §1;
//! this module defines the trait boundary plus one runnable demo
//! implementation so the server is end-to-end testable.

use crate::kafka_protocol::kafka_error::KafkaBrokerError;
use crate::kafka_protocol::kafka_request_message::Request;
use crate::kafka_protocol::kafka_response_message::Response;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::instrument;

/// The per-request context handed to a dispatcher: everything a handler
/// needs beyond the parsed request itself. The shard-local collaborators
/// named in spec §4.5 (metadata cache, controller dispatcher, group router,
/// shard table, partition manager) are intentionally not modeled here — they
/// are the external, out-of-scope storage/cluster layers this request would
/// ultimately reach.
pub struct RequestContext<'a> {
    pub request: &'a Request,
}

/// Dispatches a single request to a response. Implementations may complete
/// in any order; the connection's write barrier (spec §4.6) is responsible
/// for serializing writes back into acceptance order regardless.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, ctx: RequestContext<'_>) -> Result<Response, KafkaBrokerError>;
}

/// A minimal dispatcher that echoes the request's payload back to the
/// client, carrying the original correlation id. Exists so the server is
/// runnable and the ordering/admission/quota machinery around it can be
/// exercised end-to-end without a real storage engine.
pub struct EchoDispatcher;

#[async_trait]
impl Dispatch for EchoDispatcher {
    #[instrument(skip(self, ctx))]
    async fn dispatch(&self, ctx: RequestContext<'_>) -> Result<Response, KafkaBrokerError> {
        let correlation_id = ctx.request.correlation_id();
        Ok(Response::with_payload(correlation_id, Bytes::copy_from_slice(&ctx.request.payload)))
    }
}

/// Builds the protocol-level error response written for a failed dispatch,
/// per the Open Question resolution in DESIGN.md: a failing dispatch still
/// carries the original correlationId rather than silently skipping the
/// slot.
pub fn error_response(correlation_id: i32, err: &KafkaBrokerError) -> Response {
    let code = err.error_code();
    Response::with_payload(correlation_id, Bytes::copy_from_slice(&code.to_be_bytes()))
}
