//! Session layer — the request/response correlation substrate every call
//! shares.
//!
//! - [`Transport`] trait + [`InMemoryTransport`] — frame delivery seam
//! - [`Session`] — in-flight table, id allocation, timeouts, cancellation,
//!   disconnect handling, incoming dispatch
//! - [`IncomingHandler`] — the seam the protocol method surface plugs into
//! - [`ResponseRouter`] — secondary consumer for replies to nested requests
//! - [`MessageSink`] — minimal "push one frame to the peer" capability,
//!   implemented by [`Session`] and consumed by the task result handler

use async_trait::async_trait;

use crate::error::RpcResult;
use crate::types::JsonRpcMessage;

pub mod router;
pub mod transport;

/// Capability to push one frame to the peer, without the rest of the
/// session API. The task result handler delivers queued nested messages
/// through this seam.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Write one frame to the peer.
    async fn send_message(&self, message: JsonRpcMessage) -> RpcResult<()>;
}

pub use router::{
    CallDisposition, IncomingHandler, ResponseRouter, Session, SessionBuilder, SessionConfig,
};
pub use transport::{InMemoryTransport, Transport};
