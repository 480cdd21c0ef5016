//! Transport abstraction for session communication.
//!
//! The [`Transport`] trait is the seam between the session layer and
//! whatever carries the frames: the session only needs to write outgoing
//! frames, read incoming ones until end-of-stream, and close. The crate
//! ships [`InMemoryTransport`] — a connected duplex pair used for tests and
//! same-process peers; network bindings implement the same trait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::error::{RpcError, RpcResult};
use crate::types::JsonRpcMessage;

/// Transport abstraction the session reads and writes frames through.
///
/// Implementations must guarantee at-most-one delivery attempt per outgoing
/// frame, and must make `recv` return `Ok(None)` once the connection is
/// closed — by either side — so the session's read loop can observe the
/// close and settle its in-flight table.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one frame to the peer.
    async fn send(&self, message: JsonRpcMessage) -> RpcResult<()>;

    /// Read the next incoming frame; `Ok(None)` signals end-of-stream.
    async fn recv(&self) -> RpcResult<Option<JsonRpcMessage>>;

    /// Close the transport and release any held resources.
    ///
    /// After close, `send` fails and `recv` drains to `Ok(None)`. The
    /// default implementation is a no-op for transports with nothing to
    /// release.
    async fn close(&self) -> RpcResult<()> {
        Ok(())
    }
}

/// One end of a connected in-memory duplex.
///
/// [`pair()`](InMemoryTransport::pair) returns two ends wired back to back:
/// frames sent on one are received by the other, in order. Closing either
/// end makes both ends' read loops observe end-of-stream, which is how the
/// session's disconnect handling is exercised without a network.
pub struct InMemoryTransport {
    outgoing: Mutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<JsonRpcMessage>>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl InMemoryTransport {
    /// Create a connected pair of transports.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Self::from_parts(a_tx, a_rx), Self::from_parts(b_tx, b_rx))
    }

    fn from_parts(
        tx: mpsc::UnboundedSender<JsonRpcMessage>,
        rx: mpsc::UnboundedReceiver<JsonRpcMessage>,
    ) -> Self {
        InMemoryTransport {
            outgoing: Mutex::new(Some(tx)),
            incoming: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        }
    }

    fn lock_outgoing(
        &self,
    ) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<JsonRpcMessage>>> {
        self.outgoing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, message: JsonRpcMessage) -> RpcResult<()> {
        let guard = self.lock_outgoing();
        match guard.as_ref() {
            Some(tx) => tx
                .send(message)
                .map_err(|_| RpcError::ConnectionClosed("peer stream closed".to_string())),
            None => Err(RpcError::ConnectionClosed(
                "transport already closed".to_string(),
            )),
        }
    }

    async fn recv(&self) -> RpcResult<Option<JsonRpcMessage>> {
        let mut incoming = self.incoming.lock().await;

        let closed = self.close_signal.notified();
        tokio::pin!(closed);
        closed.as_mut().enable();
        // Re-check after subscribing so a close racing this call still lands.
        if self.closed.load(Ordering::Acquire) {
            return Ok(incoming.recv().await);
        }

        tokio::select! {
            message = incoming.recv() => Ok(message),
            _ = closed => Ok(None),
        }
    }

    async fn close(&self) -> RpcResult<()> {
        // Dropping our sender gives the peer end-of-stream; the signal wakes
        // our own read loop out of `recv` without touching its receiver.
        self.lock_outgoing().take();
        self.closed.store(true, Ordering::Release);
        self.close_signal.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::types::JsonRpcNotification;

    fn frame(method: &str) -> JsonRpcMessage {
        JsonRpcMessage::Notification(JsonRpcNotification::new(method, None))
    }

    #[tokio::test]
    async fn pair_delivers_frames_in_order() {
        let (left, right) = InMemoryTransport::pair();

        left.send(frame("first")).await.unwrap();
        left.send(frame("second")).await.unwrap();

        for expected in ["first", "second"] {
            match right.recv().await.unwrap() {
                Some(JsonRpcMessage::Notification(n)) => assert_eq!(n.method, expected),
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn close_gives_peer_end_of_stream() {
        let (left, right) = InMemoryTransport::pair();
        left.close().await.unwrap();
        assert!(right.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_unblocks_own_suspended_recv() {
        let (left, _right) = InMemoryTransport::pair();
        let left = Arc::new(left);

        let reader = Arc::clone(&left);
        let handle = tokio::spawn(async move { reader.recv().await });
        tokio::task::yield_now().await;

        left.close().await.unwrap();
        assert!(handle.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (left, _right) = InMemoryTransport::pair();
        left.close().await.unwrap();

        let err = left.send(frame("late")).await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn send_after_peer_close_fails() {
        let (left, right) = InMemoryTransport::pair();
        right.close().await.unwrap();

        let err = left.send(frame("late")).await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed(_)));
    }
}
