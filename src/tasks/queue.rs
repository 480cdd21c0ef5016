//! Task message queue — per-task FIFO of nested messages travelling from
//! the executing work back to the submitter.
//!
//! The submitter is not listening on a live stream while a task runs; it
//! polls. Nested requests and notifications therefore park here until the
//! next blocking `tasks/result` call drains them. FIFO order per task is a
//! hard guarantee, and each message is consumed exactly once by `dequeue`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::error::RpcResult;
use crate::resolver::Resolver;
use crate::types::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId};

/// Whether a queued message expects a correlated reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuedMessageKind {
    /// A nested request; a reply will be routed back by id.
    Request,
    /// A one-way notification.
    Notification,
}

/// A nested protocol message waiting for delivery to the submitter.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Request or notification.
    pub kind: QueuedMessageKind,

    /// The JSON-RPC payload to deliver.
    pub message: JsonRpcMessage,

    /// Present only for request-kind messages that expect a reply; settled
    /// when the reply is routed back.
    pub resolver: Option<Resolver<serde_json::Value>>,

    /// The id the resolver must be registered under so an incoming reply
    /// can find it.
    pub original_request_id: Option<RequestId>,

    /// Enqueue time.
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedMessage {
    /// Build a request-kind message.
    pub fn request(
        request: JsonRpcRequest,
        resolver: Option<Resolver<serde_json::Value>>,
        original_request_id: Option<RequestId>,
    ) -> Self {
        QueuedMessage {
            kind: QueuedMessageKind::Request,
            message: JsonRpcMessage::Request(request),
            resolver,
            original_request_id,
            enqueued_at: Utc::now(),
        }
    }

    /// Build a notification-kind message.
    pub fn notification(notification: JsonRpcNotification) -> Self {
        QueuedMessage {
            kind: QueuedMessageKind::Notification,
            message: JsonRpcMessage::Notification(notification),
            resolver: None,
            original_request_id: None,
            enqueued_at: Utc::now(),
        }
    }
}

/// Trait for per-task FIFO delivery of nested messages.
///
/// Implementations must be `Send + Sync`; all methods take `&self`.
#[async_trait]
pub trait TaskMessageQueue: Send + Sync {
    /// Append a message to the task's queue and wake its waiters.
    async fn enqueue(&self, task_id: &str, message: QueuedMessage) -> RpcResult<()>;

    /// Pop the oldest message, or `None` if the queue is empty.
    /// Non-blocking.
    async fn dequeue(&self, task_id: &str) -> RpcResult<Option<QueuedMessage>>;

    /// Read the oldest message without removing it.
    async fn peek(&self, task_id: &str) -> RpcResult<Option<QueuedMessage>>;

    /// Whether the task's queue holds no messages.
    async fn is_empty(&self, task_id: &str) -> RpcResult<bool>;

    /// Drain the task's queue, returning everything in FIFO order.
    async fn clear(&self, task_id: &str) -> RpcResult<Vec<QueuedMessage>>;

    /// Suspend until the task's queue is non-empty (or a manual wake).
    ///
    /// Uses the double-check-after-subscribe discipline: interest is
    /// registered, emptiness is re-checked, and only then does the caller
    /// suspend — a message enqueued between the first check and the
    /// subscription cannot be missed.
    async fn wait_for_message(&self, task_id: &str) -> RpcResult<()>;

    /// Wake the task's waiters without enqueueing anything — used to nudge
    /// a blocked result call into re-checking task state.
    async fn notify_message_available(&self, task_id: &str);

    /// Release state for one task, or every task when `task_id` is `None`.
    async fn cleanup(&self, task_id: Option<&str>);
}

#[derive(Default)]
struct QueueState {
    queues: HashMap<String, VecDeque<QueuedMessage>>,
    signals: HashMap<String, Arc<Notify>>,
}

/// In-memory message queue.
///
/// One `VecDeque` and one wake signal per task id, behind a single mutex.
pub struct InMemoryTaskMessageQueue {
    state: Mutex<QueueState>,
}

impl InMemoryTaskMessageQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
        }
    }

    async fn signal(&self, task_id: &str) -> Arc<Notify> {
        let mut state = self.state.lock().await;
        state
            .signals
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }
}

impl Default for InMemoryTaskMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskMessageQueue for InMemoryTaskMessageQueue {
    async fn enqueue(&self, task_id: &str, message: QueuedMessage) -> RpcResult<()> {
        let signal = {
            let mut state = self.state.lock().await;
            state
                .queues
                .entry(task_id.to_string())
                .or_default()
                .push_back(message);
            state
                .signals
                .entry(task_id.to_string())
                .or_insert_with(|| Arc::new(Notify::new()))
                .clone()
        };
        debug!(task_id = %task_id, "Queued nested message");
        signal.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, task_id: &str) -> RpcResult<Option<QueuedMessage>> {
        let mut state = self.state.lock().await;
        Ok(state
            .queues
            .get_mut(task_id)
            .and_then(|queue| queue.pop_front()))
    }

    async fn peek(&self, task_id: &str) -> RpcResult<Option<QueuedMessage>> {
        let state = self.state.lock().await;
        Ok(state
            .queues
            .get(task_id)
            .and_then(|queue| queue.front().cloned()))
    }

    async fn is_empty(&self, task_id: &str) -> RpcResult<bool> {
        let state = self.state.lock().await;
        Ok(state
            .queues
            .get(task_id)
            .map_or(true, |queue| queue.is_empty()))
    }

    async fn clear(&self, task_id: &str) -> RpcResult<Vec<QueuedMessage>> {
        let mut state = self.state.lock().await;
        Ok(state
            .queues
            .get_mut(task_id)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default())
    }

    async fn wait_for_message(&self, task_id: &str) -> RpcResult<()> {
        if !self.is_empty(task_id).await? {
            return Ok(());
        }

        let signal = self.signal(task_id).await;
        let notified = signal.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        // Double-check after subscribing: a message enqueued between the
        // emptiness check above and the subscription would otherwise park
        // us forever.
        if !self.is_empty(task_id).await? {
            return Ok(());
        }

        notified.await;
        Ok(())
    }

    async fn notify_message_available(&self, task_id: &str) {
        let signal = self.signal(task_id).await;
        debug!(task_id = %task_id, "Manual queue wake");
        signal.notify_waiters();
    }

    async fn cleanup(&self, task_id: Option<&str>) {
        let mut state = self.state.lock().await;
        match task_id {
            Some(id) => {
                state.queues.remove(id);
                state.signals.remove(id);
                debug!(task_id = %id, "Queue state released");
            }
            None => {
                state.queues.clear();
                state.signals.clear();
                debug!("All queue state released");
            }
        }
    }
}
