//! Task result handler — services the blocking `tasks/result` call.
//!
//! The call blocks until there is something useful to return: queued nested
//! messages are drained and pushed to the submitter through a
//! [`MessageSink`], and once the task reaches a terminal status the stored
//! payload is returned. While neither is available the handler races the
//! queue's and the store's wait primitives, resilient to either side
//! failing as long as the other can still wake it.
//!
//! Nested requests leave through the blocking call, but their replies come
//! back over the normal connection. The handler registers each request
//! message's resolver under its `originalRequestId`; the session offers
//! unmatched response frames here via the [`ResponseRouter`] impl, which
//! settles the parked resolver and unblocks the background work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::error::{RpcError, RpcResult};
use crate::resolver::Resolver;
use crate::session::{MessageSink, ResponseRouter};
use crate::tasks::queue::{QueuedMessageKind, TaskMessageQueue};
use crate::tasks::store::TaskStore;
use crate::types::{JsonRpcError, RequestId, Task, TaskResultParams, TaskResultPayload};

/// Orchestrates blocking result retrieval and nested-reply routing.
pub struct TaskResultHandler {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn TaskMessageQueue>,
    pending_requests: Mutex<HashMap<RequestId, Resolver<serde_json::Value>>>,
}

impl TaskResultHandler {
    /// Create a handler over the given store and queue.
    pub fn new(store: Arc<dyn TaskStore>, queue: Arc<dyn TaskMessageQueue>) -> Self {
        TaskResultHandler {
            store,
            queue,
            pending_requests: Mutex::new(HashMap::new()),
        }
    }

    /// Service one `tasks/result` call.
    ///
    /// Fails immediately with a not-found error for an unknown task id.
    /// Otherwise loops: deliver queued messages, return the stored payload
    /// if the task is terminal, else wait for the next queue or store event
    /// and re-check.
    pub async fn handle(
        &self,
        params: &TaskResultParams,
        sink: &dyn MessageSink,
        request_id: &RequestId,
    ) -> RpcResult<TaskResultPayload> {
        let task_id = params.task_id.as_str();
        let mut task = self.require_task(task_id).await?;
        debug!(task_id = %task_id, request_id = %request_id, "Result retrieval started");

        loop {
            self.deliver_queued_messages(task_id, sink).await?;

            if task.status.is_terminal() {
                let result = self.store.get_result(task_id).await?;
                debug!(
                    task_id = %task_id,
                    status = %task.status,
                    has_result = result.is_some(),
                    "Returning terminal result"
                );
                return Ok(TaskResultPayload::new(result, task_id));
            }

            self.wait_for_task_event(task_id).await?;
            task = self.require_task(task_id).await?;
        }
    }

    /// Route a successful reply into the resolver registered under
    /// `request_id`.
    ///
    /// Returns `false` — never an error — when the id is unknown or the
    /// resolver was already settled.
    pub fn route_response(&self, request_id: &RequestId, result: serde_json::Value) -> bool {
        let Some(resolver) = self.lock_pending().get(request_id).cloned() else {
            return false;
        };
        if resolver.done() || resolver.set_result(result).is_err() {
            return false;
        }
        self.lock_pending().remove(request_id);
        debug!(request_id = %request_id, "Routed reply into parked resolver");
        true
    }

    /// Route an error reply into the resolver registered under
    /// `request_id`. Same contract as [`route_response`](Self::route_response).
    pub fn route_error(&self, request_id: &RequestId, error: JsonRpcError) -> bool {
        let Some(resolver) = self.lock_pending().get(request_id).cloned() else {
            return false;
        };
        if resolver.done()
            || resolver
                .set_error(RpcError::from_json_rpc(error))
                .is_err()
        {
            return false;
        }
        self.lock_pending().remove(request_id);
        debug!(request_id = %request_id, "Routed error into parked resolver");
        true
    }

    /// Number of nested requests still awaiting a reply.
    pub fn pending_request_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Drain the task's queue, pushing each message to the submitter.
    ///
    /// Request-kind messages with an `originalRequestId` get their resolver
    /// registered first, so a reply cannot race the registration; without
    /// that id the message is sent but no resolver is registered.
    async fn deliver_queued_messages(
        &self,
        task_id: &str,
        sink: &dyn MessageSink,
    ) -> RpcResult<()> {
        while let Some(queued) = self.queue.dequeue(task_id).await? {
            if queued.kind == QueuedMessageKind::Request {
                match (&queued.original_request_id, &queued.resolver) {
                    (Some(original_id), Some(resolver)) => {
                        self.lock_pending()
                            .insert(original_id.clone(), resolver.clone());
                        debug!(
                            task_id = %task_id,
                            original_request_id = %original_id,
                            "Registered resolver for nested request"
                        );
                    }
                    _ => {
                        debug!(task_id = %task_id, "Nested request without original id; no resolver registered");
                    }
                }
            }
            sink.send_message(queued.message).await?;
        }
        Ok(())
    }

    /// Wait for the next queue or store event for this task, whichever
    /// fires first.
    ///
    /// If one side's wait fails, the race continues on the other; only when
    /// both have failed does the error propagate.
    async fn wait_for_task_event(&self, task_id: &str) -> RpcResult<()> {
        let queue_wait = self.queue.wait_for_message(task_id);
        let store_wait = self.store.wait_for_update(task_id);
        tokio::pin!(queue_wait, store_wait);

        let mut queue_failed = false;
        let mut store_failed = false;
        loop {
            tokio::select! {
                outcome = &mut queue_wait, if !queue_failed => match outcome {
                    Ok(()) => return Ok(()),
                    Err(err) => {
                        if store_failed {
                            return Err(err);
                        }
                        warn!(task_id = %task_id, error = %err, "Queue wait failed; continuing on store events");
                        queue_failed = true;
                    }
                },
                outcome = &mut store_wait, if !store_failed => match outcome {
                    Ok(()) => return Ok(()),
                    Err(err) => {
                        if queue_failed {
                            return Err(err);
                        }
                        warn!(task_id = %task_id, error = %err, "Store wait failed; continuing on queue events");
                        store_failed = true;
                    }
                },
            }
        }
    }

    async fn require_task(&self, task_id: &str) -> RpcResult<Task> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| RpcError::task_not_found(format!("Task '{}' not found", task_id)))
    }

    fn lock_pending(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<RequestId, Resolver<serde_json::Value>>> {
        self.pending_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResponseRouter for TaskResultHandler {
    fn route_response(&self, request_id: &RequestId, result: serde_json::Value) -> bool {
        TaskResultHandler::route_response(self, request_id, result)
    }

    fn route_error(&self, request_id: &RequestId, error: JsonRpcError) -> bool {
        TaskResultHandler::route_error(self, request_id, error)
    }
}
