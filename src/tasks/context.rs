//! Task context — the interface the executing work uses to affect its task.
//!
//! The work never reaches into the store or queue directly; everything goes
//! through this facade: progress updates, completion, failure, the advisory
//! cancellation flag, and the nested-request helpers that park the work
//! until the submitter answers.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{RpcError, RpcResult};
use crate::resolver::Resolver;
use crate::tasks::queue::{QueuedMessage, TaskMessageQueue};
use crate::tasks::store::TaskStore;
use crate::types::{
    methods, CreateMessageParams, CreateMessageResult, ElicitParams, ElicitResult,
    JsonRpcRequest, RequestId, Task, TaskStatus,
};

/// Facade bound to one task, handed to the code executing the work.
///
/// Cheaply cloneable; clones share the snapshot, the cancellation flag,
/// and the underlying store/queue handles.
#[derive(Clone)]
pub struct TaskContext {
    task_id: String,
    task: Arc<Mutex<Task>>,
    store: Arc<dyn TaskStore>,
    queue: Option<Arc<dyn TaskMessageQueue>>,
    cancelled: Arc<AtomicBool>,
}

impl TaskContext {
    /// Create a context for an existing task.
    pub fn new(task: Task, store: Arc<dyn TaskStore>) -> Self {
        TaskContext {
            task_id: task.task_id.clone(),
            task: Arc::new(Mutex::new(task)),
            store,
            queue: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach the message queue used by the nested-request helpers
    /// (builder-style).
    pub fn with_queue(mut self, queue: Arc<dyn TaskMessageQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Share an externally owned cancellation flag (builder-style), so
    /// `tasks/cancel` handling can flip the same flag the work observes.
    pub fn with_cancellation_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    /// The id of the task this context is bound to.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Snapshot of the task as of the last operation through this context.
    pub fn task(&self) -> Task {
        self.lock_task().clone()
    }

    /// Whether cancellation has been requested.
    ///
    /// Advisory: the work is expected to observe this flag and wind down
    /// itself; nothing forcibly aborts it.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Set the cancellation flag. Does not change the task's status.
    pub fn request_cancellation(&self) {
        debug!(task_id = %self.task_id, "Cancellation requested");
        self.cancelled.store(true, Ordering::Release);
    }

    /// Overwrite the task's progress message.
    pub async fn update_status(&self, message: impl Into<String>) -> RpcResult<()> {
        let task = self
            .store
            .update_task(&self.task_id, None, Some(message.into()))
            .await?;
        *self.lock_task() = task;
        Ok(())
    }

    /// Store the result, then transition to `completed`.
    ///
    /// No-op when the task is already terminal.
    pub async fn complete(&self, result: serde_json::Value) -> RpcResult<()> {
        if self.is_terminal_in_store().await? {
            debug!(task_id = %self.task_id, "complete() on terminal task ignored");
            return Ok(());
        }
        self.store.store_result(&self.task_id, result).await?;
        let task = self
            .store
            .update_task(&self.task_id, Some(TaskStatus::Completed), None)
            .await?;
        *self.lock_task() = task;
        Ok(())
    }

    /// Transition to `failed` with the given message.
    ///
    /// No-op when the task is already terminal.
    pub async fn fail(&self, message: impl Into<String>) -> RpcResult<()> {
        if self.is_terminal_in_store().await? {
            debug!(task_id = %self.task_id, "fail() on terminal task ignored");
            return Ok(());
        }
        let task = self
            .store
            .update_task(&self.task_id, Some(TaskStatus::Failed), Some(message.into()))
            .await?;
        *self.lock_task() = task;
        Ok(())
    }

    /// Ask the submitter for structured input and block until it answers.
    ///
    /// The task transitions to `input_required` while the question is
    /// outstanding, and back to `working` once the reply arrives (unless
    /// the task reached some other status in between). The request travels
    /// through the task's message queue; the reply is routed into the
    /// parked resolver by id.
    pub async fn elicit(&self, params: ElicitParams) -> RpcResult<ElicitResult> {
        let value = self
            .nested_request(
                methods::ELICITATION_CREATE,
                serde_json::to_value(&params)?,
                true,
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Ask the submitter for a model completion and block until it answers.
    pub async fn create_message(
        &self,
        params: CreateMessageParams,
    ) -> RpcResult<CreateMessageResult> {
        let value = self
            .nested_request(
                methods::SAMPLING_CREATE_MESSAGE,
                serde_json::to_value(&params)?,
                false,
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn nested_request(
        &self,
        method: &str,
        params: serde_json::Value,
        input_required: bool,
    ) -> RpcResult<serde_json::Value> {
        let queue = self.queue.as_ref().ok_or_else(|| {
            RpcError::internal_error("task context has no message queue for nested requests")
        })?;

        // Nested requests use uuid string ids so they can never collide
        // with the session's integer id space.
        let request_id = RequestId::String(Uuid::new_v4().to_string());
        let request = JsonRpcRequest::new(request_id.clone(), method, Some(params));
        let resolver: Resolver<serde_json::Value> = Resolver::new();

        if input_required {
            let task = self
                .store
                .update_task(&self.task_id, Some(TaskStatus::InputRequired), None)
                .await?;
            *self.lock_task() = task;
        }

        debug!(
            task_id = %self.task_id,
            method = %method,
            request_id = %request_id,
            "Parking work on nested request"
        );
        queue
            .enqueue(
                &self.task_id,
                QueuedMessage::request(request, Some(resolver.clone()), Some(request_id)),
            )
            .await?;

        let outcome = resolver.wait().await;

        if input_required {
            // Only resume `working` if nothing else moved the task on while
            // the question was outstanding (terminal states are sticky).
            if let Some(task) = self.store.get_task(&self.task_id).await? {
                if task.status == TaskStatus::InputRequired {
                    let task = self
                        .store
                        .update_task(&self.task_id, Some(TaskStatus::Working), None)
                        .await?;
                    *self.lock_task() = task;
                }
            }
        }

        outcome
    }

    async fn is_terminal_in_store(&self) -> RpcResult<bool> {
        Ok(self
            .store
            .get_task(&self.task_id)
            .await?
            .map_or(false, |t| t.status.is_terminal()))
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Task> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run `work` in a scope that owns the task's failure handling.
///
/// If `work` errors and the task has not already reached a terminal status,
/// the task is failed with the error's message; the error itself is
/// swallowed — the task record is the failure channel for background work.
/// A task completed (or failed) inside `work` before the error is left
/// untouched.
pub async fn run_scoped<F, Fut>(ctx: TaskContext, work: F) -> RpcResult<()>
where
    F: FnOnce(TaskContext) -> Fut,
    Fut: Future<Output = RpcResult<()>>,
{
    let store = ctx.store.clone();
    let task_id = ctx.task_id.clone();

    if let Err(err) = work(ctx).await {
        let still_active = store
            .get_task(&task_id)
            .await?
            .map_or(false, |t| !t.status.is_terminal());
        if still_active {
            warn!(task_id = %task_id, error = %err, "Task work failed");
            store
                .update_task(&task_id, Some(TaskStatus::Failed), Some(err.to_string()))
                .await?;
        }
    }
    Ok(())
}

/// Look up `task_id`, bind a [`TaskContext`] to it, and run `work` under
/// [`run_scoped`] failure handling.
///
/// Fails up front with a not-found error when the task id is unknown.
pub async fn task_execution<F, Fut>(
    task_id: &str,
    store: Arc<dyn TaskStore>,
    work: F,
) -> RpcResult<()>
where
    F: FnOnce(TaskContext) -> Fut,
    Fut: Future<Output = RpcResult<()>>,
{
    let task = store
        .get_task(task_id)
        .await?
        .ok_or_else(|| RpcError::task_not_found(format!("Task '{}' not found", task_id)))?;
    run_scoped(TaskContext::new(task, store), work).await
}
