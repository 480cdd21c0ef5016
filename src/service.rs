//! Task service — the `tasks/*` protocol method surface.
//!
//! Wires the store, queue, and result handler together behind the
//! session's [`IncomingHandler`] seam: `tasks/get`, `tasks/result`,
//! `tasks/cancel`, and `tasks/list` are handled here, everything else is
//! passed to an optional delegate (tool dispatch lives behind that seam).
//! [`run_task`](TaskService::run_task) is the producing side: it creates
//! the task, spawns the background work, and returns the acknowledgment
//! the submitter polls against.
//!
//! The store and queue are injected per instance; a service's lifecycle is
//! tied to whatever owns it, not to process-wide state.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{RpcError, RpcResult};
use crate::session::{CallDisposition, IncomingHandler, MessageSink};
use crate::tasks::context::{run_scoped, TaskContext};
use crate::tasks::queue::{InMemoryTaskMessageQueue, TaskMessageQueue};
use crate::tasks::result_handler::TaskResultHandler;
use crate::tasks::store::{InMemoryTaskStore, TaskStore};
use crate::types::{
    methods, CancelTaskParams, CreateTaskResult, GetTaskParams, JsonRpcRequest, ListTasksParams,
    ListTasksResult, RequestId, Task, TaskMetadata, TaskResultParams, TaskResultPayload,
    TaskStatus,
};

/// Builder for [`TaskService`].
#[derive(Default)]
pub struct TaskServiceBuilder {
    store: Option<Arc<dyn TaskStore>>,
    queue: Option<Arc<dyn TaskMessageQueue>>,
    delegate: Option<Arc<dyn IncomingHandler>>,
}

impl TaskServiceBuilder {
    /// Start with defaults: in-memory store and queue, no delegate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given task store instead of a fresh in-memory one.
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use the given message queue instead of a fresh in-memory one.
    pub fn queue(mut self, queue: Arc<dyn TaskMessageQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Handler for methods outside the `tasks/*` surface.
    pub fn delegate(mut self, delegate: Arc<dyn IncomingHandler>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Finish building the service.
    pub fn build(self) -> Arc<TaskService> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(InMemoryTaskMessageQueue::new()));
        Arc::new(TaskService {
            result_handler: Arc::new(TaskResultHandler::new(
                Arc::clone(&store),
                Arc::clone(&queue),
            )),
            store,
            queue,
            delegate: self.delegate,
            cancellation_flags: Mutex::new(HashMap::new()),
        })
    }
}

/// Dispatch for the `tasks/*` methods plus the glue that spawns background
/// work for task-augmented calls.
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn TaskMessageQueue>,
    result_handler: Arc<TaskResultHandler>,
    delegate: Option<Arc<dyn IncomingHandler>>,
    cancellation_flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl TaskService {
    /// Build a service over fresh in-memory store and queue.
    pub fn in_memory() -> Arc<Self> {
        TaskServiceBuilder::new().build()
    }

    /// Start building a service.
    pub fn builder() -> TaskServiceBuilder {
        TaskServiceBuilder::new()
    }

    /// The task store this service operates on.
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// The message queue this service operates on.
    pub fn queue(&self) -> &Arc<dyn TaskMessageQueue> {
        &self.queue
    }

    /// The result handler, for wiring as the session's response router.
    pub fn result_handler(&self) -> Arc<TaskResultHandler> {
        Arc::clone(&self.result_handler)
    }

    /// `tasks/get` — non-blocking status snapshot.
    pub async fn get_task(&self, params: GetTaskParams) -> RpcResult<Task> {
        self.store
            .get_task(&params.task_id)
            .await?
            .ok_or_else(|| RpcError::task_not_found(format!("Task '{}' not found", params.task_id)))
    }

    /// `tasks/list` — enumerate tasks in creation order.
    pub async fn list_tasks(&self, params: ListTasksParams) -> RpcResult<ListTasksResult> {
        let (tasks, next_cursor) = self.store.list_tasks(params.cursor.as_deref()).await?;
        Ok(ListTasksResult { tasks, next_cursor })
    }

    /// `tasks/cancel` — flag cancellation and transition the task.
    ///
    /// Unknown ids fail with a not-found error; terminal tasks with a
    /// not-cancelable error. Otherwise the advisory cancellation flag is
    /// set (running work observes it), the status becomes `cancelled`, and
    /// the task's queue waiters are nudged so a blocked `tasks/result`
    /// call re-checks.
    pub async fn cancel_task(&self, params: CancelTaskParams) -> RpcResult<Task> {
        let task = self
            .store
            .get_task(&params.task_id)
            .await?
            .ok_or_else(|| {
                RpcError::task_not_found(format!("Task '{}' not found", params.task_id))
            })?;

        if task.status.is_terminal() {
            return Err(RpcError::task_not_cancelable(format!(
                "Task '{}' is in terminal state '{}'",
                params.task_id, task.status
            )));
        }

        if let Some(flag) = self.lock_flags().get(&params.task_id) {
            flag.store(true, Ordering::Release);
        }

        let task = self
            .store
            .update_task(&params.task_id, Some(TaskStatus::Cancelled), params.reason)
            .await?;
        self.queue.notify_message_available(&params.task_id).await;
        debug!(task_id = %params.task_id, "Task cancelled");
        Ok(task)
    }

    /// `tasks/result` — the blocking result retrieval of
    /// [`TaskResultHandler::handle`].
    pub async fn task_result(
        &self,
        params: TaskResultParams,
        sink: &dyn MessageSink,
        request_id: &RequestId,
    ) -> RpcResult<TaskResultPayload> {
        self.result_handler.handle(&params, sink, request_id).await
    }

    /// Accept task-augmented work: create the task, spawn `work` in the
    /// background, and return the acknowledgment immediately.
    ///
    /// `work` runs under [`run_scoped`] failure handling with a context
    /// wired to this service's store and queue: returning `Ok(value)`
    /// completes the task with that payload (unless the work already drove
    /// it to a terminal status itself), returning `Err` fails it with the
    /// error's message.
    pub async fn run_task<F, Fut>(
        self: &Arc<Self>,
        metadata: TaskMetadata,
        work: F,
    ) -> RpcResult<CreateTaskResult>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = RpcResult<serde_json::Value>> + Send + 'static,
    {
        let task = self.store.create_task(&metadata, None).await?;
        let task_id = task.task_id.clone();

        let flag = Arc::new(AtomicBool::new(false));
        self.lock_flags().insert(task_id.clone(), Arc::clone(&flag));

        let ctx = TaskContext::new(task.clone(), Arc::clone(&self.store))
            .with_queue(Arc::clone(&self.queue))
            .with_cancellation_flag(flag);

        let service = Arc::clone(self);
        debug!(task_id = %task_id, "Spawning task work");
        tokio::spawn(async move {
            let outcome = run_scoped(ctx, |ctx| async move {
                let value = work(ctx.clone()).await?;
                ctx.complete(value).await
            })
            .await;
            if let Err(err) = outcome {
                warn!(task_id = %task_id, error = %err, "Task scope failed");
            }
            service.lock_flags().remove(&task_id);
        });

        Ok(CreateTaskResult { task })
    }

    fn lock_flags(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AtomicBool>>> {
        self.cancellation_flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<serde_json::Value>) -> RpcResult<T> {
    serde_json::from_value(params.unwrap_or_else(|| serde_json::Value::Object(Default::default())))
        .map_err(|err| RpcError::invalid_params(err.to_string()))
}

#[async_trait]
impl IncomingHandler for TaskService {
    async fn handle_request(
        &self,
        request: JsonRpcRequest,
        disposition: CallDisposition,
        sink: Arc<dyn MessageSink>,
    ) -> RpcResult<serde_json::Value> {
        match request.method.as_str() {
            methods::TASKS_GET => {
                let params = parse_params::<GetTaskParams>(request.params)?;
                Ok(serde_json::to_value(self.get_task(params).await?)?)
            }
            methods::TASKS_RESULT => {
                let params = parse_params::<TaskResultParams>(request.params)?;
                let payload = self.task_result(params, sink.as_ref(), &request.id).await?;
                Ok(serde_json::to_value(payload)?)
            }
            methods::TASKS_CANCEL => {
                let params = parse_params::<CancelTaskParams>(request.params)?;
                Ok(serde_json::to_value(self.cancel_task(params).await?)?)
            }
            methods::TASKS_LIST => {
                let params = parse_params::<ListTasksParams>(request.params)?;
                Ok(serde_json::to_value(self.list_tasks(params).await?)?)
            }
            _ => match &self.delegate {
                Some(delegate) => delegate.handle_request(request, disposition, sink).await,
                None => Err(RpcError::method_not_found(request.method)),
            },
        }
    }
}
