//! Task store — the single source of truth for task existence, status, and
//! stored results.
//!
//! The store is the rendezvous point other components wait on: every
//! successful [`update_task`](TaskStore::update_task) wakes that task's
//! [`wait_for_update`](TaskStore::wait_for_update) waiters. Result storage
//! is deliberately independent of status transitions so the orchestration
//! layer can store a payload first and flip the status second.
//!
//! [`InMemoryTaskStore`] is provided for single-process deployments and
//! tests; persistent deployments implement the [`TaskStore`] trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::error::{RpcError, RpcResult};
use crate::types::{Task, TaskMetadata, TaskStatus};

/// Default number of tasks per `list_tasks` page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Trait for persisting and retrieving tasks.
///
/// Implementations must be `Send + Sync`; all methods take `&self` and use
/// interior mutability.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a new task in `working` status.
    ///
    /// Generates a fresh unique id when `task_id` is `None`. A supplied id
    /// that already exists is rejected with `INVALID_PARAMS`. A `None` TTL
    /// in the metadata is stored as `None`, not defaulted.
    async fn create_task(
        &self,
        metadata: &TaskMetadata,
        task_id: Option<String>,
    ) -> RpcResult<Task>;

    /// Retrieve a task snapshot, or `None` if the id is unknown.
    async fn get_task(&self, task_id: &str) -> RpcResult<Option<Task>>;

    /// Update status and/or status message, refreshing `lastUpdatedAt` and
    /// waking this task's update waiters.
    ///
    /// Transitioning out of a terminal status is rejected; re-asserting the
    /// same terminal status or updating only the message is allowed.
    async fn update_task(
        &self,
        task_id: &str,
        status: Option<TaskStatus>,
        status_message: Option<String>,
    ) -> RpcResult<Task>;

    /// Associate the terminal result payload with a task.
    ///
    /// Written independently of the status transition; the caller pairs the
    /// two. Unknown task ids are rejected.
    async fn store_result(&self, task_id: &str, result: serde_json::Value) -> RpcResult<()>;

    /// Retrieve the stored result, or `None` when the task is unknown or no
    /// result was stored.
    async fn get_result(&self, task_id: &str) -> RpcResult<Option<serde_json::Value>>;

    /// Suspend until the next `update_task` call for this id.
    ///
    /// An update racing the subscription is never missed: it may instead
    /// satisfy the wait immediately, so callers re-check state after
    /// waking. Multiple concurrent waiters per task are supported; unknown
    /// ids are rejected.
    async fn wait_for_update(&self, task_id: &str) -> RpcResult<()>;

    /// List tasks in creation order, one page at a time.
    ///
    /// `cursor` is the opaque value returned by the previous page; an
    /// unrecognized cursor is rejected with `INVALID_PARAMS`.
    async fn list_tasks(&self, cursor: Option<&str>) -> RpcResult<(Vec<Task>, Option<String>)>;

    /// Remove a task and its stored result. Returns `false` if the id was
    /// unknown.
    async fn delete_task(&self, task_id: &str) -> RpcResult<bool>;

    /// Release state for one task, or for every task when `task_id` is
    /// `None`. Deterministic reclamation — TTLs are advisory and never
    /// enforced by the store.
    async fn cleanup(&self, task_id: Option<&str>);
}

struct TaskEntry {
    task: Task,
    result: Option<serde_json::Value>,
    update_signal: Arc<Notify>,
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<String, TaskEntry>,
    insertion_order: Vec<String>,
}

/// In-memory task store.
///
/// Task data is lost when the process exits. Thread-safe via a single
/// `tokio::sync::Mutex`; the per-task update signal is cloned out of the
/// critical section before waiters are woken.
pub struct InMemoryTaskStore {
    state: Mutex<StoreState>,
    page_size: usize,
    poll_interval: Option<u64>,
}

impl InMemoryTaskStore {
    /// Create an empty store with the default page size and no poll hint.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            page_size: DEFAULT_PAGE_SIZE,
            poll_interval: None,
        }
    }

    /// Set the `list_tasks` page size (builder-style).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set the poll-cadence hint (milliseconds) copied onto every created
    /// task (builder-style).
    pub fn with_poll_interval(mut self, millis: u64) -> Self {
        self.poll_interval = Some(millis);
        self
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(
        &self,
        metadata: &TaskMetadata,
        task_id: Option<String>,
    ) -> RpcResult<Task> {
        let mut task = Task::new(metadata, task_id);
        task.poll_interval = self.poll_interval;

        let mut state = self.state.lock().await;
        if state.entries.contains_key(&task.task_id) {
            return Err(RpcError::invalid_params(format!(
                "Task '{}' already exists",
                task.task_id
            )));
        }

        debug!(task_id = %task.task_id, ttl = ?task.ttl, "Task created");
        state.insertion_order.push(task.task_id.clone());
        state.entries.insert(
            task.task_id.clone(),
            TaskEntry {
                task: task.clone(),
                result: None,
                update_signal: Arc::new(Notify::new()),
            },
        );
        Ok(task)
    }

    async fn get_task(&self, task_id: &str) -> RpcResult<Option<Task>> {
        let state = self.state.lock().await;
        Ok(state.entries.get(task_id).map(|e| e.task.clone()))
    }

    async fn update_task(
        &self,
        task_id: &str,
        status: Option<TaskStatus>,
        status_message: Option<String>,
    ) -> RpcResult<Task> {
        let (task, signal) = {
            let mut state = self.state.lock().await;
            let entry = state.entries.get_mut(task_id).ok_or_else(|| {
                RpcError::task_not_found(format!("Task '{}' not found", task_id))
            })?;

            if let Some(new_status) = status {
                let current = entry.task.status;
                if current.is_terminal() && new_status != current {
                    warn!(
                        task_id = %task_id,
                        current = %current,
                        requested = %new_status,
                        "Rejected status transition out of terminal state"
                    );
                    return Err(RpcError::invalid_params(format!(
                        "Cannot transition from terminal status '{}'",
                        current
                    )));
                }
                entry.task.status = new_status;
            }
            if let Some(message) = status_message {
                entry.task.status_message = Some(message);
            }
            entry.task.last_updated_at = Utc::now();

            (entry.task.clone(), entry.update_signal.clone())
        };

        debug!(task_id = %task_id, status = %task.status, "Task updated");
        signal.notify_waiters();
        // Also store a wakeup permit so a waiter subscribing just after this
        // update still observes it instead of parking forever.
        signal.notify_one();
        Ok(task)
    }

    async fn store_result(&self, task_id: &str, result: serde_json::Value) -> RpcResult<()> {
        let mut state = self.state.lock().await;
        let entry = state
            .entries
            .get_mut(task_id)
            .ok_or_else(|| RpcError::task_not_found(format!("Task '{}' not found", task_id)))?;
        entry.result = Some(result);
        debug!(task_id = %task_id, "Task result stored");
        Ok(())
    }

    async fn get_result(&self, task_id: &str) -> RpcResult<Option<serde_json::Value>> {
        let state = self.state.lock().await;
        Ok(state.entries.get(task_id).and_then(|e| e.result.clone()))
    }

    async fn wait_for_update(&self, task_id: &str) -> RpcResult<()> {
        let signal = {
            let state = self.state.lock().await;
            let entry = state.entries.get(task_id).ok_or_else(|| {
                RpcError::task_not_found(format!("Task '{}' not found", task_id))
            })?;
            entry.update_signal.clone()
        };

        let notified = signal.notified();
        tokio::pin!(notified);
        // Register before suspending so an update firing between the lookup
        // above and the await below still wakes us.
        notified.as_mut().enable();
        notified.await;
        Ok(())
    }

    async fn list_tasks(&self, cursor: Option<&str>) -> RpcResult<(Vec<Task>, Option<String>)> {
        let state = self.state.lock().await;

        let start = match cursor {
            None => 0,
            Some(token) => {
                let pos = state
                    .insertion_order
                    .iter()
                    .position(|id| id == token)
                    .ok_or_else(|| RpcError::invalid_params("Invalid cursor"))?;
                pos + 1
            }
        };

        let tasks: Vec<Task> = state
            .insertion_order
            .iter()
            .skip(start)
            .take(self.page_size)
            .filter_map(|id| state.entries.get(id).map(|e| e.task.clone()))
            .collect();

        let next_cursor = if start + tasks.len() < state.insertion_order.len() {
            tasks.last().map(|t| t.task_id.clone())
        } else {
            None
        };

        debug!(
            count = tasks.len(),
            has_more = next_cursor.is_some(),
            "Listed tasks"
        );
        Ok((tasks, next_cursor))
    }

    async fn delete_task(&self, task_id: &str) -> RpcResult<bool> {
        let mut state = self.state.lock().await;
        let removed = state.entries.remove(task_id).is_some();
        if removed {
            state.insertion_order.retain(|id| id != task_id);
            debug!(task_id = %task_id, "Task deleted");
        }
        Ok(removed)
    }

    async fn cleanup(&self, task_id: Option<&str>) {
        let mut state = self.state.lock().await;
        match task_id {
            Some(id) => {
                state.entries.remove(id);
                state.insertion_order.retain(|existing| existing != id);
                debug!(task_id = %id, "Task state released");
            }
            None => {
                let count = state.entries.len();
                state.entries.clear();
                state.insertion_order.clear();
                debug!(count, "All task state released");
            }
        }
    }
}
