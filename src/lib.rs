//! # taskrpc — task-augmented JSON-RPC 2.0 session runtime
//!
//! A bidirectional RPC runtime for peers speaking JSON-RPC 2.0, extended
//! with a long-running-task execution model: a peer can submit work that
//! outlives a single request/response cycle, poll its status, and receive
//! nested requests from the worker (an elicitation question, a sampling
//! request) while the original call is still outstanding.
//!
//! ## Overview
//!
//! Two layers make this work:
//!
//! - The **session layer** correlates requests with responses over any
//!   [`session::Transport`]: fresh integer ids, per-request timeouts,
//!   cancellation notifications, and uniform "Connection closed" failure of
//!   everything in flight on disconnect.
//! - The **task subsystem** tracks work across exchanges: a
//!   [`tasks::TaskStore`] holds status and the stored result, a
//!   [`tasks::TaskMessageQueue`] parks nested messages until the submitter's
//!   next blocking `tasks/result` call picks them up, and single-assignment
//!   [`Resolver`]s correlate each nested request with the reply that later
//!   arrives over the connection.
//!
//! A submitter is not listening on a live stream while a task runs — it
//! polls. Nested requests therefore travel out-of-band through the blocking
//! result call, while their replies travel in-band and are routed back by
//! id. [`tasks::TaskResultHandler`] is the join point between the two.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use taskrpc::prelude::*;
//! use taskrpc::types::TaskMetadata;
//!
//! // Worker peer: tasks/* methods served by a TaskService.
//! let service = TaskService::in_memory();
//! let (worker_end, submitter_end) = InMemoryTransport::pair();
//! let worker = Session::builder(Arc::new(worker_end))
//!     .handler(service.clone())
//!     .response_router(service.result_handler())
//!     .build();
//! tokio::spawn({
//!     let worker = worker.clone();
//!     async move { worker.run().await }
//! });
//!
//! // Accept work: acknowledge now, deliver the result later.
//! let ack = service
//!     .run_task(TaskMetadata { ttl: Some(60_000) }, |ctx| async move {
//!         ctx.update_status("crunching").await?;
//!         Ok(serde_json::json!({ "text": "done" }))
//!     })
//!     .await?;
//!
//! // Submitter peer: poll the snapshot, then block for the result.
//! let submitter = Session::new(Arc::new(submitter_end));
//! let task_id = ack.task.task_id;
//! let snapshot = submitter
//!     .send_request("tasks/get", Some(serde_json::json!({ "taskId": task_id })), None)
//!     .await?;
//! ```
//!
//! ## Architecture
//!
//! - [`session::Session`] — in-flight request table, id allocation and
//!   normalization, timeout/cancel/disconnect handling
//! - [`session::Transport`] + [`session::InMemoryTransport`] — frame
//!   delivery seam and the in-process duplex pair
//! - [`session::IncomingHandler`] — dispatch seam for incoming calls, with
//!   the task-augmented/immediate disposition resolved once at entry
//! - [`tasks::TaskStore`] + [`tasks::InMemoryTaskStore`] — task state,
//!   stored results, per-task update signals
//! - [`tasks::TaskMessageQueue`] + [`tasks::InMemoryTaskMessageQueue`] —
//!   per-task FIFO of nested messages
//! - [`tasks::TaskContext`] + [`tasks::task_execution`] — the facade
//!   background work drives its task through
//! - [`tasks::TaskResultHandler`] — blocking result retrieval and
//!   nested-reply routing
//! - [`service::TaskService`] — the `tasks/get` / `tasks/result` /
//!   `tasks/cancel` / `tasks/list` method surface
//! - [`Resolver`] — write-once future shared by all of the above
//! - [`types`] — JSON-RPC envelope and the task wire model
//! - [`error::RpcError`] — protocol errors with JSON-RPC codes

pub mod error;
pub mod resolver;
pub mod service;
pub mod session;
pub mod tasks;
pub mod types;

/// Prelude module that re-exports commonly used types and traits.
///
/// Import with `use taskrpc::prelude::*;` to pick up the surface most
/// programs need without individual imports.
pub mod prelude {
    pub use crate::error::{RpcError, RpcResult};
    pub use crate::resolver::Resolver;
    pub use crate::service::{TaskService, TaskServiceBuilder};
    pub use crate::session::{
        CallDisposition, IncomingHandler, InMemoryTransport, MessageSink, ResponseRouter, Session,
        SessionBuilder, SessionConfig, Transport,
    };
    pub use crate::tasks::{
        task_execution, InMemoryTaskMessageQueue, InMemoryTaskStore, QueuedMessage,
        QueuedMessageKind, TaskContext, TaskMessageQueue, TaskResultHandler, TaskStore,
    };
    pub use crate::types::{
        CancelTaskParams, CreateTaskResult, GetTaskParams, JsonRpcError, JsonRpcMessage,
        JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListTasksParams, ListTasksResult,
        RequestId, Task, TaskMetadata, TaskResultParams, TaskResultPayload, TaskStatus,
    };
}

// Re-export the core building blocks at the crate root for convenience.
pub use error::{RpcError, RpcResult};
pub use resolver::Resolver;
pub use service::{TaskService, TaskServiceBuilder};
