//! Task subsystem — long-running work tracked across request/response
//! exchanges.
//!
//! - [`TaskStore`] trait + [`InMemoryTaskStore`] — task state and stored
//!   results, with per-task update signals
//! - [`TaskMessageQueue`] trait + [`InMemoryTaskMessageQueue`] — per-task
//!   FIFO of nested messages travelling back to the submitter
//! - [`TaskContext`] + [`task_execution`] — the facade background work uses
//!   to report progress, complete, fail, and issue nested requests
//! - [`TaskResultHandler`] — the blocking `tasks/result` orchestration and
//!   the routing of nested-request replies

pub mod context;
pub mod queue;
pub mod result_handler;
pub mod store;

pub use context::{run_scoped, task_execution, TaskContext};
pub use queue::{InMemoryTaskMessageQueue, QueuedMessage, QueuedMessageKind, TaskMessageQueue};
pub use result_handler::TaskResultHandler;
pub use store::{InMemoryTaskStore, TaskStore, DEFAULT_PAGE_SIZE};
