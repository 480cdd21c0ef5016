//! Protocol types — JSON-RPC 2.0 envelope plus the task model.
//!
//! Wire names are camelCase (`taskId`, `statusMessage`, `createdAt`,
//! `lastUpdatedAt`, `pollInterval`, `originalRequestId`); timestamps are
//! RFC 3339 UTC. The JSON-RPC id is untagged so both `0` and `"abc"` parse;
//! logical id comparison (including the decimal-string form of an integer
//! id) is the session router's job, not serde's.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol method names.
pub mod methods {
    /// Non-blocking task status snapshot.
    pub const TASKS_GET: &str = "tasks/get";
    /// Blocking result retrieval; also the carrier for nested requests.
    pub const TASKS_RESULT: &str = "tasks/result";
    /// Request cancellation of a task.
    pub const TASKS_CANCEL: &str = "tasks/cancel";
    /// Enumerate known tasks.
    pub const TASKS_LIST: &str = "tasks/list";
    /// Notification that an in-flight request should be abandoned.
    pub const NOTIFICATIONS_CANCELLED: &str = "notifications/cancelled";
    /// Nested request asking the submitter for structured input.
    pub const ELICITATION_CREATE: &str = "elicitation/create";
    /// Nested request asking the submitter for a model completion.
    pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";
}

/// `_meta` key tagging a result with the task it belongs to.
pub const RELATED_TASK_META_KEY: &str = "io.taskrpc/related-task";

// ============================================================================
// JSON-RPC Foundation
// ============================================================================

/// A JSON-RPC 2.0 request ID: string or number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String identifier.
    String(String),
    /// Numeric identifier.
    Number(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{}", s),
            RequestId::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl RequestId {
    /// If this id is the decimal-string form of an integer (optional leading
    /// `-`, ASCII digits only), return the integer-keyed equivalent.
    ///
    /// This is the only cross-representation match the session performs:
    /// a peer replying `"0"` to a request sent as `0` resolves it, while
    /// `"abc"` or `"1e3"` never match an integer key.
    pub fn as_integer_form(&self) -> Option<RequestId> {
        let RequestId::String(s) = self else {
            return None;
        };
        let digits = s.strip_prefix('-').unwrap_or(s);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        s.parse::<i64>().ok().map(RequestId::Number)
    }
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version — always "2.0".
    pub jsonrpc: String,

    /// Request identifier.
    pub id: RequestId,

    /// Method name.
    pub method: String,

    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new request.
    pub fn new(
        id: impl Into<RequestId>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (no id, no reply expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version — always "2.0".
    pub jsonrpc: String,

    /// Method name.
    pub method: String,

    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Create a new notification.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response.
///
/// Exactly one of `result` or `error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version — always "2.0".
    pub jsonrpc: String,

    /// Request identifier this response corresponds to.
    pub id: RequestId,

    /// Successful result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Error result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a successful response.
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: RequestId, error: JsonRpcError) -> Self {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Create an error response from an [`RpcError`](crate::error::RpcError),
    /// mapping code, message, and data via `From<RpcError> for JsonRpcError`.
    pub fn from_rpc_error(id: RequestId, err: crate::error::RpcError) -> Self {
        let rpc_err: JsonRpcError = err.into();
        Self::error(id, rpc_err)
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,

    /// Human-readable error message.
    pub message: String,

    /// Optional structured error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Any JSON-RPC frame: request, notification, or response.
///
/// Untagged; variant order matters for parsing. A request carries both `id`
/// and `method`, a notification only `method`, a response `id` without
/// `method` — so trying request, then notification, then response is
/// unambiguous.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// A request expecting a correlated response.
    Request(JsonRpcRequest),
    /// A one-way notification.
    Notification(JsonRpcNotification),
    /// A response (success or error) to an earlier request.
    Response(JsonRpcResponse),
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(r: JsonRpcRequest) -> Self {
        JsonRpcMessage::Request(r)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(n: JsonRpcNotification) -> Self {
        JsonRpcMessage::Notification(n)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(r: JsonRpcResponse) -> Self {
        JsonRpcMessage::Response(r)
    }
}

// ============================================================================
// Task model
// ============================================================================

/// The lifecycle status of a task.
///
/// `completed`, `failed`, and `cancelled` are terminal: once reached, the
/// status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// The task is actively being processed.
    Working,
    /// The task is waiting on input from the submitter (a nested request
    /// is pending).
    InputRequired,
    /// The task finished successfully; its result is retrievable.
    Completed,
    /// The task failed; `statusMessage` carries the reason.
    Failed,
    /// The task was cancelled.
    Cancelled,
}

impl TaskStatus {
    /// Returns `true` for `completed`, `failed`, and `cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Working => "working",
            TaskStatus::InputRequired => "input_required",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Caller-supplied metadata for a task-augmented call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    /// Requested lifetime hint in milliseconds. `None` means no expiry; it
    /// is stored as-is, never defaulted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

/// A unit of work tracked across more than one request/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Opaque unique identifier.
    pub task_id: String,

    /// Current lifecycle status.
    pub status: TaskStatus,

    /// Optional human-readable progress string, overwritten on each update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Refreshed on every mutation.
    pub last_updated_at: DateTime<Utc>,

    /// Advisory lifetime hint in milliseconds; `None` means no expiry.
    pub ttl: Option<u64>,

    /// Suggested poll cadence for the submitter, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,
}

impl Task {
    /// Build a fresh task in `working` status.
    ///
    /// Generates a uuid-v4 id when `task_id` is not supplied.
    pub fn new(metadata: &TaskMetadata, task_id: Option<String>) -> Self {
        let now = Utc::now();
        Task {
            task_id: task_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            status: TaskStatus::Working,
            status_message: None,
            created_at: now,
            last_updated_at: now,
            ttl: metadata.ttl,
            poll_interval: None,
        }
    }
}

// ============================================================================
// Request / Response Parameter Types
// ============================================================================

/// Parameters for `tasks/get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTaskParams {
    /// The task to snapshot.
    pub task_id: String,
}

/// Parameters for `tasks/result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResultParams {
    /// The task whose result to retrieve.
    pub task_id: String,
}

/// Parameters for `tasks/cancel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelTaskParams {
    /// The task to cancel.
    pub task_id: String,

    /// Optional reason, recorded as the task's status message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Parameters for `tasks/list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksParams {
    /// Opaque pagination cursor from a previous page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Acknowledgment returned by a task-augmented call: the work was accepted
/// and the actual result is deferred to polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskResult {
    /// Snapshot of the freshly created task.
    pub task: Task,
}

/// Result of `tasks/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksResult {
    /// Tasks in creation order.
    pub tasks: Vec<Task>,

    /// Cursor for the next page, if more tasks exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of `tasks/result`: the stored terminal payload, flattened, plus a
/// `_meta` entry correlating it back to its task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultPayload {
    /// The stored payload's fields.
    #[serde(flatten)]
    pub result: serde_json::Map<String, serde_json::Value>,

    /// Metadata; always contains [`RELATED_TASK_META_KEY`].
    #[serde(rename = "_meta")]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl TaskResultPayload {
    /// Wrap a stored result (or nothing) for the given task.
    ///
    /// Non-object payloads are carried under a `"value"` key so the flatten
    /// stays a JSON object.
    pub fn new(result: Option<serde_json::Value>, task_id: &str) -> Self {
        let result = match result {
            Some(serde_json::Value::Object(map)) => map,
            Some(other) => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
            None => serde_json::Map::new(),
        };
        let mut meta = serde_json::Map::new();
        meta.insert(
            RELATED_TASK_META_KEY.to_string(),
            serde_json::json!({ "taskId": task_id }),
        );
        TaskResultPayload { result, meta }
    }

    /// The task id recorded under the related-task meta key, if present.
    pub fn related_task_id(&self) -> Option<&str> {
        self.meta
            .get(RELATED_TASK_META_KEY)
            .and_then(|v| v.get("taskId"))
            .and_then(|v| v.as_str())
    }
}

/// Parameters of a `notifications/cancelled` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledNotificationParams {
    /// The in-flight request to abandon.
    pub request_id: RequestId,

    /// Optional reason for the cancellation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ============================================================================
// Nested request types (elicitation / sampling)
// ============================================================================

/// Parameters of an `elicitation/create` nested request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElicitParams {
    /// The question or instruction shown to the submitter.
    pub message: String,

    /// Optional JSON schema describing the expected `content` shape.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_schema: Option<serde_json::Value>,
}

/// The submitter's reply to an elicitation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElicitResult {
    /// One of `accept`, `decline`, or `cancel`.
    pub action: String,

    /// Supplied content when the action is `accept`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
}

/// Parameters of a `sampling/createMessage` nested request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageParams {
    /// Conversation messages for the completion.
    pub messages: Vec<serde_json::Value>,

    /// Optional system prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Optional completion length cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

/// The submitter's reply to a sampling request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageResult {
    /// Role of the produced message (typically `assistant`).
    pub role: String,

    /// Produced content.
    pub content: serde_json::Value,

    /// Model that produced it, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}
