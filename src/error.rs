//! Error types — JSON-RPC error codes + task-protocol errors.
//!
//! Two families live here:
//! - Protocol errors that cross the wire as JSON-RPC error objects
//!   (standard -32700..-32603 codes plus the task-specific codes).
//! - Local outcomes of a pending request that never came from the peer:
//!   timeout, connection closed, and the double-settlement invariant
//!   violation.

use crate::types::JsonRpcError;

// ---------------------------------------------------------------------------
// Standard JSON-RPC 2.0 error codes
// ---------------------------------------------------------------------------

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;

/// The JSON sent is not a valid Request object.
pub const INVALID_REQUEST: i64 = -32600;

/// The method does not exist / is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Invalid method parameter(s).
pub const INVALID_PARAMS: i64 = -32602;

/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;

// ---------------------------------------------------------------------------
// Task-protocol error codes
// ---------------------------------------------------------------------------

/// The referenced task does not exist (or is no longer retained).
pub const TASK_NOT_FOUND: i64 = -32001;

/// The task is in a terminal state and cannot be cancelled.
pub const TASK_NOT_CANCELABLE: i64 = -32002;

/// The request was cancelled by a `notifications/cancelled` notification
/// while its handler was still running.
pub const REQUEST_CANCELLED: i64 = -32800;

// ---------------------------------------------------------------------------
// RpcError enum
// ---------------------------------------------------------------------------

/// Unified error type for session and task operations.
///
/// Protocol variants carry a human-readable message and an optional
/// structured `data` payload, and map to a JSON-RPC error code via
/// [`code`](Self::code). Local variants (`Timeout`, `ConnectionClosed`,
/// `AlreadySettled`) describe outcomes the peer never sent and map to
/// `INTERNAL_ERROR` if they ever have to be serialized.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// Invalid JSON payload (code -32700).
    #[error("Parse error: {message}")]
    ParseError {
        /// Human-readable error message.
        message: String,
        /// Optional structured error data.
        data: Option<serde_json::Value>,
    },

    /// Request payload validation error (code -32600).
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Human-readable error message.
        message: String,
        /// Optional structured error data.
        data: Option<serde_json::Value>,
    },

    /// Method not found (code -32601).
    #[error("Method not found: {message}")]
    MethodNotFound {
        /// Human-readable error message.
        message: String,
        /// Optional structured error data.
        data: Option<serde_json::Value>,
    },

    /// Invalid parameters (code -32602).
    #[error("Invalid params: {message}")]
    InvalidParams {
        /// Human-readable error message.
        message: String,
        /// Optional structured error data.
        data: Option<serde_json::Value>,
    },

    /// Internal error (code -32603).
    #[error("Internal error: {message}")]
    InternalError {
        /// Human-readable error message.
        message: String,
        /// Optional structured error data.
        data: Option<serde_json::Value>,
    },

    /// Task not found (code -32001).
    #[error("Task not found: {message}")]
    TaskNotFound {
        /// Human-readable error message.
        message: String,
        /// Optional structured error data.
        data: Option<serde_json::Value>,
    },

    /// Task cannot be cancelled in its current state (code -32002).
    #[error("Task not cancelable: {message}")]
    TaskNotCancelable {
        /// Human-readable error message.
        message: String,
        /// Optional structured error data.
        data: Option<serde_json::Value>,
    },

    /// The in-flight request was cancelled by the peer (code -32800).
    #[error("Request cancelled: {message}")]
    RequestCancelled {
        /// Human-readable error message.
        message: String,
        /// Optional structured error data.
        data: Option<serde_json::Value>,
    },

    // -- Local outcomes (never received from the peer) --
    /// No response arrived within the request deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The connection closed while the request was still pending.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// A resolver or in-flight entry was settled a second time. This is a
    /// programming invariant violation, surfaced as an error rather than
    /// silently overwriting the first outcome.
    #[error("Already settled: {0}")]
    AlreadySettled(String),

    /// A JSON-RPC error from the peer that maps to no dedicated variant.
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
        /// Optional structured error data.
        data: Option<serde_json::Value>,
    },
}

/// Convenience result type for session and task operations.
pub type RpcResult<T> = Result<T, RpcError>;

impl RpcError {
    // -- Convenience constructors (message-only, no data) --

    /// Create a `ParseError` with a message and no data.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            data: None,
        }
    }

    /// Create an `InvalidRequest` with a message and no data.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            data: None,
        }
    }

    /// Create a `MethodNotFound` with a message and no data.
    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::MethodNotFound {
            message: message.into(),
            data: None,
        }
    }

    /// Create an `InvalidParams` with a message and no data.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
            data: None,
        }
    }

    /// Create an `InternalError` with a message and no data.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
            data: None,
        }
    }

    /// Create a `TaskNotFound` with a message and no data.
    pub fn task_not_found(message: impl Into<String>) -> Self {
        Self::TaskNotFound {
            message: message.into(),
            data: None,
        }
    }

    /// Create a `TaskNotCancelable` with a message and no data.
    pub fn task_not_cancelable(message: impl Into<String>) -> Self {
        Self::TaskNotCancelable {
            message: message.into(),
            data: None,
        }
    }

    /// Create a `RequestCancelled` with a message and no data.
    pub fn request_cancelled(message: impl Into<String>) -> Self {
        Self::RequestCancelled {
            message: message.into(),
            data: None,
        }
    }

    /// Returns the JSON-RPC error code for this error variant.
    ///
    /// Local outcomes that never cross the wire map to -32603.
    pub fn code(&self) -> i64 {
        match self {
            RpcError::ParseError { .. } => PARSE_ERROR,
            RpcError::InvalidRequest { .. } => INVALID_REQUEST,
            RpcError::MethodNotFound { .. } => METHOD_NOT_FOUND,
            RpcError::InvalidParams { .. } => INVALID_PARAMS,
            RpcError::InternalError { .. } => INTERNAL_ERROR,
            RpcError::TaskNotFound { .. } => TASK_NOT_FOUND,
            RpcError::TaskNotCancelable { .. } => TASK_NOT_CANCELABLE,
            RpcError::RequestCancelled { .. } => REQUEST_CANCELLED,
            RpcError::Timeout(_)
            | RpcError::ConnectionClosed(_)
            | RpcError::AlreadySettled(_) => INTERNAL_ERROR,
            RpcError::JsonRpc { code, .. } => *code,
        }
    }

    /// Reconstruct an `RpcError` from a JSON-RPC error object received from
    /// the peer, mapping known codes back to their dedicated variants.
    pub fn from_json_rpc(err: JsonRpcError) -> Self {
        let JsonRpcError {
            code,
            message,
            data,
        } = err;
        match code {
            PARSE_ERROR => RpcError::ParseError { message, data },
            INVALID_REQUEST => RpcError::InvalidRequest { message, data },
            METHOD_NOT_FOUND => RpcError::MethodNotFound { message, data },
            INVALID_PARAMS => RpcError::InvalidParams { message, data },
            INTERNAL_ERROR => RpcError::InternalError { message, data },
            TASK_NOT_FOUND => RpcError::TaskNotFound { message, data },
            TASK_NOT_CANCELABLE => RpcError::TaskNotCancelable { message, data },
            REQUEST_CANCELLED => RpcError::RequestCancelled { message, data },
            other => RpcError::JsonRpc {
                code: other,
                message,
                data,
            },
        }
    }
}

impl From<RpcError> for JsonRpcError {
    fn from(err: RpcError) -> Self {
        let code = err.code();
        let message = err.to_string();
        let data = match &err {
            RpcError::ParseError { data, .. }
            | RpcError::InvalidRequest { data, .. }
            | RpcError::MethodNotFound { data, .. }
            | RpcError::InvalidParams { data, .. }
            | RpcError::InternalError { data, .. }
            | RpcError::TaskNotFound { data, .. }
            | RpcError::TaskNotCancelable { data, .. }
            | RpcError::RequestCancelled { data, .. }
            | RpcError::JsonRpc { data, .. } => data.clone(),
            _ => None,
        };
        JsonRpcError {
            code,
            message,
            data,
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::ParseError {
            message: err.to_string(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_protocol() {
        assert_eq!(PARSE_ERROR, -32700);
        assert_eq!(INVALID_REQUEST, -32600);
        assert_eq!(METHOD_NOT_FOUND, -32601);
        assert_eq!(INVALID_PARAMS, -32602);
        assert_eq!(INTERNAL_ERROR, -32603);
        assert_eq!(TASK_NOT_FOUND, -32001);
        assert_eq!(TASK_NOT_CANCELABLE, -32002);
        assert_eq!(REQUEST_CANCELLED, -32800);
    }

    #[test]
    fn rpc_error_to_json_rpc_error() {
        let err = RpcError::task_not_found("task-123");
        let rpc_err: JsonRpcError = err.into();
        assert_eq!(rpc_err.code, TASK_NOT_FOUND);
        assert!(rpc_err.message.contains("task-123"));
        assert!(rpc_err.data.is_none());
    }

    #[test]
    fn local_outcomes_map_to_internal() {
        assert_eq!(RpcError::Timeout("no reply".into()).code(), INTERNAL_ERROR);
        assert_eq!(
            RpcError::ConnectionClosed("peer went away".into()).code(),
            INTERNAL_ERROR
        );
        assert_eq!(
            RpcError::AlreadySettled("resolver".into()).code(),
            INTERNAL_ERROR
        );
    }

    #[test]
    fn from_json_rpc_round_trips_known_codes() {
        let wire = JsonRpcError {
            code: REQUEST_CANCELLED,
            message: "Request cancelled".into(),
            data: None,
        };
        match RpcError::from_json_rpc(wire) {
            RpcError::RequestCancelled { message, .. } => {
                assert_eq!(message, "Request cancelled");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn from_json_rpc_keeps_unknown_codes() {
        let wire = JsonRpcError {
            code: -32099,
            message: "application error".into(),
            data: Some(serde_json::json!({"detail": "boom"})),
        };
        match RpcError::from_json_rpc(wire) {
            RpcError::JsonRpc { code, data, .. } => {
                assert_eq!(code, -32099);
                assert!(data.is_some());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn error_data_propagates_to_json_rpc() {
        let validation = serde_json::json!([{"field": "taskId", "msg": "required"}]);
        let err = RpcError::InvalidParams {
            message: "Invalid parameters".into(),
            data: Some(validation.clone()),
        };
        let rpc_err: JsonRpcError = err.into();
        assert_eq!(rpc_err.code, INVALID_PARAMS);
        assert_eq!(rpc_err.data, Some(validation));
    }
}
