//! Session — request/response correlation over a [`Transport`].
//!
//! One [`Session`] owns one connection. Outgoing requests get a fresh
//! integer id and an in-flight [`Resolver`] entry; incoming responses are
//! matched back by id (including the decimal-string form of an integer id,
//! the only cross-representation match performed). Incoming requests are
//! dispatched to an [`IncomingHandler`] on their own tokio task, registered
//! so a `notifications/cancelled` can abort them. When the connection
//! closes, every still-pending request fails with a "Connection closed"
//! error — no entry is left dangling.
//!
//! Teardown is stop-before-close: [`Session::shutdown`] aborts running
//! handlers and closes the transport; the read loop, having observed
//! end-of-stream, settles the in-flight table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{RpcError, RpcResult};
use crate::resolver::Resolver;
use crate::types::{
    methods, CancelledNotificationParams, JsonRpcError, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, RequestId, TaskMetadata,
};

use super::transport::Transport;
use super::MessageSink;

/// How an incoming call wants to be executed, resolved once at entry.
///
/// A request whose params carry a `task` object is task-augmented: the
/// handler should acknowledge with a created task and defer the actual
/// result to polling. Everything else is an immediate call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallDisposition {
    /// Handle and respond within this request/response exchange.
    Immediate,
    /// Acknowledge with a task; the result is retrieved later.
    TaskAugmented(TaskMetadata),
}

impl CallDisposition {
    /// Inspect a request's params and classify the call.
    pub fn resolve(request: &JsonRpcRequest) -> Self {
        request
            .params
            .as_ref()
            .and_then(|params| params.get("task"))
            .and_then(|task| serde_json::from_value::<TaskMetadata>(task.clone()).ok())
            .map(CallDisposition::TaskAugmented)
            .unwrap_or(CallDisposition::Immediate)
    }

    /// Returns `true` for the task-augmented variant.
    pub fn is_task_augmented(&self) -> bool {
        matches!(self, CallDisposition::TaskAugmented(_))
    }
}

/// Trait for servicing calls and notifications arriving over the session.
///
/// The session resolves the [`CallDisposition`] once at entry and runs the
/// handler on its own tokio task; returning an error produces a JSON-RPC
/// error response with the [`RpcError`]'s code.
#[async_trait]
pub trait IncomingHandler: Send + Sync {
    /// Service one incoming request and produce its result value.
    async fn handle_request(
        &self,
        request: JsonRpcRequest,
        disposition: CallDisposition,
        sink: Arc<dyn MessageSink>,
    ) -> RpcResult<serde_json::Value>;

    /// Service one incoming notification. The default ignores it.
    async fn handle_notification(&self, notification: JsonRpcNotification) -> RpcResult<()> {
        let _ = notification;
        Ok(())
    }
}

/// Secondary consumer for response frames that match no in-flight entry.
///
/// This is the join point with the task subsystem: replies to nested
/// requests delivered through a blocking `tasks/result` call arrive over
/// the normal connection, keyed by ids this session never allocated. The
/// router reports whether it claimed the frame; unclaimed frames are
/// dropped with a warning.
pub trait ResponseRouter: Send + Sync {
    /// Claim a successful response. Returns `false` for unknown ids.
    fn route_response(&self, request_id: &RequestId, result: serde_json::Value) -> bool;

    /// Claim an error response. Returns `false` for unknown ids.
    fn route_error(&self, request_id: &RequestId, error: JsonRpcError) -> bool;
}

/// Configuration for a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Applied to `send_request` calls that pass no explicit timeout.
    /// `None` waits indefinitely. Defaults to 60 seconds.
    pub default_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_timeout: Some(Duration::from_secs(60)),
        }
    }
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    next_id: AtomicI64,
    in_flight: Mutex<HashMap<RequestId, Resolver<serde_json::Value>>>,
    running: Mutex<HashMap<RequestId, JoinHandle<()>>>,
    handler: Option<Arc<dyn IncomingHandler>>,
    response_router: Option<Arc<dyn ResponseRouter>>,
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    handler: Option<Arc<dyn IncomingHandler>>,
    response_router: Option<Arc<dyn ResponseRouter>>,
}

impl SessionBuilder {
    /// Start building a session over the given transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        SessionBuilder {
            transport,
            config: SessionConfig::default(),
            handler: None,
            response_router: None,
        }
    }

    /// Override the session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Install the handler for incoming requests and notifications.
    ///
    /// Without one, incoming requests are answered with a method-not-found
    /// error.
    pub fn handler(mut self, handler: Arc<dyn IncomingHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Install a secondary router for response frames this session did not
    /// originate (see [`ResponseRouter`]).
    pub fn response_router(mut self, router: Arc<dyn ResponseRouter>) -> Self {
        self.response_router = Some(router);
        self
    }

    /// Finish building the session.
    pub fn build(self) -> Session {
        Session {
            inner: Arc::new(SessionInner {
                transport: self.transport,
                config: self.config,
                next_id: AtomicI64::new(0),
                in_flight: Mutex::new(HashMap::new()),
                running: Mutex::new(HashMap::new()),
                handler: self.handler,
                response_router: self.response_router,
            }),
        }
    }
}

/// One peer's view of a connection: request correlation, timeouts,
/// cancellation, and handler dispatch.
///
/// Cheaply cloneable; clones share the connection. Drive the read loop with
/// [`run`](Self::run) (usually on its own tokio task) while other tasks call
/// [`send_request`](Self::send_request).
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Build a session with default configuration and no handler.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        SessionBuilder::new(transport).build()
    }

    /// Start building a session.
    pub fn builder(transport: Arc<dyn Transport>) -> SessionBuilder {
        SessionBuilder::new(transport)
    }

    /// Number of requests awaiting a response.
    pub fn in_flight_count(&self) -> usize {
        self.inner.lock_in_flight().len()
    }

    /// Send a request and wait for its terminal outcome.
    ///
    /// Exactly one outcome is delivered: the peer's result, the peer's
    /// error, a timeout, or a connection-closed failure. On timeout the
    /// in-flight entry is removed, so a late reply is dropped rather than
    /// delivered into a reused slot (ids are never reused). `timeout`
    /// overrides the configured default; the peer is not assumed to stop
    /// processing.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> RpcResult<serde_json::Value> {
        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let resolver: Resolver<serde_json::Value> = Resolver::new();
        self.inner
            .lock_in_flight()
            .insert(id.clone(), resolver.clone());

        let request = JsonRpcRequest::new(id.clone(), method, params);
        debug!(request_id = %id, method = %method, "Sending request");
        if let Err(err) = self.inner.transport.send(request.into()).await {
            self.inner.lock_in_flight().remove(&id);
            return Err(err);
        }

        match timeout.or(self.inner.config.default_timeout) {
            Some(deadline) => match tokio::time::timeout(deadline, resolver.wait()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.inner.lock_in_flight().remove(&id);
                    warn!(request_id = %id, method = %method, "Request timed out");
                    Err(RpcError::Timeout(format!(
                        "no response to '{}' within {:?}",
                        method, deadline
                    )))
                }
            },
            None => resolver.wait().await,
        }
    }

    /// Send a one-way notification.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> RpcResult<()> {
        self.inner
            .transport
            .send(JsonRpcNotification::new(method, params).into())
            .await
    }

    /// Ask the peer to abandon one of our in-flight requests.
    pub async fn send_cancellation(
        &self,
        request_id: RequestId,
        reason: Option<String>,
    ) -> RpcResult<()> {
        let params = CancelledNotificationParams { request_id, reason };
        self.send_notification(
            methods::NOTIFICATIONS_CANCELLED,
            Some(serde_json::to_value(&params)?),
        )
        .await
    }

    /// Read frames until the connection closes, then settle everything.
    ///
    /// On end-of-stream (local [`shutdown`](Self::shutdown) or the peer
    /// going away), every in-flight request fails with a "Connection
    /// closed" error and running handler tasks are aborted.
    pub async fn run(&self) -> RpcResult<()> {
        loop {
            match self.inner.transport.recv().await {
                Ok(Some(message)) => self.inner.handle_message(message).await,
                Ok(None) => break,
                Err(err) => {
                    debug!(error = %err, "Transport read failed; treating as disconnect");
                    break;
                }
            }
        }
        debug!("Connection closed; settling session state");
        self.inner.abort_running();
        self.inner.fail_in_flight();
        Ok(())
    }

    /// Stop this end of the connection.
    ///
    /// Running handler tasks are stopped first, then the transport is
    /// closed; the read loop observes the close and fails the in-flight
    /// table. Stopping producers before closing the channel keeps a
    /// suspended read from racing the teardown.
    pub async fn shutdown(&self) -> RpcResult<()> {
        self.inner.abort_running();
        self.inner.transport.close().await
    }
}

#[async_trait]
impl MessageSink for Session {
    async fn send_message(&self, message: JsonRpcMessage) -> RpcResult<()> {
        self.inner.transport.send(message).await
    }
}

#[async_trait]
impl MessageSink for SessionInner {
    async fn send_message(&self, message: JsonRpcMessage) -> RpcResult<()> {
        self.transport.send(message).await
    }
}

impl SessionInner {
    fn lock_in_flight(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<RequestId, Resolver<serde_json::Value>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, JoinHandle<()>>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn handle_message(self: &Arc<Self>, message: JsonRpcMessage) {
        match message {
            JsonRpcMessage::Response(response) => self.handle_response(response),
            JsonRpcMessage::Request(request) => self.dispatch_request(request).await,
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(notification).await;
            }
        }
    }

    fn handle_response(&self, response: JsonRpcResponse) {
        let JsonRpcResponse {
            id, result, error, ..
        } = response;

        // Exact id match first; then the decimal-string form of an integer
        // id (a peer echoing `0` back as `"0"`). No other string id ever
        // matches an integer-keyed entry.
        let resolver = {
            let mut in_flight = self.lock_in_flight();
            in_flight.remove(&id).or_else(|| {
                id.as_integer_form()
                    .and_then(|int_id| in_flight.remove(&int_id))
            })
        };

        if let Some(resolver) = resolver {
            let settled = match error {
                Some(err) => resolver.set_error(RpcError::from_json_rpc(err)),
                None => resolver.set_result(result.unwrap_or(serde_json::Value::Null)),
            };
            if settled.is_err() {
                warn!(request_id = %id, "Response arrived for already-settled request");
            }
            return;
        }

        // Not ours — offer it to the secondary router (nested-request
        // replies), else drop it.
        let routed = match &self.response_router {
            Some(router) => match error {
                Some(err) => router.route_error(&id, err),
                None => router.route_response(&id, result.unwrap_or(serde_json::Value::Null)),
            },
            None => false,
        };
        if !routed {
            warn!(request_id = %id, "Dropping response for unknown request id");
        }
    }

    async fn dispatch_request(self: &Arc<Self>, request: JsonRpcRequest) {
        let Some(handler) = self.handler.clone() else {
            let response = JsonRpcResponse::from_rpc_error(
                request.id.clone(),
                RpcError::method_not_found(request.method.clone()),
            );
            if let Err(err) = self.transport.send(response.into()).await {
                debug!(error = %err, "Failed to send method-not-found response");
            }
            return;
        };

        let disposition = CallDisposition::resolve(&request);
        let id = request.id.clone();
        debug!(
            request_id = %id,
            method = %request.method,
            task_augmented = disposition.is_task_augmented(),
            "Dispatching incoming request"
        );

        let inner = Arc::clone(self);
        let task_id = id.clone();
        // The handler body waits for registration, so its self-removal from
        // the running table always finds its own entry.
        let (registered_tx, registered_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = registered_rx.await;
            let sink: Arc<dyn MessageSink> = Arc::clone(&inner) as Arc<dyn MessageSink>;
            let outcome = handler.handle_request(request, disposition, sink).await;
            inner.lock_running().remove(&task_id);
            let response = match outcome {
                Ok(value) => JsonRpcResponse::success(task_id.clone(), value),
                Err(err) => JsonRpcResponse::from_rpc_error(task_id.clone(), err),
            };
            if let Err(err) = inner.transport.send(response.into()).await {
                debug!(request_id = %task_id, error = %err, "Failed to send response");
            }
        });
        self.lock_running().insert(id, handle);
        let _ = registered_tx.send(());
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        if notification.method == methods::NOTIFICATIONS_CANCELLED {
            self.handle_cancellation(notification.params).await;
            return;
        }
        if let Some(handler) = &self.handler {
            if let Err(err) = handler.handle_notification(notification).await {
                warn!(error = %err, "Notification handler failed");
            }
        }
    }

    /// Abort the named running handler and answer its caller with a
    /// cancellation error. Unknown ids are ignored.
    async fn handle_cancellation(&self, params: Option<serde_json::Value>) {
        let params = match params
            .map(serde_json::from_value::<CancelledNotificationParams>)
            .transpose()
        {
            Ok(Some(params)) => params,
            Ok(None) | Err(_) => {
                warn!("Malformed cancellation notification; ignoring");
                return;
            }
        };

        let handle = self.lock_running().remove(&params.request_id);
        match handle {
            Some(handle) => {
                handle.abort();
                debug!(request_id = %params.request_id, reason = ?params.reason, "Cancelled running request");
                let response = JsonRpcResponse::from_rpc_error(
                    params.request_id,
                    RpcError::request_cancelled("Request cancelled"),
                );
                if let Err(err) = self.transport.send(response.into()).await {
                    debug!(error = %err, "Failed to send cancellation response");
                }
            }
            None => {
                debug!(request_id = %params.request_id, "Cancellation for unknown request id ignored");
            }
        }
    }

    fn fail_in_flight(&self) {
        let entries: Vec<_> = self.lock_in_flight().drain().collect();
        for (id, resolver) in entries {
            debug!(request_id = %id, "Failing in-flight request on disconnect");
            let _ = resolver.set_error(RpcError::ConnectionClosed(
                "the connection closed before a response arrived".to_string(),
            ));
        }
    }

    fn abort_running(&self) {
        let handles: Vec<_> = self.lock_running().drain().collect();
        for (id, handle) in handles {
            debug!(request_id = %id, "Aborting running handler");
            handle.abort();
        }
    }
}
