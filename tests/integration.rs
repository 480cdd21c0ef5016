//! End-to-end tests: two sessions over an in-memory duplex, a TaskService
//! on the worker side, and a submitter that polls, fetches results, answers
//! nested elicitations, and cancels.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskrpc::prelude::*;
use taskrpc::types::{methods, ElicitParams};
use tokio::sync::mpsc;

/// Worker-side dispatch: a demo tool method on top of the tasks/* surface.
struct WorkerHandler {
    service: Arc<TaskService>,
}

#[async_trait]
impl IncomingHandler for WorkerHandler {
    async fn handle_request(
        &self,
        request: JsonRpcRequest,
        disposition: CallDisposition,
        sink: Arc<dyn MessageSink>,
    ) -> RpcResult<serde_json::Value> {
        if request.method == "demo/crunch" {
            let CallDisposition::TaskAugmented(metadata) = disposition else {
                return Err(RpcError::invalid_params("demo/crunch must be task-augmented"));
            };
            let input = request
                .params
                .as_ref()
                .and_then(|params| params.get("input"))
                .and_then(|value| value.as_str())
                .unwrap_or("default")
                .to_string();

            let ack = self
                .service
                .run_task(metadata, move |ctx| async move {
                    ctx.update_status("crunching").await?;
                    Ok(serde_json::json!({"text": format!("Processed: {input}")}))
                })
                .await?;
            return Ok(serde_json::to_value(ack)?);
        }
        self.service.handle_request(request, disposition, sink).await
    }
}

/// Submitter-side handler answering nested elicitation requests.
struct ElicitResponder {
    seen: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl IncomingHandler for ElicitResponder {
    async fn handle_request(
        &self,
        request: JsonRpcRequest,
        _disposition: CallDisposition,
        _sink: Arc<dyn MessageSink>,
    ) -> RpcResult<serde_json::Value> {
        if request.method == methods::ELICITATION_CREATE {
            let _ = self.seen.send(request.method);
            return Ok(serde_json::json!({
                "action": "accept",
                "content": {"confirm": true},
            }));
        }
        Err(RpcError::method_not_found(request.method))
    }
}

struct Peers {
    service: Arc<TaskService>,
    submitter: Session,
    runs: Vec<tokio::task::JoinHandle<RpcResult<()>>>,
    elicitations: mpsc::UnboundedReceiver<String>,
}

fn connect() -> Peers {
    let service = TaskService::in_memory();
    let (submitter_end, worker_end) = InMemoryTransport::pair();

    let worker = Session::builder(Arc::new(worker_end))
        .handler(Arc::new(WorkerHandler {
            service: Arc::clone(&service),
        }) as Arc<dyn IncomingHandler>)
        .response_router(service.result_handler())
        .build();

    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let submitter = Session::builder(Arc::new(submitter_end))
        .handler(Arc::new(ElicitResponder { seen: seen_tx }) as Arc<dyn IncomingHandler>)
        .build();

    let runs = [&worker, &submitter]
        .into_iter()
        .map(|session| {
            let session = session.clone();
            tokio::spawn(async move { session.run().await })
        })
        .collect();

    Peers {
        service,
        submitter,
        runs,
        elicitations: seen_rx,
    }
}

async fn get_task_over_wire(session: &Session, task_id: &str) -> Task {
    let value = session
        .send_request(
            methods::TASKS_GET,
            Some(serde_json::json!({"taskId": task_id})),
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap();
    serde_json::from_value(value).unwrap()
}

async fn poll_until_status(session: &Session, task_id: &str, want: TaskStatus) -> Task {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let task = get_task_over_wire(session, task_id).await;
            if task.status == want {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("task should reach the expected status")
}

// ---- Task-augmented call, poll, fetch ----

#[tokio::test]
async fn test_task_augmented_call_ack_poll_and_result() -> anyhow::Result<()> {
    let mut peers = connect();

    let ack_value = peers
        .submitter
        .send_request(
            "demo/crunch",
            Some(serde_json::json!({"input": "hello", "task": {"ttl": 60000}})),
            Some(Duration::from_secs(2)),
        )
        .await?;
    let ack: CreateTaskResult = serde_json::from_value(ack_value)?;
    assert_eq!(ack.task.status, TaskStatus::Working);
    assert_eq!(ack.task.ttl, Some(60_000));

    let task_id = ack.task.task_id.clone();
    poll_until_status(&peers.submitter, &task_id, TaskStatus::Completed).await;

    let payload = peers
        .submitter
        .send_request(
            methods::TASKS_RESULT,
            Some(serde_json::json!({"taskId": task_id})),
            Some(Duration::from_secs(2)),
        )
        .await?;
    assert_eq!(payload["text"], "Processed: hello");
    assert_eq!(
        payload["_meta"]["io.taskrpc/related-task"]["taskId"],
        serde_json::Value::String(task_id)
    );

    for run in peers.runs.drain(..) {
        run.abort();
    }
    Ok(())
}

#[tokio::test]
async fn test_get_unknown_task_fails_over_wire() {
    let mut peers = connect();

    let err = peers
        .submitter
        .send_request(
            methods::TASKS_GET,
            Some(serde_json::json!({"taskId": "ghost"})),
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::TaskNotFound { .. }));

    for run in peers.runs.drain(..) {
        run.abort();
    }
}

// ---- Nested elicitation round trip ----

#[tokio::test]
async fn test_nested_elicitation_round_trip() {
    let mut peers = connect();

    let ack = peers
        .service
        .run_task(TaskMetadata { ttl: Some(60_000) }, |ctx| async move {
            let answer = ctx
                .elicit(ElicitParams {
                    message: "Proceed with the crunch?".to_string(),
                    requested_schema: None,
                })
                .await?;
            Ok(serde_json::json!({
                "text": format!("submitter said {}", answer.action),
            }))
        })
        .await
        .unwrap();
    let task_id = ack.task.task_id;

    // One blocking call: it relays the nested question, the responder
    // answers it over the connection, the work resumes, and the terminal
    // payload comes back.
    let payload = peers
        .submitter
        .send_request(
            methods::TASKS_RESULT,
            Some(serde_json::json!({"taskId": task_id})),
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert_eq!(payload["text"], "submitter said accept");

    let seen = tokio::time::timeout(Duration::from_secs(1), peers.elicitations.recv())
        .await
        .expect("submitter should have been asked")
        .unwrap();
    assert_eq!(seen, methods::ELICITATION_CREATE);

    for run in peers.runs.drain(..) {
        run.abort();
    }
}

// ---- Cancellation ----

#[tokio::test]
async fn test_cancel_working_task() {
    let mut peers = connect();

    let ack = peers
        .service
        .run_task(TaskMetadata { ttl: None }, |ctx| async move {
            // Cooperative work: wind down once cancellation is flagged.
            loop {
                if ctx.is_cancelled() {
                    return Err(RpcError::internal_error("stopping on request"));
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    let task_id = ack.task.task_id;

    let cancelled_value = peers
        .submitter
        .send_request(
            methods::TASKS_CANCEL,
            Some(serde_json::json!({"taskId": task_id, "reason": "changed my mind"})),
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap();
    let cancelled: Task = serde_json::from_value(cancelled_value).unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(cancelled.status_message.as_deref(), Some("changed my mind"));

    // Terminal status is sticky even after the work observes the flag.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let task = get_task_over_wire(&peers.submitter, &task_id).await;
    assert_eq!(task.status, TaskStatus::Cancelled);

    // A second cancel is rejected.
    let err = peers
        .submitter
        .send_request(
            methods::TASKS_CANCEL,
            Some(serde_json::json!({"taskId": task_id})),
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::TaskNotCancelable { .. }));
    assert!(err.to_string().contains("terminal state 'cancelled'"));

    for run in peers.runs.drain(..) {
        run.abort();
    }
}

// ---- Failure propagation ----

#[tokio::test]
async fn test_work_failure_propagates_to_status() {
    let mut peers = connect();

    let ack = peers
        .service
        .run_task(TaskMetadata { ttl: None }, |_ctx| async move {
            Err(RpcError::internal_error("Oops!"))
        })
        .await
        .unwrap();
    let task_id = ack.task.task_id;

    let task = poll_until_status(&peers.submitter, &task_id, TaskStatus::Failed).await;
    assert!(task.status_message.unwrap().contains("Oops!"));

    for run in peers.runs.drain(..) {
        run.abort();
    }
}

// ---- Listing ----

#[tokio::test]
async fn test_list_tasks_over_wire() -> anyhow::Result<()> {
    let mut peers = connect();

    for _ in 0..2 {
        peers
            .service
            .run_task(TaskMetadata { ttl: None }, |_ctx| async move {
                Ok(serde_json::json!({}))
            })
            .await?;
    }

    let listed = peers
        .submitter
        .send_request(methods::TASKS_LIST, None, Some(Duration::from_secs(2)))
        .await?;
    let listed: ListTasksResult = serde_json::from_value(listed)?;
    assert_eq!(listed.tasks.len(), 2);

    for run in peers.runs.drain(..) {
        run.abort();
    }
    Ok(())
}
