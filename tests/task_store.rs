//! Tests for InMemoryTaskStore — task lifecycle, terminal stickiness,
//! result storage, update signaling, and listing.

use std::collections::HashSet;
use std::sync::Arc;

use taskrpc::prelude::*;
use taskrpc::types::TaskMetadata;

fn metadata_with_ttl(ttl: Option<u64>) -> TaskMetadata {
    TaskMetadata { ttl }
}

// ---- Creation ----

#[tokio::test]
async fn test_create_task_defaults() {
    let store = InMemoryTaskStore::new();
    let task = store
        .create_task(&metadata_with_ttl(Some(60_000)), None)
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Working);
    assert!(task.status_message.is_none());
    assert_eq!(task.ttl, Some(60_000));
    assert!(!task.task_id.is_empty());
    assert_eq!(task.created_at, task.last_updated_at);
}

#[tokio::test]
async fn test_create_task_with_explicit_id() {
    let store = InMemoryTaskStore::new();
    let task = store
        .create_task(&metadata_with_ttl(None), Some("my-task".to_string()))
        .await
        .unwrap();
    assert_eq!(task.task_id, "my-task");

    let fetched = store.get_task("my-task").await.unwrap().unwrap();
    assert_eq!(fetched, task);
}

#[tokio::test]
async fn test_create_task_duplicate_id_rejected() {
    let store = InMemoryTaskStore::new();
    store
        .create_task(&metadata_with_ttl(None), Some("dup".to_string()))
        .await
        .unwrap();

    let err = store
        .create_task(&metadata_with_ttl(None), Some("dup".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::InvalidParams { .. }));
    assert!(err.to_string().contains("already exists"));
}

#[tokio::test]
async fn test_generated_ids_are_unique() {
    let store = InMemoryTaskStore::new();
    let mut seen = HashSet::new();
    for _ in 0..50 {
        let task = store
            .create_task(&metadata_with_ttl(None), None)
            .await
            .unwrap();
        assert!(seen.insert(task.task_id));
    }
}

#[tokio::test]
async fn test_null_ttl_is_stored_as_null() {
    let store = InMemoryTaskStore::new();
    let task = store
        .create_task(&metadata_with_ttl(None), None)
        .await
        .unwrap();
    assert_eq!(task.ttl, None);
}

#[tokio::test]
async fn test_poll_interval_hint_copied_onto_created_tasks() {
    let store = InMemoryTaskStore::new().with_poll_interval(500);
    let task = store
        .create_task(&metadata_with_ttl(None), None)
        .await
        .unwrap();
    assert_eq!(task.poll_interval, Some(500));
}

#[tokio::test]
async fn test_get_unknown_task_returns_none() {
    let store = InMemoryTaskStore::new();
    assert!(store.get_task("nope").await.unwrap().is_none());
}

// ---- Updates and terminal stickiness ----

#[tokio::test]
async fn test_update_status_and_message() {
    let store = InMemoryTaskStore::new();
    let task = store
        .create_task(&metadata_with_ttl(None), Some("t1".to_string()))
        .await
        .unwrap();

    let updated = store
        .update_task(
            "t1",
            Some(TaskStatus::InputRequired),
            Some("Waiting on you".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(updated.status, TaskStatus::InputRequired);
    assert_eq!(updated.status_message.as_deref(), Some("Waiting on you"));
    assert!(updated.last_updated_at >= task.created_at);
}

#[tokio::test]
async fn test_message_only_update_keeps_status() {
    let store = InMemoryTaskStore::new();
    store
        .create_task(&metadata_with_ttl(None), Some("t1".to_string()))
        .await
        .unwrap();

    let updated = store
        .update_task("t1", None, Some("still going".to_string()))
        .await
        .unwrap();
    assert_eq!(updated.status, TaskStatus::Working);
    assert_eq!(updated.status_message.as_deref(), Some("still going"));
}

#[tokio::test]
async fn test_terminal_transition_rejected() {
    let store = InMemoryTaskStore::new();
    store
        .create_task(&metadata_with_ttl(None), Some("t1".to_string()))
        .await
        .unwrap();
    store
        .update_task("t1", Some(TaskStatus::Completed), None)
        .await
        .unwrap();

    let err = store
        .update_task("t1", Some(TaskStatus::Working), None)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::InvalidParams { .. }));
    assert!(err.to_string().contains("terminal"));

    // The task is untouched.
    let task = store.get_task("t1").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_terminal_same_status_reassert_allowed() {
    let store = InMemoryTaskStore::new();
    store
        .create_task(&metadata_with_ttl(None), Some("t1".to_string()))
        .await
        .unwrap();
    store
        .update_task("t1", Some(TaskStatus::Failed), Some("boom".to_string()))
        .await
        .unwrap();

    // Re-asserting the same terminal status (e.g. refreshing the message)
    // is not a transition.
    let updated = store
        .update_task("t1", Some(TaskStatus::Failed), Some("boom, again".to_string()))
        .await
        .unwrap();
    assert_eq!(updated.status, TaskStatus::Failed);
    assert_eq!(updated.status_message.as_deref(), Some("boom, again"));
}

#[tokio::test]
async fn test_update_unknown_task_fails() {
    let store = InMemoryTaskStore::new();
    let err = store
        .update_task("ghost", Some(TaskStatus::Completed), None)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::TaskNotFound { .. }));
}

// ---- Result storage ----

#[tokio::test]
async fn test_store_and_get_result() {
    let store = InMemoryTaskStore::new();
    store
        .create_task(&metadata_with_ttl(None), Some("t1".to_string()))
        .await
        .unwrap();

    assert!(store.get_result("t1").await.unwrap().is_none());

    let payload = serde_json::json!({"text": "done"});
    store.store_result("t1", payload.clone()).await.unwrap();
    assert_eq!(store.get_result("t1").await.unwrap(), Some(payload));
}

#[tokio::test]
async fn test_store_result_unknown_task_fails() {
    let store = InMemoryTaskStore::new();
    let err = store
        .store_result("ghost", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::TaskNotFound { .. }));
}

// ---- Update signaling ----

#[tokio::test]
async fn test_wait_for_update_wakes_on_update() {
    let store = Arc::new(InMemoryTaskStore::new());
    store
        .create_task(&metadata_with_ttl(None), Some("t1".to_string()))
        .await
        .unwrap();

    let waiter = Arc::clone(&store);
    let handle = tokio::spawn(async move { waiter.wait_for_update("t1").await });
    tokio::task::yield_now().await;

    store
        .update_task("t1", None, Some("progress".to_string()))
        .await
        .unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("waiter should wake")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_wait_for_update_unknown_task_fails() {
    let store = InMemoryTaskStore::new();
    let err = store.wait_for_update("ghost").await.unwrap_err();
    assert!(matches!(err, RpcError::TaskNotFound { .. }));
}

#[tokio::test]
async fn test_concurrent_waiters_all_wake() {
    let store = Arc::new(InMemoryTaskStore::new());
    store
        .create_task(&metadata_with_ttl(None), Some("t1".to_string()))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..3 {
        let waiter = Arc::clone(&store);
        handles.push(tokio::spawn(
            async move { waiter.wait_for_update("t1").await },
        ));
    }
    tokio::task::yield_now().await;

    store
        .update_task("t1", Some(TaskStatus::Completed), None)
        .await
        .unwrap();

    for handle in handles {
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("all waiters should wake")
            .unwrap()
            .unwrap();
    }
}

// ---- Listing ----

#[tokio::test]
async fn test_list_tasks_pages_in_creation_order() {
    let store = InMemoryTaskStore::new().with_page_size(2);
    for i in 0..5 {
        store
            .create_task(&metadata_with_ttl(None), Some(format!("t{i}")))
            .await
            .unwrap();
    }

    let (page, cursor) = store.list_tasks(None).await.unwrap();
    assert_eq!(
        page.iter().map(|t| t.task_id.as_str()).collect::<Vec<_>>(),
        ["t0", "t1"]
    );
    let cursor = cursor.expect("more pages");

    let (page, cursor) = store.list_tasks(Some(&cursor)).await.unwrap();
    assert_eq!(
        page.iter().map(|t| t.task_id.as_str()).collect::<Vec<_>>(),
        ["t2", "t3"]
    );
    let cursor = cursor.expect("more pages");

    let (page, cursor) = store.list_tasks(Some(&cursor)).await.unwrap();
    assert_eq!(
        page.iter().map(|t| t.task_id.as_str()).collect::<Vec<_>>(),
        ["t4"]
    );
    assert!(cursor.is_none());
}

#[tokio::test]
async fn test_list_tasks_invalid_cursor() {
    let store = InMemoryTaskStore::new();
    let err = store.list_tasks(Some("bogus")).await.unwrap_err();
    assert!(matches!(err, RpcError::InvalidParams { .. }));
    assert!(err.to_string().contains("Invalid cursor"));
}

// ---- Deletion and cleanup ----

#[tokio::test]
async fn test_delete_task() {
    let store = InMemoryTaskStore::new();
    store
        .create_task(&metadata_with_ttl(None), Some("t1".to_string()))
        .await
        .unwrap();

    assert!(store.delete_task("t1").await.unwrap());
    assert!(store.get_task("t1").await.unwrap().is_none());
    assert!(!store.delete_task("t1").await.unwrap());
}

#[tokio::test]
async fn test_cleanup_single_and_all() {
    let store = InMemoryTaskStore::new();
    for id in ["a", "b", "c"] {
        store
            .create_task(&metadata_with_ttl(None), Some(id.to_string()))
            .await
            .unwrap();
    }

    store.cleanup(Some("b")).await;
    assert!(store.get_task("b").await.unwrap().is_none());
    assert!(store.get_task("a").await.unwrap().is_some());

    store.cleanup(None).await;
    assert!(store.get_task("a").await.unwrap().is_none());
    assert!(store.get_task("c").await.unwrap().is_none());
    let (tasks, _) = store.list_tasks(None).await.unwrap();
    assert!(tasks.is_empty());
}
