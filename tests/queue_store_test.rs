mod common;

use common::contract;
use stageq::error::Error;
use stageq::model::{Queue, QueueId};
use stageq::storage::{MemoryStore, QueueStore};

#[tokio::test]
async fn ensure_queue_is_idempotent() {
    contract::ensure_queue_is_idempotent(&MemoryStore::new()).await;
}

#[tokio::test]
async fn enqueue_preserves_first_insert() {
    contract::enqueue_preserves_first_insert(&MemoryStore::new()).await;
}

#[tokio::test]
async fn same_key_in_different_queues_is_distinct() {
    contract::same_key_in_different_queues_is_distinct(&MemoryStore::new()).await;
}

#[tokio::test]
async fn list_incomplete_is_ordered() {
    contract::list_incomplete_is_ordered(&MemoryStore::new()).await;
}

#[tokio::test]
async fn mark_complete_keeps_first_stamp() {
    contract::mark_complete_keeps_first_stamp(&MemoryStore::new()).await;
}

#[tokio::test]
async fn list_entries_filters() {
    contract::list_entries_filters(&MemoryStore::new()).await;
}

#[tokio::test]
async fn mark_complete_unknown_entry_fails() {
    contract::mark_complete_unknown_entry_fails(&MemoryStore::new()).await;
}

#[tokio::test]
async fn enqueue_into_unknown_queue_fails() {
    let store = MemoryStore::new();
    let queue = Queue {
        id: QueueId(42),
        name: "nowhere".to_string(),
    };
    let err = store.enqueue_if_absent(&queue, "k", None).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn entries_are_never_dropped() {
    let store = MemoryStore::new();
    let queue = store.ensure_queue("keep").await.unwrap();
    for key in ["a", "b"] {
        let entry = store.enqueue_if_absent(&queue, key, None).await.unwrap();
        store.mark_complete(entry.entry()).await.unwrap();
    }
    assert_eq!(store.len().await, 2);
    assert!(store.list_incomplete(&queue).await.unwrap().is_empty());
}
