//! Behaviour every `QueueStore` must have. Queue names are suffixed with a
//! random id so the checks can run repeatedly against a shared database.

use stageq::error::Error;
use stageq::model::{EntryFilter, EntryState};
use stageq::storage::QueueStore;

fn unique(name: &str) -> String {
    format!("{name}-{}", uuid::Uuid::new_v4().simple())
}

pub async fn ensure_queue_is_idempotent(store: &dyn QueueStore) {
    let name = unique("ensure");
    let first = store.ensure_queue(&name).await.unwrap();
    let second = store.ensure_queue(&name).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.name, name);
}

pub async fn enqueue_preserves_first_insert(store: &dyn QueueStore) {
    let queue = store.ensure_queue(&unique("dedup")).await.unwrap();

    let created = store
        .enqueue_if_absent(&queue, "in/a.csv", Some("first"))
        .await
        .unwrap();
    assert!(created.was_new());
    assert!(!created.entry().is_complete);

    let completed = store.mark_complete(created.entry()).await.unwrap();
    assert!(completed.is_complete);

    let again = store
        .enqueue_if_absent(&queue, "in/a.csv", Some("second"))
        .await
        .unwrap();
    assert!(!again.was_new());
    let entry = again.into_entry();
    assert!(entry.is_complete);
    assert_eq!(entry.sort_key.as_deref(), Some("first"));
    assert_eq!(entry.time_completed, completed.time_completed);
}

pub async fn same_key_in_different_queues_is_distinct(store: &dyn QueueStore) {
    let a = store.ensure_queue(&unique("a")).await.unwrap();
    let b = store.ensure_queue(&unique("b")).await.unwrap();
    assert!(store.enqueue_if_absent(&a, "k", None).await.unwrap().was_new());
    assert!(store.enqueue_if_absent(&b, "k", None).await.unwrap().was_new());
}

pub async fn list_incomplete_is_ordered(store: &dyn QueueStore) {
    let queue = store.ensure_queue(&unique("order")).await.unwrap();
    store.enqueue_if_absent(&queue, "no-sort", None).await.unwrap();
    store.enqueue_if_absent(&queue, "second", Some("2")).await.unwrap();
    store.enqueue_if_absent(&queue, "first", Some("1")).await.unwrap();
    let done = store.enqueue_if_absent(&queue, "done", Some("0")).await.unwrap();
    store.mark_complete(done.entry()).await.unwrap();

    let keys: Vec<String> = store
        .list_incomplete(&queue)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.key)
        .collect();
    assert_eq!(keys, vec!["first", "second", "no-sort"]);
}

pub async fn mark_complete_keeps_first_stamp(store: &dyn QueueStore) {
    let queue = store.ensure_queue(&unique("stamp")).await.unwrap();
    let entry = store
        .enqueue_if_absent(&queue, "k", None)
        .await
        .unwrap()
        .into_entry();

    let first = store.mark_complete(&entry).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let second = store.mark_complete(&entry).await.unwrap();

    assert!(first.time_completed.is_some());
    assert_eq!(first.time_completed, second.time_completed);
    assert_eq!(second.state(), EntryState::Complete);
    assert!(store.list_incomplete(&queue).await.unwrap().is_empty());
}

pub async fn list_entries_filters(store: &dyn QueueStore) {
    let name = unique("admin");
    let queue = store.ensure_queue(&name).await.unwrap();
    for key in ["a", "b", "c"] {
        store.enqueue_if_absent(&queue, key, Some(key)).await.unwrap();
    }
    let b = store.enqueue_if_absent(&queue, "b", None).await.unwrap();
    store.mark_complete(b.entry()).await.unwrap();

    let all = store
        .list_entries(&EntryFilter::default().queue(&name))
        .await
        .unwrap();
    assert_eq!(all.len(), 3);

    let pending = store
        .list_entries(&EntryFilter::default().queue(&name).state(EntryState::Pending))
        .await
        .unwrap();
    let keys: Vec<&str> = pending.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["a", "c"]);

    let complete = store
        .list_entries(&EntryFilter::default().queue(&name).state(EntryState::Complete))
        .await
        .unwrap();
    assert_eq!(complete.len(), 1);
    assert_eq!(complete[0].to_string(), format!("{name}: b - complete"));

    let limited = store
        .list_entries(&EntryFilter::default().queue(&name).limit(1))
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].key, "a");
}

pub async fn mark_complete_unknown_entry_fails(store: &dyn QueueStore) {
    let queue = store.ensure_queue(&unique("ghost")).await.unwrap();
    let mut entry = store
        .enqueue_if_absent(&queue, "real", None)
        .await
        .unwrap()
        .into_entry();
    entry.key = "ghost".to_string();
    entry.id = stageq::model::EntryId(i64::MAX);
    let err = store.mark_complete(&entry).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{err}");
}

pub async fn run_all(store: &dyn QueueStore) {
    ensure_queue_is_idempotent(store).await;
    enqueue_preserves_first_insert(store).await;
    same_key_in_different_queues_is_distinct(store).await;
    list_incomplete_is_ordered(store).await;
    mark_complete_keeps_first_stamp(store).await;
    list_entries_filters(store).await;
    mark_complete_unknown_entry_fails(store).await;
}
