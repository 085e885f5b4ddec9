//! Queue storage.
//!
//! [`QueueStore`] is the single source of truth for queue and entry state.
//! Stages hold no entry state across runs; everything they need is
//! re-read from the store. Two backends implement it: Postgres
//! ([`crate::db::Db`]) and the in-memory [`MemoryStore`] used for tests
//! and dry runs.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::model::*;

/// Durable record store behind the queues.
///
/// Implementations must enforce `(queue, key)` uniqueness and must never
/// delete entries.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Get-or-create a queue by name.
    async fn ensure_queue(&self, name: &str) -> Result<Queue>;

    /// Insert a pending entry unless `(queue, key)` already exists. An
    /// existing entry is returned as-is, completion state included.
    async fn enqueue_if_absent(
        &self,
        queue: &Queue,
        key: &str,
        sort_key: Option<&str>,
    ) -> Result<Enqueued>;

    /// Pending entries of a queue in scan order. A fresh snapshot on every
    /// call.
    async fn list_incomplete(&self, queue: &Queue) -> Result<Vec<QueueEntry>>;

    /// Flip an entry to complete and stamp `time_completed`. Completing an
    /// entry that is already complete keeps the original stamp.
    async fn mark_complete(&self, entry: &QueueEntry) -> Result<QueueEntry>;

    /// Administrative listing across queues.
    async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<QueueEntry>>;
}

/// In-memory queue store.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    queues: Vec<Queue>,
    entries: Vec<QueueEntry>,
    /// (queue, key) -> index into `entries`.
    index: HashMap<(QueueId, String), usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Total entries across all queues.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn ensure_queue(&self, name: &str) -> Result<Queue> {
        let mut inner = self.inner.lock().await;
        if let Some(queue) = inner.queues.iter().find(|q| q.name == name) {
            return Ok(queue.clone());
        }
        let queue = Queue {
            id: QueueId(inner.queues.len() as i64 + 1),
            name: name.to_string(),
        };
        inner.queues.push(queue.clone());
        Ok(queue)
    }

    async fn enqueue_if_absent(
        &self,
        queue: &Queue,
        key: &str,
        sort_key: Option<&str>,
    ) -> Result<Enqueued> {
        let mut inner = self.inner.lock().await;
        if !inner.queues.iter().any(|q| q.id == queue.id) {
            return Err(Error::NotFound(format!("queue {}", queue.name)));
        }

        let index_key = (queue.id, key.to_string());
        if let Some(&idx) = inner.index.get(&index_key) {
            return Ok(Enqueued::Existing(Box::new(inner.entries[idx].clone())));
        }

        let entry = QueueEntry {
            id: EntryId(inner.entries.len() as i64 + 1),
            queue_id: queue.id,
            queue: queue.name.clone(),
            key: key.to_string(),
            sort_key: sort_key.map(str::to_string),
            is_complete: false,
            time_added: Utc::now(),
            time_completed: None,
        };
        let idx = inner.entries.len();
        inner.entries.push(entry.clone());
        inner.index.insert(index_key, idx);
        Ok(Enqueued::Created(Box::new(entry)))
    }

    async fn list_incomplete(&self, queue: &Queue) -> Result<Vec<QueueEntry>> {
        let inner = self.inner.lock().await;
        let mut pending: Vec<QueueEntry> = inner
            .entries
            .iter()
            .filter(|e| e.queue_id == queue.id && !e.is_complete)
            .cloned()
            .collect();
        pending.sort_by(QueueEntry::scan_order);
        Ok(pending)
    }

    async fn mark_complete(&self, entry: &QueueEntry) -> Result<QueueEntry> {
        let mut inner = self.inner.lock().await;
        let idx = inner
            .index
            .get(&(entry.queue_id, entry.key.clone()))
            .copied()
            .ok_or_else(|| Error::NotFound(format!("entry {entry}")))?;

        let stored = &mut inner.entries[idx];
        if !stored.is_complete {
            stored.is_complete = true;
            stored.time_completed = Some(Utc::now());
        }
        Ok(stored.clone())
    }

    async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<QueueEntry>> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<QueueEntry> = inner
            .entries
            .iter()
            .filter(|e| filter.queue.as_deref().is_none_or(|name| e.queue == name))
            .filter(|e| filter.state.is_none_or(|state| e.state() == state))
            .cloned()
            .collect();
        entries.sort_by(QueueEntry::scan_order);
        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }
}
