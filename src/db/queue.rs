//! Queue operations on Postgres: get-or-create, dedup insert, ordered scan,
//! completion.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::*;
use crate::storage::QueueStore;

const ENTRY_COLUMNS: &str = "e.id, e.queue_id, q.name AS queue_name, e.key, e.sort_key, e.is_complete, e.time_added, e.time_completed";

#[async_trait]
impl QueueStore for super::Db {
    async fn ensure_queue(&self, name: &str) -> Result<Queue> {
        // The no-op update makes RETURNING yield the row on conflict too.
        let (id, name): (i64, String) = sqlx::query_as(
            "INSERT INTO queues (name) VALUES ($1)
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id, name",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(Queue {
            id: QueueId(id),
            name,
        })
    }

    async fn enqueue_if_absent(
        &self,
        queue: &Queue,
        key: &str,
        sort_key: Option<&str>,
    ) -> Result<Enqueued> {
        // The unique constraint on (queue_id, key) is the dedup gate. A
        // conflicting insert is absorbed and the stored row read back.
        let inserted: Option<(i64,)> = sqlx::query_as(
            "INSERT INTO queue_entries (queue_id, key, sort_key, is_complete, time_added)
             VALUES ($1, $2, $3, FALSE, $4)
             ON CONFLICT (queue_id, key) DO NOTHING
             RETURNING id",
        )
        .bind(queue.id.0)
        .bind(key)
        .bind(sort_key)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        let was_new = inserted.is_some();
        let row: EntryRow = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS}
             FROM queue_entries e JOIN queues q ON q.id = e.queue_id
             WHERE e.queue_id = $1 AND e.key = $2"
        ))
        .bind(queue.id.0)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("entry {}: {key}", queue.name)))?;

        let entry = Box::new(row.into_entry());
        Ok(if was_new {
            Enqueued::Created(entry)
        } else {
            Enqueued::Existing(entry)
        })
    }

    async fn list_incomplete(&self, queue: &Queue) -> Result<Vec<QueueEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS}
             FROM queue_entries e JOIN queues q ON q.id = e.queue_id
             WHERE e.queue_id = $1 AND NOT e.is_complete
             ORDER BY e.queue_id, e.sort_key, e.time_added, e.key"
        ))
        .bind(queue.id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EntryRow::into_entry).collect())
    }

    async fn mark_complete(&self, entry: &QueueEntry) -> Result<QueueEntry> {
        // Guarded on NOT is_complete so a second completion keeps the first
        // stamp.
        sqlx::query(
            "UPDATE queue_entries SET is_complete = TRUE, time_completed = $1
             WHERE id = $2 AND NOT is_complete",
        )
        .bind(Utc::now())
        .bind(entry.id.0)
        .execute(&self.pool)
        .await?;

        let row: EntryRow = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS}
             FROM queue_entries e JOIN queues q ON q.id = e.queue_id
             WHERE e.id = $1"
        ))
        .bind(entry.id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("entry {entry}")))?;

        Ok(row.into_entry())
    }

    async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<QueueEntry>> {
        let complete = filter.state.map(|s| s == EntryState::Complete);
        let limit = filter.limit.map(|n| n as i64);

        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS}
             FROM queue_entries e JOIN queues q ON q.id = e.queue_id
             WHERE ($1::TEXT IS NULL OR q.name = $1)
               AND ($2::BOOLEAN IS NULL OR e.is_complete = $2)
             ORDER BY e.queue_id, e.sort_key, e.time_added, e.key
             LIMIT $3"
        ))
        .bind(filter.queue.as_deref())
        .bind(complete)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EntryRow::into_entry).collect())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct EntryRow {
    id: i64,
    queue_id: i64,
    queue_name: String,
    key: String,
    sort_key: Option<String>,
    is_complete: bool,
    time_added: DateTime<Utc>,
    time_completed: Option<DateTime<Utc>>,
}

impl EntryRow {
    fn into_entry(self) -> QueueEntry {
        QueueEntry {
            id: EntryId(self.id),
            queue_id: QueueId(self.queue_id),
            queue: self.queue_name,
            key: self.key,
            sort_key: self.sort_key,
            is_complete: self.is_complete,
            time_added: self.time_added,
            time_completed: self.time_completed,
        }
    }
}
