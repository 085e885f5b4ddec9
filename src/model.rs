//! Core data model.
//!
//! A queue is a named lane of work. An entry is one remote or staged item
//! inside a queue, identified by `(queue, key)`. Entries are append-only:
//! the only mutation is the one-way flip from pending to complete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Newtype for queue IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueueId(pub i64);

/// A named queue. Created lazily, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    pub id: QueueId,
    pub name: String,
}

impl std::fmt::Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ---------------------------------------------------------------------------
// Queue Entry
// ---------------------------------------------------------------------------

/// Newtype for entry IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub i64);

/// One unit of work inside a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,

    pub queue_id: QueueId,

    /// Name of the owning queue, carried for display and logging.
    pub queue: String,

    /// Identifies the remote or staged item. Opaque to the queue.
    pub key: String,

    /// Presentation and ordering only. Independent of `key`.
    pub sort_key: Option<String>,

    pub is_complete: bool,

    pub time_added: DateTime<Utc>,

    /// Stamped exactly once, when `is_complete` becomes true.
    pub time_completed: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn state(&self) -> EntryState {
        if self.is_complete {
            EntryState::Complete
        } else {
            EntryState::Pending
        }
    }

    /// Scan order: `(queue, sort_key, time_added, key)`. Entries without a
    /// sort key come after those with one, as Postgres orders NULLs last.
    pub fn scan_order(&self, other: &Self) -> Ordering {
        self.queue_id
            .cmp(&other.queue_id)
            .then_with(|| match (&self.sort_key, &other.sort_key) {
                (Some(a), Some(b)) => a.cmp(b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| self.time_added.cmp(&other.time_added))
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl std::fmt::Display for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} - {}", self.queue, self.key, self.state())
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of an entry. Complete is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    Complete,
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryState::Pending => "pending",
            EntryState::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EntryState {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntryState::Pending),
            "complete" => Ok(EntryState::Complete),
            other => Err(crate::error::Error::Other(format!(
                "unknown entry state: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Enqueue result
// ---------------------------------------------------------------------------

/// What happened when a key was enqueued.
#[derive(Debug, Clone)]
pub enum Enqueued {
    /// A new pending entry was inserted.
    Created(Box<QueueEntry>),
    /// The key was already present. The stored entry is returned untouched.
    Existing(Box<QueueEntry>),
}

impl Enqueued {
    pub fn entry(&self) -> &QueueEntry {
        match self {
            Enqueued::Created(entry) | Enqueued::Existing(entry) => entry,
        }
    }

    pub fn into_entry(self) -> QueueEntry {
        match self {
            Enqueued::Created(entry) | Enqueued::Existing(entry) => *entry,
        }
    }

    pub fn was_new(&self) -> bool {
        matches!(self, Enqueued::Created(_))
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Filter for administrative listings.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    /// Restrict to one queue by name.
    pub queue: Option<String>,
    /// Restrict to one state.
    pub state: Option<EntryState>,
    /// Maximum entries to return. None = unbounded.
    pub limit: Option<usize>,
}

impl EntryFilter {
    pub fn queue(mut self, name: impl Into<String>) -> Self {
        self.queue = Some(name.into());
        self
    }

    pub fn state(mut self, state: EntryState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
