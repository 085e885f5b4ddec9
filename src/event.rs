//! Structured events emitted by the pipeline at stage and entry
//! boundaries.
//!
//! Stages never log directly about progress; they emit events through an
//! [`EventSink`]. The default sink turns them into tracing events, tests
//! use [`RecordingEvents`] to assert on what happened.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discover,
    Transfer,
    Process,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Discover => "discover",
            Stage::Transfer => "transfer",
            Stage::Process => "process",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured event emitted by a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub timestamp: DateTime<Utc>,
    /// Workflow that emitted the event.
    pub workflow: String,
    pub kind: EventKind,
}

impl PipelineEvent {
    pub fn new(workflow: impl Into<String>, kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            workflow: workflow.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    StageStarted {
        stage: Stage,
        queue: String,
    },
    StageFinished {
        stage: Stage,
        queue: String,
        succeeded: usize,
        failed: usize,
        duration_ms: u64,
    },
    /// The stage could not run at all (listing or queue lookup failed).
    StageFailed {
        stage: Stage,
        error_kind: String,
        error: String,
    },
    EntryStarted {
        stage: Stage,
        key: String,
    },
    EntrySucceeded {
        stage: Stage,
        key: String,
    },
    EntryFailed {
        stage: Stage,
        key: String,
        error_kind: String,
        error: String,
        /// Bad stored data rather than a transient failure.
        data_integrity: bool,
    },
    Enqueued {
        queue: String,
        key: String,
        was_new: bool,
    },
}

/// Receiver for pipeline events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Writes events as tracing events on the current span.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl EventSink for TracingEvents {
    fn emit(&self, event: PipelineEvent) {
        let workflow = event.workflow.as_str();
        match &event.kind {
            EventKind::StageStarted { stage, queue } => {
                tracing::info!(workflow, %stage, queue, "stage started");
            }
            EventKind::StageFinished {
                stage,
                queue,
                succeeded,
                failed,
                duration_ms,
            } => {
                tracing::info!(workflow, %stage, queue, succeeded, failed, duration_ms, "stage finished");
            }
            EventKind::StageFailed {
                stage,
                error_kind,
                error,
            } => {
                tracing::error!(workflow, %stage, error_kind, error, "stage failed");
            }
            EventKind::EntryStarted { stage, key } => {
                tracing::debug!(workflow, %stage, key, "entry started");
            }
            EventKind::EntrySucceeded { stage, key } => {
                tracing::info!(workflow, %stage, key, "entry complete");
            }
            EventKind::EntryFailed {
                stage,
                key,
                error_kind,
                error,
                data_integrity: true,
            } => {
                tracing::error!(workflow, %stage, key, error_kind, error, "data integrity problem, entry left pending");
            }
            EventKind::EntryFailed {
                stage,
                key,
                error_kind,
                error,
                data_integrity: false,
            } => {
                tracing::warn!(workflow, %stage, key, error_kind, error, "entry failed, will retry next run");
            }
            EventKind::Enqueued {
                queue,
                key,
                was_new: true,
            } => {
                tracing::info!(workflow, queue, key, "enqueued");
            }
            EventKind::Enqueued {
                queue,
                key,
                was_new: false,
            } => {
                tracing::debug!(workflow, queue, key, "already queued");
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.lock().iter().map(|e| e.kind.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PipelineEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventSink for RecordingEvents {
    fn emit(&self, event: PipelineEvent) {
        self.lock().push(event);
    }
}
