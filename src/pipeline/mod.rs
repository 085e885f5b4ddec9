//! The three pipeline stages and what they share.
//!
//! Each stage scans its queue, acts on every pending entry, enqueues the
//! keys it derives into the next queue and marks the entry complete as
//! its last step. An error on one entry leaves it pending and the stage
//! moves on; the next run retries it from scratch. No progress lives
//! anywhere but the queue store, so an interrupted run needs no recovery.

pub mod discover;
pub mod process;
pub mod transfer;

pub use discover::Discover;
pub use process::{Process, Processor};
pub use transfer::Transfer;

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::event::{EventKind, EventSink, PipelineEvent, Stage};
use crate::model::{Enqueued, Queue, QueueEntry};
use crate::storage::QueueStore;
use crate::telemetry::metrics;

/// What every stage needs besides its own configuration.
#[derive(Clone)]
pub struct StageContext {
    pub workflow: String,
    pub run_id: Uuid,
    pub store: Arc<dyn QueueStore>,
    pub events: Arc<dyn EventSink>,
}

impl StageContext {
    pub fn new(
        workflow: impl Into<String>,
        store: Arc<dyn QueueStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            workflow: workflow.into(),
            run_id: Uuid::new_v4(),
            store,
            events,
        }
    }

    pub fn emit(&self, kind: EventKind) {
        self.events.emit(PipelineEvent::new(self.workflow.clone(), kind));
    }

    /// Enqueue-if-absent with the event and metric attached.
    pub async fn enqueue(&self, queue: &Queue, key: &str, sort_key: Option<&str>) -> Result<Enqueued> {
        let enqueued = self.store.enqueue_if_absent(queue, key, sort_key).await?;
        metrics::record_enqueued(&queue.name, enqueued.was_new());
        self.emit(EventKind::Enqueued {
            queue: queue.name.clone(),
            key: key.to_string(),
            was_new: enqueued.was_new(),
        });
        Ok(enqueued)
    }

    /// Mark-complete with the metric attached.
    pub async fn complete(&self, entry: &QueueEntry) -> Result<QueueEntry> {
        let completed = self.store.mark_complete(entry).await?;
        metrics::record_completed(&entry.queue);
        Ok(completed)
    }

    fn entry_failed(&self, stage: Stage, key: &str, err: &Error, report: &mut StageReport) {
        metrics::record_failure(stage, err.kind());
        self.emit(EventKind::EntryFailed {
            stage,
            key: key.to_string(),
            error_kind: err.kind().to_string(),
            error: err.to_string(),
            data_integrity: err.is_data_integrity(),
        });
        report.failures.push(EntryFailure {
            key: key.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        });
    }
}

/// An entry a stage could not finish. It stays pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub key: String,
    pub kind: &'static str,
    pub message: String,
}

/// Outcome of one stage run.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: Stage,
    /// Entries completed (Transfer, Process) or keys offered (Discover).
    pub succeeded: usize,
    /// New entries created in the output queue.
    pub enqueued: usize,
    pub failures: Vec<EntryFailure>,
    /// Set when the stage could not run at all.
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StageReport {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            succeeded: 0,
            enqueued: 0,
            failures: Vec::new(),
            error: None,
            duration_ms: 0,
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.error.is_none() && self.failures.is_empty()
    }
}

/// Bookkeeping around a stage body: events, metrics, span outcome and
/// the stage-level error.
async fn run_stage<F>(ctx: &StageContext, stage: Stage, queue: &str, body: F) -> StageReport
where
    F: std::future::Future<Output = Result<StageReport>>,
{
    use tracing::Instrument;

    let span = crate::telemetry::pipeline::stage_span(&ctx.workflow, stage, &ctx.run_id);
    let started = Instant::now();
    ctx.emit(EventKind::StageStarted {
        stage,
        queue: queue.to_string(),
    });

    let mut report = match body.instrument(span.clone()).await {
        Ok(report) => report,
        Err(e) => {
            ctx.emit(EventKind::StageFailed {
                stage,
                error_kind: e.kind().to_string(),
                error: e.to_string(),
            });
            let mut report = StageReport::new(stage);
            report.error = Some(e.to_string());
            report
        }
    };

    let elapsed = started.elapsed();
    report.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    metrics::record_stage_duration(stage, elapsed.as_secs_f64() * 1000.0);
    crate::telemetry::pipeline::record_stage_outcome(&span, report.succeeded, report.failed());

    ctx.emit(EventKind::StageFinished {
        stage,
        queue: queue.to_string(),
        succeeded: report.succeeded,
        failed: report.failed(),
        duration_ms: report.duration_ms,
    });
    report
}
