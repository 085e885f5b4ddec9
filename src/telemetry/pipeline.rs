//! Span helpers for stage and entry execution.

use tracing::Span;

use crate::event::Stage;

/// Span covering one stage of one workflow run. `stage.succeeded` and
/// `stage.failed` are filled in by [`record_stage_outcome`].
pub fn stage_span(workflow: &str, stage: Stage, run_id: &uuid::Uuid) -> Span {
    tracing::info_span!(
        "stage.run",
        "workflow" = workflow,
        "stage" = stage.as_str(),
        "run.id" = %run_id,
        "stage.succeeded" = tracing::field::Empty,
        "stage.failed" = tracing::field::Empty,
    )
}

/// Span covering one queue entry inside a stage.
pub fn entry_span(stage: Stage, queue: &str, key: &str) -> Span {
    tracing::info_span!(
        "entry.execute",
        "stage" = stage.as_str(),
        "queue" = queue,
        "entry.key" = key,
        "entry.state" = tracing::field::Empty,
    )
}

pub fn record_stage_outcome(span: &Span, succeeded: usize, failed: usize) {
    span.record("stage.succeeded", succeeded);
    span.record("stage.failed", failed);
}

/// Record the entry reaching complete.
pub fn record_completion(span: &Span) {
    span.record("entry.state", "complete");
    span.in_scope(|| {
        tracing::debug!(from = "pending", to = "complete", "state_transition");
    });
}
