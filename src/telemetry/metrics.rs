//! Metric instruments, created from the global `"stageq"` meter.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

use crate::event::Stage;

fn meter() -> Meter {
    opentelemetry::global::meter("stageq")
}

/// Counter: keys offered to a queue.
/// Labels: `queue`, `result` ("new" | "duplicate").
pub fn queue_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("stageq.queue.enqueued")
        .with_description("Keys offered to a queue")
        .build()
}

/// Counter: entries marked complete.
/// Labels: `queue`.
pub fn queue_completed() -> Counter<u64> {
    meter()
        .u64_counter("stageq.queue.completed")
        .with_description("Queue entries marked complete")
        .build()
}

/// Counter: entries left pending after an error.
/// Labels: `stage`, `kind`.
pub fn entry_failures() -> Counter<u64> {
    meter()
        .u64_counter("stageq.entry.failures")
        .with_description("Queue entries that failed a stage")
        .build()
}

/// Histogram: wall time of one stage run.
/// Labels: `stage`.
pub fn stage_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("stageq.stage.duration_ms")
        .with_description("Stage duration in milliseconds")
        .with_unit("ms")
        .build()
}

pub fn record_enqueued(queue: &str, was_new: bool) {
    queue_enqueued().add(
        1,
        &[
            KeyValue::new("queue", queue.to_string()),
            KeyValue::new("result", if was_new { "new" } else { "duplicate" }),
        ],
    );
}

pub fn record_completed(queue: &str) {
    queue_completed().add(1, &[KeyValue::new("queue", queue.to_string())]);
}

pub fn record_failure(stage: Stage, kind: &'static str) {
    entry_failures().add(
        1,
        &[
            KeyValue::new("stage", stage.as_str()),
            KeyValue::new("kind", kind),
        ],
    );
}

pub fn record_stage_duration(stage: Stage, millis: f64) {
    stage_duration_ms().record(millis, &[KeyValue::new("stage", stage.as_str())]);
}
