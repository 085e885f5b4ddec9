//! Telemetry initialization, span helpers and instruments.

use stageq::event::Stage;
use stageq::telemetry::{TelemetryConfig, init_telemetry, metrics, pipeline};
use uuid::Uuid;

#[test]
fn telemetry_initializes_without_endpoint() {
    let mut config = TelemetryConfig::new("stageq-test");
    config.log_level = "debug".to_string();
    // A subscriber may already be installed by another test in this
    // process; that error is acceptable.
    if let Ok(guard) = init_telemetry(config) {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[test]
fn stage_and_entry_spans_record_outcomes() {
    let span = pipeline::stage_span("vendor", Stage::Transfer, &Uuid::new_v4());
    pipeline::record_stage_outcome(&span, 3, 1);

    let entry = pipeline::entry_span(Stage::Transfer, "vendor-upload", "outbox/a.csv");
    pipeline::record_completion(&entry);
}

#[test]
fn instruments_record_without_a_provider() {
    metrics::record_enqueued("vendor-upload", true);
    metrics::record_enqueued("vendor-upload", false);
    metrics::record_completed("vendor-upload");
    metrics::record_failure(Stage::Process, "processing");
    metrics::record_stage_duration(Stage::Discover, 12.5);
}
