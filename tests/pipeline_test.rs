mod common;

use std::sync::Arc;

use common::{FakeSource, Harness, compress_only};
use stageq::event::{EventKind, RecordingEvents, Stage};
use stageq::model::{EntryFilter, EntryState};
use stageq::storage::QueueStore;
use stageq::transform::{Identity, TransformConfig};
use stageq::transport::Cleanup;
use stageq::workflow::Workflow;

async fn entries(h: &Harness, queue: &str) -> Vec<stageq::model::QueueEntry> {
    h.store
        .list_entries(&EntryFilter::default().queue(queue))
        .await
        .unwrap()
}

fn workflow(h: &Harness, transforms: TransformConfig) -> Workflow {
    Workflow::new(h.config(transforms), h.store.clone()).unwrap()
}

#[tokio::test]
async fn discover_dedups_and_filters_listing() {
    let source = FakeSource::new()
        .with_file("a.csv", b"x")
        .with_listed("b.txt")
        .with_listed("a.csv");
    let h = Harness::new(source);
    let wf = workflow(&h, TransformConfig::default());

    wf.retrieve_and_process().await;

    let upload = entries(&h, "vendor-upload").await;
    assert_eq!(upload.len(), 1);
    assert_eq!(upload[0].key, "a.csv");
}

#[tokio::test]
async fn discover_twice_creates_no_duplicates() {
    let h = Harness::new(FakeSource::new().with_file("a.csv", b"1").with_file("b.csv", b"2"));
    let wf = workflow(&h, TransformConfig::default());

    let first = wf.retrieve_and_process().await;
    let second = wf.retrieve_and_process().await;

    assert_eq!(first.discover.enqueued, 2);
    assert_eq!(second.discover.enqueued, 0);
    assert_eq!(second.discover.succeeded, 2);
    assert_eq!(entries(&h, "vendor-upload").await.len(), 2);
    assert_eq!(entries(&h, "vendor-process").await.len(), 2);
    // Completed items are not fetched or processed again.
    assert_eq!(h.source.fetch_count(), 2);
    assert_eq!(h.processor.seen().len(), 2);
}

#[tokio::test]
async fn compressed_transfer_stages_gz_object() {
    let h = Harness::new(FakeSource::new().with_file("a.csv", b"id,amount\n1,10\n"));
    let wf = workflow(&h, compress_only());

    let report = wf.retrieve_and_process().await;
    assert!(report.is_clean(), "{report}");

    assert!(h.object_path("out/a.csv.gz").exists());

    let upload = entries(&h, "vendor-upload").await;
    assert_eq!(upload[0].state(), EntryState::Complete);
    assert!(upload[0].time_completed.is_some());

    let process = entries(&h, "vendor-process").await;
    assert_eq!(process.len(), 1);
    assert_eq!(process[0].key, "out/a.csv.gz");
    assert_eq!(process[0].sort_key.as_deref(), Some("out/a.csv.gz"));
    assert!(process[0].is_complete);

    let seen = h.processor.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "a.csv");
    assert_eq!(seen[0].1, b"id,amount\n1,10\n");
}

#[tokio::test]
async fn encrypted_transfer_decrypts_then_decompresses() {
    let identity = Identity::generate();
    let h = Harness::new(FakeSource::new().with_file("a.csv", b"secret,rows\n"));
    let wf = workflow(
        &h,
        TransformConfig {
            compress: true,
            encrypt_to: Some(identity.recipient()),
            decrypt_as: Some(identity),
        },
    );

    let report = wf.retrieve_and_process().await;
    assert!(report.is_clean(), "{report}");

    let staged = std::fs::read(h.object_path("out/a.csv.gz.gpg")).unwrap();
    assert!(!staged.windows(6).any(|w| w == b"secret"));

    let seen = h.processor.seen();
    assert_eq!(seen[0].0, "a.csv");
    assert_eq!(seen[0].1, b"secret,rows\n");
}

#[tokio::test]
async fn interrupted_transfer_is_redone_and_completes_once() {
    let h = Harness::new(FakeSource::new().with_file("a.csv", b"payload"));
    let wf = workflow(&h, compress_only());

    h.sink.fail_next_puts(1);
    let first = wf.retrieve_and_process().await;
    assert_eq!(first.transfer.failed(), 1);
    assert_eq!(first.transfer.failures[0].kind, "transport");

    let upload = entries(&h, "vendor-upload").await;
    assert!(!upload[0].is_complete);
    assert!(entries(&h, "vendor-process").await.is_empty());
    assert!(h.processor.seen().is_empty());

    let second = wf.retrieve_and_process().await;
    assert!(second.is_clean(), "{second}");
    assert_eq!(second.transfer.succeeded, 1);

    let upload = entries(&h, "vendor-upload").await;
    assert!(upload[0].is_complete);
    assert_eq!(h.sink.put_count(), 1);
    assert_eq!(h.processor.seen().len(), 1);

    let third = wf.retrieve_and_process().await;
    assert_eq!(third.transfer.succeeded, 0);
    assert_eq!(h.processor.seen().len(), 1);
}

#[tokio::test]
async fn failure_after_put_redoes_transfer_and_completes_once() {
    let h = Harness::new(FakeSource::new().with_file("a.csv", b"payload"));
    let mut config = h.config(compress_only());
    config.cleanup = Some(Cleanup::Remove);
    let wf = Workflow::new(config, h.store.clone()).unwrap();

    h.source.fail_next_removes(1);
    let first = wf.retrieve_and_process().await;
    assert_eq!(first.transfer.failed(), 1);
    assert_eq!(first.transfer.failures[0].kind, "transport");
    assert_eq!(h.sink.put_count(), 1);
    assert!(!entries(&h, "vendor-upload").await[0].is_complete);
    assert!(h.source.removed().is_empty());

    let second = wf.retrieve_and_process().await;
    assert!(second.is_clean(), "{second}");
    assert_eq!(second.transfer.succeeded, 1);
    assert_eq!(second.transfer.enqueued, 0);
    assert_eq!(h.sink.put_count(), 2);

    let upload = entries(&h, "vendor-upload").await;
    assert_eq!(upload.len(), 1);
    assert!(upload[0].is_complete);
    let process = entries(&h, "vendor-process").await;
    assert_eq!(process.len(), 1);
    assert_eq!(process[0].key, "out/a.csv.gz");
    assert!(process[0].is_complete);
    assert_eq!(h.source.removed(), vec!["a.csv"]);
    assert_eq!(h.processor.seen().len(), 1);
}

#[tokio::test]
async fn decryption_key_without_recipient_stages_unencrypted() {
    let h = Harness::new(FakeSource::new().with_file("a.csv", b"plain,rows\n"));
    let wf = workflow(
        &h,
        TransformConfig {
            compress: true,
            encrypt_to: None,
            decrypt_as: Some(Identity::generate()),
        },
    );

    let report = wf.retrieve_and_process().await;
    assert!(report.is_clean(), "{report}");

    assert!(h.object_path("out/a.csv.gz").exists());
    assert!(!h.object_path("out/a.csv.gz.gpg").exists());
    let keys: Vec<String> = entries(&h, "vendor-process")
        .await
        .into_iter()
        .map(|e| e.key)
        .collect();
    assert_eq!(keys, vec!["out/a.csv.gz"]);
    assert_eq!(h.processor.seen()[0].1, b"plain,rows\n");
}

#[tokio::test]
async fn failing_processor_leaves_entry_pending_until_it_succeeds() {
    let h = Harness::new(FakeSource::new().with_file("a.csv", b"x"));
    let wf = workflow(&h, TransformConfig::default());

    h.processor.fail_next(1);
    let first = wf.retrieve_and_process().await;
    assert_eq!(first.process.failed(), 1);
    assert_eq!(first.process.failures[0].kind, "processing");
    assert!(!entries(&h, "vendor-process").await[0].is_complete);

    let second = wf.retrieve_and_process().await;
    assert_eq!(second.process.succeeded, 1);
    assert!(entries(&h, "vendor-process").await[0].is_complete);
    assert_eq!(h.processor.seen().len(), 1);
}

#[tokio::test]
async fn failed_listing_does_not_block_pending_transfers() {
    let h = Harness::new(FakeSource::new().with_file("a.csv", b"x"));
    let wf = workflow(&h, TransformConfig::default());

    h.sink.fail_next_puts(1);
    wf.retrieve_and_process().await;

    h.source.fail_next_lists(1);
    let report = wf.retrieve_and_process().await;
    assert!(report.discover.error.is_some());
    assert!(!report.is_clean());
    assert_eq!(report.transfer.succeeded, 1);
    assert_eq!(report.process.succeeded, 1);
}

#[tokio::test]
async fn one_bad_entry_does_not_stop_the_others() {
    let h = Harness::new(
        FakeSource::new()
            .with_file("a.csv", b"a")
            .with_listed("missing.csv")
            .with_file("c.csv", b"c"),
    );
    let wf = workflow(&h, TransformConfig::default());

    let report = wf.retrieve_and_process().await;
    assert_eq!(report.transfer.succeeded, 2);
    assert_eq!(report.transfer.failed(), 1);
    assert_eq!(report.transfer.failures[0].key, "missing.csv");
    assert_eq!(h.processor.names(), vec!["a.csv", "c.csv"]);
}

#[tokio::test]
async fn process_follows_sort_key_order() {
    let h = Harness::new(
        FakeSource::new()
            .with_file("c.csv", b"c")
            .with_file("a.csv", b"a")
            .with_file("b.csv", b"b"),
    );
    let wf = workflow(&h, TransformConfig::default());

    wf.retrieve_and_process().await;

    assert_eq!(h.processor.names(), vec!["a.csv", "b.csv", "c.csv"]);
}

#[tokio::test]
async fn cleanup_runs_only_after_successful_staging() {
    let h = Harness::new(FakeSource::new().with_file("a.csv", b"x"));
    let mut config = h.config(TransformConfig::default());
    config.cleanup = Some(Cleanup::Remove);
    let wf = Workflow::new(config, h.store.clone()).unwrap();

    h.sink.fail_next_puts(1);
    wf.retrieve_and_process().await;
    assert!(h.source.removed().is_empty());

    wf.retrieve_and_process().await;
    assert_eq!(h.source.removed(), vec!["a.csv"]);
}

#[tokio::test]
async fn archive_cleanup_moves_item() {
    let h = Harness::new(FakeSource::new().with_file("a.csv", b"x"));
    let mut config = h.config(TransformConfig::default());
    config.cleanup = Some(Cleanup::Archive("/processed".to_string()));
    let wf = Workflow::new(config, h.store.clone()).unwrap();

    wf.retrieve_and_process().await;

    let archived = h.source.archived.lock().unwrap().clone();
    assert_eq!(archived, vec![("a.csv".to_string(), "/processed".to_string())]);
}

#[tokio::test]
async fn malformed_locator_is_reported_as_data_integrity() {
    let h = Harness::new(FakeSource::new().with_corrupt("inbox;UID=abc/;UIDVALIDITY=1.csv"));
    let events = Arc::new(RecordingEvents::new());
    let wf = workflow(&h, TransformConfig::default()).with_events(events.clone());

    let report = wf.retrieve_and_process().await;
    assert_eq!(report.transfer.failures[0].kind, "malformed_locator");

    let failed = events
        .kinds()
        .into_iter()
        .find(|k| matches!(k, EventKind::EntryFailed { .. }))
        .unwrap();
    match failed {
        EventKind::EntryFailed {
            stage,
            error_kind,
            data_integrity,
            ..
        } => {
            assert_eq!(stage, Stage::Transfer);
            assert_eq!(error_kind, "malformed_locator");
            assert!(data_integrity);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn events_bracket_every_stage() {
    let h = Harness::new(FakeSource::new().with_file("a.csv", b"x"));
    let events = Arc::new(RecordingEvents::new());
    let wf = workflow(&h, TransformConfig::default()).with_events(events.clone());

    wf.retrieve_and_process().await;

    let stages: Vec<(Stage, bool)> = events
        .kinds()
        .into_iter()
        .filter_map(|k| match k {
            EventKind::StageStarted { stage, .. } => Some((stage, true)),
            EventKind::StageFinished { stage, .. } => Some((stage, false)),
            _ => None,
        })
        .collect();
    assert_eq!(
        stages,
        vec![
            (Stage::Discover, true),
            (Stage::Discover, false),
            (Stage::Transfer, true),
            (Stage::Transfer, false),
            (Stage::Process, true),
            (Stage::Process, false),
        ]
    );
    assert!(events.events().iter().all(|e| e.workflow == "vendor"));
    assert!(events.kinds().contains(&EventKind::EntrySucceeded {
        stage: Stage::Process,
        key: "out/a.csv".to_string(),
    }));
}

#[tokio::test]
async fn closures_work_as_processors() {
    let h = Harness::new(FakeSource::new().with_file("a.csv", b"x"));
    let mut config = h.config(TransformConfig::default());
    config.processor = Arc::new(|path: std::path::PathBuf| async move {
        anyhow::ensure!(path.exists(), "missing {}", path.display());
        Ok(())
    });
    let wf = Workflow::new(config, h.store.clone()).unwrap();

    let report = wf.retrieve_and_process().await;
    assert!(report.is_clean(), "{report}");
}

#[tokio::test]
async fn scratch_is_empty_after_a_run() {
    let h = Harness::new(FakeSource::new().with_file("a.csv", b"x").with_file("b.csv", b"y"));
    let wf = workflow(&h, compress_only());

    h.processor.fail_next(1);
    wf.retrieve_and_process().await;

    let leftovers: Vec<_> = std::fs::read_dir(h.scratch_dir()).unwrap().collect();
    assert!(leftovers.is_empty(), "scratch not cleaned: {leftovers:?}");
}
