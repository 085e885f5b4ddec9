use std::sync::Arc;

use regex::Regex;
use tracing::Instrument;

use super::{StageContext, StageReport, run_stage};
use crate::error::Result;
use crate::event::{EventKind, Stage};
use crate::model::{Queue, QueueEntry};
use crate::telemetry::pipeline::{entry_span, record_completion};
use crate::transform::TransformChain;
use crate::transport::{Cleanup, Sink, Source, object_key};

/// Moves pending upload entries from the source into the object store.
///
/// Per entry: fetch, apply the write chain, put each artifact under
/// `object_directory`, enqueue its object key into the process queue,
/// clean up the source item, mark the entry complete. A failure at any
/// step leaves the entry pending and the whole sequence is redone on the
/// next run; puts overwrite and enqueues are idempotent, so redoing it is
/// safe.
pub struct Transfer {
    pub source: Arc<dyn Source>,
    pub sink: Arc<dyn Sink>,
    pub chain: TransformChain,
    pub pattern: Regex,
    pub object_directory: String,
    pub upload_queue: String,
    pub process_queue: String,
    pub cleanup: Option<Cleanup>,
}

impl Transfer {
    pub async fn run(&self, ctx: &StageContext) -> StageReport {
        run_stage(ctx, Stage::Transfer, &self.upload_queue, self.transfer_all(ctx)).await
    }

    async fn transfer_all(&self, ctx: &StageContext) -> Result<StageReport> {
        let upload = ctx.store.ensure_queue(&self.upload_queue).await?;
        let process = ctx.store.ensure_queue(&self.process_queue).await?;
        let pending = ctx.store.list_incomplete(&upload).await?;

        let mut report = StageReport::new(Stage::Transfer);
        for entry in pending {
            ctx.emit(EventKind::EntryStarted {
                stage: Stage::Transfer,
                key: entry.key.clone(),
            });
            let span = entry_span(Stage::Transfer, &upload.name, &entry.key);
            match self
                .transfer(ctx, &process, &entry)
                .instrument(span.clone())
                .await
            {
                Ok(created) => {
                    record_completion(&span);
                    report.succeeded += 1;
                    report.enqueued += created;
                    ctx.emit(EventKind::EntrySucceeded {
                        stage: Stage::Transfer,
                        key: entry.key.clone(),
                    });
                }
                Err(e) => ctx.entry_failed(Stage::Transfer, &entry.key, &e, &mut report),
            }
        }
        Ok(report)
    }

    /// Returns how many new process entries were created.
    async fn transfer(&self, ctx: &StageContext, process: &Queue, entry: &QueueEntry) -> Result<usize> {
        let artifacts = self
            .source
            .fetch(&entry.key, &self.pattern, self.chain.scratch())
            .await?;
        if artifacts.is_empty() {
            tracing::info!(key = %entry.key, "no matching artifacts in item");
        }

        let mut created = 0;
        for artifact in artifacts {
            let encoded = self.chain.encode_blocking(artifact).await?;
            let key = object_key(&self.object_directory, encoded.name());
            self.sink.put(&key, &encoded).await?;
            if ctx.enqueue(process, &key, Some(key.as_str())).await?.was_new() {
                created += 1;
            }
        }

        if let Some(cleanup) = &self.cleanup {
            self.source.cleanup(&entry.key, cleanup).await?;
            tracing::debug!(key = %entry.key, %cleanup, "source item cleaned up");
        }

        ctx.complete(entry).await?;
        Ok(created)
    }
}
