use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use super::{StageContext, StageReport, run_stage};
use crate::error::{Error, Result};
use crate::event::{EventKind, Stage};
use crate::model::QueueEntry;
use crate::telemetry::pipeline::{entry_span, record_completion};
use crate::transform::TransformChain;
use crate::transport::Sink;

/// User-supplied processing of one staged file.
///
/// Receives the path of the fully decoded artifact. The file is removed
/// when the call returns. Any error means "not processed yet" and the
/// entry is offered again on the next run.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, path: &Path) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> Processor for F
where
    F: Fn(PathBuf) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn process(&self, path: &Path) -> anyhow::Result<()> {
        (self)(path.to_path_buf()).await
    }
}

/// Hands pending process entries to the [`Processor`].
pub struct Process {
    pub sink: Arc<dyn Sink>,
    pub chain: TransformChain,
    pub processor: Arc<dyn Processor>,
    pub queue: String,
}

impl Process {
    pub async fn run(&self, ctx: &StageContext) -> StageReport {
        run_stage(ctx, Stage::Process, &self.queue, self.process_all(ctx)).await
    }

    async fn process_all(&self, ctx: &StageContext) -> Result<StageReport> {
        let queue = ctx.store.ensure_queue(&self.queue).await?;
        let pending = ctx.store.list_incomplete(&queue).await?;

        let mut report = StageReport::new(Stage::Process);
        for entry in pending {
            ctx.emit(EventKind::EntryStarted {
                stage: Stage::Process,
                key: entry.key.clone(),
            });
            let span = entry_span(Stage::Process, &queue.name, &entry.key);
            match self.process(ctx, &entry).instrument(span.clone()).await {
                Ok(()) => {
                    record_completion(&span);
                    report.succeeded += 1;
                    ctx.emit(EventKind::EntrySucceeded {
                        stage: Stage::Process,
                        key: entry.key.clone(),
                    });
                }
                Err(e) => ctx.entry_failed(Stage::Process, &entry.key, &e, &mut report),
            }
        }
        Ok(report)
    }

    async fn process(&self, ctx: &StageContext, entry: &QueueEntry) -> Result<()> {
        let staged = self.sink.get(&entry.key, self.chain.scratch()).await?;
        let decoded = self.chain.decode_blocking(staged).await?;

        self.processor
            .process(&decoded.path())
            .await
            .map_err(|e| Error::Processing {
                key: entry.key.clone(),
                message: format!("{e:#}"),
            })?;

        ctx.complete(entry).await?;
        Ok(())
    }
}
