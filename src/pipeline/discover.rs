use std::sync::Arc;

use regex::Regex;

use super::{StageContext, StageReport, run_stage};
use crate::error::Result;
use crate::event::Stage;
use crate::transport::Source;

/// Lists the source and enqueues every matching identifier into the
/// upload queue. Identifiers already queued, complete or not, are left
/// alone.
pub struct Discover {
    pub source: Arc<dyn Source>,
    pub location: String,
    pub pattern: Regex,
    pub queue: String,
}

impl Discover {
    pub async fn run(&self, ctx: &StageContext) -> StageReport {
        run_stage(ctx, Stage::Discover, &self.queue, self.discover(ctx)).await
    }

    async fn discover(&self, ctx: &StageContext) -> Result<StageReport> {
        let queue = ctx.store.ensure_queue(&self.queue).await?;
        let keys = self.source.list(&self.location, &self.pattern).await?;
        tracing::debug!(
            source = self.source.kind(),
            location = %self.location,
            listed = keys.len(),
            "source listed"
        );

        let mut report = StageReport::new(Stage::Discover);
        for key in &keys {
            match ctx.enqueue(&queue, key, None).await {
                Ok(enqueued) => {
                    report.succeeded += 1;
                    if enqueued.was_new() {
                        report.enqueued += 1;
                    }
                }
                Err(e) => ctx.entry_failed(Stage::Discover, key, &e, &mut report),
            }
        }
        Ok(report)
    }
}
