//! Workflows: a source, a sink, transforms and a processor bound to a
//! pair of queues.
//!
//! [`Workflow::retrieve_and_process`] is the unit a scheduler runs
//! periodically. Every run discovers, transfers and processes whatever is
//! pending, so a run that was interrupted is simply finished by the next.

pub mod command;
pub mod registry;

pub use command::CommandProcessor;
pub use registry::WorkflowRegistry;

use std::sync::Arc;

use regex::Regex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::event::{EventSink, TracingEvents};
use crate::pipeline::{Discover, Process, StageContext, StageReport, Transfer};
use crate::storage::QueueStore;
use crate::transform::{Scratch, TransformChain, TransformConfig};
use crate::transport::{Cleanup, Sink, Source};

pub use crate::pipeline::Processor;

/// Everything a workflow is made of. Checked by [`Workflow::new`].
pub struct WorkflowConfig {
    pub name: String,
    /// Receives source identifiers.
    pub upload_queue: String,
    /// Receives object keys.
    pub process_queue: String,
    pub source: Arc<dyn Source>,
    /// SFTP folder, IMAP mailbox or local directory to list.
    pub location: String,
    /// Searched in listed paths (SFTP, local) or attachment names (IMAP).
    pub pattern: Regex,
    pub sink: Arc<dyn Sink>,
    /// Object key prefix staged files are written under.
    pub object_directory: String,
    pub transforms: TransformConfig,
    pub scratch: Scratch,
    /// Applied to source items after they are staged.
    pub cleanup: Option<Cleanup>,
    pub processor: Arc<dyn Processor>,
}

impl WorkflowConfig {
    /// Queue names derived from the workflow name: `<name>-upload` and
    /// `<name>-process`.
    pub fn default_queue_names(name: &str) -> (String, String) {
        (format!("{name}-upload"), format!("{name}-process"))
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::Config(format!("workflow {:?}: {msg}", self.name)));

        if self.name.trim().is_empty() {
            return invalid("name is empty".into());
        }
        if self.upload_queue.trim().is_empty() || self.process_queue.trim().is_empty() {
            return invalid("queue names must not be empty".into());
        }
        if self.upload_queue == self.process_queue {
            return invalid(format!(
                "upload and process queue are both {:?}",
                self.upload_queue
            ));
        }
        if self.location.trim().is_empty() {
            return invalid("source location is empty".into());
        }
        if let Some(Cleanup::Archive(destination)) = &self.cleanup {
            if destination.trim().is_empty() {
                return invalid("archive destination is empty".into());
            }
            if destination.trim_end_matches('/') == self.location.trim_end_matches('/') {
                return invalid("archive destination is the source location".into());
            }
        }
        if self.transforms.encrypt_to.is_some() && self.transforms.decrypt_as.is_none() {
            return invalid("encryption is configured without a decryption key".into());
        }
        Ok(())
    }
}

/// Outcome of one [`Workflow::retrieve_and_process`] run.
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub workflow: String,
    pub run_id: Uuid,
    pub discover: StageReport,
    pub transfer: StageReport,
    pub process: StageReport,
}

impl WorkflowReport {
    pub fn stages(&self) -> [&StageReport; 3] {
        [&self.discover, &self.transfer, &self.process]
    }

    /// No stage error and no failed entry.
    pub fn is_clean(&self) -> bool {
        self.stages().iter().all(|s| s.is_clean())
    }
}

impl std::fmt::Display for WorkflowReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.workflow)?;
        for stage in self.stages() {
            write!(
                f,
                " {} {} ok/{} failed",
                stage.stage,
                stage.succeeded,
                stage.failed()
            )?;
            if stage.error.is_some() {
                write!(f, " (stage error)")?;
            }
            write!(f, ";")?;
        }
        Ok(())
    }
}

pub struct Workflow {
    name: String,
    store: Arc<dyn QueueStore>,
    events: Arc<dyn EventSink>,
    discover: Discover,
    transfer: Transfer,
    process: Process,
}

impl Workflow {
    /// Validate the configuration and assemble the stages.
    pub fn new(config: WorkflowConfig, store: Arc<dyn QueueStore>) -> Result<Self> {
        config.validate()?;
        let chain = TransformChain::from_config(&config.transforms, config.scratch.clone())?;

        Ok(Self {
            discover: Discover {
                source: config.source.clone(),
                location: config.location.clone(),
                pattern: config.pattern.clone(),
                queue: config.upload_queue.clone(),
            },
            transfer: Transfer {
                source: config.source,
                sink: config.sink.clone(),
                chain: chain.clone(),
                pattern: config.pattern,
                object_directory: config.object_directory,
                upload_queue: config.upload_queue,
                process_queue: config.process_queue.clone(),
                cleanup: config.cleanup,
            },
            process: Process {
                sink: config.sink,
                chain,
                processor: config.processor,
                queue: config.process_queue,
            },
            name: config.name,
            store,
            events: Arc::new(TracingEvents),
        })
    }

    /// Replace the default tracing event sink.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn upload_queue(&self) -> &str {
        &self.transfer.upload_queue
    }

    pub fn process_queue(&self) -> &str {
        &self.process.queue
    }

    /// Run Discover, Transfer and Process once, in that order. A stage
    /// that fails outright does not stop the ones after it.
    pub async fn retrieve_and_process(&self) -> WorkflowReport {
        let ctx = StageContext::new(self.name.clone(), self.store.clone(), self.events.clone());
        tracing::info!(workflow = %self.name, run_id = %ctx.run_id, "workflow run started");

        let discover = self.discover.run(&ctx).await;
        let transfer = self.transfer.run(&ctx).await;
        let process = self.process.run(&ctx).await;

        let report = WorkflowReport {
            workflow: self.name.clone(),
            run_id: ctx.run_id,
            discover,
            transfer,
            process,
        };
        if report.is_clean() {
            tracing::info!(%report, "workflow run finished");
        } else {
            tracing::warn!(%report, "workflow run finished with failures");
        }
        report
    }
}
