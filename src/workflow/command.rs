//! Processing by external command.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::pipeline::Processor;

/// Runs `program [args..] <file>` for every staged file. The file path is
/// also exported as `STAGEQ_FILE` and the workflow name as
/// `STAGEQ_WORKFLOW`. A non-zero exit leaves the entry pending.
#[derive(Debug, Clone)]
pub struct CommandProcessor {
    program: PathBuf,
    args: Vec<String>,
    workflow: String,
}

impl CommandProcessor {
    pub fn new(program: impl Into<PathBuf>, workflow: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workflow: workflow.into(),
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl Processor for CommandProcessor {
    async fn process(&self, path: &Path) -> anyhow::Result<()> {
        let program = &self.program;
        debug!(program = %program.display(), file = %path.display(), "running processor");

        let output = Command::new(program)
            .args(&self.args)
            .arg(path)
            .env("STAGEQ_FILE", path)
            .env("STAGEQ_WORKFLOW", &self.workflow)
            .output()
            .await
            .with_context(|| format!("cannot run {}", program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {}: {}",
                program.display(),
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }
}
