//! Workflow definitions loaded from TOML files.
//!
//! One file per workflow:
//!
//! ```toml
//! [workflow]
//! name = "vendor-reports"
//! pattern = '\.csv$'
//! object_directory = "incoming/vendor"
//! compress = true
//! encrypt_to = "<base64 X25519 public key>"
//!
//! [source]
//! kind = "sftp"
//! host = "sftp.vendor.example"
//! username = "acme"
//! password_env = "VENDOR_SFTP_PASSWORD"
//! location = "/outbox"
//! remove_after_upload = true
//!
//! [sink]
//! kind = "s3"
//! bucket = "staging"
//! region = "us-east-1"
//!
//! [processor]
//! command = "bin/ingest-vendor"
//! ```
//!
//! Secrets are never inline: `*_env` fields name the environment variable
//! that holds them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use secrecy::SecretString;
use serde::Deserialize;

use super::{CommandProcessor, WorkflowConfig};
use crate::error::{Error, Result};
use crate::transform::{Identity, Recipient, Scratch, TransformConfig};
use crate::transport::{
    Cleanup, ImapSettings, ImapSource, LocalDirSource, LocalObjectStore, S3Settings, S3Sink, Sink,
    SftpSettings, SftpSource, Source,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowFile {
    pub workflow: WorkflowMeta,
    pub source: SourceDef,
    pub sink: SinkDef,
    pub processor: ProcessorDef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowMeta {
    pub name: String,
    pub upload_queue: Option<String>,
    pub process_queue: Option<String>,
    pub pattern: String,
    #[serde(default)]
    pub object_directory: String,
    #[serde(default)]
    pub compress: bool,
    /// Base64 X25519 public key.
    pub encrypt_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum SourceDef {
    Sftp {
        host: String,
        #[serde(default = "default_sftp_port")]
        port: u16,
        username: String,
        password_env: String,
        host_key_fingerprint: Option<String>,
        location: String,
        #[serde(default)]
        remove_after_upload: bool,
        archive_to: Option<String>,
        connect_timeout_secs: Option<u64>,
    },
    Imap {
        host: String,
        #[serde(default = "default_imap_port")]
        port: u16,
        username: String,
        password_env: String,
        /// Mailbox to read.
        location: String,
        #[serde(default)]
        remove_after_upload: bool,
        #[serde(alias = "archive_mailbox")]
        archive_to: Option<String>,
        connect_timeout_secs: Option<u64>,
    },
    Local {
        root: PathBuf,
        location: String,
        #[serde(default)]
        remove_after_upload: bool,
        archive_to: Option<String>,
    },
}

fn default_sftp_port() -> u16 {
    22
}

fn default_imap_port() -> u16 {
    993
}

impl SourceDef {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceDef::Sftp { .. } => "sftp",
            SourceDef::Imap { .. } => "imap",
            SourceDef::Local { .. } => "local",
        }
    }

    pub fn location(&self) -> &str {
        match self {
            SourceDef::Sftp { location, .. }
            | SourceDef::Imap { location, .. }
            | SourceDef::Local { location, .. } => location,
        }
    }

    fn cleanup(&self) -> Result<Option<Cleanup>> {
        let (remove, archive) = match self {
            SourceDef::Sftp {
                remove_after_upload,
                archive_to,
                ..
            }
            | SourceDef::Imap {
                remove_after_upload,
                archive_to,
                ..
            }
            | SourceDef::Local {
                remove_after_upload,
                archive_to,
                ..
            } => (*remove_after_upload, archive_to.clone()),
        };
        match (remove, archive) {
            (true, Some(_)) => Err(Error::Config(
                "remove_after_upload and archive_to are mutually exclusive".to_string(),
            )),
            (true, None) => Ok(Some(Cleanup::Remove)),
            (false, Some(destination)) => Ok(Some(Cleanup::Archive(destination))),
            (false, None) => Ok(None),
        }
    }

    fn build(&self) -> Result<Arc<dyn Source>> {
        let source: Arc<dyn Source> = match self {
            SourceDef::Sftp {
                host,
                port,
                username,
                password_env,
                host_key_fingerprint,
                connect_timeout_secs,
                ..
            } => {
                let mut settings = SftpSettings::new(host, username, secret_var(password_env)?);
                settings.port = *port;
                settings.host_key_fingerprint = host_key_fingerprint.clone();
                if let Some(secs) = connect_timeout_secs {
                    settings.connect_timeout = Duration::from_secs(*secs);
                }
                Arc::new(SftpSource::new(settings))
            }
            SourceDef::Imap {
                host,
                port,
                username,
                password_env,
                connect_timeout_secs,
                ..
            } => {
                let mut settings = ImapSettings::new(host, username, secret_var(password_env)?);
                settings.port = *port;
                if let Some(secs) = connect_timeout_secs {
                    settings.connect_timeout = Duration::from_secs(*secs);
                }
                Arc::new(ImapSource::new(settings))
            }
            SourceDef::Local { root, .. } => Arc::new(LocalDirSource::new(root)),
        };
        Ok(source)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum SinkDef {
    S3 {
        bucket: String,
        region: String,
        endpoint: Option<String>,
        #[serde(default)]
        path_style: bool,
        access_key_env: Option<String>,
        secret_key_env: Option<String>,
    },
    Local {
        root: PathBuf,
    },
}

impl SinkDef {
    async fn build(&self) -> Result<Arc<dyn Sink>> {
        let sink: Arc<dyn Sink> = match self {
            SinkDef::S3 {
                bucket,
                region,
                endpoint,
                path_style,
                access_key_env,
                secret_key_env,
            } => {
                let settings = S3Settings {
                    bucket: bucket.clone(),
                    region: region.clone(),
                    endpoint: endpoint.clone(),
                    path_style: *path_style,
                    access_key: access_key_env.as_deref().map(secret_var).transpose()?,
                    secret_key: secret_key_env.as_deref().map(secret_var).transpose()?,
                };
                Arc::new(S3Sink::new(settings).await?)
            }
            SinkDef::Local { root } => Arc::new(LocalObjectStore::new(root)),
        };
        Ok(sink)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessorDef {
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Process-wide inputs a workflow definition does not carry.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub scratch: Scratch,
    /// Private key for reading encrypted staged files.
    pub decrypt_as: Option<Identity>,
}

/// Loaded workflow definitions, indexed by name.
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, WorkflowFile>,
}

impl WorkflowRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every `.toml` file in `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Config(format!("cannot read workflow dir {}: {e}", dir.display()))
        })?;

        let mut registry = Self::empty();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                let content = std::fs::read_to_string(&path)?;
                let file = Self::parse(&content).map_err(|e| match e {
                    Error::Config(msg) => {
                        Error::Config(format!("bad workflow config {}: {msg}", path.display()))
                    }
                    other => other,
                })?;
                registry.insert(file)?;
            }
        }
        Ok(registry)
    }

    /// Parse and check one workflow definition.
    pub fn parse(content: &str) -> Result<WorkflowFile> {
        let file: WorkflowFile =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        Regex::new(&file.workflow.pattern)
            .map_err(|e| Error::Config(format!("invalid pattern: {e}")))?;
        file.source.cleanup()?;
        if let Some(key) = &file.workflow.encrypt_to {
            Recipient::from_base64(key)
                .map_err(|e| Error::Config(format!("invalid encrypt_to key: {e}")))?;
        }
        Ok(file)
    }

    pub fn insert(&mut self, file: WorkflowFile) -> Result<()> {
        let name = file.workflow.name.clone();
        if self.workflows.contains_key(&name) {
            return Err(Error::Config(format!("workflow {name:?} is defined twice")));
        }
        self.workflows.insert(name, file);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowFile> {
        self.workflows.get(name)
    }

    /// Workflow names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workflows.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Resolve secrets, connect clients and assemble the configuration
    /// for one workflow.
    pub async fn build(&self, name: &str, options: &BuildOptions) -> Result<WorkflowConfig> {
        let file = self
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("workflow {name}")))?;
        let meta = &file.workflow;
        let (default_upload, default_process) = WorkflowConfig::default_queue_names(&meta.name);

        let pattern = Regex::new(&meta.pattern)
            .map_err(|e| Error::Config(format!("invalid pattern: {e}")))?;
        let encrypt_to = meta
            .encrypt_to
            .as_deref()
            .map(Recipient::from_base64)
            .transpose()?;

        Ok(WorkflowConfig {
            name: meta.name.clone(),
            upload_queue: meta.upload_queue.clone().unwrap_or(default_upload),
            process_queue: meta.process_queue.clone().unwrap_or(default_process),
            source: file.source.build()?,
            location: file.source.location().to_string(),
            pattern,
            sink: file.sink.build().await?,
            object_directory: meta.object_directory.clone(),
            transforms: TransformConfig {
                compress: meta.compress,
                encrypt_to,
                decrypt_as: options.decrypt_as.clone(),
            },
            scratch: options.scratch.clone(),
            cleanup: file.source.cleanup()?,
            processor: Arc::new(
                CommandProcessor::new(&file.processor.command, &meta.name)
                    .args(file.processor.args.iter().cloned()),
            ),
        })
    }
}

fn secret_var(name: &str) -> Result<SecretString> {
    std::env::var(name)
        .map(SecretString::from)
        .map_err(|_| Error::Config(format!("environment variable {name} is not set")))
}
