//! Transport capabilities.
//!
//! A [`Source`] is where files are discovered (SFTP directory, IMAP
//! mailbox, local directory). A [`Sink`] is the object store they are
//! staged in (S3, local directory). Identifiers returned by
//! [`Source::list`] are stored verbatim as queue keys, so they must
//! round-trip unambiguously.

pub mod imap;
pub mod local;
pub mod locator;
pub mod s3;
pub mod sftp;

pub use imap::{ImapSettings, ImapSource};
pub use local::{LocalDirSource, LocalObjectStore};
pub use locator::ImapLocator;
pub use s3::{S3Settings, S3Sink};
pub use sftp::{SftpSettings, SftpSource};

use async_trait::async_trait;
use regex::Regex;

use crate::error::{Error, Result};
use crate::transform::{Artifact, Scratch};

/// Cleanup applied to a source item once it is safely staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cleanup {
    /// Delete the item from the source.
    Remove,
    /// Move the item to another folder or mailbox on the source.
    Archive(String),
}

impl std::fmt::Display for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cleanup::Remove => write!(f, "remove"),
            Cleanup::Archive(dest) => write!(f, "archive to {dest}"),
        }
    }
}

/// A remote location files are discovered in.
#[async_trait]
pub trait Source: Send + Sync {
    /// Short transport name for logs and errors.
    fn kind(&self) -> &'static str;

    /// Identifiers of the items at `location` matching `pattern`.
    async fn list(&self, location: &str, pattern: &Regex) -> Result<Vec<String>>;

    /// Download an item. One identifier may yield zero or more artifacts
    /// (a mail message with several attachments). Artifact names become
    /// object names in the sink.
    async fn fetch(&self, id: &str, pattern: &Regex, scratch: &Scratch) -> Result<Vec<Artifact>>;

    async fn remove(&self, id: &str) -> Result<()> {
        Err(unsupported(self.kind(), "remove", id))
    }

    async fn archive(&self, id: &str, destination: &str) -> Result<()> {
        let _ = destination;
        Err(unsupported(self.kind(), "archive", id))
    }

    /// Apply a [`Cleanup`] action.
    async fn cleanup(&self, id: &str, cleanup: &Cleanup) -> Result<()> {
        match cleanup {
            Cleanup::Remove => self.remove(id).await,
            Cleanup::Archive(destination) => self.archive(id, destination).await,
        }
    }
}

/// An object store artifacts are staged in.
#[async_trait]
pub trait Sink: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Write an object. Writing the same key again overwrites it.
    async fn put(&self, key: &str, artifact: &Artifact) -> Result<()>;

    /// Download an object into an artifact named after the key's last
    /// segment.
    async fn get(&self, key: &str, scratch: &Scratch) -> Result<Artifact>;
}

fn unsupported(transport: &'static str, action: &str, id: &str) -> Error {
    Error::transport(transport, format!("{action} is not supported (item {id})"))
}

/// Join an object directory and a file name into an object key.
pub fn object_key(directory: &str, name: &str) -> String {
    let directory = directory.trim_end_matches('/');
    if directory.is_empty() {
        name.to_string()
    } else {
        format!("{directory}/{name}")
    }
}

/// Last `/`-separated segment of a key or path.
pub fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
