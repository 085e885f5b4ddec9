//! Local filesystem transports.
//!
//! [`LocalDirSource`] behaves like an SFTP folder and [`LocalObjectStore`]
//! like an object store, both rooted in a local directory. Useful for
//! running a workflow without network services, and as test fakes.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::{Sink, Source, basename};
use crate::error::{Error, Result};
use crate::transform::{Artifact, Scratch};

/// Files in local directories. Identifiers are paths relative to the
/// root, joined the same way SFTP paths are.
#[derive(Debug, Clone)]
pub struct LocalDirSource {
    root: PathBuf,
}

impl LocalDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, id: &str) -> Result<PathBuf> {
        resolve_under(&self.root, id, "local")
    }
}

#[async_trait]
impl Source for LocalDirSource {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn list(&self, location: &str, pattern: &Regex) -> Result<Vec<String>> {
        let dir = self.resolve(location)?;
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Error::transport("local", format!("cannot list {}: {e}", dir.display())))?;

        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();

        Ok(names
            .into_iter()
            .map(|name| join_path(location, &name))
            .filter(|path| pattern.is_match(path))
            .collect())
    }

    async fn fetch(&self, id: &str, _pattern: &Regex, scratch: &Scratch) -> Result<Vec<Artifact>> {
        let path = self.resolve(id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::transport("local", format!("{id} does not exist")));
        }
        let artifact = Artifact::copy_from(scratch, basename(id), &path)?;
        debug!(id, bytes = artifact.len()?, "local file fetched");
        Ok(vec![artifact])
    }

    async fn remove(&self, id: &str) -> Result<()> {
        tokio::fs::remove_file(self.resolve(id)?)
            .await
            .map_err(|e| Error::transport("local", format!("cannot remove {id}: {e}")))
    }

    async fn archive(&self, id: &str, destination: &str) -> Result<()> {
        let from = self.resolve(id)?;
        let dir = self.resolve(destination)?;
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::rename(&from, dir.join(basename(id)))
            .await
            .map_err(|e| Error::transport("local", format!("cannot archive {id}: {e}")))
    }
}

/// Objects stored as files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Filesystem path an object key is stored at.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        resolve_under(&self.root, key, "local")
    }
}

#[async_trait]
impl Sink for LocalObjectStore {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn put(&self, key: &str, artifact: &Artifact) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(artifact.path(), &path)
            .await
            .map_err(|e| Error::transport("local", format!("cannot write {key}: {e}")))?;
        debug!(key, "object written");
        Ok(())
    }

    async fn get(&self, key: &str, scratch: &Scratch) -> Result<Artifact> {
        let path = self.path_for(key)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::transport("local", format!("object {key} does not exist")));
        }
        Artifact::copy_from(scratch, basename(key), &path)
    }
}

fn join_path(location: &str, name: &str) -> String {
    let location = location.trim_end_matches('/');
    if location.is_empty() {
        name.to_string()
    } else {
        format!("{location}/{name}")
    }
}

/// Resolve a relative identifier under `root`, refusing anything that
/// would escape it.
fn resolve_under(root: &Path, id: &str, transport: &'static str) -> Result<PathBuf> {
    let relative = Path::new(id.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(Error::transport(
            transport,
            format!("{id:?} escapes the root directory"),
        ));
    }
    Ok(root.join(relative))
}
