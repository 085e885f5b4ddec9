//! Named temporary files.
//!
//! An [`Artifact`] is a single file living in its own temporary directory.
//! The directory is removed when the artifact is dropped, so every step of
//! a transfer cleans up after itself on success and failure alike.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Where artifacts are created. Defaults to the system temp dir.
#[derive(Debug, Clone, Default)]
pub struct Scratch {
    base: Option<PathBuf>,
}

impl Scratch {
    pub fn in_dir(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }

    pub fn base(&self) -> Option<&Path> {
        self.base.as_deref()
    }

    fn tempdir(&self) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("stageq-");
        let dir = match &self.base {
            Some(base) => {
                std::fs::create_dir_all(base)?;
                builder.tempdir_in(base)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

/// A file with a logical name, removed on drop.
#[derive(Debug)]
pub struct Artifact {
    dir: tempfile::TempDir,
    name: String,
}

impl Artifact {
    /// Reserve an empty artifact. The caller writes to [`Artifact::path`].
    pub fn create(scratch: &Scratch, name: &str) -> Result<Self> {
        validate_name(name)?;
        Ok(Self {
            dir: scratch.tempdir()?,
            name: name.to_string(),
        })
    }

    pub fn from_bytes(scratch: &Scratch, name: &str, bytes: &[u8]) -> Result<Self> {
        let artifact = Self::create(scratch, name)?;
        std::fs::write(artifact.path(), bytes)?;
        Ok(artifact)
    }

    /// Copy an existing file in under a new name.
    pub fn copy_from(scratch: &Scratch, name: &str, source: &Path) -> Result<Self> {
        let artifact = Self::create(scratch, name)?;
        std::fs::copy(source, artifact.path())?;
        Ok(artifact)
    }

    /// Logical file name, e.g. `a.csv.gz`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join(&self.name)
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.path())?)
    }

    pub fn len(&self) -> Result<u64> {
        Ok(std::fs::metadata(self.path())?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Plain file names only: no separators, no dot segments.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidArtifactName(name.to_string()));
    }
    Ok(())
}

/// Turn an arbitrary remote file name into something [`Artifact`] accepts.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "unnamed".to_string(),
        trimmed => trimmed.to_string(),
    }
}
