//! Reversible byte transforms applied to artifacts in transit.
//!
//! A [`TransformChain`] applies its transforms in order on the way into
//! the object store and undoes them in reverse on the way out. Each step
//! appends its suffix to the artifact name (`a.csv` -> `a.csv.gz` ->
//! `a.csv.gz.gpg`); decoding strips them in reverse. The suffixes are part
//! of the object key, so they are part of the contract.

pub mod artifact;
pub mod compress;
pub mod encrypt;

pub use artifact::{Artifact, Scratch};
pub use compress::Gzip;
pub use encrypt::{Encrypt, Identity, Recipient};

use std::io::{BufReader, BufWriter, Read, Write};
use std::sync::Arc;

use crate::error::{Error, Result};

/// One invertible byte transform.
pub trait Transform: Send + Sync + std::fmt::Debug {
    /// Short name for logs and errors.
    fn name(&self) -> &'static str;

    /// Appended to the artifact name on encode, stripped on decode.
    fn suffix(&self) -> &str;

    fn encode(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<()>;

    fn decode(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<()>;
}

/// Which transforms a workflow applies.
#[derive(Debug, Clone, Default)]
pub struct TransformConfig {
    pub compress: bool,
    /// Encrypt on write to this recipient.
    pub encrypt_to: Option<Recipient>,
    /// Private key used to decrypt on read. Ignored unless `encrypt_to`
    /// is set.
    pub decrypt_as: Option<Identity>,
}

/// Ordered transforms plus the scratch space their artifacts live in.
#[derive(Debug, Clone, Default)]
pub struct TransformChain {
    steps: Vec<Arc<dyn Transform>>,
    scratch: Scratch,
}

impl TransformChain {
    /// Identity chain: artifacts pass through unchanged.
    pub fn new(scratch: Scratch) -> Self {
        Self {
            steps: Vec::new(),
            scratch,
        }
    }

    /// Build the chain in write order: compress, then encrypt. Encryption
    /// is on only when a recipient is configured.
    pub fn from_config(config: &TransformConfig, scratch: Scratch) -> Result<Self> {
        let mut chain = Self::new(scratch);
        if config.compress {
            chain = chain.then(Gzip::new());
        }
        match (&config.encrypt_to, &config.decrypt_as) {
            (Some(recipient), Some(identity)) => {
                if identity.recipient() != *recipient {
                    return Err(Error::Config(
                        "decryption key does not belong to the encryption recipient".to_string(),
                    ));
                }
                chain = chain.then(Encrypt::with_identity(identity.clone()));
            }
            (Some(recipient), None) => chain = chain.then(Encrypt::to(*recipient)),
            (None, _) => {}
        }
        Ok(chain)
    }

    /// Append a transform to the write order.
    pub fn then(mut self, transform: impl Transform + 'static) -> Self {
        self.steps.push(Arc::new(transform));
        self
    }

    pub fn scratch(&self) -> &Scratch {
        &self.scratch
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The name an artifact will carry after [`TransformChain::encode`].
    pub fn encoded_name(&self, name: &str) -> String {
        self.steps.iter().fold(name.to_string(), |mut acc, step| {
            acc.push_str(step.suffix());
            acc
        })
    }

    /// Apply every transform in write order. Each intermediate artifact is
    /// dropped (and removed) as soon as the next one is written.
    pub fn encode(&self, artifact: Artifact) -> Result<Artifact> {
        let mut current = artifact;
        for step in &self.steps {
            let name = format!("{}{}", current.name(), step.suffix());
            current = self.rewrite(step.as_ref(), &current, &name, Direction::Encode)?;
        }
        Ok(current)
    }

    /// Undo every transform in reverse order, stripping suffixes as it goes.
    pub fn decode(&self, artifact: Artifact) -> Result<Artifact> {
        let mut current = artifact;
        for step in self.steps.iter().rev() {
            let name = current
                .name()
                .strip_suffix(step.suffix())
                .filter(|stripped| !stripped.is_empty())
                .ok_or_else(|| {
                    Error::transform(
                        step.name(),
                        format!(
                            "artifact {:?} does not end with {:?}",
                            current.name(),
                            step.suffix()
                        ),
                    )
                })?
                .to_string();
            current = self.rewrite(step.as_ref(), &current, &name, Direction::Decode)?;
        }
        Ok(current)
    }

    /// [`TransformChain::encode`] on the blocking pool.
    pub async fn encode_blocking(&self, artifact: Artifact) -> Result<Artifact> {
        let chain = self.clone();
        tokio::task::spawn_blocking(move || chain.encode(artifact))
            .await
            .map_err(|e| Error::Other(format!("transform task failed: {e}")))?
    }

    /// [`TransformChain::decode`] on the blocking pool.
    pub async fn decode_blocking(&self, artifact: Artifact) -> Result<Artifact> {
        let chain = self.clone();
        tokio::task::spawn_blocking(move || chain.decode(artifact))
            .await
            .map_err(|e| Error::Other(format!("transform task failed: {e}")))?
    }

    fn rewrite(
        &self,
        step: &dyn Transform,
        input: &Artifact,
        name: &str,
        direction: Direction,
    ) -> Result<Artifact> {
        let output = Artifact::create(&self.scratch, name)?;
        let mut reader = BufReader::new(std::fs::File::open(input.path())?);
        let mut writer = BufWriter::new(std::fs::File::create(output.path())?);
        match direction {
            Direction::Encode => step.encode(&mut reader, &mut writer)?,
            Direction::Decode => step.decode(&mut reader, &mut writer)?,
        }
        writer.flush()?;
        tracing::debug!(
            transform = step.name(),
            ?direction,
            from = input.name(),
            to = name,
            "artifact transformed"
        );
        Ok(output)
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Encode,
    Decode,
}
