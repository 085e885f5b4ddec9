//! Process configuration from environment variables.
//!
//! Read once at startup. Missing required variables fail fast. Secrets
//! are held as [`SecretString`] so they never end up in logs.

pub mod secrets;

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::transform::{Identity, Scratch};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Where artifacts are staged locally. Defaults to the system temp dir.
    pub scratch_dir: Option<PathBuf>,
    /// Base64 X25519 private key for reading encrypted staged files.
    pub decrypt_key: Option<SecretString>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv().ok()` first to pick up a local `.env`.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            scratch_dir: optional_var("STAGEQ_SCRATCH_DIR").map(PathBuf::from),
            decrypt_key: optional_var("STAGEQ_DECRYPT_KEY").map(SecretString::from),
        })
    }

    pub fn scratch(&self) -> Scratch {
        match &self.scratch_dir {
            Some(dir) => Scratch::in_dir(dir),
            None => Scratch::default(),
        }
    }

    /// The decryption identity, if a key is configured.
    pub fn decrypt_identity(&self) -> Result<Option<Identity>> {
        self.decrypt_key
            .as_ref()
            .map(|key| {
                Identity::from_secret(key)
                    .map_err(|e| Error::Config(format!("STAGEQ_DECRYPT_KEY: {e}")))
            })
            .transpose()
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Unset and empty are the same.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
