//! Error types for stageq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Network, authentication or protocol failure talking to a remote.
    #[error("{transport} transport error: {message}")]
    Transport {
        transport: &'static str,
        message: String,
    },

    /// Compression, encryption or decryption failure.
    #[error("{transform} transform error: {message}")]
    Transform {
        transform: &'static str,
        message: String,
    },

    /// A stored locator that cannot be parsed. Indicates a data bug, not a
    /// transient failure.
    #[error("malformed locator {locator:?}: {reason}")]
    MalformedLocator { locator: String, reason: String },

    /// The mailbox was reset since the locator was recorded.
    #[error("stale locator {locator:?}: mailbox UIDVALIDITY is now {current}")]
    StaleLocator { locator: String, current: u32 },

    #[error("processing failed for {key}: {message}")]
    Processing { key: String, message: String },

    #[error("invalid artifact name {0:?}")]
    InvalidArtifactName(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn transport(transport: &'static str, err: impl std::fmt::Display) -> Self {
        Error::Transport {
            transport,
            message: err.to_string(),
        }
    }

    pub fn transform(transform: &'static str, err: impl std::fmt::Display) -> Self {
        Error::Transform {
            transform,
            message: err.to_string(),
        }
    }

    /// Stable tag used in events and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Database(_) | Error::Migrate(_) => "database",
            Error::Transport { .. } => "transport",
            Error::Transform { .. } => "transform",
            Error::MalformedLocator { .. } => "malformed_locator",
            Error::StaleLocator { .. } => "stale_locator",
            Error::Processing { .. } => "processing",
            Error::InvalidArtifactName(_) => "invalid_artifact_name",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }

    /// True for errors that point at bad stored data rather than a
    /// transient failure. Retrying these will not help.
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            Error::MalformedLocator { .. }
                | Error::StaleLocator { .. }
                | Error::InvalidArtifactName(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
