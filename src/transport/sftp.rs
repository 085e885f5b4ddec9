//! SFTP source over russh.
//!
//! A connection is opened per operation and closed afterwards; runs are
//! periodic and short, so nothing is pooled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use russh::client;
use russh_sftp::client::SftpSession;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use super::{Source, basename};
use crate::error::{Error, Result};
use crate::transform::{Artifact, Scratch};

#[derive(Debug, Clone)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Expected SHA-256 host key fingerprint. When unset any key is
    /// accepted with a warning.
    pub host_key_fingerprint: Option<String>,
    pub connect_timeout: Duration,
}

impl SftpSettings {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            password,
            host_key_fingerprint: None,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// SSH client handler: host key policy only.
struct HostKeyCheck {
    expected: Option<String>,
}

#[async_trait]
impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        match &self.expected {
            Some(expected) => {
                let matches = expected.trim_start_matches("SHA256:") == fingerprint;
                if !matches {
                    warn!(%fingerprint, "SFTP host key does not match the configured fingerprint");
                }
                Ok(matches)
            }
            None => {
                warn!(%fingerprint, "no SFTP host key fingerprint configured, accepting key");
                Ok(true)
            }
        }
    }
}

/// An open SFTP session. The SSH handle must outlive the session.
struct Connection {
    sftp: SftpSession,
    _ssh: client::Handle<HostKeyCheck>,
}

impl Connection {
    async fn close(self) {
        if let Err(e) = self.sftp.close().await {
            debug!("sftp close: {e}");
        }
    }
}

pub struct SftpSource {
    settings: SftpSettings,
}

impl SftpSource {
    pub fn new(settings: SftpSettings) -> Self {
        Self { settings }
    }

    async fn open(&self) -> Result<Connection> {
        let s = &self.settings;
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(s.connect_timeout),
            ..Default::default()
        });
        let handler = HostKeyCheck {
            expected: s.host_key_fingerprint.clone(),
        };

        let mut ssh = tokio::time::timeout(
            s.connect_timeout,
            client::connect(config, (s.host.as_str(), s.port), handler),
        )
        .await
        .map_err(|_| Error::transport("sftp", format!("connect to {} timed out", s.host)))?
        .map_err(|e| Error::transport("sftp", format!("connect to {}: {e}", s.host)))?;

        let authenticated = ssh
            .authenticate_password(s.username.as_str(), s.password.expose_secret())
            .await
            .map_err(|e| Error::transport("sftp", format!("authentication: {e}")))?;
        if !authenticated {
            return Err(Error::transport(
                "sftp",
                format!("authentication rejected for {}@{}", s.username, s.host),
            ));
        }

        let channel = ssh
            .channel_open_session()
            .await
            .map_err(|e| Error::transport("sftp", format!("open channel: {e}")))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| Error::transport("sftp", format!("request subsystem: {e}")))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| Error::transport("sftp", format!("start session: {e}")))?;

        debug!(host = %s.host, "SFTP session opened");
        Ok(Connection { sftp, _ssh: ssh })
    }
}

#[async_trait]
impl Source for SftpSource {
    fn kind(&self) -> &'static str {
        "sftp"
    }

    async fn list(&self, location: &str, pattern: &Regex) -> Result<Vec<String>> {
        let conn = self.open().await?;
        let listing = conn
            .sftp
            .read_dir(location)
            .await
            .map_err(|e| Error::transport("sftp", format!("list {location}: {e}")));
        conn.close().await;

        let mut paths: Vec<String> = listing?
            .filter(|entry| !entry.file_type().is_dir())
            .map(|entry| entry.file_name())
            .filter(|name| name != "." && name != "..")
            .map(|name| format!("{}/{}", location.trim_end_matches('/'), name))
            .filter(|path| pattern.is_match(path))
            .collect();
        paths.sort();

        info!(location, matched = paths.len(), "SFTP folder listed");
        Ok(paths)
    }

    async fn fetch(&self, id: &str, _pattern: &Regex, scratch: &Scratch) -> Result<Vec<Artifact>> {
        let conn = self.open().await?;
        let data = conn
            .sftp
            .read(id)
            .await
            .map_err(|e| Error::transport("sftp", format!("read {id}: {e}")));
        conn.close().await;

        let artifact = Artifact::from_bytes(scratch, basename(id), &data?)?;
        debug!(id, bytes = artifact.len()?, "SFTP file fetched");
        Ok(vec![artifact])
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let conn = self.open().await?;
        let result = conn
            .sftp
            .remove_file(id)
            .await
            .map_err(|e| Error::transport("sftp", format!("remove {id}: {e}")));
        conn.close().await;
        result?;
        info!(id, "SFTP file removed");
        Ok(())
    }

    async fn archive(&self, id: &str, destination: &str) -> Result<()> {
        let target = format!("{}/{}", destination.trim_end_matches('/'), basename(id));
        let conn = self.open().await?;
        let result = conn
            .sftp
            .rename(id, target.as_str())
            .await
            .map_err(|e| Error::transport("sftp", format!("move {id} to {target}: {e}")));
        conn.close().await;
        result?;
        info!(id, %target, "SFTP file archived");
        Ok(())
    }
}
