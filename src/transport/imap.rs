//! IMAP source: mail messages as items, attachments as artifacts.
//!
//! Each message in a mailbox is listed as an [`ImapLocator`]. Fetching a
//! message yields one artifact per attachment whose file name matches the
//! workflow pattern, named `<capture time>_<file name>` so attachments
//! with the same name from different messages do not collide in the sink.
//! A name repeated within one message gets a counter:
//! `<capture time>_2_<file name>`.

use std::collections::HashMap;

use async_imap::Session;
use async_native_tls::TlsStream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mail_parser::{MessageParser, MimeHeaders};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::Source;
use super::locator::ImapLocator;
use crate::error::{Error, Result};
use crate::transform::artifact::sanitize_name;
use crate::transform::{Artifact, Scratch};

/// Capture-time prefix format for attachment object names.
pub const CAPTURE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone)]
pub struct ImapSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub connect_timeout: Duration,
}

impl ImapSettings {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            host: host.into(),
            port: 993,
            username: username.into(),
            password,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

type ImapSession = Session<TlsStream<TcpStream>>;

pub struct ImapSource {
    settings: ImapSettings,
}

impl ImapSource {
    pub fn new(settings: ImapSettings) -> Self {
        Self { settings }
    }

    async fn open(&self) -> Result<ImapSession> {
        let s = &self.settings;
        let tcp = tokio::time::timeout(s.connect_timeout, TcpStream::connect((s.host.as_str(), s.port)))
            .await
            .map_err(|_| Error::transport("imap", format!("connect to {} timed out", s.host)))?
            .map_err(|e| Error::transport("imap", format!("connect to {}: {e}", s.host)))?;
        let tls = async_native_tls::TlsConnector::new()
            .connect(s.host.as_str(), tcp)
            .await
            .map_err(|e| Error::transport("imap", format!("TLS handshake with {}: {e}", s.host)))?;

        let client = async_imap::Client::new(tls);
        let session = client
            .login(&s.username, s.password.expose_secret())
            .await
            .map_err(|(e, _)| Error::transport("imap", format!("login: {e}")))?;

        debug!(host = %s.host, "IMAP session opened");
        Ok(session)
    }

    async fn close(mut session: ImapSession) {
        if let Err(e) = session.logout().await {
            debug!("imap logout: {e}");
        }
    }

    /// Select the locator's mailbox and confirm it is in the same epoch.
    async fn select(session: &mut ImapSession, locator: &ImapLocator) -> Result<()> {
        let mailbox = session
            .select(&locator.mailbox)
            .await
            .map_err(|e| Error::transport("imap", format!("select {}: {e}", locator.mailbox)))?;
        let current = mailbox.uid_validity.ok_or_else(|| {
            Error::transport("imap", format!("{} reports no UIDVALIDITY", locator.mailbox))
        })?;
        locator.check_epoch(current)
    }
}

/// Object name for one attachment. `seen` counts names already used in
/// the same message.
pub fn attachment_object_name(prefix: &str, name: &str, seen: &mut HashMap<String, usize>) -> String {
    let name = sanitize_name(name);
    let count = seen.entry(name.clone()).or_insert(0);
    *count += 1;
    if *count == 1 {
        format!("{prefix}_{name}")
    } else {
        format!("{prefix}_{count}_{name}")
    }
}

#[async_trait]
impl Source for ImapSource {
    fn kind(&self) -> &'static str {
        "imap"
    }

    /// Every message in the mailbox. The pattern applies to attachment
    /// names and is used at fetch time.
    async fn list(&self, mailbox: &str, _pattern: &Regex) -> Result<Vec<String>> {
        let mut session = self.open().await?;
        let listed = async {
            let selected = session
                .select(mailbox)
                .await
                .map_err(|e| Error::transport("imap", format!("select {mailbox}: {e}")))?;
            let uid_validity = selected.uid_validity.ok_or_else(|| {
                Error::transport("imap", format!("{mailbox} reports no UIDVALIDITY"))
            })?;
            let uids = session
                .uid_search("ALL")
                .await
                .map_err(|e| Error::transport("imap", format!("search {mailbox}: {e}")))?;
            Ok::<_, Error>((uid_validity, uids))
        }
        .await;
        Self::close(session).await;

        let (uid_validity, uids) = listed?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();

        info!(mailbox, messages = uids.len(), uid_validity, "IMAP mailbox listed");
        Ok(uids
            .into_iter()
            .map(|uid| ImapLocator::new(mailbox, uid, uid_validity).to_string())
            .collect())
    }

    async fn fetch(&self, id: &str, pattern: &Regex, scratch: &Scratch) -> Result<Vec<Artifact>> {
        let locator: ImapLocator = id.parse()?;
        let mut session = self.open().await?;
        let fetched = async {
            Self::select(&mut session, &locator).await?;
            let messages: Vec<_> = session
                .uid_fetch(locator.uid.to_string(), "(BODY.PEEK[] INTERNALDATE)")
                .await
                .map_err(|e| Error::transport("imap", format!("fetch {id}: {e}")))?
                .try_collect()
                .await
                .map_err(|e| Error::transport("imap", format!("fetch {id}: {e}")))?;
            Ok::<_, Error>(messages)
        }
        .await;
        Self::close(session).await;

        let messages = fetched?;
        let Some(message) = messages.first() else {
            return Err(Error::transport("imap", format!("message {id} no longer exists")));
        };
        let raw = message
            .body()
            .ok_or_else(|| Error::transport("imap", format!("message {id} has no body")))?;
        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| Error::transport("imap", format!("message {id} is not valid MIME")))?;

        let captured_at: DateTime<Utc> = parsed
            .date()
            .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
            .or_else(|| message.internal_date().map(|d| d.with_timezone(&Utc)))
            .unwrap_or_else(|| {
                warn!(id, "message has no date, using the current time");
                Utc::now()
            });
        let prefix = captured_at.format(CAPTURE_TIME_FORMAT).to_string();

        let mut artifacts = Vec::new();
        let mut seen = HashMap::new();
        for part in parsed.attachments() {
            let Some(name) = part.attachment_name() else {
                continue;
            };
            if !pattern.is_match(name) {
                continue;
            }
            let object_name = attachment_object_name(&prefix, name, &mut seen);
            artifacts.push(Artifact::from_bytes(scratch, &object_name, part.contents())?);
        }

        debug!(id, attachments = artifacts.len(), "IMAP message fetched");
        Ok(artifacts)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let locator: ImapLocator = id.parse()?;
        let mut session = self.open().await?;
        let result = async {
            Self::select(&mut session, &locator).await?;
            session
                .uid_store(locator.uid.to_string(), "+FLAGS (\\Deleted)")
                .await
                .map_err(|e| Error::transport("imap", format!("flag {id}: {e}")))?
                .try_collect::<Vec<_>>()
                .await
                .map_err(|e| Error::transport("imap", format!("flag {id}: {e}")))?;
            session
                .uid_expunge(locator.uid.to_string())
                .await
                .map_err(|e| Error::transport("imap", format!("expunge {id}: {e}")))?
                .try_collect::<Vec<_>>()
                .await
                .map_err(|e| Error::transport("imap", format!("expunge {id}: {e}")))?;
            Ok::<_, Error>(())
        }
        .await;
        Self::close(session).await;
        result?;
        info!(id, "IMAP message removed");
        Ok(())
    }

    async fn archive(&self, id: &str, destination: &str) -> Result<()> {
        let locator: ImapLocator = id.parse()?;
        let mut session = self.open().await?;
        let result = async {
            Self::select(&mut session, &locator).await?;
            session
                .uid_mv(locator.uid.to_string(), destination)
                .await
                .map_err(|e| Error::transport("imap", format!("move {id} to {destination}: {e}")))
        }
        .await;
        Self::close(session).await;
        result?;
        info!(id, destination, "IMAP message archived");
        Ok(())
    }
}
