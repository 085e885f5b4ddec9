//! IMAP message locators.
//!
//! A message is identified by mailbox, UID and the mailbox's UIDVALIDITY
//! epoch, rendered as a relative IMAP URL:
//!
//! ```text
//! reports;UID=193/;UIDVALIDITY=19
//! ```
//!
//! The epoch is kept so a locator recorded before a UIDVALIDITY reset can
//! be told apart from one recorded after it. `;` and `%` in the mailbox
//! name are percent-encoded so every mailbox round-trips.

use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImapLocator {
    pub mailbox: String,
    pub uid: u32,
    pub uid_validity: u32,
}

impl ImapLocator {
    pub fn new(mailbox: impl Into<String>, uid: u32, uid_validity: u32) -> Self {
        Self {
            mailbox: mailbox.into(),
            uid,
            uid_validity,
        }
    }

    /// Error unless the mailbox is still in the epoch this locator was
    /// recorded in.
    pub fn check_epoch(&self, current: u32) -> Result<()> {
        if current == self.uid_validity {
            Ok(())
        } else {
            Err(Error::StaleLocator {
                locator: self.to_string(),
                current,
            })
        }
    }
}

impl std::fmt::Display for ImapLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{};UID={}/;UIDVALIDITY={}",
            escape_mailbox(&self.mailbox),
            self.uid,
            self.uid_validity
        )
    }
}

fn escape_mailbox(mailbox: &str) -> String {
    mailbox.replace('%', "%25").replace(';', "%3B")
}

fn unescape_mailbox(escaped: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(at) = rest.find('%') {
        out.push_str(&rest[..at]);
        let code = rest.get(at + 1..at + 3).unwrap_or_default();
        match code.to_ascii_uppercase().as_str() {
            "25" => out.push('%'),
            "3B" => out.push(';'),
            _ => return Err(format!("bad escape {:?} in mailbox", &rest[at..])),
        }
        rest = &rest[at + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

impl FromStr for ImapLocator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = |reason: String| Error::MalformedLocator {
            locator: s.to_string(),
            reason,
        };

        let mut parts = s.split(';');
        let mailbox = parts.next().unwrap_or_default();
        if mailbox.is_empty() {
            return Err(malformed("missing mailbox".to_string()));
        }
        let mailbox = unescape_mailbox(mailbox).map_err(malformed)?;

        let mut uid = None;
        let mut uid_validity = None;
        for part in parts.map(|part| part.trim_end_matches('/')) {
            let (name, value) = part
                .split_once('=')
                .ok_or_else(|| malformed(format!("segment {part:?} is not NAME=VALUE")))?;
            let slot = match name {
                "UID" => &mut uid,
                "UIDVALIDITY" => &mut uid_validity,
                other => return Err(malformed(format!("unknown segment {other:?}"))),
            };
            if slot.is_some() {
                return Err(malformed(format!("duplicate {name} segment")));
            }
            let parsed = value
                .parse::<u32>()
                .map_err(|e| malformed(format!("{name} value {value:?}: {e}")))?;
            *slot = Some(parsed);
        }

        Ok(Self {
            mailbox,
            uid: uid.ok_or_else(|| malformed("missing UID segment".to_string()))?,
            uid_validity: uid_validity
                .ok_or_else(|| malformed("missing UIDVALIDITY segment".to_string()))?,
        })
    }
}
