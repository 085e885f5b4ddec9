//! Recipient encryption using X25519 ECDH + HKDF-SHA256 + ChaCha20-Poly1305.
//!
//! Every artifact gets a fresh ephemeral keypair. The symmetric key is
//! derived from the ECDH shared secret, salted with the recipient's public
//! key. Only the holder of the recipient's private key can decrypt.
//!
//! Wire format:
//! `MAGIC(4) || ephemeral_public(32) || nonce(12) || ciphertext || tag(16)`

use std::io::{Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use super::Transform;
use crate::error::{Error, Result};

pub const ENCRYPT_SUFFIX: &str = ".gpg";

const MAGIC: &[u8; 4] = b"SQE1";
const HKDF_INFO: &[u8] = b"stageq-artifact-v1";
const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const HEADER_SIZE: usize = MAGIC.len() + KEY_SIZE + NONCE_SIZE;

/// Public half of a recipient identity.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Recipient(PublicKey);

impl Recipient {
    /// Parse a base64-encoded X25519 public key.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        Ok(Self(PublicKey::from(decode_key(encoded.trim(), "recipient")?)))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0.as_bytes())
    }
}

impl std::fmt::Debug for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Recipient").field(&self.to_base64()).finish()
    }
}

/// Private half of a recipient identity.
#[derive(Clone)]
pub struct Identity(StaticSecret);

impl Identity {
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(rand::thread_rng()))
    }

    /// Parse a base64-encoded X25519 private key.
    pub fn from_secret(encoded: &SecretString) -> Result<Self> {
        Ok(Self(StaticSecret::from(decode_key(
            encoded.expose_secret().trim(),
            "identity",
        )?)))
    }

    pub fn recipient(&self) -> Recipient {
        Recipient(PublicKey::from(&self.0))
    }

    pub fn to_secret(&self) -> SecretString {
        SecretString::from(STANDARD.encode(self.0.to_bytes()))
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("recipient", &self.recipient())
            .finish_non_exhaustive()
    }
}

fn decode_key(encoded: &str, what: &str) -> Result<[u8; KEY_SIZE]> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| Error::Config(format!("{what} key is not valid base64: {e}")))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        Error::Config(format!(
            "{what} key must be {KEY_SIZE} bytes, got {}",
            b.len()
        ))
    })
}

/// Encrypts to a recipient; decrypts when the matching identity is known.
#[derive(Debug, Clone)]
pub struct Encrypt {
    recipient: Recipient,
    identity: Option<Identity>,
}

impl Encrypt {
    /// Encrypt-only.
    pub fn to(recipient: Recipient) -> Self {
        Self {
            recipient,
            identity: None,
        }
    }

    /// Encrypt to, and decrypt as, the given identity.
    pub fn with_identity(identity: Identity) -> Self {
        Self {
            recipient: identity.recipient(),
            identity: Some(identity),
        }
    }

    pub fn recipient(&self) -> Recipient {
        self.recipient
    }

    fn derive_key(shared: &[u8], recipient: &Recipient) -> Result<[u8; KEY_SIZE]> {
        let hkdf = Hkdf::<Sha256>::new(Some(recipient.0.as_bytes()), shared);
        let mut key = [0u8; KEY_SIZE];
        hkdf.expand(HKDF_INFO, &mut key)
            .map_err(|e| Error::transform("encrypt", format!("HKDF expand failed: {e}")))?;
        Ok(key)
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let ephemeral = EphemeralSecret::random_from_rng(rand::thread_rng());
        let ephemeral_public = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&self.recipient.0);
        let key = Self::derive_key(shared.as_bytes(), &self.recipient)?;

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| Error::transform("encrypt", format!("encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
        sealed.extend_from_slice(MAGIC);
        sealed.extend_from_slice(ephemeral_public.as_bytes());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        let identity = self.identity.as_ref().ok_or_else(|| {
            Error::transform(
                "encrypt",
                "no private key configured, cannot decrypt",
            )
        })?;

        if sealed.len() < HEADER_SIZE + TAG_SIZE {
            return Err(Error::transform(
                "encrypt",
                format!("ciphertext too short ({} bytes)", sealed.len()),
            ));
        }
        if &sealed[..MAGIC.len()] != MAGIC {
            return Err(Error::transform("encrypt", "not a stageq encrypted artifact"));
        }

        let (header, ciphertext) = sealed.split_at(HEADER_SIZE);
        let mut ephemeral = [0u8; KEY_SIZE];
        ephemeral.copy_from_slice(&header[MAGIC.len()..MAGIC.len() + KEY_SIZE]);
        let nonce = &header[MAGIC.len() + KEY_SIZE..];

        let shared = identity.0.diffie_hellman(&PublicKey::from(ephemeral));
        let key = Self::derive_key(shared.as_bytes(), &identity.recipient())?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        cipher.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|_| {
            Error::transform(
                "encrypt",
                "decryption failed: wrong key or corrupted data",
            )
        })
    }
}

impl Transform for Encrypt {
    fn name(&self) -> &'static str {
        "encrypt"
    }

    fn suffix(&self) -> &str {
        ENCRYPT_SUFFIX
    }

    fn encode(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<()> {
        let mut plaintext = Vec::new();
        input.read_to_end(&mut plaintext)?;
        output.write_all(&self.seal(&plaintext)?)?;
        Ok(())
    }

    fn decode(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<()> {
        let mut sealed = Vec::new();
        input.read_to_end(&mut sealed)?;
        output.write_all(&self.open(&sealed)?)?;
        Ok(())
    }
}
