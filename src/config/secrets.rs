//! Secret handling.

pub use secrecy::{ExposeSecret, SecretString};

/// Mask all but the last four characters, for confirming which key is
/// configured without printing it.
pub fn redacted(secret: &SecretString) -> String {
    let exposed = secret.expose_secret();
    let count = exposed.chars().count();
    if count <= 8 {
        return "*".repeat(count);
    }
    let tail: String = exposed.chars().skip(count - 4).collect();
    format!("{}{tail}", "*".repeat(count - 4))
}
