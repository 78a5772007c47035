//! Identity and recipient types plus identity key files
//!
//! Key files use the `age-keygen` layout:
//!
//! ```text
//! # created: 2026-01-01T00:00:00+00:00
//! # public key: age1...
//! AGE-SECRET-KEY-1...
//! ```

use age::secrecy::ExposeSecret;
use keyrot_core::utils::{write_atomic, MODE_OWNER_RW};
use keyrot_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Secret half of an age X25519 keypair
pub struct Identity {
    inner: age::x25519::Identity,
}

impl Identity {
    /// Generate a fresh identity, independent of any prior key
    pub fn generate() -> Self {
        Self {
            inner: age::x25519::Identity::generate(),
        }
    }

    /// The recipient (public key) for this identity
    pub fn to_public(&self) -> Recipient {
        Recipient {
            encoded: self.inner.to_public().to_string(),
        }
    }

    /// Bech32 secret key, held in a zeroizing buffer
    pub fn to_secret_string(&self) -> Zeroizing<String> {
        Zeroizing::new(self.inner.to_string().expose_secret().to_string())
    }

    pub(crate) fn as_age(&self) -> &age::x25519::Identity {
        &self.inner
    }
}

impl FromStr for Identity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let inner = s
            .trim()
            .parse::<age::x25519::Identity>()
            .map_err(|e| Error::configuration(format!("Failed to parse age identity: {}", e)))?;
        Ok(Self { inner })
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity([REDACTED] for {})", self.to_public())
    }
}

/// Public half of an age X25519 keypair
///
/// Stored in its canonical `age1...` encoding; parsing validates it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Recipient {
    encoded: String,
}

impl Recipient {
    /// Canonical `age1...` encoding
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub(crate) fn to_age(&self) -> std::result::Result<age::x25519::Recipient, String> {
        self.encoded
            .parse::<age::x25519::Recipient>()
            .map_err(|e| format!("Invalid recipient '{}': {}", self.encoded, e))
    }
}

impl FromStr for Recipient {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parsed = s
            .trim()
            .parse::<age::x25519::Recipient>()
            .map_err(|e| Error::configuration(format!("Invalid recipient '{}': {}", s, e)))?;
        Ok(Self {
            encoded: parsed.to_string(),
        })
    }
}

impl TryFrom<String> for Recipient {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Recipient> for String {
    fn from(value: Recipient) -> Self {
        value.encoded
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl fmt::Debug for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Recipient({})", self.encoded)
    }
}

/// An identity together with its recipient
pub struct KeyPair {
    pub identity: Identity,
    pub recipient: Recipient,
}

impl KeyPair {
    /// Pair an identity with its derived recipient
    pub fn from_identity(identity: Identity) -> Self {
        let recipient = identity.to_public();
        Self {
            identity,
            recipient,
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("identity", &"[REDACTED]")
            .field("recipient", &self.recipient)
            .finish()
    }
}

/// Read an identity from an age key file
///
/// Comment lines are skipped; the first remaining line is the secret key.
pub fn read_identity_file(path: &Path) -> Result<Identity> {
    let content = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::configuration(format!("Identity file not found: {}", path.display()))
        } else {
            Error::io_at(path, e)
        }
    })?);

    let key_line = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .ok_or_else(|| {
            Error::configuration(format!("Identity file is empty: {}", path.display()))
        })?;

    key_line.parse::<Identity>().map_err(|_| {
        Error::configuration(format!(
            "Identity file does not contain an age secret key: {}",
            path.display()
        ))
    })
}

/// Write an identity key file with owner-only permissions
///
/// The write is atomic; a partially written key file is never observed.
pub fn write_identity_file(path: &Path, identity: &Identity) -> Result<()> {
    let mut content = Zeroizing::new(String::new());
    content.push_str(&format!(
        "# created: {}\n# public key: {}\n",
        chrono::Utc::now().to_rfc3339(),
        identity.to_public()
    ));
    content.push_str(&identity.to_secret_string());
    content.push('\n');

    write_atomic(path, content.as_bytes(), Some(MODE_OWNER_RW))
}
