//! StructuredKV stores using envelope encryption
//!
//! Each value is sealed with ChaCha20-Poly1305 under a random data encryption
//! key (DEK). The DEK is wrapped with the crypto primitive for the store's
//! recipients. Entry names stay readable so stores diff cleanly; each name is
//! bound to its value as associated data.

use crate::crypto::{CryptoError, CryptoPrimitive};
use crate::keys::{Identity, Recipient};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::Zeroizing;

/// Size of the Data Encryption Key (DEK) in bytes (256 bits)
const DEK_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits for ChaCha20-Poly1305)
const NONCE_SIZE: usize = 12;

/// Current structured document version
pub const DOCUMENT_VERSION: u32 = 1;

/// Decrypted StructuredKV entries
pub type Entries = BTreeMap<String, Zeroizing<Vec<u8>>>;

/// Value encryption algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EncryptionAlgorithm {
    #[default]
    #[serde(rename = "chacha20poly1305")]
    ChaCha20Poly1305,
}

/// Metadata block of a StructuredKV document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    pub version: u32,
    #[serde(default)]
    pub algorithm: EncryptionAlgorithm,
    pub recipients: Vec<Recipient>,
    /// Base64 of the DEK encrypted for `recipients`
    pub encrypted_dek: String,
    pub sealed_at: DateTime<Utc>,
}

/// One sealed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedValue {
    pub nonce: String,
    pub value: String,
}

/// On-disk StructuredKV document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredDocument {
    pub keyrot: EnvelopeMetadata,
    #[serde(default)]
    pub entries: BTreeMap<String, SealedValue>,
}

impl StructuredDocument {
    /// Parse a YAML document
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        serde_yaml_ng::from_slice(bytes).map_err(|e| CryptoError::Malformed(e.to_string()))
    }

    /// Serialize to YAML
    pub fn to_vec(&self) -> Result<Vec<u8>, CryptoError> {
        serde_yaml_ng::to_string(self)
            .map(String::into_bytes)
            .map_err(|e| CryptoError::Encrypt(format!("Failed to serialize document: {}", e)))
    }
}

/// Seal `entries` for `recipients`
pub fn seal(
    crypto: &dyn CryptoPrimitive,
    entries: &Entries,
    recipients: &[Recipient],
) -> Result<StructuredDocument, CryptoError> {
    let mut dek = Zeroizing::new([0u8; DEK_SIZE]);
    rand::rng().fill_bytes(dek.as_mut());

    let cipher = ChaCha20Poly1305::new(Key::from_slice(dek.as_ref()));
    let mut sealed = BTreeMap::new();

    for (name, value) in entries {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: value.as_slice(),
                    aad: name.as_bytes(),
                },
            )
            .map_err(|e| CryptoError::Encrypt(format!("Failed to seal entry '{}': {}", name, e)))?;

        sealed.insert(
            name.clone(),
            SealedValue {
                nonce: BASE64.encode(nonce_bytes),
                value: BASE64.encode(&ciphertext),
            },
        );
    }

    let wrapped_dek = crypto.encrypt(dek.as_ref(), recipients)?;

    Ok(StructuredDocument {
        keyrot: EnvelopeMetadata {
            version: DOCUMENT_VERSION,
            algorithm: EncryptionAlgorithm::ChaCha20Poly1305,
            recipients: recipients.to_vec(),
            encrypted_dek: BASE64.encode(&wrapped_dek),
            sealed_at: Utc::now(),
        },
        entries: sealed,
    })
}

/// Open every entry of `document` with `identity`
pub fn open(
    crypto: &dyn CryptoPrimitive,
    document: &StructuredDocument,
    identity: &Identity,
) -> Result<Entries, CryptoError> {
    if document.keyrot.version != DOCUMENT_VERSION {
        return Err(CryptoError::Malformed(format!(
            "Unsupported document version: {}",
            document.keyrot.version
        )));
    }

    let wrapped_dek = BASE64
        .decode(&document.keyrot.encrypted_dek)
        .map_err(|e| CryptoError::Malformed(format!("Failed to decode encrypted DEK: {}", e)))?;
    let dek = crypto.decrypt(&wrapped_dek, identity)?;

    if dek.len() != DEK_SIZE {
        return Err(CryptoError::Malformed(format!(
            "Decrypted DEK has wrong size: expected {}, got {}",
            DEK_SIZE,
            dek.len()
        )));
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&dek));
    let mut entries = Entries::new();

    for (name, sealed) in &document.entries {
        let nonce_bytes = BASE64
            .decode(&sealed.nonce)
            .map_err(|e| CryptoError::Malformed(format!("Bad nonce for '{}': {}", name, e)))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CryptoError::Malformed(format!(
                "Invalid nonce size for '{}': expected {}, got {}",
                name,
                NONCE_SIZE,
                nonce_bytes.len()
            )));
        }
        let ciphertext = BASE64
            .decode(&sealed.value)
            .map_err(|e| CryptoError::Malformed(format!("Bad value for '{}': {}", name, e)))?;

        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &ciphertext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::Decrypt(format!("Entry '{}' failed authentication", name)))?;

        entries.insert(name.clone(), Zeroizing::new(plaintext));
    }

    Ok(entries)
}
