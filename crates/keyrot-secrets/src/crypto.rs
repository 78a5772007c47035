//! The asymmetric crypto primitive
//!
//! [`CryptoPrimitive`] is the seam between the rotation engine and the
//! encryption scheme. [`AgeCrypto`] implements it with age X25519.

use crate::keys::{Identity, KeyPair, Recipient};
use std::io::{Read, Write};
use thiserror::Error;
use zeroize::Zeroizing;

/// Failures raised by a crypto primitive
///
/// These carry no store context; callers attach the store path when mapping
/// into [`keyrot_core::Error::Crypto`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("no recipients given")]
    NoRecipients,

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),
}

/// Asymmetric encrypt/decrypt and keypair generation
pub trait CryptoPrimitive: Send + Sync {
    /// Produce a new keypair independent of all prior keys
    fn generate_keypair(&self) -> Result<KeyPair, CryptoError>;

    /// Encrypt `plaintext` so that any of `recipients` can decrypt it
    fn encrypt(&self, plaintext: &[u8], recipients: &[Recipient]) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt `ciphertext` with `identity` into a zeroizing buffer
    fn decrypt(
        &self,
        ciphertext: &[u8],
        identity: &Identity,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;
}

/// age X25519 implementation of [`CryptoPrimitive`]
#[derive(Debug, Clone, Copy, Default)]
pub struct AgeCrypto;

impl AgeCrypto {
    pub fn new() -> Self {
        Self
    }
}

impl CryptoPrimitive for AgeCrypto {
    fn generate_keypair(&self) -> Result<KeyPair, CryptoError> {
        Ok(KeyPair::from_identity(Identity::generate()))
    }

    fn encrypt(&self, plaintext: &[u8], recipients: &[Recipient]) -> Result<Vec<u8>, CryptoError> {
        if recipients.is_empty() {
            return Err(CryptoError::NoRecipients);
        }

        let mut parsed: Vec<Box<dyn age::Recipient + Send>> = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let recipient = recipient.to_age().map_err(CryptoError::InvalidRecipient)?;
            parsed.push(Box::new(recipient));
        }

        let encryptor =
            age::Encryptor::with_recipients(parsed.iter().map(|r| &**r as &dyn age::Recipient))
                .map_err(|e| CryptoError::Encrypt(format!("Failed to create encryptor: {}", e)))?;

        let mut ciphertext = Vec::with_capacity(plaintext.len() + 256);
        let mut writer = encryptor
            .wrap_output(&mut ciphertext)
            .map_err(|e| CryptoError::Encrypt(format!("Failed to create writer: {}", e)))?;

        writer
            .write_all(plaintext)
            .map_err(|e| CryptoError::Encrypt(format!("Failed to write plaintext: {}", e)))?;
        writer
            .finish()
            .map_err(|e| CryptoError::Encrypt(format!("Failed to finalize: {}", e)))?;

        Ok(ciphertext)
    }

    fn decrypt(
        &self,
        ciphertext: &[u8],
        identity: &Identity,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let decryptor = age::Decryptor::new(ciphertext)
            .map_err(|e| CryptoError::Malformed(e.to_string()))?;

        let mut reader = decryptor
            .decrypt(std::iter::once(identity.as_age() as &dyn age::Identity))
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;

        let mut plaintext = Zeroizing::new(Vec::new());
        reader
            .read_to_end(&mut plaintext)
            .map_err(|e| CryptoError::Decrypt(format!("Failed to read payload: {}", e)))?;

        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> KeyPair {
        AgeCrypto.generate_keypair().unwrap()
    }

    #[test]
    fn test_roundtrip_small() {
        let pair = keypair();
        let ciphertext = AgeCrypto
            .encrypt(b"super-secret-api-key-12345", &[pair.recipient.clone()])
            .unwrap();

        assert!(ciphertext.starts_with(b"age-encryption.org/v1"));
        let plaintext = AgeCrypto.decrypt(&ciphertext, &pair.identity).unwrap();
        assert_eq!(plaintext.as_slice(), b"super-secret-api-key-12345");
    }

    #[test]
    fn test_roundtrip_empty() {
        let pair = keypair();
        let ciphertext = AgeCrypto.encrypt(b"", &[pair.recipient.clone()]).unwrap();
        let plaintext = AgeCrypto.decrypt(&ciphertext, &pair.identity).unwrap();
        assert!(plaintext.is_empty());
    }

    #[test]
    fn test_roundtrip_over_one_mebibyte() {
        let pair = keypair();
        let payload: Vec<u8> = (0..(1024 * 1024 + 4097)).map(|i| (i % 251) as u8).collect();

        let ciphertext = AgeCrypto.encrypt(&payload, &[pair.recipient.clone()]).unwrap();
        let plaintext = AgeCrypto.decrypt(&ciphertext, &pair.identity).unwrap();
        assert_eq!(plaintext.as_slice(), payload.as_slice());
    }

    #[test]
    fn test_multiple_recipients_can_each_decrypt() {
        let a = keypair();
        let b = keypair();
        let ciphertext = AgeCrypto
            .encrypt(b"shared-team-secret", &[a.recipient.clone(), b.recipient.clone()])
            .unwrap();

        assert_eq!(
            AgeCrypto.decrypt(&ciphertext, &a.identity).unwrap().as_slice(),
            b"shared-team-secret"
        );
        assert_eq!(
            AgeCrypto.decrypt(&ciphertext, &b.identity).unwrap().as_slice(),
            b"shared-team-secret"
        );
    }

    #[test]
    fn test_unauthorized_cannot_decrypt() {
        let owner = keypair();
        let outsider = keypair();
        let ciphertext = AgeCrypto
            .encrypt(b"private", &[owner.recipient.clone()])
            .unwrap();

        let err = AgeCrypto.decrypt(&ciphertext, &outsider.identity).unwrap_err();
        assert!(matches!(err, CryptoError::Decrypt(_)));
    }

    #[test]
    fn test_corrupted_ciphertext_rejected() {
        let pair = keypair();
        assert!(matches!(
            AgeCrypto.decrypt(b"definitely not age", &pair.identity),
            Err(CryptoError::Malformed(_))
        ));

        let mut ciphertext = AgeCrypto
            .encrypt(b"payload", &[pair.recipient.clone()])
            .unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xff;
        assert!(AgeCrypto.decrypt(&ciphertext, &pair.identity).is_err());
    }

    #[test]
    fn test_encrypt_requires_recipients() {
        assert_eq!(
            AgeCrypto.encrypt(b"x", &[]).unwrap_err(),
            CryptoError::NoRecipients
        );
    }
}
