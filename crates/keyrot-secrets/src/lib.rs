//! Secret material handling for keyrot
//!
//! This crate provides everything that touches key material or ciphertext:
//! - **Crypto primitive**: age X25519 encrypt/decrypt and keypair generation
//! - **Key files**: age-keygen compatible identity files with owner-only permissions
//! - **Stores**: OpaqueBlob and StructuredKV codecs, discovery under a store root
//! - **Policy**: the ordered recipient map binding path patterns to recipients
//! - **Security**: zeroized plaintext buffers, audit logging, error sanitization

pub mod crypto;
pub mod envelope;
pub mod keys;
pub mod policy;
pub mod security;
pub mod store;

pub use crypto::{AgeCrypto, CryptoError, CryptoPrimitive};
pub use keys::{read_identity_file, write_identity_file, Identity, KeyPair, Recipient};
pub use policy::{CompiledMap, CreationRule, RecipientMap};
pub use security::{sanitize_error, AuditLog};
pub use envelope::{Entries, StructuredDocument};
pub use store::{
    discover_stores, find_temp_files, relative_path, Plaintext, SecretStore, StagedCiphertext,
    StoreFormat, TEMP_PREFIX,
};
