//! Sandboxed rotation environment

#![allow(dead_code)]

use keyrot_core::{RetryPolicy, SessionConfig};
use keyrot_rotation::keygen::initialize_keyring;
use keyrot_rotation::RotationEngine;
use keyrot_secrets::envelope;
use keyrot_secrets::{
    read_identity_file, AgeCrypto, CryptoPrimitive, Entries, Identity, Plaintext, Recipient,
    SecretStore,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;
use zeroize::Zeroizing;

/// Store root, keyring and backup directory under one temp dir, with an
/// initialized keyring
pub struct Sandbox {
    pub temp: TempDir,
    pub config: SessionConfig,
    pub identity: Identity,
}

impl Sandbox {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = SessionConfig::new(
            temp.path().join("stores"),
            temp.path().join("keyring"),
            temp.path().join("backups"),
        );
        config.lock_retry = RetryPolicy::no_retry();
        fs::create_dir_all(&config.store_dir).unwrap();

        let pair = initialize_keyring(&AgeCrypto, &config, false).unwrap();
        Self {
            temp,
            config,
            identity: pair.identity,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.config.parallelism = parallelism;
        self
    }

    pub fn recipient(&self) -> Recipient {
        self.identity.to_public()
    }

    pub fn engine(&self) -> RotationEngine {
        RotationEngine::new(self.config.clone())
    }

    pub fn engine_with(&self, crypto: Arc<dyn CryptoPrimitive>) -> RotationEngine {
        RotationEngine::with_crypto(self.config.clone(), crypto)
    }

    pub fn store_path(&self, relative: &str) -> PathBuf {
        self.config.store_dir.join(relative)
    }

    /// Write an opaque blob store encrypted for the active recipient
    pub fn write_blob(&self, relative: &str, plaintext: &[u8]) -> PathBuf {
        let ciphertext = AgeCrypto.encrypt(plaintext, &[self.recipient()]).unwrap();
        self.write_raw(relative, &ciphertext)
    }

    /// Write a structured store sealed for the active recipient
    pub fn write_structured(&self, relative: &str, values: &[(&str, &str)]) -> PathBuf {
        let document = envelope::seal(&AgeCrypto, &entries(values), &[self.recipient()]).unwrap();
        self.write_raw(relative, &document.to_vec().unwrap())
    }

    /// Write a real blob for the active recipient with its first byte flipped
    pub fn write_corrupt(&self, relative: &str) -> PathBuf {
        let path = self.write_blob(relative, b"never readable");
        let mut bytes = fs::read(&path).unwrap();
        bytes[0] ^= 0x01;
        fs::write(&path, bytes).unwrap();
        path
    }

    /// Cut an existing store down to the first half of its bytes
    pub fn truncate(&self, relative: &str) {
        let path = self.store_path(relative);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    }

    pub fn write_raw(&self, relative: &str, bytes: &[u8]) -> PathBuf {
        let path = self.store_path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, bytes).unwrap();
        path
    }

    /// Every file under the store root except the lock token
    pub fn snapshot_stores(&self) -> BTreeMap<String, Vec<u8>> {
        let mut files = snapshot_dir(&self.config.store_dir);
        files.remove(".keyrot.lock");
        files
    }

    /// Every file under the keyring except the journal
    pub fn snapshot_keyring(&self) -> BTreeMap<String, Vec<u8>> {
        let mut files = snapshot_dir(&self.config.keyring_dir);
        files.remove("journal.jsonl");
        files
    }

    pub fn active_identity(&self) -> Identity {
        read_identity_file(&self.config.identity_path()).unwrap()
    }

    pub fn open_store(&self, relative: &str, identity: &Identity) -> Plaintext {
        let store = SecretStore::inspect(&self.config.store_dir, &self.store_path(relative)).unwrap();
        store.open(&AgeCrypto, identity).unwrap()
    }

    pub fn backup_count(&self) -> usize {
        match fs::read_dir(&self.config.backup_dir) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

pub fn entries(values: &[(&str, &str)]) -> Entries {
    values
        .iter()
        .map(|(k, v)| (k.to_string(), Zeroizing::new(v.as_bytes().to_vec())))
        .collect()
}

pub fn blob(plaintext: &[u8]) -> Plaintext {
    Plaintext::Blob(Zeroizing::new(plaintext.to_vec()))
}

pub fn snapshot_dir(root: &Path) -> BTreeMap<String, Vec<u8>> {
    if !root.exists() {
        return BTreeMap::new();
    }
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            (relative, fs::read(e.path()).unwrap())
        })
        .collect()
}
