//! Secret stores: format detection, open/seal, staging and discovery

use crate::crypto::{CryptoError, CryptoPrimitive};
use crate::envelope::{self, Entries, StructuredDocument};
use crate::keys::{Identity, Recipient};
use crate::security::sanitize_error;
use globset::{Glob, GlobSet, GlobSetBuilder};
use keyrot_core::{Error, Result, SessionConfig};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zeroize::Zeroizing;

/// Prefix of every temporary file the engine writes beside a store
pub const TEMP_PREFIX: &str = ".keyrot-tmp-";

/// Header every age ciphertext starts with
const AGE_MAGIC: &[u8] = b"age-encryption.org/";

/// On-disk representation of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreFormat {
    /// A single age ciphertext
    OpaqueBlob,
    /// YAML document with readable keys and envelope-sealed values
    #[serde(rename = "structured-kv")]
    StructuredKV,
}

impl StoreFormat {
    /// Format implied by a store's file name
    ///
    /// `*.age` is a blob and `*.enc.yaml`/`*.enc.yml` a structured document,
    /// whatever the file currently contains.
    pub fn from_name(relative: &str) -> Option<Self> {
        let name = relative.rsplit('/').next().unwrap_or(relative);
        if name.ends_with(".age") {
            Some(StoreFormat::OpaqueBlob)
        } else if name.ends_with(".enc.yaml") || name.ends_with(".enc.yml") {
            Some(StoreFormat::StructuredKV)
        } else {
            None
        }
    }

    /// Detect the format of raw store bytes
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(AGE_MAGIC) {
            return Some(StoreFormat::OpaqueBlob);
        }
        StructuredDocument::from_slice(bytes)
            .ok()
            .map(|_| StoreFormat::StructuredKV)
    }
}

impl fmt::Display for StoreFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreFormat::OpaqueBlob => write!(f, "opaque-blob"),
            StoreFormat::StructuredKV => write!(f, "structured-kv"),
        }
    }
}

/// Decrypted content of a store
///
/// Buffers are zeroized on drop. `Debug` never prints content.
pub enum Plaintext {
    Blob(Zeroizing<Vec<u8>>),
    Entries(Entries),
}

impl Plaintext {
    /// Format this plaintext must be sealed as
    pub fn format(&self) -> StoreFormat {
        match self {
            Plaintext::Blob(_) => StoreFormat::OpaqueBlob,
            Plaintext::Entries(_) => StoreFormat::StructuredKV,
        }
    }

    /// SHA-256 over the content, used to compare plaintexts without keeping them
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            Plaintext::Blob(bytes) => {
                hasher.update(b"blob");
                hasher.update(bytes.as_slice());
            }
            Plaintext::Entries(entries) => {
                hasher.update(b"entries");
                for (name, value) in entries {
                    hasher.update((name.len() as u64).to_le_bytes());
                    hasher.update(name.as_bytes());
                    hasher.update((value.len() as u64).to_le_bytes());
                    hasher.update(value.as_slice());
                }
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

impl PartialEq for Plaintext {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Plaintext::Blob(a), Plaintext::Blob(b)) => a.as_slice() == b.as_slice(),
            (Plaintext::Entries(a), Plaintext::Entries(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.as_slice() == vb.as_slice())
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Plaintext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plaintext::Blob(bytes) => write!(f, "Plaintext::Blob([REDACTED {} bytes])", bytes.len()),
            Plaintext::Entries(entries) => {
                write!(f, "Plaintext::Entries([REDACTED {} entries])", entries.len())
            }
        }
    }
}

/// An encrypted artifact under the store root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretStore {
    /// Absolute path
    pub path: PathBuf,
    /// Path relative to the store root, `/`-separated
    pub relative: String,
    pub format: StoreFormat,
    /// Recipients recorded in the store, empty when the format does not record them
    pub current_recipients: BTreeSet<Recipient>,
}

impl SecretStore {
    /// Read `path` and classify it
    ///
    /// The file name decides the format. Content is only sniffed for names
    /// with no recognised suffix, such as a canary. A store whose content is
    /// damaged still classifies and fails later, when it is opened.
    pub fn inspect(root: &Path, path: &Path) -> Result<Self> {
        let relative = relative_path(root, path)?;
        let bytes = fs::read(path).map_err(|e| Error::io_at(path, e))?;

        let format = StoreFormat::from_name(&relative)
            .or_else(|| StoreFormat::detect(&bytes))
            .ok_or_else(|| {
                Error::configuration(format!(
                    "{} has no store suffix and is neither an age ciphertext nor a keyrot \
                     structured document",
                    relative
                ))
            })?;

        let current_recipients = match format {
            StoreFormat::OpaqueBlob => BTreeSet::new(),
            StoreFormat::StructuredKV => StructuredDocument::from_slice(&bytes)
                .map(|doc| doc.keyrot.recipients.into_iter().collect())
                .unwrap_or_default(),
        };

        Ok(Self {
            path: path.to_path_buf(),
            relative,
            format,
            current_recipients,
        })
    }

    /// Read the current ciphertext from disk
    pub fn read_ciphertext(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).map_err(|e| Error::io_at(&self.path, e))
    }

    /// Decrypt the store's current content
    pub fn open(&self, crypto: &dyn CryptoPrimitive, identity: &Identity) -> Result<Plaintext> {
        let bytes = self.read_ciphertext()?;
        self.open_bytes(crypto, &bytes, identity)
    }

    /// Decrypt `bytes` as this store's format
    pub fn open_bytes(
        &self,
        crypto: &dyn CryptoPrimitive,
        bytes: &[u8],
        identity: &Identity,
    ) -> Result<Plaintext> {
        let opened = match self.format {
            StoreFormat::OpaqueBlob => crypto.decrypt(bytes, identity).map(Plaintext::Blob),
            StoreFormat::StructuredKV => StructuredDocument::from_slice(bytes)
                .and_then(|doc| envelope::open(crypto, &doc, identity))
                .map(Plaintext::Entries),
        };
        opened.map_err(|e| self.crypto_error(e))
    }

    /// Encrypt `plaintext` for `recipients` in this store's format
    pub fn seal(
        &self,
        crypto: &dyn CryptoPrimitive,
        plaintext: &Plaintext,
        recipients: &[Recipient],
    ) -> Result<Vec<u8>> {
        let sealed = match (self.format, plaintext) {
            (StoreFormat::OpaqueBlob, Plaintext::Blob(bytes)) => crypto.encrypt(bytes, recipients),
            (StoreFormat::StructuredKV, Plaintext::Entries(entries)) => {
                envelope::seal(crypto, entries, recipients).and_then(|doc| doc.to_vec())
            }
            (format, plaintext) => Err(CryptoError::Encrypt(format!(
                "cannot seal {} plaintext as {}",
                plaintext.format(),
                format
            ))),
        };
        sealed.map_err(|e| self.crypto_error(e))
    }

    /// Write `ciphertext` to a temporary file beside the store
    ///
    /// The temporary file carries the store's current permissions and is
    /// removed when the returned handle is dropped without being committed.
    pub fn stage(&self, ciphertext: &[u8]) -> Result<StagedCiphertext> {
        let parent = self.path.parent().ok_or_else(|| {
            Error::configuration(format!("No parent directory: {}", self.path.display()))
        })?;

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent)
            .map_err(|e| Error::io_at(parent, e))?;

        if let Some(mode) = keyrot_core::utils::mode_of(&self.path)? {
            keyrot_core::utils::set_mode(temp.path(), mode)?;
        }

        temp.write_all(ciphertext)
            .map_err(|e| Error::io_at(temp.path(), e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| Error::io_at(temp.path(), e))?;

        Ok(StagedCiphertext {
            temp,
            target: self.path.clone(),
        })
    }

    fn crypto_error(&self, error: CryptoError) -> Error {
        Error::crypto(&self.relative, sanitize_error(&error.to_string()))
    }
}

/// New ciphertext written beside a store, not yet swapped in
pub struct StagedCiphertext {
    temp: tempfile::NamedTempFile,
    target: PathBuf,
}

impl StagedCiphertext {
    /// Path of the temporary file
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Read back what was staged
    pub fn read(&self) -> Result<Vec<u8>> {
        fs::read(self.temp.path()).map_err(|e| Error::io_at(self.temp.path(), e))
    }

    /// Atomically rename the staged file over the store
    pub fn commit(self) -> Result<()> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| Error::io_at(&target, e.error))?;
        if let Some(parent) = target.parent() {
            keyrot_core::utils::sync_dir(parent);
        }
        Ok(())
    }
}

/// Discover every store under `config.store_dir`
///
/// Returns stores sorted by relative path. The keyring and backup
/// directories, the lock token and engine temp files are never considered. A configured
/// canary is included even when the include patterns miss it.
pub fn discover_stores(config: &SessionConfig) -> Result<Vec<SecretStore>> {
    let root = &config.store_dir;
    if !root.is_dir() {
        return Err(Error::configuration(format!(
            "Store directory does not exist: {}",
            root.display()
        )));
    }

    let include = build_globset(&config.include)?;
    let exclude = build_globset(&config.exclude)?;
    let skipped = [config.keyring_dir.clone(), config.backup_dir.clone()];
    let lock = config.lock_path();

    let mut stores = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !skipped.iter().any(|dir| entry.path() == dir));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
            Error::io_at(path, std::io::Error::other(e.to_string()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path() == lock || entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }

        let relative = relative_path(root, entry.path())?;
        if !include.is_match(&relative) || exclude.is_match(&relative) {
            continue;
        }

        stores.push(SecretStore::inspect(root, entry.path())?);
    }

    if let Some(canary) = config.canary_path() {
        if !canary.is_file() {
            return Err(Error::configuration(format!(
                "Canary store not found: {}",
                canary.display()
            )));
        }
        if !stores.iter().any(|s| s.path == canary) {
            stores.push(SecretStore::inspect(root, &canary)?);
        }
    }

    stores.sort_by(|a, b| a.relative.cmp(&b.relative));
    tracing::debug!(count = stores.len(), root = %root.display(), "Discovered secret stores");
    Ok(stores)
}

/// Stray engine temp files under the store root
pub fn find_temp_files(config: &SessionConfig) -> Vec<PathBuf> {
    let skipped = [config.keyring_dir.clone(), config.backup_dir.clone()];
    WalkDir::new(&config.store_dir)
        .into_iter()
        .filter_entry(|entry| !skipped.iter().any(|dir| entry.path() == dir))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
        .map(|e| e.into_path())
        .collect()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::configuration(format!("Invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::configuration(format!("Invalid glob set: {}", e)))
}

/// `/`-separated path of `path` relative to `root`
pub fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let stripped = path.strip_prefix(root).map_err(|_| {
        Error::configuration(format!(
            "{} is outside the store directory {}",
            path.display(),
            root.display()
        ))
    })?;
    Ok(stripped
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/"))
}
