//! Backup creation, loading, verification and restore helpers.
//!
//! A backup is assembled inside `<backup_dir>/.partial-<session>` and renamed
//! to `<backup_dir>/<UTC timestamp>-<session>` only once every artifact and the
//! manifest are written. Any failure removes the partial directory, so a
//! backup either exists completely or not at all.

use crate::checksum::{calculate_checksum, checksum_bytes};
use crate::manifest::{
    ArtifactEntry, BackupManifest, ChecksumInfo, StoreEntry, Totals, FORMAT_VERSION,
    MANIFEST_FILENAME,
};
use chrono::Utc;
use keyrot_core::utils::{
    create_private_dir, mode_of, set_mode, sync_dir, write_atomic, MODE_OWNER_RO, MODE_OWNER_RW,
};
use keyrot_core::{Error, Result, SessionConfig};
use keyrot_secrets::{read_identity_file, Identity, RecipientMap, SecretStore};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Prefix of backup directories still being assembled
pub const PARTIAL_PREFIX: &str = ".partial-";

const IDENTITY_FILE: &str = "identity.key";
const PREVIOUS_IDENTITY_FILE: &str = "previous-identity.key";
const PREVIOUS_POLICY_FILE: &str = "previous-recipients.yaml";
const POLICY_FILE: &str = "recipients.yaml";
const STORES_DIR: &str = "stores";

/// A complete, immutable backup on disk
#[derive(Debug, Clone)]
pub struct Backup {
    pub path: PathBuf,
    pub manifest: BackupManifest,
}

/// Creates backups for one session configuration
pub struct BackupManager<'a> {
    config: &'a SessionConfig,
}

/// Removes a partially assembled backup unless disarmed
struct PartialGuard {
    path: PathBuf,
    armed: bool,
}

impl Drop for PartialGuard {
    fn drop(&mut self) {
        if self.armed && self.path.exists() {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), "Failed to remove partial backup: {}", e);
            }
        }
    }
}

impl<'a> BackupManager<'a> {
    pub fn new(config: &'a SessionConfig) -> Self {
        Self { config }
    }

    /// Snapshot the active identity, previous identity (if any), the live
    /// recipient map and every store's ciphertext.
    pub fn create(&self, session_id: &str, stores: &[SecretStore]) -> Result<Backup> {
        let start = Instant::now();
        let config = self.config;

        let identity_src = config.identity_path();
        let identity = read_identity_file(&identity_src)?;
        let policy_src = config.policy_path();
        RecipientMap::load(&policy_src)?;

        create_private_dir(&config.backup_dir)?;
        let partial = config
            .backup_dir
            .join(format!("{}{}", PARTIAL_PREFIX, session_id));
        if partial.exists() {
            fs::remove_dir_all(&partial).map_err(|e| Error::io_at(&partial, e))?;
        }
        let mut guard = PartialGuard {
            path: partial.clone(),
            armed: true,
        };
        create_private_dir(&partial)?;

        let identity_entry = copy_artifact(&identity_src, &partial, IDENTITY_FILE)?;
        let previous_src = config.previous_identity_path();
        let previous_entry = if previous_src.is_file() {
            Some(copy_artifact(&previous_src, &partial, PREVIOUS_IDENTITY_FILE)?)
        } else {
            None
        };
        let previous_policy_src = config
            .previous_dir()
            .join(SessionConfig::policy_file_name());
        let previous_policy_entry = if previous_policy_src.is_file() {
            Some(copy_artifact(
                &previous_policy_src,
                &partial,
                PREVIOUS_POLICY_FILE,
            )?)
        } else {
            None
        };
        let policy_entry = copy_artifact(&policy_src, &partial, POLICY_FILE)?;

        let mut store_entries = Vec::with_capacity(stores.len());
        for store in stores {
            let file = format!("{}/{}", STORES_DIR, store.relative);
            let mode = mode_of(&store.path)?;
            let artifact = copy_artifact(&store.path, &partial, &file)?;
            debug!(store = %store.relative, checksum = %artifact.checksum.value, "Backed up store");
            store_entries.push(StoreEntry {
                relative: store.relative.clone(),
                format: store.format,
                mode,
                artifact,
            });
        }

        let mut manifest = BackupManifest {
            format_version: FORMAT_VERSION,
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            created_by: format!("keyrot v{}", env!("CARGO_PKG_VERSION")),
            active_recipient: identity.to_public(),
            identity: identity_entry,
            previous_identity: previous_entry,
            previous_policy: previous_policy_entry,
            policy: policy_entry,
            stores: store_entries,
            totals: Totals::default(),
        };
        manifest.totals = Totals {
            elapsed_ms: Some(start.elapsed().as_millis() as u64),
            ..Totals::of(&manifest)
        };

        let manifest_path = partial.join(MANIFEST_FILENAME);
        write_atomic(&manifest_path, manifest.to_json()?.as_bytes(), Some(MODE_OWNER_RO))?;
        sync_dir(&partial);

        let final_path = config.backup_dir.join(format!(
            "{}-{}",
            manifest.created_at.format("%Y%m%dT%H%M%S%.3fZ"),
            session_id
        ));
        fs::rename(&partial, &final_path).map_err(|e| Error::io_at(&final_path, e))?;
        guard.armed = false;
        sync_dir(&config.backup_dir);

        info!(
            backup = %final_path.display(),
            stores = manifest.stores.len(),
            size = %manifest.totals.display_size(),
            "Backup created"
        );

        Ok(Backup {
            path: final_path,
            manifest,
        })
    }
}

fn copy_artifact(source: &Path, backup_root: &Path, file: &str) -> Result<ArtifactEntry> {
    let bytes = fs::read(source).map_err(|e| Error::io_at(source, e))?;
    let dest = backup_root.join(file);
    if let Some(parent) = dest.parent() {
        create_private_dir(parent)?;
    }

    fs::write(&dest, &bytes).map_err(|e| Error::io_at(&dest, e))?;
    set_mode(&dest, MODE_OWNER_RO)?;

    Ok(ArtifactEntry {
        file: file.to_string(),
        checksum: ChecksumInfo::sha256(checksum_bytes(&bytes)),
        size_bytes: bytes.len() as u64,
    })
}

impl Backup {
    /// Load a backup directory and its manifest
    pub fn open(path: &Path) -> Result<Self> {
        let manifest_path = path.join(MANIFEST_FILENAME);
        let json = fs::read_to_string(&manifest_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::configuration(format!("Not a keyrot backup: {}", path.display()))
            } else {
                Error::io_at(&manifest_path, e)
            }
        })?;
        let manifest = BackupManifest::from_json(&json)?;

        Ok(Self {
            path: path.to_path_buf(),
            manifest,
        })
    }

    /// Re-hash every artifact against the manifest
    pub fn verify(&self) -> Result<()> {
        for artifact in self.manifest.artifacts() {
            let path = self.artifact_path(artifact);
            if !path.is_file() {
                return Err(Error::validation(format!(
                    "Backup {} is missing {}",
                    self.path.display(),
                    artifact.file
                )));
            }
            let actual = calculate_checksum(&path)?;
            if actual != artifact.checksum.value {
                return Err(Error::validation(format!(
                    "Backup artifact {} does not match its checksum",
                    artifact.file
                )));
            }
        }
        debug!(backup = %self.path.display(), "Backup verified");
        Ok(())
    }

    /// Absolute path of an artifact inside this backup
    pub fn artifact_path(&self, artifact: &ArtifactEntry) -> PathBuf {
        self.path.join(&artifact.file)
    }

    /// Identity that was active when the backup was taken
    pub fn identity(&self) -> Result<Identity> {
        read_identity_file(&self.artifact_path(&self.manifest.identity))
    }

    /// Restore a store's pre-rotation ciphertext under `store_dir`
    ///
    /// Returns `false` when the store already matches the backup.
    pub fn restore_store(&self, entry: &StoreEntry, store_dir: &Path) -> Result<bool> {
        let target = store_dir.join(&entry.relative);
        if target.is_file() && calculate_checksum(&target)? == entry.artifact.checksum.value {
            return Ok(false);
        }

        let bytes = self.read_artifact(&entry.artifact)?;
        write_atomic(&target, &bytes, entry.mode)?;
        Ok(true)
    }

    /// Write the backed-up policy and identity into `active_slot` and
    /// rebuild `previous_slot` as it was when the backup was taken
    pub fn restore_keyring(&self, active_slot: &Path, previous_slot: &Path) -> Result<()> {
        let policy = self.read_artifact(&self.manifest.policy)?;
        write_atomic(
            &active_slot.join(SessionConfig::policy_file_name()),
            &policy,
            None,
        )?;

        let identity = self.read_artifact(&self.manifest.identity)?;
        write_atomic(
            &active_slot.join(SessionConfig::identity_file_name()),
            &identity,
            Some(MODE_OWNER_RW),
        )?;

        if self.manifest.previous_identity.is_none() && self.manifest.previous_policy.is_none() {
            if previous_slot.exists() {
                fs::remove_dir_all(previous_slot).map_err(|e| Error::io_at(previous_slot, e))?;
            }
            return Ok(());
        }

        if let Some(previous) = &self.manifest.previous_identity {
            let bytes = self.read_artifact(previous)?;
            write_atomic(
                &previous_slot.join(SessionConfig::identity_file_name()),
                &bytes,
                Some(MODE_OWNER_RW),
            )?;
        }
        if let Some(previous) = &self.manifest.previous_policy {
            let bytes = self.read_artifact(previous)?;
            write_atomic(
                &previous_slot.join(SessionConfig::policy_file_name()),
                &bytes,
                None,
            )?;
        }
        Ok(())
    }

    fn read_artifact(&self, artifact: &ArtifactEntry) -> Result<Vec<u8>> {
        let path = self.artifact_path(artifact);
        let bytes = fs::read(&path).map_err(|e| Error::io_at(&path, e))?;
        if checksum_bytes(&bytes) != artifact.checksum.value {
            return Err(Error::validation(format!(
                "Backup artifact {} does not match its checksum",
                artifact.file
            )));
        }
        Ok(bytes)
    }
}
