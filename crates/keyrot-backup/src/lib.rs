//! keyrot Backup System
//!
//! This crate snapshots everything a rotation may change before it changes
//! anything: the active identity, the identity retained in the previous slot,
//! the live recipient map and the ciphertext of every secret store.
//!
//! # Features
//!
//! - **All-or-nothing creation**: backups are assembled in a `.partial-*`
//!   directory and renamed into place
//! - **Owner-only permissions**: directories 0700, files 0400
//! - **Manifest format**: JSON metadata with per-artifact SHA256 checksums
//! - **Verification**: every artifact is re-hashed before it is restored
//! - **Retention**: expired backups are pruned, never earlier than 30 days
//!
//! # Examples
//!
//! ```no_run
//! use keyrot_backup::BackupManager;
//! use keyrot_core::SessionConfig;
//! use keyrot_secrets::discover_stores;
//!
//! fn main() -> keyrot_core::Result<()> {
//!     let config = SessionConfig::load(std::path::Path::new("keyrot.yaml"))?;
//!     let stores = discover_stores(&config)?;
//!     let backup = BackupManager::new(&config).create("manual", &stores)?;
//!     backup.verify()?;
//!     println!("Backup created at {}", backup.path.display());
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod manifest;
pub mod retention;
pub mod snapshot;

pub use checksum::{calculate_checksum, checksum_bytes};
pub use manifest::{
    format_size, ArtifactEntry, BackupManifest, ChecksumInfo, StoreEntry, Totals, FORMAT_VERSION,
    MANIFEST_FILENAME,
};
pub use retention::{list_backups, prune, prune_at, PruneReport};
pub use snapshot::{Backup, BackupManager, PARTIAL_PREFIX};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_constants() {
        assert_eq!(MANIFEST_FILENAME, "manifest.json");
        assert_eq!(FORMAT_VERSION, 1);
        assert_eq!(PARTIAL_PREFIX, ".partial-");
    }
}
