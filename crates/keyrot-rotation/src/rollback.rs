//! Rollback from a backup
//!
//! Restores stores first, then the recipient map, then the identity, and
//! removes the staging slot and stray temp files. Every step compares against
//! or overwrites with backup content, so running it again after an
//! interruption converges on the same state.

use keyrot_backup::Backup;
use keyrot_core::{Error, Result, SessionConfig};
use keyrot_secrets::find_temp_files;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// What a rollback changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub backup: PathBuf,
    /// Stores rewritten from the backup
    pub restored: Vec<String>,
    /// Stores that already matched the backup
    pub intact: Vec<String>,
    pub removed_temp_files: Vec<PathBuf>,
}

/// Restore the pre-rotation state recorded in `backup`
pub fn restore_from_backup(config: &SessionConfig, backup: &Backup) -> Result<RollbackReport> {
    backup.verify().map_err(|e| {
        Error::rollback(format!(
            "backup {} failed verification: {}",
            backup.path.display(),
            e
        ))
    })?;

    let mut report = RollbackReport {
        backup: backup.path.clone(),
        ..RollbackReport::default()
    };

    for entry in backup.manifest.stores.iter().rev() {
        let rewrote = backup
            .restore_store(entry, &config.store_dir)
            .map_err(|e| Error::rollback(format!("restoring {}: {}", entry.relative, e)))?;
        if rewrote {
            info!(store = %entry.relative, "Restored store from backup");
            report.restored.push(entry.relative.clone());
        } else {
            report.intact.push(entry.relative.clone());
        }
    }

    for temp in find_temp_files(config) {
        match fs::remove_file(&temp) {
            Ok(()) => report.removed_temp_files.push(temp),
            Err(e) => warn!(path = %temp.display(), "Failed to remove temp file: {}", e),
        }
    }

    backup
        .restore_keyring(&config.active_dir(), &config.previous_dir())
        .map_err(|e| Error::rollback(format!("restoring keyring: {}", e)))?;

    let staging = config.staging_dir();
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(|e| Error::rollback(format!("{}: {}", staging.display(), e)))?;
    }

    info!(
        backup = %backup.path.display(),
        restored = report.restored.len(),
        intact = report.intact.len(),
        "Rollback complete"
    );
    Ok(report)
}
