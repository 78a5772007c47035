//! Backup listing and retention pruning.

use crate::snapshot::{Backup, PARTIAL_PREFIX};
use chrono::{DateTime, Duration, Utc};
use keyrot_core::config::MIN_RETENTION_DAYS;
use keyrot_core::{Error, Result, SessionConfig};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Summary of what a prune removed and kept
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
    pub kept: Vec<PathBuf>,
    /// Leftover partial directories that were removed
    pub partials_removed: Vec<PathBuf>,
}

/// Complete backups under `backup_dir`, oldest first
///
/// Directories without a readable manifest are skipped with a warning.
pub fn list_backups(backup_dir: &Path) -> Result<Vec<Backup>> {
    if !backup_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();
    for entry in fs::read_dir(backup_dir).map_err(|e| Error::io_at(backup_dir, e))? {
        let entry = entry.map_err(|e| Error::io_at(backup_dir, e))?;
        let path = entry.path();
        if !path.is_dir() || entry.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX) {
            continue;
        }
        match Backup::open(&path) {
            Ok(backup) => backups.push(backup),
            Err(e) => warn!(path = %path.display(), "Skipping unreadable backup: {}", e),
        }
    }

    backups.sort_by_key(|b| b.manifest.created_at);
    Ok(backups)
}

/// Remove backups older than the configured retention
pub fn prune(config: &SessionConfig, protected: Option<&Path>) -> Result<PruneReport> {
    prune_at(config, Utc::now(), protected)
}

/// [`prune`] evaluated at `now`
///
/// Retention never drops below the minimum, whatever the configuration says.
/// The `protected` backup (the one a live session marker references) is kept
/// regardless of age.
pub fn prune_at(
    config: &SessionConfig,
    now: DateTime<Utc>,
    protected: Option<&Path>,
) -> Result<PruneReport> {
    let days = config.retention_days.max(MIN_RETENTION_DAYS);
    let cutoff = now - Duration::days(i64::from(days));
    let mut report = PruneReport::default();

    if !config.backup_dir.is_dir() {
        return Ok(report);
    }

    for entry in fs::read_dir(&config.backup_dir).map_err(|e| Error::io_at(&config.backup_dir, e))?
    {
        let entry = entry.map_err(|e| Error::io_at(&config.backup_dir, e))?;
        let path = entry.path();
        if path.is_dir()
            && entry.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX)
            && Some(path.as_path()) != protected
        {
            fs::remove_dir_all(&path).map_err(|e| Error::io_at(&path, e))?;
            report.partials_removed.push(path);
        }
    }

    for backup in list_backups(&config.backup_dir)? {
        let is_protected = Some(backup.path.as_path()) == protected;
        if backup.manifest.created_at < cutoff && !is_protected {
            fs::remove_dir_all(&backup.path).map_err(|e| Error::io_at(&backup.path, e))?;
            info!(backup = %backup.path.display(), "Pruned expired backup");
            report.removed.push(backup.path);
        } else {
            report.kept.push(backup.path);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::BackupManager;
    use keyrot_secrets::{write_identity_file, Identity, RecipientMap};
    use tempfile::TempDir;

    fn config(temp: &TempDir) -> SessionConfig {
        let config = SessionConfig::new(
            temp.path().join("stores"),
            temp.path().join("keyring"),
            temp.path().join("backups"),
        );
        let identity = Identity::generate();
        write_identity_file(&config.identity_path(), &identity).unwrap();
        RecipientMap::single(identity.to_public())
            .save(&config.policy_path())
            .unwrap();
        fs::create_dir_all(&config.store_dir).unwrap();
        config
    }

    #[test]
    fn test_list_backups_skips_partials_and_strays() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let manager = BackupManager::new(&config);
        manager.create("one", &[]).unwrap();
        manager.create("two", &[]).unwrap();
        fs::create_dir_all(config.backup_dir.join(".partial-three")).unwrap();
        fs::create_dir_all(config.backup_dir.join("random")).unwrap();

        let backups = list_backups(&config.backup_dir).unwrap();
        let ids: Vec<_> = backups.iter().map(|b| b.manifest.session_id.as_str()).collect();
        assert_eq!(ids, vec!["one", "two"]);
    }

    #[test]
    fn test_prune_respects_minimum_retention() {
        let temp = TempDir::new().unwrap();
        let mut config = config(&temp);
        BackupManager::new(&config).create("one", &[]).unwrap();

        config.retention_days = 1;
        let report = prune_at(&config, Utc::now() + Duration::days(10), None).unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.kept.len(), 1);

        let report = prune_at(&config, Utc::now() + Duration::days(31), None).unwrap();
        assert_eq!(report.removed.len(), 1);
        assert!(list_backups(&config.backup_dir).unwrap().is_empty());
    }

    #[test]
    fn test_prune_keeps_protected_and_removes_partials() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let backup = BackupManager::new(&config).create("live", &[]).unwrap();
        let partial = config.backup_dir.join(".partial-crashed");
        fs::create_dir_all(&partial).unwrap();

        let report =
            prune_at(&config, Utc::now() + Duration::days(365), Some(&backup.path)).unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.kept, vec![backup.path.clone()]);
        assert_eq!(report.partials_removed, vec![partial.clone()]);
        assert!(!partial.exists());
    }

    #[test]
    fn test_prune_missing_backup_dir_is_noop() {
        let temp = TempDir::new().unwrap();
        let config = SessionConfig::new(
            temp.path().join("s"),
            temp.path().join("k"),
            temp.path().join("b"),
        );
        assert_eq!(prune(&config, None).unwrap(), PruneReport::default());
    }
}
