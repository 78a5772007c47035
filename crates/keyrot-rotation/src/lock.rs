//! Single-writer rotation lock
//!
//! The lock token lives at `<store_dir>/.keyrot.lock` and is held with an OS
//! advisory lock for the lifetime of a [`RotationLock`]. The OS releases it
//! when the holding process exits for any reason, so a crash never leaves the
//! store locked; the session marker is what records an unfinished rotation.
//! The token's content names the holder for diagnostics and is cleared on
//! release, but the file itself is never removed.

use chrono::{DateTime, Utc};
use keyrot_core::retry::{RetryExecutorBuilder, TracingObserver};
use keyrot_core::{Error, ErrorKind, Result, SessionConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Metadata written into the lock token by its holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub session_id: String,
    pub acquired_at: DateTime<Utc>,
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pid {} (session {}, since {})",
            self.pid,
            self.session_id,
            self.acquired_at.to_rfc3339()
        )
    }
}

/// Exclusive hold on the rotation lock, released on drop
#[derive(Debug)]
pub struct RotationLock {
    file: File,
    path: PathBuf,
    holder: LockHolder,
}

impl RotationLock {
    /// Take the lock or fail immediately with a lock contention error
    pub fn try_acquire(config: &SessionConfig, session_id: &str) -> Result<Self> {
        fs::create_dir_all(&config.store_dir).map_err(|e| Error::io_at(&config.store_dir, e))?;
        let path = config.lock_path();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::io_at(&path, e))?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                let holder = read_holder(&path)
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "another process".to_string());
                return Err(Error::lock_contention(holder));
            }
            Err(TryLockError::Error(e)) => return Err(Error::io_at(&path, e)),
        }

        if let Some(stale) = read_holder(&path) {
            warn!(
                stale_pid = stale.pid,
                stale_session = %stale.session_id,
                "Taking over rotation lock left by a process that is no longer running"
            );
        }

        let holder = LockHolder {
            pid: std::process::id(),
            session_id: session_id.to_string(),
            acquired_at: Utc::now(),
        };
        let json = serde_json::to_string(&holder)?;
        file.set_len(0).map_err(|e| Error::io_at(&path, e))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::io_at(&path, e))?;
        file.write_all(json.as_bytes())
            .map_err(|e| Error::io_at(&path, e))?;
        file.sync_all().map_err(|e| Error::io_at(&path, e))?;

        debug!(session_id, lock = %path.display(), "Acquired rotation lock");
        Ok(Self { file, path, holder })
    }

    /// Take the lock, retrying contention with the configured backoff
    pub async fn acquire(config: &SessionConfig, session_id: &str) -> Result<Self> {
        let executor = RetryExecutorBuilder::new()
            .with_policy(config.lock_retry.clone())
            .with_observer(TracingObserver::new("acquire-rotation-lock"))
            .build();

        executor
            .execute(
                |e: &Error| e.kind() == ErrorKind::LockContention,
                || {
                    let attempt = Self::try_acquire(config, session_id);
                    async move { attempt }
                },
            )
            .await
    }

    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current holder of the lock, if any process holds it
    pub fn current_holder(config: &SessionConfig) -> Result<Option<LockHolder>> {
        let path = config.lock_path();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io_at(&path, e)),
        };

        match file.try_lock() {
            Ok(()) => {
                let _ = file.unlock();
                Ok(None)
            }
            Err(TryLockError::WouldBlock) => Ok(Some(read_holder(&path).unwrap_or(LockHolder {
                pid: 0,
                session_id: "unknown".to_string(),
                acquired_at: Utc::now(),
            }))),
            Err(TryLockError::Error(e)) => Err(Error::io_at(&path, e)),
        }
    }
}

impl Drop for RotationLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = self.file.sync_all();
        if let Err(e) = self.file.unlock() {
            warn!(lock = %self.path.display(), "Failed to release rotation lock: {}", e);
        }
        debug!(session_id = %self.holder.session_id, "Released rotation lock");
    }
}

fn read_holder(path: &Path) -> Option<LockHolder> {
    let content = fs::read_to_string(path).ok()?;
    if content.trim().is_empty() {
        return None;
    }
    serde_json::from_str(&content).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyrot_core::RetryPolicy;
    use tempfile::TempDir;

    fn config(temp: &TempDir) -> SessionConfig {
        let mut config = SessionConfig::new(
            temp.path().join("stores"),
            temp.path().join("keyring"),
            temp.path().join("backups"),
        );
        config.lock_retry = RetryPolicy {
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 1,
            ..RetryPolicy::default()
        };
        config
    }

    #[test]
    fn test_second_acquire_is_contention() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);

        let lock = RotationLock::try_acquire(&config, "first").unwrap();
        assert_eq!(lock.holder().session_id, "first");

        let err = RotationLock::try_acquire(&config, "second").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockContention);
        assert!(err.to_string().contains("first"));
    }

    #[test]
    fn test_release_on_drop() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);

        let lock = RotationLock::try_acquire(&config, "first").unwrap();
        assert!(RotationLock::current_holder(&config).unwrap().is_some());
        drop(lock);

        assert!(config.lock_path().exists());
        assert_eq!(fs::read_to_string(config.lock_path()).unwrap(), "");
        assert!(RotationLock::current_holder(&config).unwrap().is_none());
        RotationLock::try_acquire(&config, "second").unwrap();
    }

    #[test]
    fn test_stale_token_is_taken_over() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        fs::create_dir_all(&config.store_dir).unwrap();
        fs::write(
            config.lock_path(),
            r#"{"pid":999999,"session_id":"crashed","acquired_at":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let lock = RotationLock::try_acquire(&config, "fresh").unwrap();
        assert_eq!(lock.holder().session_id, "fresh");
        let on_disk = read_holder(&config.lock_path()).unwrap();
        assert_eq!(on_disk.session_id, "fresh");
    }

    #[tokio::test]
    async fn test_acquire_retries_then_surfaces_contention() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let _held = RotationLock::try_acquire(&config, "first").unwrap();

        let err = RotationLock::acquire(&config, "second").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockContention);
    }

    #[test]
    fn test_configs_sharing_stores_share_the_lock() {
        let temp = TempDir::new().unwrap();
        let first = config(&temp);
        let mut second = config(&temp);
        second.keyring_dir = temp.path().join("other-keyring");
        second.backup_dir = temp.path().join("other-backups");

        let _held = RotationLock::try_acquire(&first, "first").unwrap();
        let err = RotationLock::try_acquire(&second, "second").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockContention);
        assert!(first.lock_path().starts_with(&first.store_dir));
    }

    #[test]
    fn test_no_lock_file_means_no_holder() {
        let temp = TempDir::new().unwrap();
        assert!(RotationLock::current_holder(&config(&temp)).unwrap().is_none());
    }
}
