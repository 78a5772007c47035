//! Session configuration loading and parsing
//!
//! A [`SessionConfig`] is passed explicitly through every rotation component.
//! Core logic never reads environment variables or the working directory;
//! only [`SessionConfig::discover`] walks the filesystem, starting from a
//! directory chosen by the caller.

use crate::error::{Error, Result};
use crate::types::{ExecutionStrategy, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration file names to search for
pub const CONFIG_FILE_NAMES: &[&str] = &["keyrot.yaml", "keyrot.yml"];

/// Backups are retained for at least this many days
pub const MIN_RETENTION_DAYS: u32 = 30;

/// Default store discovery patterns
pub const DEFAULT_INCLUDE: &[&str] = &["**/*.age", "**/*.enc.yaml", "**/*.enc.yml"];

const ACTIVE_DIR: &str = "active";
const PREVIOUS_DIR: &str = "previous";
const STAGING_DIR: &str = "staging";
const IDENTITY_FILE: &str = "identity.key";
const POLICY_FILE: &str = "recipients.yaml";
const SESSION_MARKER: &str = "session.json";
const LOCK_FILE: &str = ".keyrot.lock";
const JOURNAL_FILE: &str = "journal.jsonl";

/// Explicit configuration for one rotation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SessionConfig {
    /// Root directory of the secret stores
    pub store_dir: PathBuf,

    /// Directory holding the active/previous/staging identity slots
    pub keyring_dir: PathBuf,

    /// Directory receiving timestamped backups
    pub backup_dir: PathBuf,

    /// Glob patterns (relative to `store_dir`) selecting stores
    #[serde(default = "default_include")]
    pub include: Vec<String>,

    /// Glob patterns excluded from discovery
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Dedicated canary store, relative to `store_dir`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary: Option<PathBuf>,

    /// Number of stores re-encrypted concurrently
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Backup retention in days
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Backoff applied while another rotation holds the lock
    #[serde(default)]
    pub lock_retry: RetryPolicy,

    /// Execute or dry-run
    #[serde(default)]
    pub strategy: ExecutionStrategy,
}

fn default_include() -> Vec<String> {
    DEFAULT_INCLUDE.iter().map(|s| s.to_string()).collect()
}

fn default_parallelism() -> usize {
    1
}

fn default_retention_days() -> u32 {
    MIN_RETENTION_DAYS
}

impl SessionConfig {
    /// Create a configuration with default settings for the given directories
    pub fn new(
        store_dir: impl Into<PathBuf>,
        keyring_dir: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store_dir: store_dir.into(),
            keyring_dir: keyring_dir.into(),
            backup_dir: backup_dir.into(),
            include: default_include(),
            exclude: Vec::new(),
            canary: None,
            parallelism: default_parallelism(),
            retention_days: default_retention_days(),
            lock_retry: RetryPolicy::default(),
            strategy: ExecutionStrategy::default(),
        }
    }

    /// Load configuration from a YAML file
    ///
    /// Relative paths are resolved against the file's directory and `~` is
    /// expanded.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::configuration(format!("Configuration file not found: {}", path.display()))
            } else {
                Error::io_at(path, e)
            }
        })?;

        let mut config: SessionConfig = serde_yaml_ng::from_str(&content)?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_paths(&base_dir);
        config.validate()?;

        tracing::debug!(config = %path.display(), "Loaded session configuration");
        Ok(config)
    }

    /// Search `start_dir` and its ancestors for a configuration file
    pub fn discover(start_dir: &Path) -> Result<PathBuf> {
        let mut current = Some(start_dir);
        while let Some(dir) = current {
            for name in CONFIG_FILE_NAMES {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
            current = dir.parent();
        }

        Err(Error::configuration(format!(
            "No {} found in {} or any parent directory",
            CONFIG_FILE_NAMES.join(" / "),
            start_dir.display()
        )))
    }

    /// Resolve relative paths against `base_dir`
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        for path in [
            &mut self.store_dir,
            &mut self.keyring_dir,
            &mut self.backup_dir,
        ] {
            *path = resolve_path(base_dir, path);
        }
    }

    /// Check invariants that must hold before any rotation work
    pub fn validate(&self) -> Result<()> {
        if self.include.is_empty() {
            return Err(Error::configuration(
                "At least one include pattern is required",
            ));
        }

        if self.parallelism == 0 {
            return Err(Error::configuration("parallelism must be at least 1"));
        }

        if self.retention_days < MIN_RETENTION_DAYS {
            return Err(Error::configuration(format!(
                "retention-days must be at least {}, got {}",
                MIN_RETENTION_DAYS, self.retention_days
            )));
        }

        if let Some(canary) = &self.canary {
            if canary.is_absolute() {
                return Err(Error::configuration(format!(
                    "canary must be relative to store-dir: {}",
                    canary.display()
                )));
            }
        }

        if self.backup_dir == self.store_dir || self.keyring_dir == self.store_dir {
            return Err(Error::configuration(
                "backup-dir and keyring-dir must differ from store-dir",
            ));
        }

        Ok(())
    }

    /// Directory holding the active identity and live policy
    pub fn active_dir(&self) -> PathBuf {
        self.keyring_dir.join(ACTIVE_DIR)
    }

    /// Retained slot for the identity replaced by the last activation
    pub fn previous_dir(&self) -> PathBuf {
        self.keyring_dir.join(PREVIOUS_DIR)
    }

    /// Staging area prepared during a rotation
    pub fn staging_dir(&self) -> PathBuf {
        self.keyring_dir.join(STAGING_DIR)
    }

    /// Active identity file
    pub fn identity_path(&self) -> PathBuf {
        self.active_dir().join(IDENTITY_FILE)
    }

    /// Live recipient map
    pub fn policy_path(&self) -> PathBuf {
        self.active_dir().join(POLICY_FILE)
    }

    /// Identity retained in the previous slot
    pub fn previous_identity_path(&self) -> PathBuf {
        self.previous_dir().join(IDENTITY_FILE)
    }

    /// Session marker present only while a rotation is in flight
    pub fn session_marker_path(&self) -> PathBuf {
        self.keyring_dir.join(SESSION_MARKER)
    }

    /// Lock token guarding the store directory
    ///
    /// Kept in the store root so every configuration over the same stores
    /// contends for one lock, whichever keyring it uses.
    pub fn lock_path(&self) -> PathBuf {
        self.store_dir.join(LOCK_FILE)
    }

    /// Append-only manifest journal
    pub fn journal_path(&self) -> PathBuf {
        self.keyring_dir.join(JOURNAL_FILE)
    }

    /// File name of an identity inside a slot
    pub fn identity_file_name() -> &'static str {
        IDENTITY_FILE
    }

    /// File name of the policy inside a slot
    pub fn policy_file_name() -> &'static str {
        POLICY_FILE
    }

    /// Absolute path of the canary store, if one is configured
    pub fn canary_path(&self) -> Option<PathBuf> {
        self.canary.as_ref().map(|c| self.store_dir.join(c))
    }
}

fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).to_string());
    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}
