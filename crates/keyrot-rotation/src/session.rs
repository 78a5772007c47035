//! Rotation session state, its on-disk marker and the manifest journal
//!
//! The session is the single record of how far a rotation got. It is written
//! to `<keyring>/session.json` after every transition and each transition is
//! appended to `<keyring>/journal.jsonl`. The marker exists only while a
//! rotation is in flight; finding one at startup means an earlier rotation
//! did not finish.

use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use keyrot_core::utils::{write_atomic, MODE_OWNER_RW};
use keyrot_core::{Error, Result, SessionConfig};
use keyrot_secrets::Recipient;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// How far a rotation has progressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    BackedUp,
    KeyGenerated,
    PolicyStaged,
    Reencrypting,
    Activated,
    Validated,
    RolledBack,
}

impl Phase {
    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(self, next: Phase) -> bool {
        match next {
            Phase::RolledBack => self != Phase::RolledBack,
            _ => self != Phase::RolledBack && next as u8 == self as u8 + 1,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::BackedUp => "backed-up",
            Phase::KeyGenerated => "key-generated",
            Phase::PolicyStaged => "policy-staged",
            Phase::Reencrypting => "reencrypting",
            Phase::Activated => "activated",
            Phase::Validated => "validated",
            Phase::RolledBack => "rolled-back",
        };
        f.write_str(name)
    }
}

/// Per-store progress in the session manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreStatus {
    Pending,
    Done,
    Failed,
}

/// One end-to-end rotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationSession {
    pub id: String,
    pub phase: Phase,
    /// Stores in processing order
    pub manifest: BTreeMap<String, StoreStatus>,
    /// Backup the session restores from
    pub backup_ref: PathBuf,
    pub old_recipient: Recipient,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_recipient: Option<Recipient>,
    pub started_at: DateTime<Utc>,
    pub pid: u32,
}

impl RotationSession {
    /// A session that has just completed its backup
    pub fn new(
        id: impl Into<String>,
        stores: impl IntoIterator<Item = String>,
        backup_ref: PathBuf,
        old_recipient: Recipient,
    ) -> Self {
        Self {
            id: id.into(),
            phase: Phase::BackedUp,
            manifest: stores
                .into_iter()
                .map(|s| (s, StoreStatus::Pending))
                .collect(),
            backup_ref,
            old_recipient,
            new_recipient: None,
            started_at: Utc::now(),
            pid: std::process::id(),
        }
    }

    /// Count of manifest entries in `status`
    pub fn count(&self, status: StoreStatus) -> usize {
        self.manifest.values().filter(|s| **s == status).count()
    }

    /// Whether every store has been re-encrypted
    pub fn all_done(&self) -> bool {
        self.manifest.values().all(|s| *s == StoreStatus::Done)
    }
}

/// Journal line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    #[serde(flatten)]
    pub event: JournalEvent,
}

/// What a journal line records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalEvent {
    Phase { phase: Phase },
    Store { store: String, status: StoreStatus },
    Completed,
}

/// Append-only, file-locked log of session transitions
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append one entry under an exclusive file lock
    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::io_at(&self.path, e))?;

        // Released when `file` is dropped
        file.lock_exclusive()
            .map_err(|e| Error::io_at(&self.path, e))?;

        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line).map_err(|e| Error::io_at(&self.path, e))?;
        file.sync_all().map_err(|e| Error::io_at(&self.path, e))?;
        Ok(())
    }

    /// Entries for one session, in append order
    pub fn entries_for(&self, session_id: &str) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&self.path).map_err(|e| Error::io_at(&self.path, e))?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| Error::io_at(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line)?;
            if entry.session_id == session_id {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

/// Persists a session to its marker and journal on every transition
pub struct SessionRecorder {
    marker: PathBuf,
    journal: Journal,
}

impl SessionRecorder {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            marker: config.session_marker_path(),
            journal: Journal::new(config.journal_path()),
        }
    }

    /// Write the marker for a freshly created session
    pub fn begin(&self, session: &RotationSession) -> Result<()> {
        self.persist(session)?;
        self.journal.append(&JournalEntry {
            timestamp: Utc::now(),
            session_id: session.id.clone(),
            event: JournalEvent::Phase {
                phase: session.phase,
            },
        })
    }

    /// Move the session to `phase`
    pub fn advance(&self, session: &mut RotationSession, phase: Phase) -> Result<()> {
        if !session.phase.can_advance_to(phase) {
            return Err(Error::validation(format!(
                "Illegal session transition {} -> {}",
                session.phase, phase
            )));
        }
        session.phase = phase;
        debug!(session_id = %session.id, %phase, "Session phase changed");
        self.persist(session)?;
        self.journal.append(&JournalEntry {
            timestamp: Utc::now(),
            session_id: session.id.clone(),
            event: JournalEvent::Phase { phase },
        })
    }

    /// Record a store's new status
    pub fn mark(&self, session: &mut RotationSession, store: &str, status: StoreStatus) -> Result<()> {
        session.manifest.insert(store.to_string(), status);
        self.persist(session)?;
        self.journal.append(&JournalEntry {
            timestamp: Utc::now(),
            session_id: session.id.clone(),
            event: JournalEvent::Store {
                store: store.to_string(),
                status,
            },
        })
    }

    /// Remove the marker once the session is finished
    pub fn finish(&self, session: &RotationSession) -> Result<()> {
        self.journal.append(&JournalEntry {
            timestamp: Utc::now(),
            session_id: session.id.clone(),
            event: JournalEvent::Completed,
        })?;
        clear_marker(&self.marker)
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    fn persist(&self, session: &RotationSession) -> Result<()> {
        let json = serde_json::to_string_pretty(session)?;
        write_atomic(&self.marker, json.as_bytes(), Some(MODE_OWNER_RW))
    }
}

/// Load the in-flight session marker, if present
pub fn load_marker(config: &SessionConfig) -> Result<Option<RotationSession>> {
    let path = config.session_marker_path();
    match fs::read_to_string(&path) {
        Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io_at(&path, e)),
    }
}

/// Error describing a marker left by an unfinished rotation
pub fn stale_session_error(session: &RotationSession) -> Error {
    Error::StaleSession {
        session_id: session.id.clone(),
        phase: session.phase.to_string(),
        backup: session.backup_ref.display().to_string(),
    }
}

fn clear_marker(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io_at(path, e)),
    }
}
