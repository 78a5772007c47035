//! `manifest.json`, the index of a backup directory
//!
//! Written last, so its presence marks a finished backup. Every artifact is
//! listed with its path inside the backup, its size and a SHA256 digest that
//! is checked before anything is restored.

use chrono::{DateTime, Utc};
use keyrot_core::{Error, Result};
use keyrot_secrets::{Recipient, StoreFormat};
use serde::{Deserialize, Serialize};

/// Manifest layout understood by this build
pub const FORMAT_VERSION: u32 = 1;

pub const MANIFEST_FILENAME: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub format_version: u32,

    /// Rotation session (or standalone backup) that produced this backup
    pub session_id: String,

    pub created_at: DateTime<Utc>,

    /// Producing tool and version, e.g. "keyrot v0.4.0"
    pub created_by: String,

    /// Recipient of the identity that was active at backup time
    pub active_recipient: Recipient,

    pub identity: ArtifactEntry,

    /// Identity in the previous slot, if one was retained
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_identity: Option<ArtifactEntry>,

    /// Recipient map retained alongside the previous identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_policy: Option<ArtifactEntry>,

    /// Live recipient map
    pub policy: ArtifactEntry,

    /// Store ciphertexts in discovery order
    pub stores: Vec<StoreEntry>,

    pub totals: Totals,
}

/// One file copied into the backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// Path relative to the backup directory
    pub file: String,
    pub checksum: ChecksumInfo,
    pub size_bytes: u64,
}

/// A backed-up store ciphertext
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntry {
    /// Store path relative to the store root
    pub relative: String,

    pub format: StoreFormat,

    /// Unix permission bits of the original file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,

    #[serde(flatten)]
    pub artifact: ArtifactEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumInfo {
    pub algorithm: String,

    /// Lowercase hex digest
    pub value: String,
}

impl ChecksumInfo {
    pub fn sha256(value: impl Into<String>) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            value: value.into(),
        }
    }
}

/// Artifact count and size of a backup
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub artifacts: usize,
    pub bytes: u64,

    /// Wall time spent writing the backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

impl Totals {
    /// Sum over every artifact in `manifest`
    pub fn of(manifest: &BackupManifest) -> Self {
        Self {
            artifacts: manifest.artifacts().count(),
            bytes: manifest.artifacts().map(|a| a.size_bytes).sum(),
            elapsed_ms: None,
        }
    }

    pub fn display_size(&self) -> String {
        format_size(self.bytes)
    }
}

impl BackupManifest {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and check a manifest
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reject manifests written in another layout or with unknown digests
    pub fn validate(&self) -> Result<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(Error::validation(format!(
                "Backup manifest format {} is not supported (this build reads format {})",
                self.format_version, FORMAT_VERSION
            )));
        }

        if let Some(artifact) = self
            .artifacts()
            .find(|a| a.checksum.algorithm != "sha256")
        {
            return Err(Error::validation(format!(
                "Unsupported checksum algorithm for {}: {}",
                artifact.file, artifact.checksum.algorithm
            )));
        }
        Ok(())
    }

    /// Every artifact recorded in the manifest
    pub fn artifacts(&self) -> impl Iterator<Item = &ArtifactEntry> {
        std::iter::once(&self.identity)
            .chain(self.previous_identity.iter())
            .chain(self.previous_policy.iter())
            .chain(std::iter::once(&self.policy))
            .chain(self.stores.iter().map(|s| &s.artifact))
    }

    pub fn store(&self, relative: &str) -> Option<&StoreEntry> {
        self.stores.iter().find(|s| s.relative == relative)
    }
}

/// Size in binary units: `512 B`, `1.5 KiB`, `2.0 MiB`
pub fn format_size(bytes: u64) -> String {
    const STEPS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < STEPS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, STEPS[unit])
}
