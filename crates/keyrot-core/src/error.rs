//! Error types for keyrot-core

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias using keyrot-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Rotation error taxonomy
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or ambiguous policy, key file, or session configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Decrypt/encrypt/verify failure on a specific store
    #[error("Crypto error on {store}: {message}")]
    Crypto { store: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IO error with the path that caused it
    #[error("IO error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Post-activation canary mismatch
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// Another rotation holds the store lock
    #[error("Rotation lock is held by {holder}")]
    LockContention { holder: String },

    /// A session marker from an earlier, unfinished rotation exists
    #[error(
        "Stale rotation session {session_id} found in phase {phase}; \
         run `keyrot rollback` to restore from {backup}"
    )]
    StaleSession {
        session_id: String,
        phase: String,
        backup: String,
    },

    /// Rotation was interrupted between per-store steps
    #[error("Rotation aborted: {reason}")]
    Aborted { reason: String },

    /// Rollback could not restore the pre-rotation state
    #[error("Rollback failed, operator intervention required: {message}")]
    Rollback { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Serialisable classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Configuration,
    Crypto,
    Io,
    Validation,
    LockContention,
    StaleSession,
    Aborted,
    Rollback,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::Crypto => "CryptoError",
            ErrorKind::Io => "IOError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::LockContention => "LockContentionError",
            ErrorKind::StaleSession => "StaleSessionError",
            ErrorKind::Aborted => "AbortedError",
            ErrorKind::Rollback => "RollbackError",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a crypto error for a store
    pub fn crypto(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Crypto {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Wrap an IO error with the path it occurred at
    pub fn io_at(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::IoAt {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a lock contention error
    pub fn lock_contention(holder: impl Into<String>) -> Self {
        Self::LockContention {
            holder: holder.into(),
        }
    }

    /// Create an aborted error
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Create an unrecoverable rollback error
    pub fn rollback(message: impl Into<String>) -> Self {
        Self::Rollback {
            message: message.into(),
        }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration { .. } | Error::YamlParse(_) | Error::JsonParse(_) => {
                ErrorKind::Configuration
            }
            Error::Crypto { .. } => ErrorKind::Crypto,
            Error::Io(_) | Error::IoAt { .. } => ErrorKind::Io,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::LockContention { .. } => ErrorKind::LockContention,
            Error::StaleSession { .. } => ErrorKind::StaleSession,
            Error::Aborted { .. } => ErrorKind::Aborted,
            Error::Rollback { .. } => ErrorKind::Rollback,
        }
    }

    /// Store the error is attributed to, if any
    pub fn store(&self) -> Option<&str> {
        match self {
            Error::Crypto { store, .. } => Some(store),
            _ => None,
        }
    }

    /// Whether this error leaves stores untouched and needs no rollback
    pub fn is_pre_mutation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::LockContention | ErrorKind::StaleSession
        )
    }
}

/// One entry in a rotation report's error list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error classification
    pub kind: ErrorKind,

    /// Rotation stage the error surfaced in
    pub stage: String,

    /// Store the error is attributed to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,

    /// Human-readable message
    pub message: String,
}

impl ErrorDetail {
    /// Build a detail record from an error raised in `stage`
    pub fn from_error(stage: impl Into<String>, error: &Error) -> Self {
        Self {
            kind: error.kind(),
            stage: stage.into(),
            store: error.store().map(str::to_string),
            message: error.to_string(),
        }
    }
}
