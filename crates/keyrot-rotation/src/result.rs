//! Rotation report

use crate::session::{RotationSession, StoreStatus};
use keyrot_core::{ErrorDetail, ExecutionStrategy, Result};
use keyrot_secrets::Recipient;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Final status of one store in a rotation report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreOutcome {
    /// Dry run: would be re-encrypted
    Planned,
    /// Never processed
    Pending,
    Done,
    Failed,
    /// Re-encrypted, then restored from the backup
    RolledBack,
}

impl fmt::Display for StoreOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StoreOutcome::Planned => "planned",
            StoreOutcome::Pending => "pending",
            StoreOutcome::Done => "done",
            StoreOutcome::Failed => "failed",
            StoreOutcome::RolledBack => "rolled-back",
        };
        f.write_str(label)
    }
}

/// Report of one `rotate` invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationResult {
    pub success: bool,
    pub session_id: String,
    pub strategy: ExecutionStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_recipient: Option<Recipient>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canary: Option<String>,
    pub per_store_status: BTreeMap<String, StoreOutcome>,
    pub errors: Vec<ErrorDetail>,
}

impl RotationResult {
    /// Build a report from a session's manifest
    ///
    /// When `rolled_back` is set, stores that had been re-encrypted are
    /// reported as rolled back.
    pub fn from_session(session: &RotationSession, rolled_back: bool) -> Self {
        let per_store_status = session
            .manifest
            .iter()
            .map(|(store, status)| {
                let outcome = match (status, rolled_back) {
                    (StoreStatus::Done, true) => StoreOutcome::RolledBack,
                    (StoreStatus::Done, false) => StoreOutcome::Done,
                    (StoreStatus::Failed, _) => StoreOutcome::Failed,
                    (StoreStatus::Pending, _) => StoreOutcome::Pending,
                };
                (store.clone(), outcome)
            })
            .collect();

        Self {
            success: false,
            session_id: session.id.clone(),
            strategy: ExecutionStrategy::Execute,
            backup_path: Some(session.backup_ref.clone()),
            new_recipient: session.new_recipient.clone(),
            canary: None,
            per_store_status,
            errors: Vec::new(),
        }
    }

    /// Stores reported in `outcome`
    pub fn stores_with(&self, outcome: StoreOutcome) -> Vec<&str> {
        self.per_store_status
            .iter()
            .filter(|(_, o)| **o == outcome)
            .map(|(s, _)| s.as_str())
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyrot_secrets::Identity;

    fn session() -> RotationSession {
        let mut session = RotationSession::new(
            "s1",
            vec!["a.age".to_string(), "b.age".to_string(), "c.age".to_string()],
            PathBuf::from("/backups/x-s1"),
            Identity::generate().to_public(),
        );
        session.manifest.insert("a.age".to_string(), StoreStatus::Done);
        session.manifest.insert("b.age".to_string(), StoreStatus::Failed);
        session
    }

    #[test]
    fn test_rolled_back_report() {
        let result = RotationResult::from_session(&session(), true);
        assert_eq!(result.stores_with(StoreOutcome::RolledBack), vec!["a.age"]);
        assert_eq!(result.stores_with(StoreOutcome::Failed), vec!["b.age"]);
        assert_eq!(result.stores_with(StoreOutcome::Pending), vec!["c.age"]);
    }

    #[test]
    fn test_json_shape() {
        let result = RotationResult::from_session(&session(), false);
        let json = result.to_json().unwrap();
        assert!(json.contains("\"per_store_status\""));
        assert!(json.contains("\"a.age\": \"done\""));
        assert!(json.contains("\"strategy\": \"execute\""));
    }
}
