//! Rotation engine facade
//!
//! `RotationEngine` sequences the rotation phases under the store lock and
//! turns any failure after the backup into an automatic rollback. Errors
//! raised before the backup exists (configuration, lock contention, a stale
//! session) are returned as `Err` with nothing on disk changed; failures after
//! it are reported through [`RotationResult`].

use crate::activation::activate;
use crate::keygen::{generate_staged, initialize_keyring};
use crate::lock::{LockHolder, RotationLock};
use crate::orchestrator::{AbortHandle, Orchestrator};
use crate::recipients::stage_policy;
use crate::result::{RotationResult, StoreOutcome};
use crate::rollback::{restore_from_backup, RollbackReport};
use crate::session::{
    load_marker, stale_session_error, Phase, RotationSession, SessionRecorder,
};
use crate::validator::{check_canary, validate_stores, ValidationResult};
use keyrot_backup::{list_backups, prune, Backup, BackupManager, PruneReport};
use keyrot_core::{Error, ErrorDetail, ExecutionStrategy, Result, SessionConfig};
use keyrot_secrets::{
    discover_stores, read_identity_file, AgeCrypto, AuditLog, CryptoPrimitive, Identity, KeyPair,
    Recipient, RecipientMap, SecretStore,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Snapshot of the keyring and any in-flight rotation
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_holder: Option<LockHolder>,
    /// Marker left by a rotation that is running or did not finish
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<RotationSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_recipient: Option<Recipient>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_recipient: Option<Recipient>,
    pub backups: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_backup: Option<PathBuf>,
}

/// Loaded inputs of a rotation, read before anything is mutated
struct Preflight {
    stores: Vec<SecretStore>,
    old_identity: Identity,
    policy: RecipientMap,
}

pub struct RotationEngine {
    config: SessionConfig,
    crypto: Arc<dyn CryptoPrimitive>,
    abort: AbortHandle,
}

impl RotationEngine {
    /// Engine using the age crypto primitive
    pub fn new(config: SessionConfig) -> Self {
        Self::with_crypto(config, Arc::new(AgeCrypto::new()))
    }

    pub fn with_crypto(config: SessionConfig, crypto: Arc<dyn CryptoPrimitive>) -> Self {
        Self {
            config,
            crypto,
            abort: AbortHandle::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Handle that interrupts a running rotation at the next per-store step
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Replace every store's key with a freshly generated one
    #[instrument(skip(self), fields(store_dir = %self.config.store_dir.display()))]
    pub async fn rotate(&self) -> Result<RotationResult> {
        self.config.validate()?;
        if self.config.strategy.is_dry_run() {
            return self.plan();
        }

        let session_id = Uuid::new_v4().to_string();
        let _lock = RotationLock::acquire(&self.config, &session_id).await?;
        self.refuse_stale_session()?;

        let Preflight {
            stores,
            old_identity,
            policy: _,
        } = self.preflight()?;

        if self.abort.is_aborted() {
            return Err(Error::aborted("interrupted before backup"));
        }

        let backup = BackupManager::new(&self.config).create(&session_id, &stores)?;
        let mut session = RotationSession::new(
            &session_id,
            stores.iter().map(|s| s.relative.clone()),
            backup.path.clone(),
            old_identity.to_public(),
        );
        let recorder = SessionRecorder::new(&self.config);
        recorder.begin(&session)?;
        info!(
            session_id = %session.id,
            stores = stores.len(),
            backup = %backup.path.display(),
            "Rotation started"
        );

        match self
            .run_phases(&mut session, &recorder, stores, old_identity)
            .await
        {
            Ok(canary) => {
                let finished = recorder.finish(&session);
                AuditLog::new("rotate", self.config.store_dir.display().to_string(), &session.id)
                    .log();
                info!(session_id = %session.id, "Rotation complete");
                Ok(completed(&session, canary, finished))
            }
            Err(e) => Ok(self.recover(&mut session, &recorder, &backup, e)),
        }
    }

    /// Phases after the backup; any error here triggers a rollback
    async fn run_phases(
        &self,
        session: &mut RotationSession,
        recorder: &SessionRecorder,
        stores: Vec<SecretStore>,
        old_identity: Identity,
    ) -> Result<Option<String>> {
        let KeyPair {
            identity: new_identity,
            recipient: new_recipient,
        } = generate_staged(self.crypto.as_ref(), &self.config)?;
        session.new_recipient = Some(new_recipient.clone());
        recorder.advance(session, Phase::KeyGenerated)?;

        let staged = stage_policy(
            &self.config,
            &session.old_recipient,
            &new_recipient,
            stores.iter().map(|s| s.relative.as_str()),
        )?;
        recorder.advance(session, Phase::PolicyStaged)?;

        recorder.advance(session, Phase::Reencrypting)?;
        let digests = Orchestrator::new(
            Arc::clone(&self.crypto),
            Arc::new(old_identity),
            Arc::new(new_identity),
            Arc::new(staged.compile()?),
            self.abort.clone(),
        )
        .with_parallelism(self.config.parallelism)
        .with_session_id(&session.id)
        .run(stores.clone(), session, recorder)
        .await?;

        if self.abort.is_aborted() {
            return Err(Error::aborted("interrupted before activation"));
        }
        activate(&self.config)?;
        recorder.advance(session, Phase::Activated)?;

        let canary = check_canary(self.crypto.as_ref(), &self.config, &stores, &digests)?;
        recorder.advance(session, Phase::Validated)?;
        Ok(canary)
    }

    /// Roll a failed session back and build its report
    ///
    /// When the rollback itself fails the marker is left in place so the
    /// next invocation refuses to rotate until an operator rolls back.
    fn recover(
        &self,
        session: &mut RotationSession,
        recorder: &SessionRecorder,
        backup: &Backup,
        cause: Error,
    ) -> RotationResult {
        let stage = session.phase.to_string();
        error!(session_id = %session.id, %stage, "Rotation failed, rolling back: {}", cause);
        let mut errors = vec![ErrorDetail::from_error(&stage, &cause)];

        let rolled_back = match restore_from_backup(&self.config, backup) {
            Ok(report) => {
                info!(
                    session_id = %session.id,
                    restored = report.restored.len(),
                    "Rolled back to pre-rotation state"
                );
                let closed = recorder
                    .advance(session, Phase::RolledBack)
                    .and_then(|()| recorder.finish(session));
                if let Err(e) = closed {
                    warn!(session_id = %session.id, "Failed to close rolled back session: {}", e);
                    errors.push(ErrorDetail::from_error("rollback", &e));
                }
                true
            }
            Err(e) => {
                error!(
                    session_id = %session.id,
                    backup = %backup.path.display(),
                    "Rollback failed, operator intervention required: {}",
                    e
                );
                errors.push(ErrorDetail::from_error("rollback", &e));
                false
            }
        };

        AuditLog::new("rotate", self.config.store_dir.display().to_string(), &session.id)
            .with_error(cause.to_string())
            .log();

        let mut result = RotationResult::from_session(session, rolled_back);
        result.errors = errors;
        result
    }

    /// Plan a rotation without touching the crypto primitive or the disk
    ///
    /// The old recipient stands in for the key that would be generated, so
    /// policy staging and rule coverage are checked exactly as a real run
    /// would check them.
    pub fn plan(&self) -> Result<RotationResult> {
        self.config.validate()?;
        self.refuse_stale_session()?;
        let Preflight {
            stores,
            old_identity,
            policy,
        } = self.preflight()?;

        let placeholder = old_identity.to_public();
        let staged = policy.stage_replacement(&placeholder, &placeholder)?.compile()?;
        staged.check_coverage(stores.iter().map(|s| s.relative.as_str()))?;

        info!(
            backup_dir = %self.config.backup_dir.display(),
            files = stores.len() + 2,
            "[dry-run] would create backup"
        );
        info!(staging = %self.config.staging_dir().display(), "[dry-run] would generate keypair");
        for store in &stores {
            let recipients = staged.require_recipients(&store.relative)?;
            info!(
                store = %store.relative,
                format = ?store.format,
                recipients = recipients.len(),
                "[dry-run] would re-encrypt"
            );
        }
        info!(
            active = %self.config.active_dir().display(),
            "[dry-run] would activate staged keyring"
        );

        Ok(RotationResult {
            success: true,
            session_id: Uuid::new_v4().to_string(),
            strategy: ExecutionStrategy::DryRun,
            backup_path: None,
            new_recipient: None,
            canary: crate::validator::canary_for(&self.config, &stores)?,
            per_store_status: stores
                .iter()
                .map(|s| (s.relative.clone(), StoreOutcome::Planned))
                .collect(),
            errors: Vec::new(),
        })
    }

    /// Snapshot the keyring and every store without rotating
    pub async fn backup_only(&self) -> Result<Backup> {
        self.config.validate()?;
        let session_id = Uuid::new_v4().to_string();
        let _lock = RotationLock::acquire(&self.config, &session_id).await?;

        let stores = discover_stores(&self.config)?;
        let backup = BackupManager::new(&self.config).create(&session_id, &stores)?;
        AuditLog::new("backup", backup.path.display().to_string(), &session_id).log();
        Ok(backup)
    }

    /// Check that every store decrypts with `identity`
    pub fn validate(&self, identity: &Identity) -> Result<ValidationResult> {
        self.config.validate()?;
        validate_stores(self.crypto.as_ref(), &self.config, identity)
    }

    /// Check every store against the active identity
    pub fn validate_active(&self) -> Result<ValidationResult> {
        let identity = read_identity_file(&self.config.identity_path())?;
        self.validate(&identity)
    }

    /// Restore from `backup`, or from the backup of the unfinished session
    ///
    /// Safe to repeat. Clears the session marker once the restore succeeds.
    pub async fn rollback(&self, backup: Option<&Path>) -> Result<RollbackReport> {
        let marker = load_marker(&self.config)?;
        let session_id = marker
            .as_ref()
            .map(|s| s.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let _lock = RotationLock::acquire(&self.config, &session_id).await?;

        let path = match (backup, marker.as_ref()) {
            (Some(path), Some(session)) => {
                if path != session.backup_ref {
                    warn!(
                        session_id = %session.id,
                        session_backup = %session.backup_ref.display(),
                        "Rolling back from a backup other than the session's"
                    );
                }
                path.to_path_buf()
            }
            (Some(path), None) => path.to_path_buf(),
            (None, Some(session)) => session.backup_ref.clone(),
            (None, None) => {
                return Err(Error::configuration(
                    "No unfinished rotation session; name the backup to restore from",
                ))
            }
        };

        let backup = Backup::open(&path)
            .map_err(|e| Error::rollback(format!("opening {}: {}", path.display(), e)))?;
        let report = restore_from_backup(&self.config, &backup)?;

        if let Some(mut session) = marker {
            let recorder = SessionRecorder::new(&self.config);
            if session.phase != Phase::RolledBack {
                recorder.advance(&mut session, Phase::RolledBack)?;
            }
            recorder.finish(&session)?;
        }
        AuditLog::new("rollback", path.display().to_string(), &session_id).log();
        Ok(report)
    }

    /// Lock holder, session marker, keyring and backup summary
    pub fn status(&self) -> Result<StatusReport> {
        let backups = list_backups(&self.config.backup_dir)?;
        Ok(StatusReport {
            lock_holder: RotationLock::current_holder(&self.config)?,
            session: load_marker(&self.config)?,
            active_recipient: recipient_in(&self.config.identity_path())?,
            previous_recipient: recipient_in(&self.config.previous_identity_path())?,
            latest_backup: backups.last().map(|b| b.path.clone()),
            backups: backups.len(),
        })
    }

    /// Remove expired backups, keeping the one a session marker references
    pub async fn prune(&self) -> Result<PruneReport> {
        self.config.validate()?;
        let session_id = Uuid::new_v4().to_string();
        let _lock = RotationLock::acquire(&self.config, &session_id).await?;

        let marker = load_marker(&self.config)?;
        prune(&self.config, marker.as_ref().map(|s| s.backup_ref.as_path()))
    }

    /// Create the first active identity and a default recipient map
    pub async fn init(&self, force: bool) -> Result<KeyPair> {
        let session_id = Uuid::new_v4().to_string();
        let _lock = RotationLock::acquire(&self.config, &session_id).await?;
        self.refuse_stale_session()?;
        initialize_keyring(self.crypto.as_ref(), &self.config, force)
    }

    fn refuse_stale_session(&self) -> Result<()> {
        match load_marker(&self.config)? {
            Some(session) => Err(stale_session_error(&session)),
            None => Ok(()),
        }
    }

    /// Read and cross-check every rotation input
    fn preflight(&self) -> Result<Preflight> {
        let stores = discover_stores(&self.config)?;
        let old_identity = read_identity_file(&self.config.identity_path())?;
        let policy = RecipientMap::load(&self.config.policy_path())?;

        let old_recipient = old_identity.to_public();
        if !policy.contains(&old_recipient) {
            return Err(Error::configuration(format!(
                "Active recipient {} does not appear in {}",
                old_recipient,
                self.config.policy_path().display()
            )));
        }
        policy.check_coverage(stores.iter().map(|s| s.relative.as_str()))?;

        Ok(Preflight {
            stores,
            old_identity,
            policy,
        })
    }
}

/// Report for a rotation that activated and validated
///
/// The new key is live at this point. Failing to close the session does not
/// undo that; it is reported beside the success and the marker stays for
/// `status` to show.
fn completed(
    session: &RotationSession,
    canary: Option<String>,
    finished: Result<()>,
) -> RotationResult {
    let mut result = RotationResult::from_session(session, false);
    result.success = true;
    result.canary = canary;
    if let Err(e) = finished {
        warn!(
            session_id = %session.id,
            "New key is active but the session could not be closed: {}",
            e
        );
        result.errors.push(ErrorDetail::from_error("finish", &e));
    }
    result
}

fn recipient_in(path: &Path) -> Result<Option<Recipient>> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(read_identity_file(path)?.to_public()))
}
