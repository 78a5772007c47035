//! Re-encryption orchestrator
//!
//! Each store goes through decrypt (old identity), seal (staged rule),
//! stage beside the original, verify (new identity) and an atomic rename.
//! Plaintext lives in zeroizing buffers scoped to one store and the staged
//! file is removed unless it was committed, on every exit path.
//!
//! Stores are dispatched to a bounded pool of blocking workers. With the
//! default parallelism of one this is a plain sequential loop. The first
//! failure stops new dispatches; work already running drains before the
//! caller starts a rollback. Only the coordinating task touches the session
//! manifest.

use crate::session::{RotationSession, SessionRecorder, StoreStatus};
use futures::stream::{self, StreamExt};
use keyrot_core::{Error, ErrorKind, Result};
use keyrot_secrets::{AuditLog, CompiledMap, CryptoPrimitive, Identity, SecretStore};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cooperative interruption flag polled between per-store steps
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the rotation stop at the next safe point
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self, before: &str) -> Result<()> {
        if self.is_aborted() {
            Err(Error::aborted(format!("interrupted before {}", before)))
        } else {
            Ok(())
        }
    }
}

/// Everything one store's re-encryption needs, shareable across workers
#[derive(Clone)]
struct Worker {
    crypto: Arc<dyn CryptoPrimitive>,
    old_identity: Arc<Identity>,
    new_identity: Arc<Identity>,
    policy: Arc<CompiledMap>,
    abort: AbortHandle,
}

impl Worker {
    /// Re-encrypt one store and return the digest of its plaintext
    fn reencrypt(&self, store: &SecretStore) -> Result<String> {
        let crypto = self.crypto.as_ref();
        let recipients = self.policy.require_recipients(&store.relative)?;

        let plaintext = store.open(crypto, &self.old_identity)?;
        let ciphertext = store.seal(crypto, &plaintext, recipients)?;
        let staged = store.stage(&ciphertext)?;

        let readback = store.open_bytes(crypto, &staged.read()?, &self.new_identity)?;
        if readback != plaintext {
            return Err(Error::crypto(
                &store.relative,
                "write verification decrypted to different content",
            ));
        }

        self.abort.check(&format!("swapping {}", store.relative))?;
        let digest = plaintext.digest();
        staged.commit()?;
        Ok(digest)
    }
}

/// Drives re-encryption of a store set for one session
pub struct Orchestrator {
    worker: Worker,
    parallelism: usize,
    session_id: String,
}

impl Orchestrator {
    pub fn new(
        crypto: Arc<dyn CryptoPrimitive>,
        old_identity: Arc<Identity>,
        new_identity: Arc<Identity>,
        policy: Arc<CompiledMap>,
        abort: AbortHandle,
    ) -> Self {
        Self {
            worker: Worker {
                crypto,
                old_identity,
                new_identity,
                policy,
                abort,
            },
            parallelism: 1,
            session_id: String::new(),
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Re-encrypt `stores` in order, recording progress in `session`
    ///
    /// Returns the plaintext digest of every re-encrypted store. On failure
    /// the first error is returned once in-flight work has drained; stores
    /// already swapped are left `Done` for the rollback to restore.
    pub async fn run(
        &self,
        stores: Vec<SecretStore>,
        session: &mut RotationSession,
        recorder: &SessionRecorder,
    ) -> Result<BTreeMap<String, String>> {
        let halt = Arc::new(AtomicBool::new(false));
        let total = stores.len();

        let mut outcomes = stream::iter(stores)
            .map(|store| {
                let worker = self.worker.clone();
                let halt = Arc::clone(&halt);
                async move {
                    let relative = store.relative.clone();
                    if halt.load(Ordering::SeqCst) {
                        return (relative, None);
                    }
                    if let Err(e) = worker.abort.check(&relative) {
                        return (relative, Some(Err(e)));
                    }

                    let task_relative = relative.clone();
                    let joined =
                        tokio::task::spawn_blocking(move || worker.reencrypt(&store)).await;
                    let outcome = joined.unwrap_or_else(|e| {
                        Err(Error::crypto(
                            task_relative,
                            format!("re-encryption task failed: {}", e),
                        ))
                    });
                    (relative, Some(outcome))
                }
            })
            .buffer_unordered(self.parallelism);

        let mut digests = BTreeMap::new();
        let mut first_error: Option<Error> = None;

        while let Some((relative, outcome)) = outcomes.next().await {
            let result = match outcome {
                None => {
                    debug!(store = %relative, "Skipped after earlier failure");
                    continue;
                }
                Some(result) => result,
            };

            let recorded = match result {
                Ok(digest) => {
                    AuditLog::new("reencrypt", &relative, &self.session_id).log();
                    digests.insert(relative.clone(), digest);
                    info!(store = %relative, done = digests.len(), total, "Re-encrypted store");
                    recorder.mark(session, &relative, StoreStatus::Done)
                }
                Err(e) => {
                    halt.store(true, Ordering::SeqCst);
                    AuditLog::new("reencrypt", &relative, &self.session_id)
                        .with_error(e.to_string())
                        .log();
                    let recorded = if e.kind() == ErrorKind::Aborted {
                        Ok(())
                    } else {
                        recorder.mark(session, &relative, StoreStatus::Failed)
                    };
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                    recorded
                }
            };

            if let Err(e) = recorded {
                warn!(store = %relative, "Failed to record session progress: {}", e);
                halt.store(true, Ordering::SeqCst);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(digests),
        }
    }
}
