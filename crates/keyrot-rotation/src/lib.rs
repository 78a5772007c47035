//! keyrot rotation engine
//!
//! Replaces the key protecting a set of encrypted secret stores:
//!
//! 1. take the store lock and refuse to start over an unfinished session
//! 2. back up the keyring and every store's ciphertext
//! 3. generate a keypair into the staging slot
//! 4. stage a recipient map with the old recipient replaced
//! 5. re-encrypt each store (decrypt, seal, stage, verify, rename)
//! 6. swap the staging slot into place
//! 7. canary-decrypt under the now-active identity
//!
//! Any failure after step 2 restores the backup. The session marker and the
//! journal record how far a rotation got.
//!
//! # Examples
//!
//! ```no_run
//! use keyrot_core::SessionConfig;
//! use keyrot_rotation::RotationEngine;
//!
//! # async fn example() -> keyrot_core::Result<()> {
//! let config = SessionConfig::load(std::path::Path::new("keyrot.yaml"))?;
//! let result = RotationEngine::new(config).rotate().await?;
//! if !result.success {
//!     for error in &result.errors {
//!         eprintln!("{}: {}", error.kind, error.message);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod engine;
pub mod keygen;
pub mod lock;
pub mod orchestrator;
pub mod recipients;
pub mod result;
pub mod rollback;
pub mod session;
pub mod validator;

pub use engine::{RotationEngine, StatusReport};
pub use lock::{LockHolder, RotationLock};
pub use orchestrator::{AbortHandle, Orchestrator};
pub use result::{RotationResult, StoreOutcome};
pub use rollback::{restore_from_backup, RollbackReport};
pub use session::{Journal, JournalEntry, JournalEvent, Phase, RotationSession, StoreStatus};
pub use validator::ValidationResult;
