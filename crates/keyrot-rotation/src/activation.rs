//! Activation of the staged identity and recipient map
//!
//! The active slot is swapped as a whole directory: `active/` becomes
//! `previous/` and the fully prepared `staging/` becomes `active/`. Readers
//! see either the old identity with the old policy or the new identity with
//! the new policy.

use keyrot_core::utils::sync_dir;
use keyrot_core::{Error, Result, SessionConfig};
use std::fs;
use tracing::{info, warn};

/// Swap the staging slot in as the active slot
pub fn activate(config: &SessionConfig) -> Result<()> {
    let staging = config.staging_dir();
    for name in [
        SessionConfig::identity_file_name(),
        SessionConfig::policy_file_name(),
    ] {
        if !staging.join(name).is_file() {
            return Err(Error::configuration(format!(
                "Staging slot is incomplete, missing {}",
                name
            )));
        }
    }

    let active = config.active_dir();
    let previous = config.previous_dir();

    if previous.exists() {
        fs::remove_dir_all(&previous).map_err(|e| Error::io_at(&previous, e))?;
    }
    if active.exists() {
        fs::rename(&active, &previous).map_err(|e| Error::io_at(&active, e))?;
    }

    if let Err(e) = fs::rename(&staging, &active) {
        if previous.exists() && !active.exists() {
            if let Err(restore) = fs::rename(&previous, &active) {
                warn!("Failed to reinstate the previous active slot: {}", restore);
            }
        }
        return Err(Error::io_at(&staging, e));
    }

    sync_dir(&config.keyring_dir);
    info!(active = %active.display(), "Activated new identity and recipient map");
    Ok(())
}
