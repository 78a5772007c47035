//! Post-activation canary check and standalone validation

use keyrot_core::{Error, ErrorDetail, Result, SessionConfig};
use keyrot_secrets::{
    discover_stores, read_identity_file, relative_path, CryptoPrimitive, Identity, Recipient,
    SecretStore,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Outcome of validating stores against an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub success: bool,
    pub recipient: Recipient,
    /// Store used as the canary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canary: Option<String>,
    /// Stores that decrypted successfully
    pub verified: Vec<String>,
    pub errors: Vec<ErrorDetail>,
}

/// Relative path of the canary: the configured one, else the first store
pub fn canary_for(config: &SessionConfig, stores: &[SecretStore]) -> Result<Option<String>> {
    match config.canary_path() {
        Some(path) => Ok(Some(relative_path(&config.store_dir, &path)?)),
        None => Ok(stores.first().map(|s| s.relative.clone())),
    }
}

/// Decrypt the canary with the now-active identity and compare it to the
/// plaintext seen during re-encryption
///
/// Returns the canary's relative path, or `None` when there are no stores.
pub fn check_canary(
    crypto: &dyn CryptoPrimitive,
    config: &SessionConfig,
    stores: &[SecretStore],
    digests: &BTreeMap<String, String>,
) -> Result<Option<String>> {
    let Some(canary) = canary_for(config, stores)? else {
        warn!("No stores to use as a canary; skipping canary decrypt");
        return Ok(None);
    };

    let store = stores
        .iter()
        .find(|s| s.relative == canary)
        .ok_or_else(|| Error::validation(format!("Canary {} was not rotated", canary)))?;

    let identity = read_identity_file(&config.identity_path())?;
    let plaintext = store.open(crypto, &identity).map_err(|e| {
        Error::validation(format!(
            "Canary {} does not decrypt under the active identity: {}",
            canary, e
        ))
    })?;

    match digests.get(&canary) {
        Some(expected) if *expected != plaintext.digest() => Err(Error::validation(format!(
            "Canary {} decrypted to different content than before rotation",
            canary
        ))),
        _ => {
            info!(canary = %canary, "Canary decrypt succeeded");
            Ok(Some(canary))
        }
    }
}

/// Check that every store decrypts with `identity`
pub fn validate_stores(
    crypto: &dyn CryptoPrimitive,
    config: &SessionConfig,
    identity: &Identity,
) -> Result<ValidationResult> {
    let stores = discover_stores(config)?;
    let canary = canary_for(config, &stores)?;
    let mut verified = Vec::new();
    let mut errors = Vec::new();

    for store in &stores {
        match store.open(crypto, identity) {
            Ok(_) => verified.push(store.relative.clone()),
            Err(e) => {
                warn!(store = %store.relative, "Store failed validation: {}", e);
                errors.push(ErrorDetail::from_error("validate", &e));
            }
        }
    }

    Ok(ValidationResult {
        success: errors.is_empty(),
        recipient: identity.to_public(),
        canary,
        verified,
        errors,
    })
}
