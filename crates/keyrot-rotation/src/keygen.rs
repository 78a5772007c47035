//! Key generation into the staging slot

use keyrot_core::utils::create_private_dir;
use keyrot_core::{Error, Result, SessionConfig};
use keyrot_secrets::{write_identity_file, CryptoPrimitive, KeyPair, RecipientMap};
use tracing::info;

/// Generate a new keypair and persist its identity to the staging slot
///
/// The identity is on disk (0600) before any store is re-encrypted for it,
/// so a crash mid-rotation never strands stores under a key that exists only
/// in memory. Only the recipient is logged.
pub fn generate_staged(crypto: &dyn CryptoPrimitive, config: &SessionConfig) -> Result<KeyPair> {
    let pair = crypto
        .generate_keypair()
        .map_err(|e| Error::crypto("keyring", e.to_string()))?;

    let staging = config.staging_dir();
    if staging.exists() {
        std::fs::remove_dir_all(&staging).map_err(|e| Error::io_at(&staging, e))?;
    }
    create_private_dir(&staging)?;
    write_identity_file(
        &staging.join(SessionConfig::identity_file_name()),
        &pair.identity,
    )?;

    info!(recipient = %pair.recipient, "Generated new keypair");
    Ok(pair)
}

/// Create the first active identity and a catch-all recipient map
///
/// Refuses to overwrite an existing active identity unless `force` is set.
pub fn initialize_keyring(
    crypto: &dyn CryptoPrimitive,
    config: &SessionConfig,
    force: bool,
) -> Result<KeyPair> {
    let identity_path = config.identity_path();
    if identity_path.exists() && !force {
        return Err(Error::configuration(format!(
            "An active identity already exists at {}; use rotate to replace it",
            identity_path.display()
        )));
    }

    let pair = crypto
        .generate_keypair()
        .map_err(|e| Error::crypto("keyring", e.to_string()))?;

    create_private_dir(&config.keyring_dir)?;
    create_private_dir(&config.active_dir())?;
    write_identity_file(&identity_path, &pair.identity)?;

    let policy_path = config.policy_path();
    if !policy_path.exists() || force {
        RecipientMap::single(pair.recipient.clone()).save(&policy_path)?;
    }

    info!(recipient = %pair.recipient, "Initialized keyring");
    Ok(pair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyrot_secrets::{read_identity_file, AgeCrypto};
    use tempfile::TempDir;

    fn config(temp: &TempDir) -> SessionConfig {
        SessionConfig::new(
            temp.path().join("stores"),
            temp.path().join("keyring"),
            temp.path().join("backups"),
        )
    }

    #[test]
    fn test_generate_staged_persists_identity() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);

        let pair = generate_staged(&AgeCrypto, &config).unwrap();
        let staged = read_identity_file(&config.staging_dir().join("identity.key")).unwrap();
        assert_eq!(staged.to_public(), pair.recipient);
        assert!(!config.identity_path().exists());
    }

    #[test]
    fn test_initialize_keyring_refuses_overwrite() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);

        let pair = initialize_keyring(&AgeCrypto, &config, false).unwrap();
        let policy = RecipientMap::load(&config.policy_path()).unwrap();
        assert!(policy.contains(&pair.recipient));

        let err = initialize_keyring(&AgeCrypto, &config, false).unwrap_err();
        assert_eq!(err.kind(), keyrot_core::ErrorKind::Configuration);

        let replaced = initialize_keyring(&AgeCrypto, &config, true).unwrap();
        assert_ne!(replaced.recipient, pair.recipient);
    }
}
