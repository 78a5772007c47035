//! CLI command implementations

pub mod backup;
pub mod keygen;
pub mod prune;
pub mod rollback;
pub mod rotate;
pub mod status;
pub mod validate;

use anyhow::{Context, Result};
use camino::Utf8Path;
use dialoguer::Confirm;
use keyrot_core::SessionConfig;
use std::path::PathBuf;
use tracing::debug;

/// Load the session configuration named by `--config`, or the nearest
/// `keyrot.yaml` above the working directory, or the user-level one
pub fn load_config(path: Option<&Utf8Path>) -> Result<SessionConfig> {
    let path = match path {
        Some(path) => path.as_std_path().to_path_buf(),
        None => locate_config()?,
    };
    debug!(path = %path.display(), "Loading session configuration");
    SessionConfig::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn locate_config() -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("Could not determine the working directory")?;
    match SessionConfig::discover(&cwd) {
        Ok(path) => Ok(path),
        Err(e) => user_config_path()
            .filter(|p| p.is_file())
            .ok_or_else(|| anyhow::Error::new(e)),
    }
}

/// `<config dir>/keyrot/keyrot.yaml`
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("keyrot").join("keyrot.yaml"))
}

/// Ask for confirmation unless `yes` was given
pub fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = "store-dir: secrets\nkeyring-dir: .keyrot/keyring\nbackup-dir: .keyrot/backups\n";

    struct CwdGuard(PathBuf);

    impl Drop for CwdGuard {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.0);
        }
    }

    #[test]
    #[serial]
    fn test_config_is_found_from_nested_directory() {
        let temp = TempDir::new().unwrap();
        let root = fs::canonicalize(temp.path()).unwrap();
        fs::write(root.join("keyrot.yaml"), CONFIG).unwrap();
        let nested = root.join("secrets").join("prod");
        fs::create_dir_all(&nested).unwrap();

        let _guard = CwdGuard(std::env::current_dir().unwrap());
        std::env::set_current_dir(&nested).unwrap();

        let config = load_config(None).unwrap();
        assert_eq!(config.store_dir, root.join("secrets"));
        assert_eq!(config.keyring_dir, root.join(".keyrot/keyring"));
    }

    #[test]
    #[serial]
    fn test_explicit_config_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.yaml");
        fs::write(&path, CONFIG).unwrap();

        let utf8 = Utf8Path::from_path(&path).unwrap();
        let config = load_config(Some(utf8)).unwrap();
        assert_eq!(config.backup_dir, temp.path().join(".keyrot/backups"));
    }

    #[test]
    #[serial]
    fn test_missing_explicit_config_has_context() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("absent.yaml");
        let utf8 = Utf8Path::from_path(&path).unwrap();

        let err = load_config(Some(utf8)).unwrap_err();
        assert!(err.to_string().contains("Failed to load configuration"));
    }

    #[test]
    fn test_confirm_skipped_with_yes() {
        assert!(confirm("Proceed?", true).unwrap());
    }
}
