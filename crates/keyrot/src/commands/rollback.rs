//! Rollback command

use anyhow::{Context, Result};
use camino::Utf8Path;
use keyrot_rotation::RotationEngine;

use super::{confirm, load_config};
use crate::cli::RollbackArgs;
use crate::output;

pub async fn run(args: RollbackArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = RotationEngine::new(config);

    if !args.json {
        output::header("Rollback");
        let status = engine.status()?;
        if let Some(session) = &status.session {
            output::kv("Session", &session.id);
            output::kv("Phase", &session.phase.to_string());
            output::kv("Session backup", &session.backup_ref.display().to_string());
        }
        if let Some(backup) = &args.backup {
            output::kv("Restoring from", backup.as_str());
        }
        println!();
    }

    if !confirm(
        "Restore the keyring and every store from the backup?",
        args.yes,
    )? {
        output::info("Rollback cancelled");
        return Ok(());
    }

    let report = engine
        .rollback(args.backup.as_deref().map(Utf8Path::as_std_path))
        .await
        .context("Rollback failed; the backup is untouched and rollback can be retried")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for store in &report.restored {
        output::kv("Restored", store);
    }
    if !report.removed_temp_files.is_empty() {
        output::kv(
            "Temp files removed",
            &report.removed_temp_files.len().to_string(),
        );
    }
    output::success(&format!(
        "Rolled back from {} ({} restored, {} already intact)",
        report.backup.display(),
        report.restored.len(),
        report.intact.len()
    ));
    Ok(())
}
