//! Backup command

use anyhow::{Context, Result};
use camino::Utf8Path;
use keyrot_rotation::RotationEngine;

use super::load_config;
use crate::cli::BackupArgs;
use crate::output;

pub async fn run(args: BackupArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = RotationEngine::new(config);

    let spinner = (!args.json).then(|| output::spinner("Creating backup..."));
    let outcome = engine.backup_only().await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let backup = outcome.context("Backup failed; no backup directory was left behind")?;

    if args.json {
        println!("{}", backup.manifest.to_json()?);
        return Ok(());
    }

    output::success(&format!("Backup created at {}", backup.path.display()));
    output::kv("Active recipient", backup.manifest.active_recipient.as_str());
    output::kv("Stores", &backup.manifest.stores.len().to_string());
    output::kv("Files", &backup.manifest.totals.artifacts.to_string());
    output::kv("Size", &backup.manifest.totals.display_size());
    Ok(())
}
