//! Prune command

use anyhow::Result;
use camino::Utf8Path;
use keyrot_core::config::MIN_RETENTION_DAYS;
use keyrot_rotation::RotationEngine;

use super::load_config;
use crate::cli::PruneArgs;
use crate::output;

pub async fn run(args: PruneArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(days) = args.retention_days {
        if days < MIN_RETENTION_DAYS {
            output::warning(&format!(
                "Retention below {} days is not allowed; using {}",
                MIN_RETENTION_DAYS, MIN_RETENTION_DAYS
            ));
        }
        config.retention_days = days.max(MIN_RETENTION_DAYS);
    }

    let report = RotationEngine::new(config).prune().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for path in &report.removed {
        output::kv("Removed", &path.display().to_string());
    }
    for path in &report.partials_removed {
        output::kv("Removed partial", &path.display().to_string());
    }
    output::success(&format!(
        "Pruned {} backups, kept {}",
        report.removed.len(),
        report.kept.len()
    ));
    Ok(())
}
