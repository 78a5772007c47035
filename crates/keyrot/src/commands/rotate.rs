//! Rotate command

use anyhow::{bail, Context, Result};
use camino::Utf8Path;
use keyrot_core::ExecutionStrategy;
use keyrot_rotation::{RotationEngine, RotationResult};
use tabled::{settings::Style, Table, Tabled};

use super::{confirm, load_config};
use crate::cli::RotateArgs;
use crate::output;

#[derive(Tabled)]
struct StoreRow {
    #[tabled(rename = "Store")]
    store: String,
    #[tabled(rename = "Status")]
    status: String,
}

pub async fn run(args: RotateArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if args.dry_run {
        config.strategy = ExecutionStrategy::DryRun;
    }
    if let Some(parallelism) = args.parallelism {
        config.parallelism = parallelism;
    }

    if !args.json {
        output::header("Rotate Key");
        output::kv("Stores", &config.store_dir.display().to_string());
        output::kv("Keyring", &config.keyring_dir.display().to_string());
        output::kv("Backups", &config.backup_dir.display().to_string());
        output::kv("Parallelism", &config.parallelism.to_string());
        if config.strategy.is_dry_run() {
            output::warning("DRY RUN MODE - nothing will be changed");
        }
        println!();
    }

    if !config.strategy.is_dry_run()
        && !confirm("Generate a new key and re-encrypt every store?", args.yes)?
    {
        output::info("Rotation cancelled");
        return Ok(());
    }

    let engine = RotationEngine::new(config);

    // Ctrl-C stops the rotation between stores and rolls back
    let abort = engine.abort_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            output::warning("Interrupted; rolling back after the current store");
            abort.abort();
        }
    });

    let spinner = (!args.json).then(|| output::spinner("Rotating..."));
    let outcome = engine.rotate().await;
    interrupt.abort();
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let result = outcome.context("Rotation did not start; no store was modified")?;

    if args.json {
        println!("{}", result.to_json()?);
    } else {
        render(&result);
    }

    if !result.success {
        match &result.backup_path {
            Some(backup) => bail!(
                "Rotation failed; see errors above. Backup retained at {}",
                backup.display()
            ),
            None => bail!("Rotation failed; see errors above"),
        }
    }
    Ok(())
}

fn render(result: &RotationResult) {
    let rows: Vec<StoreRow> = result
        .per_store_status
        .iter()
        .map(|(store, status)| StoreRow {
            store: store.clone(),
            status: output::outcome(&status.to_string()),
        })
        .collect();

    if !rows.is_empty() {
        let mut table = Table::new(rows);
        table.with(Style::sharp());
        println!("{}", table);
    }

    output::kv("Session", &result.session_id);
    if let Some(backup) = &result.backup_path {
        output::kv("Backup", &backup.display().to_string());
    }
    if let Some(canary) = &result.canary {
        output::kv("Canary", canary);
    }

    for error in &result.errors {
        let store = error
            .store
            .as_deref()
            .map(|s| format!(" [{}]", s))
            .unwrap_or_default();
        output::error(&format!("{} during {}{}: {}", error.kind, error.stage, store, error.message));
    }

    match (result.success, result.strategy, &result.new_recipient) {
        (true, ExecutionStrategy::DryRun, _) => {
            output::success(&format!("Planned rotation of {} stores", result.per_store_status.len()))
        }
        (true, _, Some(recipient)) => {
            output::success(&format!("Rotated to {}", recipient))
        }
        (true, _, None) => output::success("Rotation complete"),
        (false, _, _) => output::warning("Rotation rolled back"),
    }
    if result.success && !result.errors.is_empty() {
        output::warning("The session marker was left behind; check `keyrot status`");
    }
}
