//! Status command

use anyhow::Result;
use camino::Utf8Path;
use keyrot_rotation::{RotationEngine, StoreStatus};

use super::load_config;
use crate::cli::StatusArgs;
use crate::output;

pub fn run(args: StatusArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let status = RotationEngine::new(config).status()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    output::header("Keyring");
    output::kv(
        "Active recipient",
        status
            .active_recipient
            .as_ref()
            .map(|r| r.as_str())
            .unwrap_or("none (run `keyrot init`)"),
    );
    if let Some(previous) = &status.previous_recipient {
        output::kv("Previous recipient", previous.as_str());
    }

    output::header("Rotation");
    match &status.lock_holder {
        Some(holder) => output::kv("Lock", &format!("held by {}", holder)),
        None => output::kv("Lock", "free"),
    }
    match &status.session {
        Some(session) => {
            output::warning(&format!(
                "Unfinished session {} in phase {}",
                session.id, session.phase
            ));
            output::kv(
                "Stores",
                &format!(
                    "{} done, {} failed, {} pending",
                    session.count(StoreStatus::Done),
                    session.count(StoreStatus::Failed),
                    session.count(StoreStatus::Pending)
                ),
            );
            output::kv("Backup", &session.backup_ref.display().to_string());
            output::info("Run `keyrot rollback` to restore the pre-rotation state");
        }
        None => output::kv("Session", "none"),
    }

    output::header("Backups");
    output::kv("Count", &status.backups.to_string());
    if let Some(latest) = &status.latest_backup {
        output::kv("Latest", &latest.display().to_string());
    }
    Ok(())
}
