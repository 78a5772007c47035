//! Keygen (init) command

use anyhow::Result;
use camino::Utf8Path;
use keyrot_rotation::RotationEngine;

use super::{confirm, load_config};
use crate::cli::KeygenArgs;
use crate::output;

pub async fn run(args: KeygenArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let config = load_config(config_path)?;

    if args.force {
        output::warning("Replacing the active identity leaves existing stores undecryptable");
        if !confirm("Overwrite the active identity?", args.yes)? {
            output::info("Keygen cancelled");
            return Ok(());
        }
    }

    let identity_path = config.identity_path();
    let pair = RotationEngine::new(config).init(args.force).await?;

    output::success("Keyring initialized");
    output::kv("Identity", &identity_path.display().to_string());
    output::kv("Recipient", pair.recipient.as_str());
    Ok(())
}
