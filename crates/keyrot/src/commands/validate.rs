//! Validate command

use anyhow::{bail, Context, Result};
use camino::Utf8Path;
use keyrot_rotation::RotationEngine;
use keyrot_secrets::read_identity_file;

use super::load_config;
use crate::cli::ValidateArgs;
use crate::output;

pub fn run(args: ValidateArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = RotationEngine::new(config);

    let result = match &args.identity {
        Some(path) => {
            let identity = read_identity_file(path.as_std_path())
                .with_context(|| format!("Failed to read identity {}", path))?;
            engine.validate(&identity)?
        }
        None => engine.validate_active()?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        output::header("Validate Stores");
        output::kv("Recipient", result.recipient.as_str());
        output::kv("Verified", &result.verified.len().to_string());
        for error in &result.errors {
            output::error(&error.message);
        }
        if result.success {
            output::success("Every store decrypts");
        }
    }

    if !result.success {
        bail!("{} stores failed to decrypt", result.errors.len());
    }
    Ok(())
}
