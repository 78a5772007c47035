//! Staging the recipient map for a new recipient

use keyrot_core::{Result, SessionConfig};
use keyrot_secrets::{Recipient, RecipientMap};
use tracing::info;

/// Build the staged recipient map and write it beside the staged identity
///
/// The live map is only read. Every store path in `stores` must be covered
/// by a rule of the staged map.
pub fn stage_policy<'a>(
    config: &SessionConfig,
    old: &Recipient,
    new: &Recipient,
    stores: impl IntoIterator<Item = &'a str>,
) -> Result<RecipientMap> {
    let live = RecipientMap::load(&config.policy_path())?;
    let staged = live.stage_replacement(old, new)?;
    staged.check_coverage(stores)?;

    staged.save(
        &config
            .staging_dir()
            .join(SessionConfig::policy_file_name()),
    )?;
    info!(
        rules = staged.creation_rules.len(),
        "Staged recipient map for the new recipient"
    );
    Ok(staged)
}
