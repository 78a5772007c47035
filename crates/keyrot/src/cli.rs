//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// keyrot - Rotate the key protecting a set of encrypted secret stores
#[derive(Parser, Debug)]
#[command(name = "keyrot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to keyrot.yaml config file
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a new key and re-encrypt every store under it
    Rotate(RotateArgs),

    /// Snapshot the keyring and every store without rotating
    Backup(BackupArgs),

    /// Check that every store decrypts with an identity
    Validate(ValidateArgs),

    /// Restore the keyring and stores from a backup
    Rollback(RollbackArgs),

    /// Show lock, session, keyring and backup state
    Status(StatusArgs),

    /// Create the first active identity and recipient map
    #[command(visible_alias = "init")]
    Keygen(KeygenArgs),

    /// Remove backups past their retention
    Prune(PruneArgs),
}

#[derive(Args, Debug)]
pub struct RotateArgs {
    /// Plan the rotation and log intended actions without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Number of stores re-encrypted concurrently (overrides config)
    #[arg(short = 'j', long)]
    pub parallelism: Option<usize>,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Output the rotation result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Output the backup manifest as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Identity file to validate with (defaults to the active identity)
    #[arg(short, long)]
    pub identity: Option<Utf8PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Backup directory to restore from (defaults to the unfinished session's backup)
    pub backup: Option<Utf8PathBuf>,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Replace an existing active identity
    #[arg(short, long)]
    pub force: bool,

    /// Skip confirmation prompt when forcing
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Retention in days (overrides config; never below 30)
    #[arg(long)]
    pub retention_days: Option<u32>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
