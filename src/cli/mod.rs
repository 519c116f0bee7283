//! Command-line interface definitions.

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// copyhawk - leader-to-follower leveraged futures copy trading.
#[derive(Parser, Debug)]
#[command(name = "copyhawk")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "copyhawk.toml")]
    pub config: PathBuf,

    /// Override log level (debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine: reconciliation loop plus command input on stdin
    Run,

    /// Test connectivity for one account from the keystore (or the leader)
    Test(TestArgs),

    /// Reconcile follower positions against the leader once
    Sync(SyncArgs),

    /// Show keystore and engine status
    Status,

    /// Validate the keystore configuration
    Validate,
}

/// Arguments for the `test` subcommand.
#[derive(Parser, Debug)]
pub struct TestArgs {
    /// User id to test; "leader" tests the configured leader account
    #[arg(long)]
    pub user_id: String,
}

/// Arguments for the `sync` subcommand.
#[derive(Parser, Debug)]
pub struct SyncArgs {
    /// Inspect follower state without placing corrective orders
    #[arg(long)]
    pub dry_run: bool,
}
