use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::remediation::FixScope;
use crate::runtime::Mode;

#[derive(Parser, Debug)]
#[command(name = "gwdoctor")]
#[command(version)]
#[command(about = "Diagnose and repair an API gateway deployment", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "GWDOCTOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Apply fixes without asking for confirmation
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// Don't capture a snapshot before applying fixes
    #[arg(long, global = true)]
    pub no_snapshot: bool,

    /// Output format for reports
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub output_format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Report issues without changing anything
    DiagnoseOnly,
    /// Fix every remediable issue
    FixAll,
    /// Create missing consumers and reset drifted credentials
    FixApiKeys,
    /// Replace consumer auth on provider routes
    FixAuth,
    /// Align upstream TLS verification with policy
    FixSsl,
    /// Reconnect services to the shared network
    FixNetwork,
    /// Restore a snapshot (the latest one when no id is given)
    Rollback {
        snapshot_id: Option<String>,

        /// Also restore the captured environment files
        #[arg(long)]
        restore_env: bool,
    },
    /// Manage captured snapshots
    Snapshots {
        #[command(subcommand)]
        command: SnapshotCommands,
    },
    /// Check connectivity to the admin API and the container runtime
    Status,
    /// Initialize configuration
    Init,
}

#[derive(Subcommand, Debug)]
pub enum SnapshotCommands {
    /// List snapshots, oldest first
    List,
    /// Delete all but the newest snapshots
    Prune {
        /// Number of snapshots to keep
        #[arg(long)]
        keep: usize,
    },
}

impl Commands {
    /// Pipeline mode for the diagnose and fix commands
    pub fn mode(&self) -> Option<Mode> {
        match self {
            Commands::DiagnoseOnly => Some(Mode::DiagnoseOnly),
            Commands::FixAll => Some(Mode::Fix(FixScope::All)),
            Commands::FixApiKeys => Some(Mode::Fix(FixScope::ApiKeys)),
            Commands::FixAuth => Some(Mode::Fix(FixScope::Auth)),
            Commands::FixSsl => Some(Mode::Fix(FixScope::Ssl)),
            Commands::FixNetwork => Some(Mode::Fix(FixScope::Network)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    Text,
    /// JSON structured output
    Json,
    /// Markdown formatted output
    Markdown,
}
