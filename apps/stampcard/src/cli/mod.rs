//! # Stamp Card CLI Module
//!
//! This module implements the CLI interface for the stamp card server.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `status` - Show ledger status
//! - `init` - Initialize new database
//! - `users` - List users and their cards
//! - `grant` - Grant a stamp as the operator (admin rights)
//! - `revoke` - Revoke a stamp
//! - `set-role` - Change a user's role
//! - `reset` - Clear every card and the grant history
//! - `backup` - Write a snapshot of the ledger
//! - `restore` - Replace the ledger with a snapshot

mod commands;

use crate::config::AppConfig;
use crate::error::AppError;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Festival stamp card server
///
/// Students collect up to 34 stamps; managers grant one stamp per student,
/// admins grant and revoke freely.
#[derive(Parser, Debug)]
#[command(name = "stampcard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a TOML configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the ledger database (overrides configuration)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend: "redb" (ACID database) or "memory" (volatile)
    #[arg(short = 'B', long, global = true)]
    pub backend: Option<String>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Snapshot file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SnapshotFormat {
    /// Header + postcard
    Binary,
    /// Pretty-printed JSON
    Json,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to (overrides configuration)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (overrides configuration)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show ledger status
    Status,

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// List users with their stamp counts
    Users,

    /// Grant a stamp with admin rights
    Grant {
        /// Target user's email
        #[arg(short, long)]
        target: String,

        /// Slot to grant, e.g. stamp7
        #[arg(short, long, conflicts_with = "auto")]
        stamp: Option<String>,

        /// Grant the lowest free slot
        #[arg(short, long)]
        auto: bool,
    },

    /// Revoke a stamp
    Revoke {
        /// Target user's email
        #[arg(short, long)]
        target: String,

        /// Slot to revoke, e.g. stamp7
        #[arg(short, long)]
        stamp: String,
    },

    /// Change a user's role
    SetRole {
        /// Target user's email
        #[arg(short, long)]
        email: String,

        /// New role: student, manager or admin
        #[arg(short, long)]
        role: String,
    },

    /// Clear every stamp card and the whole grant history
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,

        /// Skip the backup written before resetting
        #[arg(long)]
        no_backup: bool,

        /// Directory for the pre-reset backup
        #[arg(long, default_value = ".")]
        backup_dir: PathBuf,
    },

    /// Write a snapshot of users and grant history
    Backup {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Snapshot format
        #[arg(short = 't', long, value_enum, default_value = "binary")]
        format: SnapshotFormat,
    },

    /// Replace the ledger contents with a snapshot (binary or JSON)
    Restore {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Confirm the replacement
        #[arg(long)]
        yes: bool,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Resolve configuration: file, then environment, then command-line flags.
pub fn resolve_config(cli: &Cli) -> Result<AppConfig, AppError> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(database) = &cli.database {
        config.storage.path.clone_from(database);
    }
    if let Some(backend) = &cli.backend {
        config.storage.backend = backend.parse()?;
    }
    Ok(config)
}

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), AppError> {
    let mut config = resolve_config(&cli)?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { host, port }) => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            cmd_server(&config).await
        }
        Some(Commands::Status) => cmd_status(&config, json_mode),
        Some(Commands::Init { force }) => cmd_init(&config, force),
        Some(Commands::Users) => cmd_users(&config, json_mode),
        Some(Commands::Grant {
            target,
            stamp,
            auto,
        }) => cmd_grant(&config, json_mode, &target, stamp.as_deref(), auto),
        Some(Commands::Revoke { target, stamp }) => cmd_revoke(&config, json_mode, &target, &stamp),
        Some(Commands::SetRole { email, role }) => cmd_set_role(&config, json_mode, &email, &role),
        Some(Commands::Reset {
            yes,
            no_backup,
            backup_dir,
        }) => cmd_reset(&config, json_mode, yes, no_backup, &backup_dir),
        Some(Commands::Backup { output, format }) => cmd_backup(&config, &output, format),
        Some(Commands::Restore { input, yes }) => cmd_restore(&config, json_mode, &input, yes),
        None => {
            // No subcommand - show status by default
            cmd_status(&config, json_mode)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
