//! dbopsctl - Operator CLI for the dbops toolkit
//!
//! Routine Oracle and PostgreSQL administration: configuration snapshots
//! and drift detection, the managed DBA account ledger, health checks and
//! notification dispatch.
//!
//! Exit codes: 0 success / no findings, 1 error or validation failure,
//! 2 drift detected or unhealthy component.

mod commands;
mod logging;

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dbopsctl")]
#[command(about = "Database operations toolkit - drift detection, account ledger, health checks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a configuration snapshot of a target
    Snapshot {
        /// Target name from the config file
        #[arg(long)]
        target: String,

        /// Output path (default: snapshot dir, timestamped)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Compare a target's current configuration against a baseline
    Drift {
        /// Target name from the config file
        #[arg(long)]
        target: String,

        /// Baseline snapshot to compare against
        #[arg(long)]
        baseline: PathBuf,

        /// Overwrite the baseline with the current capture afterwards
        #[arg(long)]
        update_baseline: bool,

        /// Send the result through the configured notification channels
        #[arg(long)]
        notify: bool,
    },

    /// Manage the DBA account ledger
    #[command(subcommand)]
    Account(AccountCommands),

    /// Run database and listener health checks
    Health {
        /// Check a single target instead of all configured ones
        #[arg(long)]
        target: Option<String>,

        /// Also discover instances from /etc/oratab
        #[arg(long)]
        discover: bool,

        /// Send the result through the configured notification channels
        #[arg(long)]
        notify: bool,
    },

    /// Send a test notification through every configured channel
    NotifyTest {
        /// Message body to send
        #[arg(long)]
        message: Option<String>,
    },
}

#[derive(Subcommand)]
enum AccountCommands {
    /// Add or update a managed DBA account
    Add {
        /// Account id (becomes DBA_<ID>)
        id: String,

        /// Comma-separated roles: DBA, SYSDBA, MONITOR, OPERATOR
        #[arg(long)]
        roles: String,

        /// Generate a random password instead of prompting
        #[arg(long)]
        generate: bool,
    },

    /// Deactivate a managed DBA account and remove its secret
    Delete {
        /// Account id (becomes DBA_<ID>)
        id: String,
    },

    /// List ledger entries
    List,
}

fn main() {
    logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Snapshot { target, out } => commands::snapshot(&target, out),
        Commands::Drift {
            target,
            baseline,
            update_baseline,
            notify,
        } => commands::drift(&target, &baseline, update_baseline, notify),
        Commands::Account(AccountCommands::Add {
            id,
            roles,
            generate,
        }) => commands::account_add(&id, &roles, generate),
        Commands::Account(AccountCommands::Delete { id }) => commands::account_delete(&id),
        Commands::Account(AccountCommands::List) => commands::account_list(),
        Commands::Health {
            target,
            discover,
            notify,
        } => commands::health(target.as_deref(), discover, notify),
        Commands::NotifyTest { message } => commands::notify_test(message.as_deref()),
    };

    let code = match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red());
            1
        }
    };
    std::process::exit(code);
}
