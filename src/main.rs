//! # mtbackup
//!
//! **mtbackup** backs up a MikroTik (RouterOS) configuration export into git.
//!
//! Flow of one run:
//! - read the TOML config given with `-f`
//! - connect over SSH and ask the device for its serial number
//! - stream `/export` into a fresh clone, dropping volatile banner lines
//! - commit and push only if the export changed
//! - run the success or failure hooks from `[notify]`
//!
//! This CLI is built with [clap](https://docs.rs/clap).

use clap::Parser;
use mtbackup::{CommitOutcome, RunOptions, cmd_backup, read_config};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Command-line interface definition.
///
/// Parsed using `clap` derive macros.
#[derive(Parser, Debug)]
#[command(
    name = "mtbackup",
    version,
    about = "Back up a MikroTik configuration export to a git repository"
)]
struct Cli {
    /// Location of configuration file
    #[arg(short = 'f', long = "config", value_name = "FILE")]
    config: PathBuf,

    /// Enable debug mode (verbose progress on stderr)
    #[arg(long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        "info,mtbackup=debug"
    } else {
        "warn,mtbackup=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

/// CLI entry point.
///
/// Exits with status 1 on any failure. A missing `-f` makes clap print usage
/// and exit non-zero.
fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    // validated inside cmd_backup so that a bad value still reaches the hooks
    let cfg = match read_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Error load config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cmd_backup(&cfg, &RunOptions { debug: cli.debug }) {
        Ok(outcome) => {
            match outcome.commit {
                CommitOutcome::Committed { oid, branch } => {
                    info!(identifier = %outcome.identifier, %branch, "pushed {}", oid)
                }
                CommitOutcome::Unchanged => {
                    info!(identifier = %outcome.identifier, "configuration unchanged")
                }
            }
            ExitCode::SUCCESS
        }
        // already logged and reported to the failure hooks
        Err(_) => ExitCode::FAILURE,
    }
}
