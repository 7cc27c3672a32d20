use tracing::{debug, error};

use crate::config::Config;
use crate::error::{StepContext, StepError};
use crate::git::{CommitOptions, CommitOutcome, commit_export};
use crate::notify::Notifier;
use crate::ssh::{Session, validate_identifier};

/// Options that come from the command line rather than the config file.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub debug: bool,
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Device identifier, also the file name inside the repository.
    pub identifier: String,
    pub commit: CommitOutcome,
}

/// The pipeline without hooks: validate, connect, identify, export, commit.
fn run(cfg: &Config, opts: &RunOptions) -> Result<Outcome, StepError> {
    cfg.validate().step("load config")?;
    let filter = cfg.line_filter().step("load config")?;

    let session = Session::connect(&cfg.device).step("connect to device")?;

    let identifier = session
        .query(&cfg.export.identity_command)
        .and_then(|id| validate_identifier(&id).map(str::to_string))
        .step("get serial number")?;
    debug!(%identifier, "device identifier");

    let export = session
        .stream(&cfg.export.export_command)
        .step("run export")?;

    let commit = commit_export(
        &cfg.git,
        &identifier,
        export,
        &filter,
        &CommitOptions {
            progress: opts.debug,
        },
    )
    .step("write backup")?;

    Ok(Outcome { identifier, commit })
}

/// Back up the device described by `cfg` and fire the configured hooks.
///
/// On success the success hook runs. On failure the failure hook runs, then
/// the failure-message hook with `Error <step>: <cause>`, and the error is
/// logged and returned. Hooks never change the result.
pub fn cmd_backup(cfg: &Config, opts: &RunOptions) -> Result<Outcome, StepError> {
    let notifier = Notifier::new(&cfg.notify);
    match run(cfg, opts) {
        Ok(outcome) => {
            notifier.success();
            Ok(outcome)
        }
        Err(e) => {
            let message = e.to_string();
            notifier.failure(&message);
            error!(kind = %e.kind(), "{}", message);
            Err(e)
        }
    }
}
