//! Crate entry point for **mtbackup**.
//!
//! This library provides the implementation behind the `mtbackup` CLI, which
//! pulls a configuration export from a network device over SSH and commits it
//! to a git repository when it changed.
//! Each submodule encapsulates one responsibility (config parsing, SSH, export
//! filtering, git operations, hooks).
//! The `pub use` re-exports make the entry points accessible from the crate root.

mod backup;
mod config;
mod error;
mod export;
mod git;
mod notify;
mod progress;
mod ssh;

pub use backup::{Outcome, RunOptions, cmd_backup};
pub use config::{
    Config, DeviceConfig, ExportConfig, GitConfig, NotifyConfig, load_config,
    read_config,
};
pub use error::{Error, ErrorKind, Result, StepError};
pub use export::{CopyStats, LineFilter, copy_filtered};
pub use git::{CommitOptions, CommitOutcome, commit_export};
pub use notify::Notifier;
pub use ssh::{CommandChannel, RemoteOutput, Session};
