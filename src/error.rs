use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Broad failure categories of a backup run.
///
/// Every category is fatal: the run stops, the failure hooks fire and the
/// process exits non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Connection,
    Exec,
    Repository,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Config => "config",
            ErrorKind::Connection => "connection",
            ErrorKind::Exec => "exec",
            ErrorKind::Repository => "repository",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("config not found: {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("ssh {context}: {source}")]
    Handshake {
        context: String,
        #[source]
        source: ssh2::Error,
    },

    #[error("ssh {context}: {source}")]
    Ssh {
        context: String,
        #[source]
        source: ssh2::Error,
    },

    #[error("host key mismatch: expected {expected}, got {actual}")]
    HostKeyMismatch { expected: String, actual: String },

    #[error("`{command}` exited with status {status}")]
    ExitStatus { command: String, status: i32 },

    #[error("unusable device identifier {0:?}")]
    BadIdentifier(String),

    #[error("read output of `{command}`: {source}")]
    Query {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("read export: {0}")]
    ExportRead(#[source] io::Error),

    #[error("git {context}: {source}")]
    Git {
        context: &'static str,
        #[source]
        source: git2::Error,
    },

    #[error("write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigRead { .. } | Error::ConfigParse { .. } | Error::ConfigInvalid(_) => {
                ErrorKind::Config
            }
            Error::Connect { .. } | Error::Handshake { .. } | Error::HostKeyMismatch { .. } => {
                ErrorKind::Connection
            }
            Error::Ssh { .. } | Error::ExitStatus { .. } | Error::BadIdentifier(_) => {
                ErrorKind::Exec
            }
            Error::Query { .. } | Error::ExportRead(_) => ErrorKind::Exec,
            Error::Git { .. } | Error::Write { .. } => ErrorKind::Repository,
        }
    }

    pub(crate) fn handshake(context: impl Into<String>, source: ssh2::Error) -> Self {
        Error::Handshake {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn ssh(context: impl Into<String>, source: ssh2::Error) -> Self {
        Error::Ssh {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn git(context: &'static str) -> impl FnOnce(git2::Error) -> Self {
        move |source| Error::Git { context, source }
    }
}

/// An error tagged with the pipeline step it happened in.
///
/// The step label is what failure notifications and the final log line show,
/// e.g. `Error connect to device: ...`.
#[derive(Error, Debug)]
#[error("Error {step}: {source}")]
pub struct StepError {
    pub step: &'static str,
    #[source]
    pub source: Error,
}

impl StepError {
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

/// Attach a step label to a fallible pipeline stage.
pub trait StepContext<T> {
    fn step(self, step: &'static str) -> std::result::Result<T, StepError>;
}

impl<T> StepContext<T> for Result<T> {
    fn step(self, step: &'static str) -> std::result::Result<T, StepError> {
        self.map_err(|source| StepError { step, source })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
