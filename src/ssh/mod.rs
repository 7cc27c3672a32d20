//! SSH integration layer.
//!
//! This module wraps the backend implementation (`ssh2_backend`) and
//! re-exports the small API the backup pipeline needs: open a session, run a
//! query, stream a command's output.

mod ssh2_backend;

pub use ssh2_backend::{CommandChannel, RemoteOutput, Session, validate_identifier};
