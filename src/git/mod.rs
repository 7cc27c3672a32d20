//! Git integration layer.
//!
//! This module wraps the backend implementation (`git2_backend`) and
//! re-exports only what the backup pipeline uses. Callers hand over a
//! reader and get back whether a commit was made; clone directories,
//! credentials and refspecs stay inside the backend.

mod git2_backend;

pub use git2_backend::{CommitOptions, CommitOutcome, commit_export};
