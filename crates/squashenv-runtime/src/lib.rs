//! Side-effect layer for squashenv.
//!
//! Every state-changing action the lifecycle engine takes goes through the
//! [`Executor`] trait: [`HostExecutor`] performs it, [`DryRunExecutor`] records
//! and reports it without touching the system, and [`MockExecutor`] simulates
//! the external image tools inside a scratch mount table for tests. The crate
//! also holds the read-only queries the engine decides on (mount table,
//! prerequisite lookup), installer retrieval, activation script text, and
//! signal forwarding for wrapped commands.

pub mod activation;
pub mod command;
pub mod dryrun;
pub mod executor;
pub mod host;
pub mod installer;
pub mod mock;
pub mod mounts;
pub mod prereq;
pub mod signals;

pub use command::{shell_quote, ToolCommand, ToolOutput};
pub use dryrun::DryRunExecutor;
pub use executor::{select_executor, Action, Executor, BACKEND_ENV};
pub use host::{hostname, HostExecutor};
pub use mock::{MockExecutor, MOCK_FAIL_ENV, MOCK_MISSING_ENV};
pub use mounts::{MountEntry, MountTable, MOUNT_TABLE_ENV};
pub use prereq::{
    check_prereqs, format_missing, missing_for, unmount_tool, Operation, ToolStatus,
};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}: command not found")]
    NotFound(String),
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("download of {url} failed: {reason}")]
    Fetch { url: String, reason: String },
    #[error("installer not usable: {0}")]
    Installer(String),
    #[error("cannot read mount table {}: {source}", .path.display())]
    MountTable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("executor backend '{0}' is not available")]
    BackendUnavailable(String),
}
