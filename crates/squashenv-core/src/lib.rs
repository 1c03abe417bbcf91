//! Lifecycle engine for squashenv.
//!
//! This crate ties the project record, the executor seam and the mount table
//! together into the `Engine`: the API for initializing a project, building its
//! environment image, mounting and unmounting it at the canonical path, running
//! commands from it with transparent mount handling, and reporting status. It
//! also provides the build step selection, the mount-state transition planner,
//! the build and exec locks, and the interrupt flag.

pub mod build;
pub mod concurrency;
pub mod engine;
pub mod lifecycle;

pub use build::{BuildOptions, BuildStep, StepSelection};
pub use concurrency::{
    exec_lock_path, install_signal_handler, shutdown_requested, BuildLock, ExecLock,
};
pub use engine::{BuildReport, Engine, MountOutcome, ProjectStatus, UnmountOutcome};
pub use lifecycle::{plan_transition, MountState, Transition};

use squashenv_runtime::ToolStatus;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] squashenv_schema::ConfigError),
    #[error("runtime error: {0}")]
    Runtime(#[from] squashenv_runtime::RuntimeError),
    #[error("required tool '{tool}' not found (install: {install_hint})")]
    PrerequisiteMissing {
        tool: &'static str,
        install_hint: &'static str,
    },
    #[error("build step {index} ({name}) failed: {reason}")]
    BuildStepFailed {
        index: usize,
        name: &'static str,
        reason: String,
    },
    #[error("{tool} failed: {detail}")]
    ToolFailed { tool: String, detail: String },
    #[error("mount failed: {0}")]
    MountOperationFailed(String),
    #[error("unmount failed: {0}")]
    UnmountOperationFailed(String),
    #[error("{0}: command not found")]
    ExecTargetNotFound(String),
    #[error("image {} does not exist; run 'squashenv build' first", .0.display())]
    ImageMissing(PathBuf),
    #[error("{} is mounted; run 'squashenv umount' first", .0.display())]
    MountPointBusy(PathBuf),
    #[error("{} is not mounted", .0.display())]
    NotMounted(PathBuf),
    #[error("another build holds {}", .0.display())]
    BuildInProgress(PathBuf),
    #[error("another exec of this project is running on this host (lock {})", .0.display())]
    ExecInProgress(PathBuf),
    #[error("interrupted")]
    Interrupted,
    #[error("invalid step selection: {0}")]
    InvalidStepSelection(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub(crate) fn missing(status: &ToolStatus) -> Self {
        Self::PrerequisiteMissing {
            tool: status.name,
            install_hint: status.install_hint,
        }
    }

    /// Errors that keep their own identity when raised inside a build step.
    pub(crate) fn aborts_build(&self) -> bool {
        matches!(
            self,
            Self::PrerequisiteMissing { .. }
                | Self::MountPointBusy(_)
                | Self::Interrupted
                | Self::Config(_)
        )
    }
}
