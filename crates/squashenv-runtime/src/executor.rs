use crate::command::{ToolCommand, ToolOutput};
use crate::RuntimeError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Selects the executor backend (`host` or `mock`).
pub const BACKEND_ENV: &str = "SQUASHENV_BACKEND";

/// One externally visible action, as recorded by the dry-run and mock
/// executors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Step {
        index: usize,
        total: usize,
        name: &'static str,
    },
    CreateDir(PathBuf),
    RemoveTree(PathBuf),
    RemoveDir(PathBuf),
    RemoveFile(PathBuf),
    Rename {
        from: PathBuf,
        to: PathBuf,
    },
    WriteFile {
        path: PathBuf,
        mode: u32,
    },
    Fetch {
        url: String,
        dest: PathBuf,
    },
    RunTool(ToolCommand),
    RunCommand(ToolCommand),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step { index, total, name } => write!(f, "step {index}/{total}: {name}"),
            Self::CreateDir(p) => write!(f, "create directory {}", p.display()),
            Self::RemoveTree(p) => write!(f, "remove tree {}", p.display()),
            Self::RemoveDir(p) => write!(f, "remove empty directory {}", p.display()),
            Self::RemoveFile(p) => write!(f, "remove file {}", p.display()),
            Self::Rename { from, to } => {
                write!(f, "rename {} -> {}", from.display(), to.display())
            }
            Self::WriteFile { path, mode } => {
                write!(f, "write {} (mode {mode:o})", path.display())
            }
            Self::Fetch { url, dest } => write!(f, "download {url} -> {}", dest.display()),
            Self::RunTool(cmd) => write!(f, "run {cmd}"),
            Self::RunCommand(cmd) => write!(f, "exec {cmd}"),
        }
    }
}

/// Performs every side effect of the lifecycle engine.
///
/// Read-only queries (`locate`, and the mount table and config reads done
/// outside this trait) always hit the real system, so that a simulated run
/// takes exactly the decisions a real one would.
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;

    /// True when actions are only reported, never performed.
    fn simulated(&self) -> bool {
        false
    }

    /// Locate an external tool on the search path.
    fn locate(&self, tool: &str) -> Option<PathBuf>;

    /// Marks the start of a build step. Recording executors keep it in their
    /// action log so step sequences can be compared.
    fn begin_step(&self, index: usize, total: usize, name: &'static str) {
        tracing::info!("step {index}/{total}: {name}");
    }

    fn create_dir_all(&self, path: &Path, mode: u32) -> Result<(), RuntimeError>;

    /// Remove a directory tree; a missing tree is not an error.
    fn remove_tree(&self, path: &Path) -> Result<(), RuntimeError>;

    /// Remove an empty directory; a missing directory is not an error.
    fn remove_dir(&self, path: &Path) -> Result<(), RuntimeError>;

    /// Remove a file; a missing file is not an error.
    fn remove_file(&self, path: &Path) -> Result<(), RuntimeError>;

    fn rename(&self, from: &Path, to: &Path) -> Result<(), RuntimeError>;

    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<(), RuntimeError>;

    fn fetch(&self, url: &str, dest: &Path) -> Result<(), RuntimeError>;

    /// Run a tool that changes external state, capturing its stderr tail.
    /// A nonzero exit is reported in the returned output, not as an error.
    fn run_tool(&self, cmd: &ToolCommand) -> Result<ToolOutput, RuntimeError>;

    /// Run a user command in the foreground with inherited stdio and signal
    /// forwarding. Returns its exit code (128 + signal number on signal death).
    fn run_foreground(&self, cmd: &ToolCommand) -> Result<i32, RuntimeError>;
}

/// Shared executors, so a test can keep a handle on a recording executor
/// while the engine owns it.
impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn simulated(&self) -> bool {
        (**self).simulated()
    }

    fn locate(&self, tool: &str) -> Option<PathBuf> {
        (**self).locate(tool)
    }

    fn begin_step(&self, index: usize, total: usize, name: &'static str) {
        (**self).begin_step(index, total, name);
    }

    fn create_dir_all(&self, path: &Path, mode: u32) -> Result<(), RuntimeError> {
        (**self).create_dir_all(path, mode)
    }

    fn remove_tree(&self, path: &Path) -> Result<(), RuntimeError> {
        (**self).remove_tree(path)
    }

    fn remove_dir(&self, path: &Path) -> Result<(), RuntimeError> {
        (**self).remove_dir(path)
    }

    fn remove_file(&self, path: &Path) -> Result<(), RuntimeError> {
        (**self).remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), RuntimeError> {
        (**self).rename(from, to)
    }

    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<(), RuntimeError> {
        (**self).write_file(path, contents, mode)
    }

    fn fetch(&self, url: &str, dest: &Path) -> Result<(), RuntimeError> {
        (**self).fetch(url, dest)
    }

    fn run_tool(&self, cmd: &ToolCommand) -> Result<ToolOutput, RuntimeError> {
        (**self).run_tool(cmd)
    }

    fn run_foreground(&self, cmd: &ToolCommand) -> Result<i32, RuntimeError> {
        (**self).run_foreground(cmd)
    }
}

/// Build the executor named by `name`, optionally wrapped for dry-run.
///
/// The mock backend keeps its simulated mounts in `mount_table`, the same
/// file the engine inspects.
pub fn select_executor(
    name: &str,
    mount_table: &Path,
    dry_run: bool,
) -> Result<Box<dyn Executor>, RuntimeError> {
    let inner: Box<dyn Executor> = match name {
        "host" => Box::new(crate::host::HostExecutor::new()),
        "mock" => Box::new(crate::mock::MockExecutor::from_env(mount_table)),
        other => return Err(RuntimeError::BackendUnavailable(other.to_owned())),
    };
    if dry_run {
        Ok(Box::new(crate::dryrun::DryRunExecutor::new(inner)))
    } else {
        Ok(inner)
    }
}
