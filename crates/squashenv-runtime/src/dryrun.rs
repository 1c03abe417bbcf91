use crate::command::{ToolCommand, ToolOutput};
use crate::executor::{Action, Executor};
use crate::RuntimeError;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Reports every side effect instead of performing it.
///
/// Lookups are delegated to the wrapped executor so decisions are taken on
/// the real system state. Actions are kept in order and can be read back with
/// [`DryRunExecutor::actions`].
pub struct DryRunExecutor {
    inner: Box<dyn Executor>,
    log: Mutex<Vec<Action>>,
    quiet: bool,
}

impl DryRunExecutor {
    pub fn new(inner: Box<dyn Executor>) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
            quiet: false,
        }
    }

    /// Record without printing `[dry-run]` lines to stderr.
    #[must_use]
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn actions(&self) -> Vec<Action> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn record(&self, action: Action) {
        let verb = if matches!(action, Action::Step { .. }) {
            ""
        } else {
            "would "
        };
        tracing::info!("dry-run: {verb}{action}");
        if !self.quiet {
            eprintln!("[dry-run] {verb}{action}");
        }
        if let Ok(mut log) = self.log.lock() {
            log.push(action);
        }
    }
}

impl Executor for DryRunExecutor {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    fn simulated(&self) -> bool {
        true
    }

    fn locate(&self, tool: &str) -> Option<PathBuf> {
        self.inner.locate(tool)
    }

    fn begin_step(&self, index: usize, total: usize, name: &'static str) {
        self.record(Action::Step { index, total, name });
    }

    fn create_dir_all(&self, path: &Path, _mode: u32) -> Result<(), RuntimeError> {
        self.record(Action::CreateDir(path.to_path_buf()));
        Ok(())
    }

    fn remove_tree(&self, path: &Path) -> Result<(), RuntimeError> {
        self.record(Action::RemoveTree(path.to_path_buf()));
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> Result<(), RuntimeError> {
        self.record(Action::RemoveDir(path.to_path_buf()));
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), RuntimeError> {
        self.record(Action::RemoveFile(path.to_path_buf()));
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), RuntimeError> {
        self.record(Action::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
        Ok(())
    }

    fn write_file(&self, path: &Path, _contents: &str, mode: u32) -> Result<(), RuntimeError> {
        self.record(Action::WriteFile {
            path: path.to_path_buf(),
            mode,
        });
        Ok(())
    }

    fn fetch(&self, url: &str, dest: &Path) -> Result<(), RuntimeError> {
        self.record(Action::Fetch {
            url: url.to_owned(),
            dest: dest.to_path_buf(),
        });
        Ok(())
    }

    fn run_tool(&self, cmd: &ToolCommand) -> Result<ToolOutput, RuntimeError> {
        self.record(Action::RunTool(cmd.clone()));
        Ok(ToolOutput::ok())
    }

    fn run_foreground(&self, cmd: &ToolCommand) -> Result<i32, RuntimeError> {
        self.record(Action::RunCommand(cmd.clone()));
        Ok(0)
    }
}
