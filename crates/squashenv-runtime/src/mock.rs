use crate::command::{ToolCommand, ToolOutput};
use crate::executor::{Action, Executor};
use crate::host::HostExecutor;
use crate::mounts::encode_field;
use crate::RuntimeError;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Comma-separated tool names the mock backend pretends are not installed.
pub const MOCK_MISSING_ENV: &str = "SQUASHENV_MOCK_MISSING";
/// Tool name whose invocations the mock backend fails.
pub const MOCK_FAIL_ENV: &str = "SQUASHENV_MOCK_FAIL";

const MOCK_BIN: &str = "/mock/bin";
const STUB_INSTALLER: &str = "#!/bin/sh\nexit 0\n";

/// Test executor that simulates the image tools.
///
/// Filesystem actions are performed for real (tests run in temp dirs), while
/// `squashfuse` and `fusermount` edit a scratch mount table instead of the
/// kernel's. Foreground commands run on the host so exit codes are genuine.
pub struct MockExecutor {
    host: HostExecutor,
    mount_table: PathBuf,
    actions: Mutex<Vec<Action>>,
    missing: Vec<String>,
    fail_on: Option<String>,
    noop: Vec<String>,
}

impl MockExecutor {
    pub fn new(mount_table: impl Into<PathBuf>) -> Self {
        Self {
            host: HostExecutor::new(),
            mount_table: mount_table.into(),
            actions: Mutex::new(Vec::new()),
            missing: Vec::new(),
            fail_on: None,
            noop: Vec::new(),
        }
    }

    /// Configure from `SQUASHENV_MOCK_MISSING` and `SQUASHENV_MOCK_FAIL`.
    pub fn from_env(mount_table: &Path) -> Self {
        let mut mock = Self::new(mount_table);
        if let Ok(list) = std::env::var(MOCK_MISSING_ENV) {
            for tool in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                mock = mock.with_missing_tool(tool);
            }
        }
        if let Ok(tool) = std::env::var(MOCK_FAIL_ENV) {
            if !tool.is_empty() {
                mock = mock.with_failure(tool);
            }
        }
        mock
    }

    #[must_use]
    pub fn with_missing_tool(mut self, tool: impl Into<String>) -> Self {
        self.missing.push(tool.into());
        self
    }

    /// Make every invocation of `program` exit with status 1.
    #[must_use]
    pub fn with_failure(mut self, program: impl Into<String>) -> Self {
        self.fail_on = Some(program.into());
        self
    }

    /// Make `program` exit 0 without doing anything, like a mounter that
    /// reports success but never attaches.
    #[must_use]
    pub fn with_silent_noop(mut self, program: impl Into<String>) -> Self {
        self.noop.push(program.into());
        self
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Tool invocations recorded so far, by program name.
    pub fn invocations(&self, program: &str) -> usize {
        self.actions()
            .iter()
            .filter(|a| matches!(a, Action::RunTool(c) if c.program_name() == program))
            .count()
    }

    fn record(&self, action: Action) {
        debug!("mock: {action}");
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(action);
        }
    }

    fn add_mount(&self, target: &str) -> Result<(), RuntimeError> {
        if let Some(parent) = self.mount_table.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut table = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.mount_table)?;
        writeln!(
            table,
            "squashfuse {} fuse.squashfuse ro,nosuid,nodev 0 0",
            encode_field(target)
        )?;
        Ok(())
    }

    fn remove_mount(&self, target: &str) -> Result<(), RuntimeError> {
        let content = match fs::read_to_string(&self.mount_table) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let encoded = encode_field(target);
        let kept: String = content
            .lines()
            .filter(|line| line.split_whitespace().nth(1) != Some(encoded.as_str()))
            .map(|line| format!("{line}\n"))
            .collect();
        fs::write(&self.mount_table, kept)?;
        Ok(())
    }

    fn simulate(&self, cmd: &ToolCommand) -> Result<ToolOutput, RuntimeError> {
        let args = &cmd.args;
        match cmd.program_name() {
            "squashfuse" => {
                if let Some(target) = args.last() {
                    self.add_mount(target)?;
                }
            }
            "fusermount" | "fusermount3" => {
                if let Some(target) = args.last() {
                    self.remove_mount(target)?;
                }
            }
            "mksquashfs" => {
                if let [source, dest, ..] = args.as_slice() {
                    fs::write(dest, format!("mock squashfs image of {source}\n"))?;
                }
            }
            "bash" => {
                if let Some(prefix) = flag_value(args, "-p") {
                    let prefix = Path::new(prefix);
                    fs::create_dir_all(prefix.join("bin"))?;
                    fs::write(prefix.join("bin").join("activate"), "# mock activate\n")?;
                }
            }
            _ if args.first().is_some_and(|a| a == "env") => {
                // `<prefix>/bin/<resolver> env create --file F --name N`
                let prefix = Path::new(&cmd.program).parent().and_then(Path::parent);
                if let (Some(prefix), Some(name)) = (prefix, flag_value(args, "--name")) {
                    fs::create_dir_all(prefix.join("envs").join(name).join("bin"))?;
                }
            }
            _ => {}
        }
        Ok(ToolOutput::ok())
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

impl Executor for MockExecutor {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn locate(&self, tool: &str) -> Option<PathBuf> {
        if self.missing.iter().any(|m| m == tool) {
            None
        } else {
            Some(Path::new(MOCK_BIN).join(tool))
        }
    }

    fn begin_step(&self, index: usize, total: usize, name: &'static str) {
        self.record(Action::Step { index, total, name });
    }

    fn create_dir_all(&self, path: &Path, mode: u32) -> Result<(), RuntimeError> {
        self.record(Action::CreateDir(path.to_path_buf()));
        self.host.create_dir_all(path, mode)
    }

    fn remove_tree(&self, path: &Path) -> Result<(), RuntimeError> {
        self.record(Action::RemoveTree(path.to_path_buf()));
        self.host.remove_tree(path)
    }

    fn remove_dir(&self, path: &Path) -> Result<(), RuntimeError> {
        self.record(Action::RemoveDir(path.to_path_buf()));
        self.host.remove_dir(path)
    }

    fn remove_file(&self, path: &Path) -> Result<(), RuntimeError> {
        self.record(Action::RemoveFile(path.to_path_buf()));
        self.host.remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), RuntimeError> {
        self.record(Action::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
        self.host.rename(from, to)
    }

    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<(), RuntimeError> {
        self.record(Action::WriteFile {
            path: path.to_path_buf(),
            mode,
        });
        self.host.write_file(path, contents, mode)
    }

    fn fetch(&self, url: &str, dest: &Path) -> Result<(), RuntimeError> {
        self.record(Action::Fetch {
            url: url.to_owned(),
            dest: dest.to_path_buf(),
        });
        fs::write(dest, STUB_INSTALLER)?;
        Ok(())
    }

    fn run_tool(&self, cmd: &ToolCommand) -> Result<ToolOutput, RuntimeError> {
        self.record(Action::RunTool(cmd.clone()));
        if self.fail_on.as_deref() == Some(cmd.program_name()) {
            // A failing compressor still leaves a partial image behind.
            if cmd.program_name() == "mksquashfs" {
                if let Some(dest) = cmd.args.get(1) {
                    fs::write(dest, "truncated")?;
                }
            }
            return Ok(ToolOutput::failed(
                1,
                format!("mock: {} failed", cmd.program_name()),
            ));
        }
        if self.noop.iter().any(|p| p == cmd.program_name()) {
            return Ok(ToolOutput::ok());
        }
        self.simulate(cmd)
    }

    fn run_foreground(&self, cmd: &ToolCommand) -> Result<i32, RuntimeError> {
        self.record(Action::RunCommand(cmd.clone()));
        self.host.run_foreground(cmd)
    }
}
