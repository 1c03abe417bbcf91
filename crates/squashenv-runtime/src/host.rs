use crate::command::{ToolCommand, ToolOutput};
use crate::executor::Executor;
use crate::signals::SignalForwarder;
use crate::RuntimeError;
use std::collections::VecDeque;
use std::fs;
use std::io::{BufRead, BufReader, ErrorKind};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info, warn};

/// Lines of tool stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 40;

/// Executor that performs every action on the host.
#[derive(Debug, Default)]
pub struct HostExecutor;

impl HostExecutor {
    pub fn new() -> Self {
        Self
    }
}

/// Name of this machine, as used to scope per-host lock files.
#[allow(unsafe_code)]
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer outlives the call and its length is passed along.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_owned();
    }
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    match String::from_utf8_lossy(&buf[..end]) {
        name if name.is_empty() => "localhost".to_owned(),
        name => name.replace('/', "_"),
    }
}

fn ignore_missing(result: std::io::Result<()>) -> Result<(), RuntimeError> {
    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => Ok(other?),
    }
}

fn spawn_error(cmd: &ToolCommand, e: std::io::Error) -> RuntimeError {
    if e.kind() == ErrorKind::NotFound {
        RuntimeError::NotFound(cmd.program.clone())
    } else {
        RuntimeError::Spawn {
            program: cmd.program.clone(),
            source: e,
        }
    }
}

impl Executor for HostExecutor {
    fn name(&self) -> &'static str {
        "host"
    }

    fn locate(&self, tool: &str) -> Option<PathBuf> {
        which::which(tool).ok()
    }

    fn create_dir_all(&self, path: &Path, mode: u32) -> Result<(), RuntimeError> {
        debug!("mkdir -p {}", path.display());
        fs::DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(path)?;
        Ok(())
    }

    fn remove_tree(&self, path: &Path) -> Result<(), RuntimeError> {
        info!("removing {}", path.display());
        ignore_missing(fs::remove_dir_all(path))
    }

    fn remove_dir(&self, path: &Path) -> Result<(), RuntimeError> {
        debug!("rmdir {}", path.display());
        ignore_missing(fs::remove_dir(path))
    }

    fn remove_file(&self, path: &Path) -> Result<(), RuntimeError> {
        debug!("rm {}", path.display());
        ignore_missing(fs::remove_file(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), RuntimeError> {
        debug!("mv {} {}", from.display(), to.display());
        fs::rename(from, to)?;
        Ok(())
    }

    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<(), RuntimeError> {
        debug!("writing {}", path.display());
        fs::write(path, contents)?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn fetch(&self, url: &str, dest: &Path) -> Result<(), RuntimeError> {
        crate::installer::download(url, dest)
    }

    fn run_tool(&self, cmd: &ToolCommand) -> Result<ToolOutput, RuntimeError> {
        info!("running {cmd}");
        let mut child = cmd
            .to_command()
            // Tool chatter goes to stderr; stdout is reserved for results.
            .stdout(std::io::stderr())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(cmd, e))?;

        // Echo stderr as it arrives and keep its tail for the error report.
        // The pipe is drained to EOF whatever the bytes are, so the tool never
        // sees a closed stderr.
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        if let Some(stderr) = child.stderr.take() {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("reading stderr of {} failed: {e}", cmd.program_name());
                        break;
                    }
                }
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_owned();
                eprintln!("{line}");
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }

        let status = child.wait()?;
        let stderr = tail.into_iter().collect::<Vec<_>>().join("\n");
        debug!("{} finished with {status}", cmd.program_name());
        Ok(ToolOutput {
            code: status.code(),
            stderr,
        })
    }

    fn run_foreground(&self, cmd: &ToolCommand) -> Result<i32, RuntimeError> {
        debug!("exec {cmd}");
        let forward = SignalForwarder::install();
        let mut child = cmd.to_command().spawn().map_err(|e| spawn_error(cmd, e))?;
        forward.attach(child.id());
        let status = child.wait()?;
        drop(forward);
        Ok(status
            .code()
            .unwrap_or_else(|| 128 + status.signal().unwrap_or(0)))
    }
}
