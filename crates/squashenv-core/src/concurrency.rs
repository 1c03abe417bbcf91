use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Lock file guarding a project against concurrent builds.
pub const BUILD_LOCK_FILE: &str = ".squashenv.lock";

/// Exclusive advisory lock held for the duration of a build.
pub struct BuildLock {
    lock_file: File,
    path: PathBuf,
}

impl BuildLock {
    /// Take the lock without waiting. Returns `BuildInProgress` when another
    /// process holds it.
    pub fn try_acquire(lock_path: &Path) -> Result<Self, CoreError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                lock_file: file,
                path: lock_path.to_path_buf(),
            }),
            Err(_) => Err(CoreError::BuildInProgress(lock_path.to_path_buf())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

/// Lock file serializing `exec` of one project on one host:
/// `<canonical path>-<hostname>.mutex`.
pub fn exec_lock_path(canonical: &Path, host: &str) -> PathBuf {
    let mut name = canonical.as_os_str().to_owned();
    name.push(format!("-{host}.mutex"));
    PathBuf::from(name)
}

/// Held for the whole of an `exec`, so one invocation never unmounts an
/// image another one on the same host is still using. The file is removed on
/// release.
pub struct ExecLock {
    lock_file: File,
    path: PathBuf,
}

impl ExecLock {
    /// Take the lock without waiting. Returns `ExecInProgress` when another
    /// `exec` holds it.
    pub fn try_acquire(lock_path: &Path) -> Result<Self, CoreError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                lock_file: file,
                path: lock_path.to_path_buf(),
            }),
            Err(_) => Err(CoreError::ExecInProgress(lock_path.to_path_buf())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ExecLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Turn SIGINT/SIGTERM into a flag the build checks between steps. A second
/// interrupt exits immediately.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(130);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\ninterrupt received, stopping after the current step...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
