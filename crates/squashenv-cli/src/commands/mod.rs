pub mod build;
pub mod completions;
pub mod exec;
pub mod init;
pub mod mount;
pub mod prereq;
pub mod status;
pub mod umount;

use indicatif::{ProgressBar, ProgressStyle};
use squashenv_core::CoreError;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_PREREQ_MISSING: u8 = 3;
pub const EXIT_BUILD_FAILED: u8 = 4;
pub const EXIT_MOUNT_FAILED: u8 = 5;
pub const EXIT_NOT_FOUND: u8 = 127;

/// How results are printed.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    /// Human-readable text goes to stdout.
    pub fn human(self) -> bool {
        !self.json && !self.quiet
    }
}

/// A failed command: message for stderr plus the process exit code.
#[derive(Debug)]
pub struct CommandError {
    pub code: u8,
    pub message: String,
}

impl CommandError {
    pub fn general(message: impl Into<String>) -> Self {
        Self {
            code: EXIT_FAILURE,
            message: message.into(),
        }
    }
}

impl From<CoreError> for CommandError {
    fn from(e: CoreError) -> Self {
        Self {
            code: exit_code(&e),
            message: e.to_string(),
        }
    }
}

impl From<String> for CommandError {
    fn from(message: String) -> Self {
        Self::general(message)
    }
}

pub fn exit_code(e: &CoreError) -> u8 {
    match e {
        CoreError::Config(_) => EXIT_CONFIG_ERROR,
        CoreError::PrerequisiteMissing { .. } => EXIT_PREREQ_MISSING,
        CoreError::BuildStepFailed { .. } => EXIT_BUILD_FAILED,
        CoreError::MountOperationFailed(_)
        | CoreError::UnmountOperationFailed(_)
        | CoreError::ImageMissing(_)
        | CoreError::MountPointBusy(_)
        | CoreError::NotMounted(_) => EXIT_MOUNT_FAILED,
        CoreError::ExecTargetNotFound(_) => EXIT_NOT_FOUND,
        _ => EXIT_FAILURE,
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// A spinner for interactive output only.
pub fn maybe_spinner(out: Output, msg: &str) -> Option<ProgressBar> {
    out.human().then(|| spinner(msg))
}

pub fn spin_ok(pb: Option<&ProgressBar>, msg: &str) {
    if let Some(pb) = pb {
        pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
        pb.finish_with_message(format!("✓ {msg}"));
    }
}

pub fn spin_fail(pb: Option<&ProgressBar>, msg: &str) {
    if let Some(pb) = pb {
        pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
        pb.finish_with_message(format!("✗ {msg}"));
    }
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "mounted" | "present" => Style::new().green().apply_to(state).to_string(),
        "unmounted" => Style::new().yellow().apply_to(state).to_string(),
        "absent" | "missing" => Style::new().red().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}
