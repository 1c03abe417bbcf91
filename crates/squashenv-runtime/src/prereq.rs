use crate::executor::Executor;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Lifecycle operation a tool is needed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Build,
    Mount,
    Unmount,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => f.write_str("build"),
            Self::Mount => f.write_str("mount"),
            Self::Unmount => f.write_str("unmount"),
        }
    }
}

struct Prerequisite {
    name: &'static str,
    /// Executables that satisfy the requirement, in order of preference.
    candidates: &'static [&'static str],
    purpose: &'static str,
    install_hint: &'static str,
    needed_for: &'static [Operation],
}

const PREREQUISITES: &[Prerequisite] = &[
    Prerequisite {
        name: "bash",
        candidates: &["bash"],
        purpose: "running the environment installer",
        install_hint: "usually pre-installed",
        needed_for: &[Operation::Build],
    },
    Prerequisite {
        name: "mksquashfs",
        candidates: &["mksquashfs"],
        purpose: "compressing the environment into an image",
        install_hint: "zypper install squashfs | apt install squashfs-tools | dnf install squashfs-tools | pacman -S squashfs-tools",
        needed_for: &[Operation::Build],
    },
    Prerequisite {
        name: "squashfuse",
        candidates: &["squashfuse"],
        purpose: "mounting the image without root",
        install_hint: "zypper install squashfuse | apt install squashfuse | dnf install squashfuse | pacman -S squashfuse",
        needed_for: &[Operation::Mount],
    },
    Prerequisite {
        name: "fusermount",
        candidates: &["fusermount3", "fusermount"],
        purpose: "unmounting the image",
        install_hint: "zypper install fuse3 | apt install fuse3 | dnf install fuse3 | pacman -S fuse3",
        needed_for: &[Operation::Unmount],
    },
];

/// Reachability of one required tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolStatus {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
    pub needed_for: &'static [Operation],
    pub path: Option<PathBuf>,
}

impl ToolStatus {
    pub fn found(&self) -> bool {
        self.path.is_some()
    }

    pub fn needed_for(&self, op: Operation) -> bool {
        self.needed_for.contains(&op)
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

/// Look up every required tool. Pure query; callers decide whether a missing
/// tool is fatal for what they are about to do.
pub fn check_prereqs(executor: &dyn Executor) -> Vec<ToolStatus> {
    PREREQUISITES
        .iter()
        .map(|p| ToolStatus {
            name: p.name,
            purpose: p.purpose,
            install_hint: p.install_hint,
            needed_for: p.needed_for,
            path: p.candidates.iter().find_map(|c| executor.locate(c)),
        })
        .collect()
}

/// Missing tools that `op` cannot do without.
pub fn missing_for(statuses: &[ToolStatus], op: Operation) -> Vec<ToolStatus> {
    statuses
        .iter()
        .filter(|s| s.needed_for(op) && !s.found())
        .cloned()
        .collect()
}

/// The unmount helper to invoke: `fusermount3` when present, else `fusermount`.
pub fn unmount_tool(executor: &dyn Executor) -> Option<PathBuf> {
    PREREQUISITES
        .iter()
        .find(|p| p.name == "fusermount")
        .and_then(|p| p.candidates.iter().find_map(|c| executor.locate(c)))
}

/// Format missing prerequisites into a user-facing error message.
pub fn format_missing(missing: &[ToolStatus]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nsquashenv drives these tools to build and mount environment images.");
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockExecutor;

    #[test]
    fn mock_reports_all_tools_found() {
        let mock = MockExecutor::new("/nonexistent/mounts");
        let statuses = check_prereqs(&mock);
        assert_eq!(statuses.len(), 4);
        assert!(statuses.iter().all(ToolStatus::found));
        assert!(missing_for(&statuses, Operation::Build).is_empty());
    }

    #[test]
    fn missing_tool_only_blocks_its_operation() {
        let mock = MockExecutor::new("/nonexistent/mounts").with_missing_tool("squashfuse");
        let statuses = check_prereqs(&mock);
        let mount_missing = missing_for(&statuses, Operation::Mount);
        assert_eq!(mount_missing.len(), 1);
        assert_eq!(mount_missing[0].name, "squashfuse");
        assert!(missing_for(&statuses, Operation::Build).is_empty());
    }

    #[test]
    fn fusermount_falls_back_to_legacy_name() {
        let mock = MockExecutor::new("/nonexistent/mounts").with_missing_tool("fusermount3");
        let tool = unmount_tool(&mock).unwrap();
        assert_eq!(tool.file_name().unwrap(), "fusermount");
        let statuses = check_prereqs(&mock);
        assert!(statuses.iter().all(ToolStatus::found));

        let none = MockExecutor::new("/nonexistent/mounts")
            .with_missing_tool("fusermount3")
            .with_missing_tool("fusermount");
        assert!(unmount_tool(&none).is_none());
    }

    #[test]
    fn operations_render_lowercase() {
        assert_eq!(Operation::Unmount.to_string(), "unmount");
        let mock = MockExecutor::new("/nonexistent/mounts");
        let fuse = check_prereqs(&mock)
            .into_iter()
            .find(|s| s.name == "fusermount")
            .unwrap();
        assert!(fuse.needed_for(Operation::Unmount));
        assert!(!fuse.needed_for(Operation::Build));
    }

    #[test]
    fn format_missing_produces_readable_output() {
        let mock = MockExecutor::new("/nonexistent/mounts")
            .with_missing_tool("mksquashfs")
            .with_missing_tool("squashfuse");
        let missing: Vec<_> = check_prereqs(&mock)
            .into_iter()
            .filter(|s| !s.found())
            .collect();
        let output = format_missing(&missing);
        assert!(output.contains("missing prerequisites:"));
        assert!(output.contains("mksquashfs"));
        assert!(output.contains("squashfuse"));
        assert!(output.contains("squashfs-tools"));
    }
}
