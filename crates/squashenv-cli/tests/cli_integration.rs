//! CLI subprocess integration tests.
//!
//! These tests invoke the `squashenv` binary with the mock backend, a scratch
//! mount table and a private base directory, and check exit codes, stdout
//! content and JSON output.

use squashenv_schema::{load_project, save_project};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

struct Sandbox {
    _tmp: tempfile::TempDir,
    project: PathBuf,
    table: PathBuf,
    installer: PathBuf,
}

impl Sandbox {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let project = tmp.path().join("project");
        std::fs::create_dir(&project).unwrap();
        let installer = tmp.path().join("Miniforge3-test.sh");
        std::fs::write(&installer, "#!/bin/sh\nexit 0\n").unwrap();
        Self {
            table: tmp.path().join("mounts"),
            project,
            installer,
            _tmp: tmp,
        }
    }

    /// Initialized project staging under the sandbox instead of /tmp.
    fn initialized() -> Self {
        let sb = Self::new();
        let out = sb.run(&["init"]);
        assert!(out.status.success(), "init failed: {}", stderr(&out));
        let mut config = load_project(&sb.project).unwrap();
        config.base_directory = sb.project.parent().unwrap().join("base");
        std::fs::create_dir_all(&config.base_directory).unwrap();
        save_project(&sb.project, &config).unwrap();
        sb
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_squashenv"));
        cmd.env("SQUASHENV_BACKEND", "mock")
            .env("SQUASHENV_MOUNT_TABLE", &self.table)
            .env("SQUASHENV_INSTALLER", &self.installer)
            .env_remove("SQUASHENV_MOCK_MISSING")
            .env_remove("SQUASHENV_MOCK_FAIL")
            .env_remove("SQUASHENV_LOG")
            .arg("--directory")
            .arg(&self.project);
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.cmd().args(args).output().unwrap()
    }

    fn status_json(&self) -> serde_json::Value {
        let out = self.run(&["status", "--json"]);
        assert!(out.status.success(), "status failed: {}", stderr(&out));
        serde_json::from_slice(&out.stdout).unwrap()
    }

    fn image(&self) -> PathBuf {
        load_project(&self.project).unwrap().image_path(&self.project)
    }
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

fn code(out: &Output) -> i32 {
    out.status.code().unwrap()
}

#[test]
fn cli_version_exits_zero() {
    let output = Command::new(env!("CARGO_BIN_EXE_squashenv"))
        .arg("--version")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("squashenv"));
}

#[test]
fn cli_help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_squashenv"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    for cmd in ["init", "build", "mount", "umount", "exec", "status", "prereq"] {
        assert!(text.contains(cmd), "help must list '{cmd}'");
    }
    assert!(text.contains("--dry-run"));
}

#[test]
fn cli_init_creates_record_and_refuses_second_init() {
    let sb = Sandbox::new();
    let out = sb.run(&["init"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(sb.project.join("squashenv.toml").is_file());
    assert!(sb.project.join("environment.yml").is_file());

    let config = load_project(&sb.project).unwrap();
    assert_eq!(
        config.installer_source.as_deref(),
        Some(sb.installer.to_str().unwrap())
    );

    let again = sb.run(&["init"]);
    assert_eq!(code(&again), 2);
    assert!(stderr(&again).contains("error:"));
}

#[test]
fn cli_dry_run_init_writes_nothing() {
    let sb = Sandbox::new();
    let out = sb.run(&["--dry-run", "init"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stderr(&out).contains("[dry-run] would write"));
    assert!(!sb.project.join("squashenv.toml").exists());
}

#[test]
fn cli_commands_need_a_project() {
    let sb = Sandbox::new();
    for cmd in ["status", "build", "mount", "umount"] {
        let out = sb.run(&[cmd]);
        assert_eq!(code(&out), 2, "{cmd}: {}", stderr(&out));
    }
}

#[test]
fn cli_full_lifecycle() {
    let sb = Sandbox::initialized();

    let status = sb.status_json();
    assert_eq!(status["image_present"], false);
    assert_eq!(status["mounted"], false);

    let out = sb.run(&["build"]);
    assert!(out.status.success(), "build failed: {}", stderr(&out));
    assert!(sb.image().is_file());
    assert!(sb.project.join("activate").is_file());
    let status = sb.status_json();
    assert_eq!(status["image_present"], true);
    assert_eq!(status["state"], "unmounted");

    let out = sb.run(&["mount", "--json"]);
    assert!(out.status.success(), "mount failed: {}", stderr(&out));
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["outcome"], "mounted");
    assert_eq!(sb.status_json()["mounted"], true);

    let out = sb.run(&["mount", "--json"]);
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["outcome"], "already_mounted");

    let out = sb.run(&["umount", "--json"]);
    assert!(out.status.success(), "umount failed: {}", stderr(&out));
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["outcome"], "unmounted");
    assert_eq!(sb.status_json()["mounted"], false);

    let out = sb.run(&["umount", "--json"]);
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["outcome"], "not_mounted");
}

#[test]
fn cli_exec_propagates_exit_codes_and_restores_state() {
    let sb = Sandbox::initialized();
    assert!(sb.run(&["build"]).status.success());

    assert_eq!(code(&sb.run(&["exec", "--", "true"])), 0);
    assert_eq!(code(&sb.run(&["exec", "--", "false"])), 1);
    assert_eq!(code(&sb.run(&["exec", "sh", "-c", "exit 7"])), 7);
    assert_eq!(sb.status_json()["mounted"], false);

    let missing = sb.run(&["exec", "--", "squashenv-no-such-command"]);
    assert_eq!(code(&missing), 127);
    assert!(stderr(&missing).contains("command not found"));
    assert_eq!(sb.status_json()["mounted"], false);
}

#[test]
fn cli_exec_keeps_existing_mount() {
    let sb = Sandbox::initialized();
    assert!(sb.run(&["build"]).status.success());
    assert!(sb.run(&["mount"]).status.success());
    assert_eq!(code(&sb.run(&["exec", "--", "true"])), 0);
    assert_eq!(sb.status_json()["mounted"], true);
}

#[test]
fn cli_build_compression_failure_exits_4() {
    let sb = Sandbox::initialized();
    let out = sb
        .cmd()
        .env("SQUASHENV_MOCK_FAIL", "mksquashfs")
        .arg("build")
        .output()
        .unwrap();
    assert_eq!(code(&out), 4, "{}", stderr(&out));
    assert!(stderr(&out).contains("compress"));
    assert!(!sb.image().exists());
}

#[test]
fn cli_build_with_missing_tool_exits_3() {
    let sb = Sandbox::initialized();
    let out = sb
        .cmd()
        .env("SQUASHENV_MOCK_MISSING", "mksquashfs")
        .arg("build")
        .output()
        .unwrap();
    assert_eq!(code(&out), 3, "{}", stderr(&out));
    assert!(stderr(&out).contains("mksquashfs"));
}

#[test]
fn cli_build_rejects_bad_step_selection() {
    let sb = Sandbox::initialized();
    let out = sb.run(&["build", "--steps", "2,9"]);
    assert_eq!(code(&out), 1);
    assert!(stderr(&out).contains("invalid step selection"));
}

#[test]
fn cli_build_step_subset_json() {
    let sb = Sandbox::initialized();
    let out = sb.run(&["build", "--steps", "1-3", "--json"]);
    assert!(out.status.success(), "{}", stderr(&out));
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(
        json["steps"],
        serde_json::json!(["prerequisites", "prepare", "installer"])
    );
    assert!(!sb.image().exists());
}

#[test]
fn cli_dry_run_build_changes_nothing() {
    let sb = Sandbox::initialized();
    let out = sb.run(&["--dry-run", "build"]);
    assert!(out.status.success(), "{}", stderr(&out));
    let err = stderr(&out);
    assert!(err.contains("[dry-run] step 1/7: prerequisites"));
    assert!(err.contains("[dry-run] would run"));
    assert!(err.contains("mksquashfs"));
    assert!(!sb.image().exists());
    assert!(!sb.project.join("activate").exists());
}

#[test]
fn cli_mount_without_image_exits_5() {
    let sb = Sandbox::initialized();
    let out = sb.run(&["mount"]);
    assert_eq!(code(&out), 5);
    assert!(stderr(&out).contains("squashenv build"));
}

#[test]
fn cli_prereq_exit_code_tracks_missing_tools() {
    let sb = Sandbox::new();
    let ok = sb.run(&["prereq"]);
    assert_eq!(code(&ok), 0, "{}", stderr(&ok));

    let missing = sb
        .cmd()
        .env("SQUASHENV_MOCK_MISSING", "squashfuse")
        .args(["prereq", "--json"])
        .output()
        .unwrap();
    assert_eq!(code(&missing), 3);
    let json: serde_json::Value = serde_json::from_slice(&missing.stdout).unwrap();
    assert_eq!(json["ok"], false);
    let fuse = json["tools"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == "squashfuse")
        .unwrap();
    assert!(fuse["path"].is_null());
}

#[test]
fn cli_mount_prints_activation_commands() {
    let sb = Sandbox::initialized();
    assert!(sb.run(&["build"]).status.success());
    let out = sb.run(&["mount"]);
    assert!(out.status.success(), "{}", stderr(&out));
    let text = stdout(&out);
    let config = load_project(&sb.project).unwrap();
    let activate = config.canonical_path().join("bin").join("activate");
    assert!(text.contains(&format!("source {}", activate.display())));
    assert!(text.contains("conda deactivate"));

    let quiet = sb.run(&["umount", "--quiet"]);
    assert!(quiet.status.success());
    assert!(stdout(&quiet).is_empty());
}

#[test]
fn cli_prereq_explains_missing_tools() {
    let sb = Sandbox::new();
    let out = sb
        .cmd()
        .env("SQUASHENV_MOCK_MISSING", "mksquashfs")
        .arg("prereq")
        .output()
        .unwrap();
    assert_eq!(code(&out), 3);
    let text = stdout(&out);
    assert!(text.contains("missing prerequisites:"));
    assert!(text.contains("squashfs-tools"));
}

#[test]
fn cli_completions_bash() {
    let output = Command::new(env!("CARGO_BIN_EXE_squashenv"))
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("squashenv"));
}

#[test]
fn cli_relative_directory_resolves_against_cwd() {
    let sb = Sandbox::new();
    let parent: &Path = sb.project.parent().unwrap();
    let out = Command::new(env!("CARGO_BIN_EXE_squashenv"))
        .env("SQUASHENV_BACKEND", "mock")
        .env("SQUASHENV_MOUNT_TABLE", &sb.table)
        .current_dir(parent)
        .args(["-d", "project", "init", "--quiet"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stdout(&out).is_empty());
    assert!(sb.project.join("squashenv.toml").is_file());
}
