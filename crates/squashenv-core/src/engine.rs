use crate::build::{BuildOptions, BuildStep};
use crate::concurrency::{
    exec_lock_path, shutdown_requested, BuildLock, ExecLock, BUILD_LOCK_FILE,
};
use crate::lifecycle::{plan_transition, MountState, Transition};
use crate::CoreError;
use serde::Serialize;
use squashenv_runtime::activation::{
    activate_script, deactivate_script, ACTIVATE_SCRIPT, DEACTIVATE_SCRIPT,
};
use squashenv_runtime::installer::{locate_installer, verify_installer, InstallerSource};
use squashenv_runtime::{
    check_prereqs, hostname, missing_for, unmount_tool, Executor, MountTable, Operation,
    RuntimeError, ToolCommand, ToolStatus,
};
use squashenv_schema::{
    config_path, init_project, load_project, write_manifest_template, ProjectConfig,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Operations whose tools a full build needs up front.
const BUILD_OPERATIONS: [Operation; 2] = [Operation::Build, Operation::Mount];
const STAGING_MODE: u32 = 0o700;
const SCRIPT_MODE: u32 = 0o755;
const CONFIG_MODE: u32 = 0o644;

/// Lifecycle engine for one project directory.
///
/// Every side effect goes through the injected [`Executor`]; mount state is
/// always read from the mount table, never remembered between calls.
pub struct Engine {
    project_dir: PathBuf,
    executor: Box<dyn Executor>,
    mounts: MountTable,
    installer_override: Option<PathBuf>,
}

/// Result of a completed build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub steps: Vec<BuildStep>,
    pub image: PathBuf,
    pub canonical_path: PathBuf,
    pub simulated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MountOutcome {
    Mounted,
    AlreadyMounted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmountOutcome {
    Unmounted,
    NotMounted,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    pub project_dir: PathBuf,
    pub id: String,
    pub canonical_path: PathBuf,
    pub image_path: PathBuf,
    pub image_present: bool,
    pub mounted: bool,
    pub state: MountState,
}

/// State carried between the steps of one build.
#[derive(Default)]
struct BuildContext {
    installer: Option<PathBuf>,
    staged: bool,
}

impl Engine {
    pub fn new(
        project_dir: impl Into<PathBuf>,
        executor: Box<dyn Executor>,
        mounts: MountTable,
    ) -> Self {
        Self {
            project_dir: project_dir.into(),
            executor,
            mounts,
            installer_override: None,
        }
    }

    /// Use a pre-downloaded installer instead of the configured source.
    #[must_use]
    pub fn with_installer_override(mut self, path: Option<PathBuf>) -> Self {
        self.installer_override = path;
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn simulated(&self) -> bool {
        self.executor.simulated()
    }

    /// Create the project record and the template manifest.
    pub fn init(&self, installer_source: Option<String>) -> Result<ProjectConfig, CoreError> {
        info!("initializing project in {}", self.project_dir.display());
        if !self.simulated() {
            let config = init_project(&self.project_dir, installer_source)?;
            let manifest = config.manifest_path(&self.project_dir);
            if write_manifest_template(&manifest)? {
                info!("wrote template manifest {}", manifest.display());
            } else {
                debug!("keeping existing manifest {}", manifest.display());
            }
            return Ok(config);
        }

        let path = config_path(&self.project_dir);
        if path.exists() {
            return Err(squashenv_schema::ConfigError::Exists(path).into());
        }
        let config = ProjectConfig::new(installer_source);
        self.executor.write_file(&path, &config.to_toml()?, CONFIG_MODE)?;
        let manifest = config.manifest_path(&self.project_dir);
        if !manifest.exists() {
            self.executor.write_file(
                &manifest,
                squashenv_schema::MANIFEST_TEMPLATE,
                CONFIG_MODE,
            )?;
        }
        Ok(config)
    }

    pub fn load(&self) -> Result<ProjectConfig, CoreError> {
        Ok(load_project(&self.project_dir)?)
    }

    pub fn prereqs(&self) -> Vec<ToolStatus> {
        check_prereqs(self.executor.as_ref())
    }

    pub fn mount_state(&self, config: &ProjectConfig) -> Result<MountState, CoreError> {
        let mounted = self.mounts.is_mounted(&config.canonical_path())?;
        Ok(MountState::from_mounted(mounted))
    }

    pub fn ensure_unmounted_precondition(&self, config: &ProjectConfig) -> Result<(), CoreError> {
        if self.mount_state(config)?.is_mounted() {
            return Err(CoreError::MountPointBusy(config.canonical_path()));
        }
        Ok(())
    }

    pub fn ensure_mounted_precondition(&self, config: &ProjectConfig) -> Result<(), CoreError> {
        if !self.mount_state(config)?.is_mounted() {
            return Err(CoreError::NotMounted(config.canonical_path()));
        }
        Ok(())
    }

    pub fn status(&self, config: &ProjectConfig) -> Result<ProjectStatus, CoreError> {
        let image_path = config.image_path(&self.project_dir);
        let state = self.mount_state(config)?;
        Ok(ProjectStatus {
            project_dir: self.project_dir.clone(),
            id: config.id.to_string(),
            canonical_path: config.canonical_path(),
            image_present: image_path.is_file(),
            image_path,
            mounted: state.is_mounted(),
            state,
        })
    }

    pub fn build(
        &self,
        config: &ProjectConfig,
        options: &BuildOptions,
    ) -> Result<BuildReport, CoreError> {
        let lock = if self.simulated() {
            None
        } else {
            Some(BuildLock::try_acquire(&self.project_dir.join(BUILD_LOCK_FILE))?)
        };
        if let Some(lock) = &lock {
            debug!("holding build lock {}", lock.path().display());
        }

        let image = config.image_path(&self.project_dir);
        info!(
            "building {} at {} (steps {})",
            image.display(),
            config.canonical_path().display(),
            options.steps
        );

        let total = BuildStep::ALL.len();
        let mut ctx = BuildContext::default();
        let mut done = Vec::with_capacity(options.steps.len());

        for step in options.steps.iter() {
            if shutdown_requested() {
                self.discard_staging(config, options, &ctx);
                return Err(CoreError::Interrupted);
            }
            self.executor.begin_step(step.index(), total, step.name());
            if let Err(e) = self.run_step(step, config, &mut ctx) {
                warn!("step {step} failed: {e}");
                self.discard_staging(config, options, &ctx);
                if e.aborts_build() {
                    return Err(e);
                }
                return Err(CoreError::BuildStepFailed {
                    index: step.index(),
                    name: step.name(),
                    reason: e.to_string(),
                });
            }
            done.push(step);
        }

        info!("build finished");
        Ok(BuildReport {
            steps: done,
            image,
            canonical_path: config.canonical_path(),
            simulated: self.simulated(),
        })
    }

    fn run_step(
        &self,
        step: BuildStep,
        config: &ProjectConfig,
        ctx: &mut BuildContext,
    ) -> Result<(), CoreError> {
        match step {
            BuildStep::Prerequisites => self.require(&BUILD_OPERATIONS),
            BuildStep::Prepare => self.step_prepare(config, ctx),
            BuildStep::Installer => self.step_installer(config, ctx),
            BuildStep::Base => self.step_base(config, ctx),
            BuildStep::Packages => self.step_packages(config),
            BuildStep::Compress => self.step_compress(config),
            BuildStep::Cleanup => self.step_cleanup(config),
        }
    }

    fn step_prepare(
        &self,
        config: &ProjectConfig,
        ctx: &mut BuildContext,
    ) -> Result<(), CoreError> {
        self.ensure_unmounted_precondition(config)?;
        let staging = config.canonical_path();
        if staging.exists() {
            info!("removing leftover staging tree {}", staging.display());
            self.executor.remove_tree(&staging)?;
        }
        self.executor.create_dir_all(&staging, STAGING_MODE)?;
        ctx.staged = true;
        Ok(())
    }

    fn step_installer(
        &self,
        config: &ProjectConfig,
        ctx: &mut BuildContext,
    ) -> Result<(), CoreError> {
        let source = self.installer_source(config)?;
        let fetched = if let InstallerSource::Remote { url, dest } = &source {
            self.executor.fetch(url, dest)?;
            true
        } else {
            false
        };
        let path = source.path().to_path_buf();
        if fetched && self.simulated() {
            info!("would verify installer {}", path.display());
        } else {
            verify_installer(&path)?;
            debug!("installer {} verified", path.display());
        }
        ctx.installer = Some(path);
        Ok(())
    }

    fn step_base(&self, config: &ProjectConfig, ctx: &BuildContext) -> Result<(), CoreError> {
        let installer = match &ctx.installer {
            Some(p) => p.clone(),
            None => self.installer_source(config)?.path().to_path_buf(),
        };
        let cmd = ToolCommand::new(self.tool("bash"))
            .arg_path(&installer)
            .args(["-b", "-f", "-p"])
            .arg_path(&config.canonical_path())
            .env_remove("PYTHONPATH");
        self.run_checked(&cmd)
    }

    fn step_packages(&self, config: &ProjectConfig) -> Result<(), CoreError> {
        let resolver = config.resolver_path();
        let create = ToolCommand::new(resolver.to_string_lossy())
            .args(["env", "create", "--file"])
            .arg_path(&config.manifest_path(&self.project_dir))
            .args(["--name", config.env_name.as_str()])
            .env_remove("PYTHONPATH");
        self.run_checked(&create)?;

        let requirements = ProjectConfig::requirements_path(&self.project_dir);
        if requirements.is_file() {
            let pip = ToolCommand::new(config.env_bin_dir().join("pip").to_string_lossy())
                .args(["install", "-r"])
                .arg_path(&requirements)
                .env_remove("PYTHONPATH");
            if let Err(e) = self.run_checked(&pip) {
                warn!("installing {} failed, continuing: {e}", requirements.display());
            }
        }

        let clean = ToolCommand::new(resolver.to_string_lossy())
            .args(["clean", "--all", "--yes"]);
        self.run_checked(&clean)
    }

    fn step_compress(&self, config: &ProjectConfig) -> Result<(), CoreError> {
        self.ensure_unmounted_precondition(config)?;
        let image = config.image_path(&self.project_dir);
        let partial = config.partial_image_path(&self.project_dir);
        self.executor.remove_file(&partial)?;

        let source = format!("{}/", config.canonical_path().display());
        let cmd = ToolCommand::new(self.tool("mksquashfs"))
            .arg(source)
            .arg_path(&partial)
            .arg("-noappend");
        if let Err(e) = self.run_checked(&cmd) {
            if let Err(rm) = self.executor.remove_file(&partial) {
                warn!("could not remove {}: {rm}", partial.display());
            }
            return Err(e);
        }
        self.executor.rename(&partial, &image)?;
        info!("image written to {}", image.display());

        self.write_activation_scripts(config)
    }

    fn step_cleanup(&self, config: &ProjectConfig) -> Result<(), CoreError> {
        self.ensure_unmounted_precondition(config)?;
        self.executor.remove_tree(&config.canonical_path())?;
        Ok(())
    }

    fn write_activation_scripts(&self, config: &ProjectConfig) -> Result<(), CoreError> {
        let canonical = config.canonical_path();
        self.executor.write_file(
            &self.project_dir.join(ACTIVATE_SCRIPT),
            &activate_script(&canonical, &config.env_name),
            SCRIPT_MODE,
        )?;
        self.executor.write_file(
            &self.project_dir.join(DEACTIVATE_SCRIPT),
            &deactivate_script(),
            SCRIPT_MODE,
        )?;
        Ok(())
    }

    /// Remove the staging tree after a failed or interrupted build, if this
    /// build created it.
    fn discard_staging(
        &self,
        config: &ProjectConfig,
        options: &BuildOptions,
        ctx: &BuildContext,
    ) {
        let staging = config.canonical_path();
        if !ctx.staged {
            return;
        }
        if options.keep_staging {
            info!("keeping staging tree {} for inspection", staging.display());
            return;
        }
        if let Err(e) = self.executor.remove_tree(&staging) {
            warn!("could not remove staging tree {}: {e}", staging.display());
        }
    }

    fn installer_source(&self, config: &ProjectConfig) -> Result<InstallerSource, CoreError> {
        Ok(locate_installer(
            config.installer_source.as_deref(),
            self.installer_override.as_deref(),
            &self.project_dir,
        )?)
    }

    pub fn mount(&self, config: &ProjectConfig) -> Result<MountOutcome, CoreError> {
        let canonical = config.canonical_path();
        if plan_transition(self.mount_state(config)?, MountState::Mounted) == Transition::Noop {
            info!("{} is already mounted", canonical.display());
            return Ok(MountOutcome::AlreadyMounted);
        }
        self.attach(config)?;
        Ok(MountOutcome::Mounted)
    }

    fn attach(&self, config: &ProjectConfig) -> Result<(), CoreError> {
        let canonical = config.canonical_path();
        let image = config.image_path(&self.project_dir);
        if !image.is_file() {
            return Err(CoreError::ImageMissing(image));
        }
        self.require(&[Operation::Mount])?;

        let created = !canonical.exists();
        if created {
            self.executor.create_dir_all(&canonical, STAGING_MODE)?;
        }

        let cmd = ToolCommand::new(self.tool("squashfuse"))
            .arg_path(&image)
            .arg_path(&canonical);
        let out = self.executor.run_tool(&cmd)?;
        if !out.success() {
            if created {
                if let Err(rm) = self.executor.remove_dir(&canonical) {
                    warn!("could not remove mount point {}: {rm}", canonical.display());
                }
            }
            return Err(CoreError::MountOperationFailed(format!(
                "squashfuse: {}",
                out.describe()
            )));
        }

        if self.simulated() {
            info!("would verify {} is mounted", canonical.display());
        } else if !self.mounts.is_mounted(&canonical)? {
            if created {
                if let Err(rm) = self.executor.remove_dir(&canonical) {
                    warn!("could not remove mount point {}: {rm}", canonical.display());
                }
            }
            return Err(CoreError::MountOperationFailed(format!(
                "squashfuse exited successfully but {} is not in the mount table",
                canonical.display()
            )));
        }
        info!("mounted {} at {}", image.display(), canonical.display());
        Ok(())
    }

    pub fn umount(&self, config: &ProjectConfig) -> Result<UnmountOutcome, CoreError> {
        let canonical = config.canonical_path();
        if plan_transition(self.mount_state(config)?, MountState::Unmounted) == Transition::Noop {
            info!("{} is not mounted", canonical.display());
            return Ok(UnmountOutcome::NotMounted);
        }
        self.detach(config)?;
        Ok(UnmountOutcome::Unmounted)
    }

    fn detach(&self, config: &ProjectConfig) -> Result<(), CoreError> {
        let canonical = config.canonical_path();
        self.require(&[Operation::Unmount])?;
        let tool = unmount_tool(self.executor.as_ref())
            .ok_or_else(|| CoreError::UnmountOperationFailed("no fusermount found".to_owned()))?;

        let cmd = ToolCommand::new(tool.to_string_lossy())
            .arg("-u")
            .arg_path(&canonical);
        let out = self.executor.run_tool(&cmd)?;
        if !out.success() {
            return Err(CoreError::UnmountOperationFailed(format!(
                "{}: {}",
                cmd.program_name(),
                out.describe()
            )));
        }

        if self.simulated() {
            info!("would verify {} is unmounted", canonical.display());
        } else if self.mounts.is_mounted(&canonical)? {
            return Err(CoreError::UnmountOperationFailed(format!(
                "{} is still in the mount table",
                canonical.display()
            )));
        }

        self.executor.remove_dir(&canonical).map_err(|e| {
            CoreError::UnmountOperationFailed(format!(
                "cannot remove mount point {}: {e}",
                canonical.display()
            ))
        })?;
        info!("unmounted {}", canonical.display());
        Ok(())
    }

    /// Run `command` with the environment on PATH, mounting the image for the
    /// duration if needed. Returns the command's exit code.
    pub fn exec(&self, config: &ProjectConfig, command: &[String]) -> Result<i32, CoreError> {
        let Some((program, args)) = command.split_first() else {
            return Err(CoreError::ExecTargetNotFound(String::new()));
        };

        let lock = if self.simulated() {
            None
        } else {
            let path = exec_lock_path(&config.canonical_path(), &hostname());
            Some(ExecLock::try_acquire(&path)?)
        };
        if let Some(lock) = &lock {
            debug!("holding exec lock {}", lock.path().display());
        }

        let entry = self.mount_state(config)?;
        let mounted_here = plan_transition(entry, MountState::Mounted) == Transition::Mount;
        if mounted_here {
            debug!("mounting for the duration of {program}");
            self.attach(config)?;
        }

        let cmd = ToolCommand::new(program.as_str())
            .args(args.iter().cloned())
            .env("PATH", prepend_path(&config.env_bin_dir()));
        let result = self.executor.run_foreground(&cmd);

        let restored = if mounted_here {
            self.restore_unmounted(config)
        } else {
            Ok(())
        };

        match result {
            Ok(code) => {
                restored?;
                debug!("{program} exited with {code}");
                Ok(code)
            }
            Err(e) => {
                if let Err(r) = restored {
                    warn!("restoring mount state failed: {r}");
                }
                match e {
                    RuntimeError::NotFound(p) => Err(CoreError::ExecTargetNotFound(p)),
                    other => Err(other.into()),
                }
            }
        }
    }

    fn restore_unmounted(&self, config: &ProjectConfig) -> Result<(), CoreError> {
        if !self.simulated() && !self.mount_state(config)?.is_mounted() {
            debug!("{} already unmounted", config.canonical_path().display());
            return Ok(());
        }
        self.detach(config)
    }

    /// Fail with the first missing tool needed for any of `ops`.
    fn require(&self, ops: &[Operation]) -> Result<(), CoreError> {
        let statuses = self.prereqs();
        for op in ops {
            if let Some(missing) = missing_for(&statuses, *op).first() {
                return Err(CoreError::missing(missing));
            }
        }
        Ok(())
    }

    fn tool(&self, name: &str) -> String {
        self.executor
            .locate(name)
            .map_or_else(|| name.to_owned(), |p| p.to_string_lossy().into_owned())
    }

    fn run_checked(&self, cmd: &ToolCommand) -> Result<(), CoreError> {
        let out = self.executor.run_tool(cmd)?;
        if out.success() {
            Ok(())
        } else {
            Err(CoreError::ToolFailed {
                tool: cmd.program_name().to_owned(),
                detail: out.describe(),
            })
        }
    }
}

fn prepend_path(dir: &Path) -> String {
    match std::env::var_os("PATH") {
        Some(path) if !path.is_empty() => {
            format!("{}:{}", dir.display(), path.to_string_lossy())
        }
        _ => dir.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use squashenv_runtime::{Action, DryRunExecutor, MockExecutor};
    use std::sync::Arc;

    struct Fixture {
        _dir: tempfile::TempDir,
        project: PathBuf,
        table: PathBuf,
        config: ProjectConfig,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        std::fs::create_dir(&project).unwrap();
        let table = dir.path().join("mounts");
        let mut config = ProjectConfig::new(Some("inst.sh".to_owned()));
        config.base_directory = dir.path().join("base");
        std::fs::create_dir(&config.base_directory).unwrap();
        std::fs::write(project.join("inst.sh"), "#!/bin/sh\nexit 0\n").unwrap();
        Fixture {
            _dir: dir,
            project,
            table,
            config,
        }
    }

    fn engine(fx: &Fixture, exec: Arc<MockExecutor>) -> Engine {
        Engine::new(&fx.project, Box::new(exec), MountTable::new(&fx.table))
    }

    #[test]
    fn prepare_refuses_mounted_canonical_path() {
        let fx = fixture();
        let mock = Arc::new(MockExecutor::new(&fx.table));
        let eng = engine(&fx, Arc::clone(&mock));
        std::fs::write(fx.config.image_path(&fx.project), "image").unwrap();
        eng.mount(&fx.config).unwrap();

        let opts = BuildOptions {
            steps: "2".parse().unwrap(),
            keep_staging: false,
        };
        let err = eng.build(&fx.config, &opts).unwrap_err();
        assert!(matches!(err, CoreError::MountPointBusy(_)));
        assert!(fx.config.canonical_path().exists());
    }

    #[test]
    fn prepare_removes_leftover_staging() {
        let fx = fixture();
        let mock = Arc::new(MockExecutor::new(&fx.table));
        let eng = engine(&fx, mock);
        let leftover = fx.config.canonical_path().join("junk");
        std::fs::create_dir_all(&leftover).unwrap();

        let opts = BuildOptions {
            steps: "2".parse().unwrap(),
            keep_staging: false,
        };
        eng.build(&fx.config, &opts).unwrap();
        assert!(fx.config.canonical_path().is_dir());
        assert!(!leftover.exists());
    }

    #[test]
    fn failed_step_keeps_staging_on_request() {
        let fx = fixture();
        let mock = Arc::new(MockExecutor::new(&fx.table).with_failure("bash"));
        let eng = engine(&fx, mock);
        let opts = BuildOptions {
            steps: "2-4".parse().unwrap(),
            keep_staging: true,
        };
        let err = eng.build(&fx.config, &opts).unwrap_err();
        assert!(matches!(
            err,
            CoreError::BuildStepFailed { index: 4, name: "base", .. }
        ));
        assert!(fx.config.canonical_path().is_dir());
    }

    #[test]
    fn failed_step_removes_staging_by_default() {
        let fx = fixture();
        let mock = Arc::new(MockExecutor::new(&fx.table).with_failure("bash"));
        let eng = engine(&fx, mock);
        let opts = BuildOptions {
            steps: "2-4".parse().unwrap(),
            keep_staging: false,
        };
        let err = eng.build(&fx.config, &opts).unwrap_err();
        assert!(err.to_string().contains("mock: bash failed"));
        assert!(!fx.config.canonical_path().exists());
    }

    #[test]
    fn concurrent_build_is_refused() {
        let fx = fixture();
        let eng = engine(&fx, Arc::new(MockExecutor::new(&fx.table)));
        let _held = BuildLock::try_acquire(&fx.project.join(BUILD_LOCK_FILE)).unwrap();
        let err = eng.build(&fx.config, &BuildOptions::default()).unwrap_err();
        assert!(matches!(err, CoreError::BuildInProgress(_)));
    }

    #[test]
    fn requirements_failure_is_not_fatal() {
        let fx = fixture();
        std::fs::write(fx.project.join("requirements.txt"), "numpy\n").unwrap();
        let mock = Arc::new(MockExecutor::new(&fx.table).with_failure("pip"));
        let eng = engine(&fx, Arc::clone(&mock));
        let opts = BuildOptions {
            steps: "5".parse().unwrap(),
            keep_staging: false,
        };
        eng.build(&fx.config, &opts).unwrap();
        assert_eq!(mock.invocations("pip"), 1);
        assert_eq!(mock.invocations("mamba"), 2);
    }

    #[test]
    fn dry_run_init_writes_nothing() {
        let fx = fixture();
        let dry = DryRunExecutor::new(Box::new(MockExecutor::new(&fx.table))).quiet();
        let dry = Arc::new(dry);
        let eng = Engine::new(
            &fx.project,
            Box::new(Arc::clone(&dry)),
            MountTable::new(&fx.table),
        );
        eng.init(None).unwrap();
        assert!(!config_path(&fx.project).exists());
        assert!(!fx.project.join("environment.yml").exists());
        let writes = dry
            .actions()
            .into_iter()
            .filter(|a| matches!(a, Action::WriteFile { .. }))
            .count();
        assert_eq!(writes, 2);
    }

    #[test]
    fn exec_of_empty_command_is_rejected() {
        let fx = fixture();
        let eng = engine(&fx, Arc::new(MockExecutor::new(&fx.table)));
        assert!(matches!(
            eng.exec(&fx.config, &[]),
            Err(CoreError::ExecTargetNotFound(_))
        ));
    }

    #[test]
    fn prepend_path_puts_env_first() {
        let joined = prepend_path(Path::new("/tmp/squashenv-1/envs/e/bin"));
        assert!(joined.starts_with("/tmp/squashenv-1/envs/e/bin"));
    }
}
