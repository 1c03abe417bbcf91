use crate::types::ProjectId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Name of the project record inside the project directory.
pub const CONFIG_FILE: &str = "squashenv.toml";
/// Prefix of the canonical mount directory name, `<prefix>-<id>`.
pub const MOUNT_PREFIX: &str = "squashenv";
pub const DEFAULT_BASE_DIRECTORY: &str = "/tmp";
pub const DEFAULT_INSTALLER_URL: &str =
    "https://github.com/conda-forge/miniforge/releases/latest/download/Miniforge3-Linux-x86_64.sh";
/// Path to a pre-downloaded installer, consulted before any network fetch.
pub const INSTALLER_ENV: &str = "SQUASHENV_INSTALLER";

const CONFIG_HEADER: &str = "\
# squashenv project configuration
#
# - created by `squashenv init`
# - may be edited by hand (base_directory, or id to select another built image)
#
";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("project not initialized: {} not found (run `squashenv init`)", .0.display())]
    Missing(PathBuf),
    #[error("invalid project config {}: {reason}", .path.display())]
    Invalid { path: PathBuf, reason: String },
    #[error("project already initialized: {} exists", .0.display())]
    Exists(PathBuf),
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// The per-project identity record stored in `squashenv.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub id: ProjectId,
    #[serde(default = "default_base_directory")]
    pub base_directory: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_source: Option<String>,
    #[serde(default = "default_manifest")]
    pub manifest: String,
    #[serde(default = "default_resolver")]
    pub resolver: String,
    #[serde(default = "default_env_name")]
    pub env_name: String,
}

fn default_base_directory() -> PathBuf {
    PathBuf::from(DEFAULT_BASE_DIRECTORY)
}

fn default_manifest() -> String {
    "environment.yml".to_owned()
}

fn default_resolver() -> String {
    "mamba".to_owned()
}

fn default_env_name() -> String {
    "squashenv".to_owned()
}

impl ProjectConfig {
    /// A fresh record with a newly generated identifier and default settings.
    pub fn new(installer_source: Option<String>) -> Self {
        Self {
            id: ProjectId::generate(),
            base_directory: default_base_directory(),
            image_filename: None,
            installer_source: Some(
                installer_source.unwrap_or_else(|| DEFAULT_INSTALLER_URL.to_owned()),
            ),
            manifest: default_manifest(),
            resolver: default_resolver(),
            env_name: default_env_name(),
        }
    }

    /// The one place the mount/staging location is derived. Build stages the
    /// environment here and mount attaches the image here, so absolute paths
    /// baked in at install time stay valid.
    pub fn canonical_path(&self) -> PathBuf {
        self.base_directory
            .join(format!("{MOUNT_PREFIX}-{}", self.id))
    }

    /// `<id>.squashfs` unless pinned in the record, so swapping `id` also
    /// selects that build's image.
    pub fn image_filename(&self) -> String {
        self.image_filename
            .clone()
            .unwrap_or_else(|| format!("{}.squashfs", self.id))
    }

    pub fn image_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(self.image_filename())
    }

    /// Temporary name the compressor writes to before the rename into place.
    pub fn partial_image_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(format!("{}.partial", self.image_filename()))
    }

    pub fn manifest_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.manifest)
    }

    pub fn requirements_path(project_dir: &Path) -> PathBuf {
        project_dir.join("requirements.txt")
    }

    /// Resolver executable inside the staged base runtime.
    pub fn resolver_path(&self) -> PathBuf {
        self.canonical_path().join("bin").join(&self.resolver)
    }

    /// Binary directory of the user environment, prepended to PATH by exec.
    pub fn env_bin_dir(&self) -> PathBuf {
        self.canonical_path()
            .join("envs")
            .join(&self.env_name)
            .join("bin")
    }

    pub fn validate(&self) -> Result<(), String> {
        self.id.validate()?;
        let image = self.image_filename();
        if image.is_empty() || image.contains('/') || image == "." || image == ".." {
            return Err(format!(
                "image_filename '{image}' must be a plain file name"
            ));
        }
        if self.env_name.is_empty() || self.env_name.contains('/') {
            return Err(format!("env_name '{}' is not valid", self.env_name));
        }
        if self.resolver.is_empty() || self.resolver.contains('/') {
            return Err(format!("resolver '{}' is not valid", self.resolver));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let body = toml::to_string_pretty(self)?;
        Ok(format!("{CONFIG_HEADER}{body}"))
    }
}

pub fn config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(CONFIG_FILE)
}

pub fn parse_config_str(input: &str, path: &Path) -> Result<ProjectConfig, ConfigError> {
    let config: ProjectConfig = toml::from_str(input).map_err(|e| ConfigError::Invalid {
        path: path.to_path_buf(),
        reason: e.message().to_owned(),
    })?;
    config.validate().map_err(|reason| ConfigError::Invalid {
        path: path.to_path_buf(),
        reason,
    })?;
    Ok(config)
}

pub fn load_project(project_dir: &Path) -> Result<ProjectConfig, ConfigError> {
    let path = config_path(project_dir);
    let content = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::Missing(path));
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };
    parse_config_str(&content, &path)
}

/// Overwrite the record. Used by `init` and explicit identifier changes.
pub fn save_project(project_dir: &Path, config: &ProjectConfig) -> Result<(), ConfigError> {
    let path = config_path(project_dir);
    config
        .validate()
        .map_err(|reason| ConfigError::Invalid { path: path.clone(), reason })?;
    write_atomic(&path, &config.to_toml()?)?;
    Ok(())
}

/// Create the record for a new project. Refuses to touch an existing one.
pub fn init_project(
    project_dir: &Path,
    installer_source: Option<String>,
) -> Result<ProjectConfig, ConfigError> {
    let path = config_path(project_dir);
    if path.exists() {
        return Err(ConfigError::Exists(path));
    }
    let config = ProjectConfig::new(installer_source);
    save_project(project_dir, &config)?;
    Ok(config)
}

pub(crate) fn write_atomic(dest: &Path, content: &str) -> Result<(), std::io::Error> {
    let dir = dest
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}
