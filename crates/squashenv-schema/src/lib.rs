//! Project identity record and addressing scheme for squashenv.
//!
//! This crate defines the schema layer: the human-editable `squashenv.toml`
//! project record (`ProjectConfig`), the generated project identifier
//! (`ProjectId`), the single derivation of the canonical mount path shared by
//! build and mount, and the template dependency manifest written by `init`.

pub mod config;
pub mod template;
pub mod types;

pub use config::{
    config_path, init_project, load_project, parse_config_str, save_project, ConfigError,
    ProjectConfig, CONFIG_FILE, DEFAULT_BASE_DIRECTORY, DEFAULT_INSTALLER_URL, INSTALLER_ENV,
    MOUNT_PREFIX,
};
pub use template::{write_manifest_template, MANIFEST_TEMPLATE};
pub use types::ProjectId;
