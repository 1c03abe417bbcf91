//! Shell activation snippets.
//!
//! These are plain text artifacts: squashenv writes them next to the image,
//! and the user's shell sources them. Nothing here touches the environment.

use crate::command::shell_quote_path;
use std::path::Path;

pub const ACTIVATE_SCRIPT: &str = "activate";
pub const DEACTIVATE_SCRIPT: &str = "deactivate";

/// Command that enables the environment in the current shell.
pub fn activate_command(canonical_path: &Path, env_name: &str) -> String {
    let activate = canonical_path.join("bin").join("activate");
    format!(
        "source {} {}",
        shell_quote_path(&activate),
        crate::command::shell_quote(env_name)
    )
}

pub fn deactivate_command() -> &'static str {
    "conda deactivate"
}

pub fn activate_script(canonical_path: &Path, env_name: &str) -> String {
    format!(
        "# usage: source activate\n\
         # (must be sourced from the squashenv project directory)\n\
         squashenv --quiet mount\n\
         {}\n",
        activate_command(canonical_path, env_name)
    )
}

pub fn deactivate_script() -> String {
    format!(
        "# usage: source deactivate\n\
         {}\n\
         echo \"hint: run  squashenv umount  once no other shell uses the environment\"\n",
        deactivate_command()
    )
}
