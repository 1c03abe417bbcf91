use crate::config::write_atomic;
use std::path::Path;

/// Minimal conda environment definition written by `init` as a starting point.
pub const MANIFEST_TEMPLATE: &str = "\
# Conda environment definition file
# This file is only provided as an example, replace it with your own file!
# Hints on editing manually are available online:
# https://conda.io/projects/conda/en/latest/user-guide/tasks/manage-environments.html#creating-an-environment-file-manually
#
name: basicnumpy
channels:
  - conda-forge
dependencies:
  - python=3.11
  - numpy
";

/// Write the template manifest unless a file is already present.
/// Returns whether a file was written.
pub fn write_manifest_template(path: &Path) -> Result<bool, std::io::Error> {
    if path.exists() {
        return Ok(false);
    }
    write_atomic(path, MANIFEST_TEMPLATE)?;
    Ok(true)
}
