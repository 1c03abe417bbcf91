use crate::RuntimeError;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where the environment installer comes from for this build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallerSource {
    /// Already on disk.
    Local(PathBuf),
    /// Must be downloaded to `dest` first.
    Remote { url: String, dest: PathBuf },
}

impl InstallerSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Local(p) => p,
            Self::Remote { dest, .. } => dest,
        }
    }
}

pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Last path segment of a URL, ignoring query and fragment.
pub fn url_file_name(url: &str) -> Option<&str> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let scheme_stripped = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| rest);
    let (_, path) = scheme_stripped.split_once('/')?;
    path.rsplit('/').next().filter(|s| !s.is_empty())
}

/// Decide where the installer lives. An explicit override path wins, then a
/// previously downloaded copy in the project directory, then a download.
pub fn locate_installer(
    source: Option<&str>,
    override_path: Option<&Path>,
    project_dir: &Path,
) -> Result<InstallerSource, RuntimeError> {
    if let Some(p) = override_path {
        debug!("using installer override {}", p.display());
        return Ok(InstallerSource::Local(p.to_path_buf()));
    }
    let source = source.ok_or_else(|| {
        RuntimeError::Installer("no installer_source configured".to_owned())
    })?;
    if is_url(source) {
        let name = url_file_name(source).ok_or_else(|| {
            RuntimeError::Installer(format!("cannot derive a file name from '{source}'"))
        })?;
        let dest = project_dir.join(name);
        if dest.exists() {
            debug!("found existing installer {}, skipping download", dest.display());
            return Ok(InstallerSource::Local(dest));
        }
        return Ok(InstallerSource::Remote {
            url: source.to_owned(),
            dest,
        });
    }
    Ok(InstallerSource::Local(project_dir.join(source)))
}

/// The installer must be a non-empty regular file.
pub fn verify_installer(path: &Path) -> Result<(), RuntimeError> {
    let meta = fs::metadata(path).map_err(|e| {
        RuntimeError::Installer(format!("{}: {e}", path.display()))
    })?;
    if !meta.is_file() {
        return Err(RuntimeError::Installer(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    if meta.len() == 0 {
        return Err(RuntimeError::Installer(format!("{} is empty", path.display())));
    }
    Ok(())
}

/// Download `url` to `dest`. The body goes to a sibling `.download` file
/// that is renamed into place once complete.
pub fn download(url: &str, dest: &Path) -> Result<(), RuntimeError> {
    info!("downloading {url}");
    let fetch_err = |reason: String| RuntimeError::Fetch {
        url: url.to_owned(),
        reason,
    };

    let resp = match ureq::get(url).call() {
        Ok(r) => r,
        Err(ureq::Error::StatusCode(code)) => return Err(fetch_err(format!("HTTP {code}"))),
        Err(e) => return Err(fetch_err(e.to_string())),
    };

    let mut partial = dest.as_os_str().to_owned();
    partial.push(".download");
    let partial = PathBuf::from(partial);

    let result = (|| -> Result<u64, RuntimeError> {
        let mut reader = resp.into_body().into_reader();
        let mut file = fs::File::create(&partial)?;
        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf).map_err(|e| fetch_err(e.to_string()))?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])?;
            total += n as u64;
        }
        file.sync_all()?;
        Ok(total)
    })();

    match result {
        Ok(total) => {
            fs::rename(&partial, dest)?;
            debug!("downloaded {total} bytes to {}", dest.display());
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_file_name_extraction() {
        assert_eq!(
            url_file_name("https://github.com/conda-forge/miniforge/releases/latest/download/Miniforge3-Linux-x86_64.sh"),
            Some("Miniforge3-Linux-x86_64.sh")
        );
        assert_eq!(
            url_file_name("https://example.com/inst.sh?token=1#frag"),
            Some("inst.sh")
        );
        assert_eq!(url_file_name("https://example.com/"), None);
        assert_eq!(url_file_name("https://example.com"), None);
    }

    #[test]
    fn override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let src = locate_installer(
            Some("https://example.com/inst.sh"),
            Some(Path::new("/opt/inst.sh")),
            dir.path(),
        )
        .unwrap();
        assert_eq!(src, InstallerSource::Local(PathBuf::from("/opt/inst.sh")));
    }

    #[test]
    fn url_resolves_to_download_then_local_copy() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://example.com/dl/inst.sh";
        let src = locate_installer(Some(url), None, dir.path()).unwrap();
        assert_eq!(
            src,
            InstallerSource::Remote {
                url: url.to_owned(),
                dest: dir.path().join("inst.sh"),
            }
        );
        std::fs::write(dir.path().join("inst.sh"), "#!/bin/sh\n").unwrap();
        let src = locate_installer(Some(url), None, dir.path()).unwrap();
        assert_eq!(src, InstallerSource::Local(dir.path().join("inst.sh")));
    }

    #[test]
    fn relative_local_source_resolves_against_project() {
        let dir = tempfile::tempdir().unwrap();
        let src = locate_installer(Some("installers/inst.sh"), None, dir.path()).unwrap();
        assert_eq!(src.path(), dir.path().join("installers/inst.sh"));
        let abs = locate_installer(Some("/srv/inst.sh"), None, dir.path()).unwrap();
        assert_eq!(abs.path(), Path::new("/srv/inst.sh"));
    }

    #[test]
    fn missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(locate_installer(None, None, dir.path()).is_err());
    }

    #[test]
    fn verify_rejects_missing_empty_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(verify_installer(&dir.path().join("absent.sh")).is_err());
        let empty = dir.path().join("empty.sh");
        std::fs::write(&empty, "").unwrap();
        assert!(verify_installer(&empty).is_err());
        assert!(verify_installer(dir.path()).is_err());
        let good = dir.path().join("good.sh");
        std::fs::write(&good, "#!/bin/sh\n").unwrap();
        assert!(verify_installer(&good).is_ok());
    }
}
