use crate::RuntimeError;
use std::path::{Path, PathBuf};

/// Overrides the mount table file (default `/proc/mounts`).
pub const MOUNT_TABLE_ENV: &str = "SQUASHENV_MOUNT_TABLE";
const PROC_MOUNTS: &str = "/proc/mounts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
    pub fstype: String,
}

/// Live view of the OS mount table.
///
/// Nothing is cached: every query re-reads the table, so the answer reflects
/// crashes, external unmounts and other sessions.
#[derive(Debug, Clone)]
pub struct MountTable {
    path: PathBuf,
}

impl MountTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `/proc/mounts`, unless `SQUASHENV_MOUNT_TABLE` names another file.
    pub fn system() -> Self {
        match std::env::var_os(MOUNT_TABLE_ENV) {
            Some(p) if !p.is_empty() => Self::new(p),
            _ => Self::new(PROC_MOUNTS),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Result<Vec<MountEntry>, RuntimeError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            // A scratch table that was never written has no mounts.
            Err(e)
                if e.kind() == std::io::ErrorKind::NotFound
                    && self.path != Path::new(PROC_MOUNTS) =>
            {
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(RuntimeError::MountTable {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        Ok(parse_mount_table(&content))
    }

    pub fn is_mounted(&self, path: &Path) -> Result<bool, RuntimeError> {
        let entries = self.entries()?;
        // canonicalize() can fail on a dead FUSE endpoint; the literal path
        // is still compared in that case.
        let resolved = std::fs::canonicalize(path).ok();
        Ok(entries
            .iter()
            .any(|e| e.target == path || resolved.as_deref() == Some(e.target.as_path())))
    }
}

pub fn parse_mount_table(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fstype = fields.next().unwrap_or_default();
            Some(MountEntry {
                source: decode_field(source),
                target: PathBuf::from(decode_field(target)),
                fstype: fstype.to_owned(),
            })
        })
        .collect()
}

/// Undo the octal escaping the kernel applies to space, tab, newline and
/// backslash in mount table fields (`\040` etc.).
pub fn decode_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(v) = u8::try_from(value) {
                    out.push(v);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub fn encode_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            ' ' => out.push_str("\\040"),
            '\t' => out.push_str("\\011"),
            '\n' => out.push_str("\\012"),
            '\\' => out.push_str("\\134"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
/dev/nvme0n1p2 / ext4 rw,relatime 0 0
squashfuse /tmp/squashenv-1234 fuse.squashfuse ro,nosuid,nodev,relatime,user_id=1000 0 0
squashfuse /scratch/my\\040envs/squashenv-abcd fuse.squashfuse ro 0 0
";

    #[test]
    fn parses_entries() {
        let entries = parse_mount_table(SAMPLE);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[2].target, PathBuf::from("/tmp/squashenv-1234"));
        assert_eq!(entries[2].fstype, "fuse.squashfuse");
    }

    #[test]
    fn decodes_octal_escapes() {
        assert_eq!(decode_field("/a\\040b"), "/a b");
        assert_eq!(decode_field("/a\\134b"), "/a\\b");
        assert_eq!(decode_field("/plain"), "/plain");
        assert_eq!(decode_field("/trailing\\04"), "/trailing\\04");
        assert_eq!(decode_field(&encode_field("/x y\tz")), "/x y\tz");
    }

    #[test]
    fn is_mounted_matches_exact_target() {
        let dir = tempfile::tempdir().unwrap();
        let table_path = dir.path().join("mounts");
        std::fs::write(&table_path, SAMPLE).unwrap();
        let table = MountTable::new(&table_path);
        assert!(table.is_mounted(Path::new("/tmp/squashenv-1234")).unwrap());
        assert!(table
            .is_mounted(Path::new("/scratch/my envs/squashenv-abcd"))
            .unwrap());
        assert!(!table.is_mounted(Path::new("/tmp/squashenv-12")).unwrap());
        assert!(!table.is_mounted(Path::new("/tmp")).unwrap());
    }

    #[test]
    fn table_is_reread_on_every_query() {
        let dir = tempfile::tempdir().unwrap();
        let table_path = dir.path().join("mounts");
        let table = MountTable::new(&table_path);
        let target = Path::new("/tmp/squashenv-live");
        assert!(!table.is_mounted(target).unwrap());
        std::fs::write(
            &table_path,
            "squashfuse /tmp/squashenv-live fuse.squashfuse ro 0 0\n",
        )
        .unwrap();
        assert!(table.is_mounted(target).unwrap());
        std::fs::write(&table_path, "").unwrap();
        assert!(!table.is_mounted(target).unwrap());
    }

    #[test]
    fn system_table_is_readable() {
        if Path::new(PROC_MOUNTS).exists() {
            let table = MountTable::new(PROC_MOUNTS);
            assert!(!table.entries().unwrap().is_empty());
        }
    }
}
