//! Newtype wrapper for the project identifier.
//!
//! Serializes/deserializes as a plain string so the record stays hand-editable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Stable per-project token. Generated once by `init` as a UUID v4; users may
/// swap it by hand to point at another previously built image, so any token
/// that is safe as a single path component is accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Returns a description of the problem if the token cannot be used as a
    /// single path component.
    pub fn validate(&self) -> Result<(), String> {
        if self.0.is_empty() {
            return Err("id must not be empty".to_owned());
        }
        if self.0 == "." || self.0 == ".." {
            return Err(format!("id '{}' is not a valid path component", self.0));
        }
        if let Some(c) = self
            .0
            .chars()
            .find(|c| *c == '/' || *c == '\0' || c.is_whitespace())
        {
            return Err(format!("id '{}' contains invalid character {c:?}", self.0));
        }
        Ok(())
    }

    /// First 8 characters, used in log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl Deref for ProjectId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ProjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ProjectId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_uuids() {
        let a = ProjectId::generate();
        let b = ProjectId::generate();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
        assert!(uuid::Uuid::parse_str(a.as_str()).is_ok());
        assert!(a.validate().is_ok());
    }

    #[test]
    fn serde_is_transparent() {
        let id = ProjectId::new("deadbeef");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"deadbeef\"");
        let back: ProjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn rejects_path_like_tokens() {
        assert!(ProjectId::new("").validate().is_err());
        assert!(ProjectId::new("..").validate().is_err());
        assert!(ProjectId::new("a/b").validate().is_err());
        assert!(ProjectId::new("a b").validate().is_err());
        assert!(ProjectId::new("legacy-image-2").validate().is_ok());
    }

    #[test]
    fn short_truncates() {
        let id = ProjectId::new("0123456789abcdef");
        assert_eq!(id.short(), "01234567");
        assert_eq!(ProjectId::new("abc").short(), "abc");
    }
}
