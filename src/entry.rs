//! Validated entry names
//!
//! Every name that goes into an archive, and every name read back out of one,
//! passes through [`EntryName`]. A valid name is a relative, `/`-separated
//! path that cannot point outside the directory an archive is restored into.

use crate::error::{ArchiveError, Result};
use std::borrow::Borrow;
use std::fmt;

/// Logical path of one archive member
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryName(String);

impl EntryName {
    /// Validate `name` and wrap it.
    ///
    /// Rejects empty names, absolute paths, backslashes, NUL bytes, drive
    /// prefixes, and empty, `.` or `..` components.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate(&name)?;
        Ok(EntryName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Path components, outermost first
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Final component
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

fn validate(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ArchiveError::invalid_name(name, "empty name"));
    }
    if name.starts_with('/') {
        return Err(ArchiveError::invalid_name(name, "absolute path"));
    }
    if name.contains('\\') {
        return Err(ArchiveError::invalid_name(name, "backslash separator"));
    }
    if name.contains('\0') {
        return Err(ArchiveError::invalid_name(name, "NUL byte"));
    }
    let bytes = name.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(ArchiveError::invalid_name(name, "drive prefix"));
    }
    for component in name.split('/') {
        match component {
            "" => return Err(ArchiveError::invalid_name(name, "empty path component")),
            "." => return Err(ArchiveError::invalid_name(name, "'.' component")),
            ".." => return Err(ArchiveError::invalid_name(name, "parent-directory escape")),
            _ => {}
        }
    }
    Ok(())
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EntryName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for EntryName {
    type Error = ArchiveError;

    fn try_from(name: &str) -> Result<Self> {
        EntryName::new(name)
    }
}

impl TryFrom<String> for EntryName {
    type Error = ArchiveError;

    fn try_from(name: String) -> Result<Self> {
        EntryName::new(name)
    }
}

impl PartialEq<str> for EntryName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for EntryName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
