//! Error types for backup-archive

use std::io;
use thiserror::Error;

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Error types that can occur while writing, reading or resolving archives
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Entry name is empty, absolute, or escapes the archive root
    #[error("Invalid entry name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Entry name was already written to this archive
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    /// No format is registered under this identifier
    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    /// A format is already registered under this identifier
    #[error("Archive format already registered: {0}")]
    DuplicateFormat(String),

    /// I/O error from the sink, the source, or an entry stream
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Container structure is invalid or truncated
    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    /// Unsupported compression method in a ZIP entry
    #[error("Unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    /// Entry not found in the archive
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// The writer or reader was already closed
    #[error("Archive is closed")]
    Closed,

    /// An earlier failure left the archive in an indeterminate state
    #[error("Archive is unusable after an earlier failure")]
    Unusable,

    /// The copy was interrupted through an `AbortHandle`
    #[error("Archive operation aborted")]
    Aborted,
}

impl ArchiveError {
    pub(crate) fn invalid_name(name: impl Into<String>, reason: &'static str) -> Self {
        ArchiveError::InvalidName {
            name: name.into(),
            reason,
        }
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        ArchiveError::CorruptArchive(msg.into())
    }

    /// Map an I/O error hit while parsing container structure.
    ///
    /// Running out of bytes in the middle of a header means the container is
    /// truncated, not that the source failed.
    pub(crate) fn from_structure_io(err: io::Error, what: &str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ArchiveError::CorruptArchive(format!("truncated {}", what))
        } else {
            ArchiveError::Io(err)
        }
    }

    /// Returns true if this error leaves the writer unusable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ArchiveError::Io(_) | ArchiveError::Aborted | ArchiveError::Unusable
        )
    }
}
