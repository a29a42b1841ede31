//! The archive writer contract
//!
//! An [`ArchiveWriter`] owns one sink for its whole life and appends entries
//! to it strictly one at a time:
//!
//! ```text
//! add_entry ──► (validate name) ──► open entry ──► copy bytes ──► close entry
//!     ▲                                                               │
//!     └───────────────────────────────────────────────────────────────┘
//! close ──► write container trailer ──► flush ──► release sink
//! ```
//!
//! Format adapters embed an [`EntryLedger`], which carries the bookkeeping
//! every writer shares: name validation, uniqueness, and the
//! open/unusable/closed state machine.

use crate::copy::AbortHandle;
use crate::entry::EntryName;
use crate::error::{ArchiveError, Result};
use std::collections::HashSet;
use std::io::{Read, Write};

/// Byte destination a writer is bound to
pub type Sink = Box<dyn Write + Send>;

/// Compression method requested for archive entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    /// No compression (stored)
    Stored,
    /// DEFLATE compression (most common)
    #[default]
    Deflate,
    /// Zstd compression (requires zstd-support feature)
    #[cfg(feature = "zstd-support")]
    Zstd,
}

/// Default compression level, matching zlib's default
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Options applied when a writer is constructed
///
/// Each format applies what is meaningful to it: ZIP uses the method and
/// level for every entry, compressed tar variants use the level only.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    compression: CompressionMethod,
    level: u32,
    abort: Option<AbortHandle>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::default(),
            level: DEFAULT_COMPRESSION_LEVEL,
            abort: None,
        }
    }
}

impl WriterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the compression method
    pub fn compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }

    /// Set the compression level (0-9 for DEFLATE, 1-21 for Zstd)
    pub fn level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Attach a handle that can interrupt in-progress copies
    pub fn abort_handle(mut self, handle: AbortHandle) -> Self {
        self.abort = Some(handle);
        self
    }

    pub fn compression_method(&self) -> CompressionMethod {
        self.compression
    }

    pub fn compression_level(&self) -> u32 {
        self.level
    }

    pub fn abort(&self) -> Option<&AbortHandle> {
        self.abort.as_ref()
    }
}

/// Writes entries into one container in one format.
///
/// Instances are not reusable: once `close` has been called (successfully or
/// not) every further call fails.
pub trait ArchiveWriter: Send {
    /// Write one entry, reading `content` until EOF.
    ///
    /// Returns the number of content bytes copied. `content` stays owned by
    /// the caller and is not closed.
    ///
    /// Name errors (`InvalidName`, `DuplicateEntry`) are reported before any
    /// byte reaches the sink and leave the writer usable. An I/O fault or an
    /// abort leaves the container indeterminate: the writer becomes unusable
    /// and the output must be discarded.
    fn add_entry(&mut self, name: &str, content: &mut dyn Read) -> Result<u64> {
        self.add_entry_sized(name, None, content)
    }

    /// Like [`ArchiveWriter::add_entry`], with the expected content length
    /// when the caller knows it.
    ///
    /// The size is a hint for buffering; the bytes actually read are what
    /// gets recorded.
    fn add_entry_sized(
        &mut self,
        name: &str,
        size_hint: Option<u64>,
        content: &mut dyn Read,
    ) -> Result<u64>;

    /// Finalize the container and release the sink.
    ///
    /// A second call returns [`ArchiveError::Closed`]. Closing a writer left
    /// unusable by an earlier failure releases the sink and returns
    /// [`ArchiveError::Unusable`].
    fn close(&mut self) -> Result<()>;

    /// Number of entries written so far
    fn entry_count(&self) -> usize;
}

/// Lifecycle of a writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Accepting entries
    Open,
    /// A fault interrupted an entry; the output is indeterminate
    Unusable,
    /// `close` has been called
    Closed,
}

/// Contract bookkeeping shared by all format adapters
#[derive(Debug)]
pub struct EntryLedger {
    names: HashSet<EntryName>,
    state: WriterState,
}

impl Default for EntryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryLedger {
    pub fn new() -> Self {
        Self {
            names: HashSet::new(),
            state: WriterState::Open,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Check that the writer is open and `name` may be added.
    ///
    /// Does not record the name; call [`EntryLedger::record`] once the entry
    /// is complete.
    pub fn admit(&self, name: &str) -> Result<EntryName> {
        match self.state {
            WriterState::Open => {}
            WriterState::Unusable => return Err(ArchiveError::Unusable),
            WriterState::Closed => return Err(ArchiveError::Closed),
        }
        let name = EntryName::new(name)?;
        if self.names.contains(name.as_str()) {
            return Err(ArchiveError::DuplicateEntry(name.into_string()));
        }
        Ok(name)
    }

    pub fn record(&mut self, name: EntryName) {
        self.names.insert(name);
    }

    /// Pass `result` through, marking the writer unusable on fatal errors
    pub fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            if e.is_fatal() {
                tracing::warn!(error = %e, "archive writer failed, output must be discarded");
                self.state = WriterState::Unusable;
            }
        }
        result
    }

    /// Transition to `Closed`.
    ///
    /// `Ok` means the container should be finalized. An unusable writer
    /// yields `Unusable`; the caller then releases the sink without
    /// finalizing.
    pub fn begin_close(&mut self) -> Result<()> {
        let previous = std::mem::replace(&mut self.state, WriterState::Closed);
        match previous {
            WriterState::Open => Ok(()),
            WriterState::Unusable => Err(ArchiveError::Unusable),
            WriterState::Closed => Err(ArchiveError::Closed),
        }
    }
}

/// Write every `(name, content)` pair in iteration order.
///
/// Stops at the first error; the writer is left as that error describes.
/// Returns the total number of content bytes written.
pub fn write_entries<I, N, R>(writer: &mut dyn ArchiveWriter, entries: I) -> Result<u64>
where
    I: IntoIterator<Item = (N, R)>,
    N: AsRef<str>,
    R: Read,
{
    let mut total = 0;
    for (name, mut content) in entries {
        total += writer.add_entry(name.as_ref(), &mut content)?;
    }
    Ok(total)
}
