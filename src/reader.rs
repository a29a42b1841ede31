//! The archive reader contract

use crate::entry::EntryName;
use crate::error::Result;
use std::fmt;
use std::io::{self, Read, Seek};

/// Seekable byte origin a reader is bound to
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Byte origin a reader is bound to
pub type Source = Box<dyn ReadSeek + Send>;

/// One member of an archive, readable while it is the current entry.
///
/// The entry mutably borrows its reader, so advancing to the next entry
/// ends this one's stream.
pub struct ArchiveEntry<'a> {
    name: EntryName,
    size: Option<u64>,
    content: Box<dyn Read + 'a>,
}

impl<'a> ArchiveEntry<'a> {
    pub fn new(name: EntryName, size: Option<u64>, content: Box<dyn Read + 'a>) -> Self {
        Self {
            name,
            size,
            content,
        }
    }

    pub fn name(&self) -> &EntryName {
        &self.name
    }

    /// Uncompressed content length, when the container records it
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Read the remaining content into memory
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.size.unwrap_or(0).min(1 << 20) as usize);
        self.content.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl Read for ArchiveEntry<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.content.read(buf)
    }
}

impl fmt::Debug for ArchiveEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveEntry")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Extracts entries from one container in one format.
pub trait ArchiveReader: Send {
    /// Advance to the next entry in container order.
    ///
    /// Returns `Ok(None)` once the container is exhausted. Unread content of
    /// the previous entry is skipped.
    fn next_entry(&mut self) -> Result<Option<ArchiveEntry<'_>>>;

    /// Release the source. Later calls fail with `Closed`.
    fn close(&mut self) -> Result<()>;

    /// Visit every remaining entry in container order
    fn for_each_entry(&mut self, f: &mut dyn FnMut(ArchiveEntry<'_>) -> Result<()>) -> Result<()> {
        while let Some(entry) = self.next_entry()? {
            f(entry)?;
        }
        Ok(())
    }
}

/// Read every remaining entry into memory, in container order.
///
/// Meant for verification and small restores; large archives should be
/// walked with [`ArchiveReader::next_entry`].
pub fn read_all_entries(reader: &mut dyn ArchiveReader) -> Result<Vec<(EntryName, Vec<u8>)>> {
    let mut entries = Vec::new();
    reader.for_each_entry(&mut |mut entry| {
        let data = entry.read_to_vec()?;
        entries.push((entry.name().clone(), data));
        Ok(())
    })?;
    Ok(entries)
}
