//! ZIP format adapter
//!
//! [`ZipArchiveWriter`] and [`ZipArchiveReader`] bind the streaming codec in
//! [`encoder`] and [`decoder`] to the archive contracts.

mod decoder;
mod encoder;

pub use decoder::{ZipDecoder, ZipEntry};
pub use encoder::ZipEncoder;

use crate::copy::{copy_entry, AbortHandle};
use crate::entry::EntryName;
use crate::error::{ArchiveError, Result};
use crate::reader::{ArchiveEntry, ArchiveReader, Source};
use crate::registry::FormatDescriptor;
use crate::writer::{ArchiveWriter, EntryLedger, Sink, WriterOptions, WriterState};
use std::io::{Read, Write};

/// ZIP local file header signature
pub(crate) const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;

/// ZIP data descriptor signature
pub(crate) const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;

/// ZIP central directory signature
pub(crate) const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;

/// ZIP end of central directory signature
pub(crate) const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;

/// ZIP64 end of central directory record signature
pub(crate) const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06064b50;

/// ZIP64 end of central directory locator signature
pub(crate) const ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE: u32 = 0x07064b50;

/// ZIP64 extended information extra field
pub(crate) const ZIP64_EXTRA_FIELD_ID: u16 = 0x0001;

pub(crate) const METHOD_STORED: u16 = 0;
pub(crate) const METHOD_DEFLATE: u16 = 8;
#[cfg(feature = "zstd-support")]
pub(crate) const METHOD_ZSTD: u16 = 93;

/// Bit 3: CRC and sizes follow the data in a data descriptor
pub(crate) const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
/// Bit 11: name is UTF-8
pub(crate) const FLAG_UTF8: u16 = 0x0800;

/// 1980-01-01, the DOS epoch. Fixed so identical input gives identical bytes.
pub(crate) const DOS_DATE_1980: u16 = (1 << 5) | 1;
pub(crate) const DOS_TIME_MIDNIGHT: u16 = 0;

/// Registry entry for `.zip`
pub const ZIP_FORMAT: FormatDescriptor =
    FormatDescriptor::new("zip", ZipArchiveWriter::boxed, ZipArchiveReader::boxed);

/// [`ArchiveWriter`] producing a ZIP container
pub struct ZipArchiveWriter {
    encoder: Option<ZipEncoder<Sink>>,
    ledger: EntryLedger,
    abort: Option<AbortHandle>,
}

impl ZipArchiveWriter {
    /// Bind a writer to `sink`. Nothing is written until the first entry.
    pub fn new(sink: Sink, options: &WriterOptions) -> Self {
        Self {
            encoder: Some(ZipEncoder::with_method(
                sink,
                options.compression_method(),
                options.compression_level(),
            )),
            ledger: EntryLedger::new(),
            abort: options.abort().cloned(),
        }
    }

    fn boxed(sink: Sink, options: &WriterOptions) -> Result<Box<dyn ArchiveWriter>> {
        Ok(Box::new(Self::new(sink, options)))
    }

    fn write_entry(
        &mut self,
        name: &EntryName,
        size_hint: Option<u64>,
        content: &mut dyn Read,
    ) -> Result<u64> {
        let encoder = self.encoder.as_mut().ok_or(ArchiveError::Closed)?;
        encoder.start_entry(name.as_str(), size_hint)?;
        let copied = copy_entry(content, self.abort.as_ref(), |chunk| encoder.write_data(chunk))?;
        encoder.finish_entry()?;
        Ok(copied)
    }
}

impl ArchiveWriter for ZipArchiveWriter {
    fn add_entry_sized(
        &mut self,
        name: &str,
        size_hint: Option<u64>,
        content: &mut dyn Read,
    ) -> Result<u64> {
        let name = self.ledger.admit(name)?;
        if name.as_str().len() > u16::MAX as usize {
            return Err(ArchiveError::invalid_name(
                name.into_string(),
                "name longer than 65535 bytes",
            ));
        }

        let result = self.write_entry(&name, size_hint, content);
        let copied = self.ledger.track(result)?;
        tracing::debug!(entry = %name, bytes = copied, "zip entry written");
        self.ledger.record(name);
        Ok(copied)
    }

    fn close(&mut self) -> Result<()> {
        let closing = self.ledger.begin_close();
        // Taking the encoder releases the sink on every path below
        let encoder = self.encoder.take();
        closing?;

        let encoder = encoder.ok_or(ArchiveError::Closed)?;
        let entries = encoder.entry_count();
        let bytes = encoder.bytes_written();
        let mut sink = encoder.finish()?;
        sink.flush()?;
        tracing::info!(format = "zip", entries, bytes, "archive finalized");
        Ok(())
    }

    fn entry_count(&self) -> usize {
        self.ledger.len()
    }
}

impl Drop for ZipArchiveWriter {
    fn drop(&mut self) {
        if self.ledger.state() != WriterState::Closed {
            tracing::warn!(
                format = "zip",
                entries = self.ledger.len(),
                "archive writer dropped without close, output is incomplete"
            );
        }
    }
}

/// [`ArchiveReader`] over a ZIP container, in central directory order
pub struct ZipArchiveReader {
    decoder: Option<ZipDecoder<Source>>,
    next_index: usize,
}

impl ZipArchiveReader {
    /// Read the central directory of the archive in `source`
    pub fn new(source: Source) -> Result<Self> {
        Ok(Self {
            decoder: Some(ZipDecoder::new(source)?),
            next_index: 0,
        })
    }

    fn boxed(source: Source) -> Result<Box<dyn ArchiveReader>> {
        Ok(Box::new(Self::new(source)?))
    }
}

impl ArchiveReader for ZipArchiveReader {
    fn next_entry(&mut self) -> Result<Option<ArchiveEntry<'_>>> {
        let decoder = self.decoder.as_mut().ok_or(ArchiveError::Closed)?;
        let entry = loop {
            let Some(entry) = decoder.entries().get(self.next_index).cloned() else {
                return Ok(None);
            };
            self.next_index += 1;
            // Directory members carry no content
            if entry.name.ends_with('/') && entry.uncompressed_size == 0 {
                tracing::debug!(entry = %entry.name, "skipping zip directory entry");
                continue;
            }
            break entry;
        };

        let name = EntryName::new(entry.name.as_str())?;
        let content = decoder.entry_reader(&entry)?;
        Ok(Some(ArchiveEntry::new(
            name,
            Some(entry.uncompressed_size),
            content,
        )))
    }

    fn close(&mut self) -> Result<()> {
        self.decoder.take().map(drop).ok_or(ArchiveError::Closed)
    }
}
