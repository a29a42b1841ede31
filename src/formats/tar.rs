//! tar format adapters: `tar`, `tar.gz`/`tgz` and `tar.zst`
//!
//! Writing goes through [`::tar::Builder`]. A tar header carries the entry size
//! up front, so each entry is first staged in a [`SpooledTempFile`] (memory
//! up to [`SPOOL_THRESHOLD`], disk beyond) and appended once its length is
//! known.
//!
//! Reading walks the 512-byte header blocks directly with [`::tar::Header`],
//! which lets one reader hand out entry streams that borrow it. GNU long
//! names and PAX `path` records are honoured; entry types other than regular
//! files are skipped.

use crate::copy::{copy_entry, AbortHandle};
use crate::entry::EntryName;
use crate::error::{ArchiveError, Result};
use crate::reader::{ArchiveEntry, ArchiveReader, Source};
use crate::registry::FormatDescriptor;
use crate::writer::{ArchiveWriter, EntryLedger, Sink, WriterOptions, WriterState};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Seek, SeekFrom, Write};
use ::tar::{EntryType, Header, PaxExtensions};
use tempfile::SpooledTempFile;

/// Entries up to this size are staged in memory
pub const SPOOL_THRESHOLD: usize = 8 * 1024 * 1024;

const BLOCK_SIZE: u64 = 512;

/// Upper bound for GNU long-name and PAX header payloads
const MAX_METADATA_SIZE: u64 = 1024 * 1024;

pub const TAR_FORMAT: FormatDescriptor =
    FormatDescriptor::new("tar", TarArchiveWriter::plain, TarArchiveReader::plain);

pub const TAR_GZ_FORMAT: FormatDescriptor =
    FormatDescriptor::new("tar.gz", TarArchiveWriter::gzip, TarArchiveReader::gzip);

pub const TGZ_FORMAT: FormatDescriptor =
    FormatDescriptor::new("tgz", TarArchiveWriter::gzip, TarArchiveReader::gzip);

#[cfg(feature = "zstd-support")]
pub const TAR_ZST_FORMAT: FormatDescriptor =
    FormatDescriptor::new("tar.zst", TarArchiveWriter::zstd, TarArchiveReader::zstd);

/// Outer stream a tar container is written through
enum TarSink {
    Plain(Sink),
    Gzip(GzEncoder<Sink>),
    #[cfg(feature = "zstd-support")]
    Zstd(zstd::Encoder<'static, Sink>),
}

impl TarSink {
    fn name(&self) -> &'static str {
        match self {
            TarSink::Plain(_) => "tar",
            TarSink::Gzip(_) => "tar.gz",
            #[cfg(feature = "zstd-support")]
            TarSink::Zstd(_) => "tar.zst",
        }
    }

    /// Write the compression trailer, if any, and give back the sink
    fn finish(self) -> io::Result<Sink> {
        match self {
            TarSink::Plain(sink) => Ok(sink),
            TarSink::Gzip(encoder) => encoder.finish(),
            #[cfg(feature = "zstd-support")]
            TarSink::Zstd(encoder) => encoder.finish(),
        }
    }
}

impl Write for TarSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TarSink::Plain(sink) => sink.write(buf),
            TarSink::Gzip(encoder) => encoder.write(buf),
            #[cfg(feature = "zstd-support")]
            TarSink::Zstd(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TarSink::Plain(sink) => sink.flush(),
            TarSink::Gzip(encoder) => encoder.flush(),
            #[cfg(feature = "zstd-support")]
            TarSink::Zstd(encoder) => encoder.flush(),
        }
    }
}

/// [`ArchiveWriter`] producing a tar container, optionally compressed
pub struct TarArchiveWriter {
    builder: Option<::tar::Builder<TarSink>>,
    format: &'static str,
    ledger: EntryLedger,
    abort: Option<AbortHandle>,
}

impl TarArchiveWriter {
    fn with_sink(sink: TarSink, options: &WriterOptions) -> Self {
        Self {
            format: sink.name(),
            builder: Some(::tar::Builder::new(sink)),
            ledger: EntryLedger::new(),
            abort: options.abort().cloned(),
        }
    }

    /// Uncompressed tar
    pub fn new(sink: Sink, options: &WriterOptions) -> Self {
        Self::with_sink(TarSink::Plain(sink), options)
    }

    /// gzip-compressed tar at the options' compression level
    pub fn new_gzip(sink: Sink, options: &WriterOptions) -> Self {
        let level = Compression::new(options.compression_level().min(9));
        Self::with_sink(TarSink::Gzip(GzEncoder::new(sink, level)), options)
    }

    /// zstd-compressed tar at the options' compression level
    #[cfg(feature = "zstd-support")]
    pub fn new_zstd(sink: Sink, options: &WriterOptions) -> Result<Self> {
        let encoder = zstd::Encoder::new(sink, options.compression_level() as i32)?;
        Ok(Self::with_sink(TarSink::Zstd(encoder), options))
    }

    fn plain(sink: Sink, options: &WriterOptions) -> Result<Box<dyn ArchiveWriter>> {
        Ok(Box::new(Self::new(sink, options)))
    }

    fn gzip(sink: Sink, options: &WriterOptions) -> Result<Box<dyn ArchiveWriter>> {
        Ok(Box::new(Self::new_gzip(sink, options)))
    }

    #[cfg(feature = "zstd-support")]
    fn zstd(sink: Sink, options: &WriterOptions) -> Result<Box<dyn ArchiveWriter>> {
        Ok(Box::new(Self::new_zstd(sink, options)?))
    }

    fn write_entry(
        &mut self,
        name: &EntryName,
        content: &mut dyn Read,
    ) -> Result<u64> {
        let builder = self.builder.as_mut().ok_or(ArchiveError::Closed)?;

        let mut spool = SpooledTempFile::new(SPOOL_THRESHOLD);
        let copied = copy_entry(content, self.abort.as_ref(), |chunk| {
            spool.write_all(chunk)?;
            Ok(())
        })?;
        spool.seek(SeekFrom::Start(0))?;

        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(copied);
        header.set_mode(0o644);
        header.set_mtime(0);
        builder.append_data(&mut header, name.as_str(), &mut spool)?;
        Ok(copied)
    }
}

impl ArchiveWriter for TarArchiveWriter {
    fn add_entry_sized(
        &mut self,
        name: &str,
        _size_hint: Option<u64>,
        content: &mut dyn Read,
    ) -> Result<u64> {
        // The staged length is authoritative, so the hint is not needed
        let name = self.ledger.admit(name)?;
        let result = self.write_entry(&name, content);
        let copied = self.ledger.track(result)?;
        tracing::debug!(format = self.format, entry = %name, bytes = copied, "tar entry written");
        self.ledger.record(name);
        Ok(copied)
    }

    fn close(&mut self) -> Result<()> {
        let closing = self.ledger.begin_close();
        let builder = self.builder.take();
        closing?;

        let builder = builder.ok_or(ArchiveError::Closed)?;
        let mut sink = builder.into_inner()?.finish()?;
        sink.flush()?;
        tracing::info!(format = self.format, entries = self.ledger.len(), "archive finalized");
        Ok(())
    }

    fn entry_count(&self) -> usize {
        self.ledger.len()
    }
}

impl Drop for TarArchiveWriter {
    fn drop(&mut self) {
        if self.ledger.state() != WriterState::Closed {
            tracing::warn!(
                format = self.format,
                entries = self.ledger.len(),
                "archive writer dropped without close, output is incomplete"
            );
        }
    }
}

/// [`ArchiveReader`] over a tar container, in stream order
pub struct TarArchiveReader {
    source: Option<Box<dyn Read + Send>>,
    /// Unread content bytes of the current entry
    remaining: u64,
    /// Zero padding after the current entry's content
    padding: u64,
    finished: bool,
}

impl TarArchiveReader {
    /// Read a tar stream from `source`
    pub fn new(source: Box<dyn Read + Send>) -> Self {
        Self {
            source: Some(source),
            remaining: 0,
            padding: 0,
            finished: false,
        }
    }

    fn plain(source: Source) -> Result<Box<dyn ArchiveReader>> {
        Ok(Box::new(Self::new(Box::new(source))))
    }

    fn gzip(source: Source) -> Result<Box<dyn ArchiveReader>> {
        Ok(Box::new(Self::new(Box::new(GzDecoder::new(source)))))
    }

    #[cfg(feature = "zstd-support")]
    fn zstd(source: Source) -> Result<Box<dyn ArchiveReader>> {
        let decoder = zstd::Decoder::new(source)?;
        Ok(Box::new(Self::new(Box::new(decoder))))
    }
}

impl ArchiveReader for TarArchiveReader {
    fn next_entry(&mut self) -> Result<Option<ArchiveEntry<'_>>> {
        let source = self.source.as_mut().ok_or(ArchiveError::Closed)?;
        if self.finished {
            return Ok(None);
        }

        skip_exact(source, self.remaining + self.padding, "entry data")?;
        self.remaining = 0;
        self.padding = 0;

        let mut long_name: Option<Vec<u8>> = None;
        let mut block = [0u8; BLOCK_SIZE as usize];
        loop {
            if !read_block(source, &mut block)? {
                return Err(ArchiveError::corrupt("tar stream ends without end-of-archive blocks"));
            }
            if block.iter().all(|&b| b == 0) {
                self.finished = true;
                return Ok(None);
            }

            let header = Header::from_byte_slice(&block);
            verify_checksum(header)?;
            let size = header
                .entry_size()
                .map_err(|e| ArchiveError::corrupt(format!("bad tar entry size: {}", e)))?;
            let padding = padded_len(size)? - size;

            match header.entry_type() {
                EntryType::Regular | EntryType::Continuous => {
                    let raw_name = match long_name.take() {
                        Some(name) => name,
                        None => header.path_bytes().into_owned(),
                    };
                    let name = String::from_utf8(raw_name)
                        .map_err(|_| ArchiveError::corrupt("tar entry name is not valid UTF-8"))?;
                    let name = EntryName::new(name)?;

                    self.remaining = size;
                    self.padding = padding;
                    let body = EntryBody {
                        source,
                        remaining: &mut self.remaining,
                    };
                    return Ok(Some(ArchiveEntry::new(name, Some(size), Box::new(body))));
                }
                EntryType::GNULongName => {
                    let mut name = read_metadata(source, size, "GNU long name")?;
                    while name.last() == Some(&0) {
                        name.pop();
                    }
                    long_name = Some(name);
                    skip_exact(source, padding, "GNU long name")?;
                }
                EntryType::XHeader => {
                    let records = read_metadata(source, size, "PAX header")?;
                    if let Some(path) = pax_path(&records)? {
                        long_name = Some(path);
                    }
                    skip_exact(source, padding, "PAX header")?;
                }
                other => {
                    tracing::debug!(entry_type = ?other, "skipping non-file tar entry");
                    long_name = None;
                    let skipped = size
                        .checked_add(padding)
                        .ok_or_else(|| ArchiveError::corrupt("tar entry size out of range"))?;
                    skip_exact(source, skipped, "skipped entry")?;
                }
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.source.take().map(drop).ok_or(ArchiveError::Closed)
    }
}

/// Content stream of the current tar entry
struct EntryBody<'a> {
    source: &'a mut Box<dyn Read + Send>,
    remaining: &'a mut u64,
}

impl Read for EntryBody<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if *self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = (buf.len() as u64).min(*self.remaining) as usize;
        let n = self.source.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "tar entry truncated",
            ));
        }
        *self.remaining -= n as u64;
        Ok(n)
    }
}

/// `size` rounded up to whole blocks
fn padded_len(size: u64) -> Result<u64> {
    size.div_ceil(BLOCK_SIZE)
        .checked_mul(BLOCK_SIZE)
        .ok_or_else(|| ArchiveError::corrupt("tar entry size out of range"))
}

/// Fill `block`; `false` on a clean end of stream before the first byte
fn read_block(source: &mut dyn Read, block: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < block.len() {
        match source.read(&mut block[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(ArchiveError::corrupt("truncated tar header")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn skip_exact(source: &mut dyn Read, len: u64, what: &str) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    let skipped = io::copy(&mut source.take(len), &mut io::sink())?;
    if skipped < len {
        return Err(ArchiveError::corrupt(format!("truncated tar {}", what)));
    }
    Ok(())
}

fn read_metadata(source: &mut dyn Read, size: u64, what: &str) -> Result<Vec<u8>> {
    if size > MAX_METADATA_SIZE {
        return Err(ArchiveError::corrupt(format!("{} of {} bytes", what, size)));
    }
    let mut data = vec![0u8; size as usize];
    source
        .read_exact(&mut data)
        .map_err(|e| ArchiveError::from_structure_io(e, what))?;
    Ok(data)
}

fn verify_checksum(header: &Header) -> Result<()> {
    let stored = header
        .cksum()
        .map_err(|e| ArchiveError::corrupt(format!("bad tar header checksum field: {}", e)))?;
    // The checksum field itself counts as eight spaces
    let computed: u32 = header
        .as_bytes()
        .iter()
        .enumerate()
        .map(|(i, &b)| u32::from(if (148..156).contains(&i) { b' ' } else { b }))
        .sum();
    if stored != computed {
        return Err(ArchiveError::corrupt(format!(
            "tar header checksum mismatch: stored {}, computed {}",
            stored, computed
        )));
    }
    Ok(())
}

/// Value of the `path` key in a PAX extended header, if present
fn pax_path(records: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut path = None;
    for extension in PaxExtensions::new(records) {
        let extension =
            extension.map_err(|e| ArchiveError::corrupt(format!("bad PAX header: {}", e)))?;
        if extension.key_bytes() == b"path" {
            path = Some(extension.value_bytes().to_vec());
        }
    }
    Ok(path)
}
