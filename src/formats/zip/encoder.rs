//! Streaming ZIP encoder that compresses entries on-the-fly
//!
//! Every entry is written as a local header with the data-descriptor flag
//! set, followed by the compressed bytes and a data descriptor carrying the
//! CRC and sizes. Nothing is ever rewritten, so the output only needs
//! `Write`: offsets for the central directory are tracked by counting bytes.

use super::{
    CENTRAL_DIRECTORY_SIGNATURE, DATA_DESCRIPTOR_SIGNATURE, DOS_DATE_1980, DOS_TIME_MIDNIGHT,
    END_OF_CENTRAL_DIRECTORY_SIGNATURE, FLAG_DATA_DESCRIPTOR, FLAG_UTF8, LOCAL_FILE_HEADER_SIGNATURE,
    METHOD_DEFLATE, METHOD_STORED, ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE,
    ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE, ZIP64_EXTRA_FIELD_ID,
};
#[cfg(feature = "zstd-support")]
use super::METHOD_ZSTD;
use crate::error::{ArchiveError, Result};
use crate::writer::CompressionMethod;
use crc32fast::Hasher as Crc32;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, Write};

impl CompressionMethod {
    pub(crate) fn to_zip_method(self) -> u16 {
        match self {
            CompressionMethod::Stored => METHOD_STORED,
            CompressionMethod::Deflate => METHOD_DEFLATE,
            #[cfg(feature = "zstd-support")]
            CompressionMethod::Zstd => METHOD_ZSTD,
        }
    }
}

/// Minimum reader version for an entry: 2.0 for stored/deflate, 4.5 with
/// ZIP64 fields, 6.3 for Zstd
fn version_needed(method: u16, zip64: bool) -> u16 {
    #[cfg(feature = "zstd-support")]
    if method == METHOD_ZSTD {
        return 63;
    }
    let _ = method;
    if zip64 {
        45
    } else {
        20
    }
}

/// Finished entry, remembered for the central directory
struct EntryRecord {
    name: String,
    local_header_offset: u64,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    compression_method: u16,
}

/// Output wrapper that tracks the absolute write position
struct CountingWriter<W: Write> {
    inner: W,
    position: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Streaming ZIP encoder over any `Write`
pub struct ZipEncoder<W: Write> {
    output: CountingWriter<W>,
    entries: Vec<EntryRecord>,
    current_entry: Option<CurrentEntry>,
    compression_level: u32,
    compression_method: CompressionMethod,
}

struct CurrentEntry {
    name: String,
    local_header_offset: u64,
    encoder: Box<dyn CompressorWrite>,
    counter: CrcCounter,
    compression_method: u16,
}

trait CompressorWrite: Write + Send {
    fn finish_compression(self: Box<Self>) -> Result<CompressedBuffer>;
    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer;
}

struct StoredCompressor {
    buffer: CompressedBuffer,
}

impl Write for StoredCompressor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CompressorWrite for StoredCompressor {
    fn finish_compression(self: Box<Self>) -> Result<CompressedBuffer> {
        Ok(self.buffer)
    }

    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer {
        &mut self.buffer
    }
}

struct DeflateCompressor {
    encoder: DeflateEncoder<CompressedBuffer>,
}

impl Write for DeflateCompressor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

impl CompressorWrite for DeflateCompressor {
    fn finish_compression(self: Box<Self>) -> Result<CompressedBuffer> {
        Ok(self.encoder.finish()?)
    }

    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer {
        self.encoder.get_mut()
    }
}

#[cfg(feature = "zstd-support")]
struct ZstdCompressor {
    encoder: zstd::Encoder<'static, CompressedBuffer>,
}

#[cfg(feature = "zstd-support")]
impl Write for ZstdCompressor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

#[cfg(feature = "zstd-support")]
impl CompressorWrite for ZstdCompressor {
    fn finish_compression(self: Box<Self>) -> Result<CompressedBuffer> {
        Ok(self.encoder.finish()?)
    }

    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer {
        self.encoder.get_mut()
    }
}

/// Metadata tracker for CRC and byte counts
struct CrcCounter {
    crc: Crc32,
    uncompressed_count: u64,
    compressed_count: u64,
}

impl CrcCounter {
    fn new() -> Self {
        Self {
            crc: Crc32::new(),
            uncompressed_count: 0,
            compressed_count: 0,
        }
    }

    fn update_uncompressed(&mut self, data: &[u8]) {
        self.crc.update(data);
        self.uncompressed_count += data.len() as u64;
    }

    fn add_compressed(&mut self, count: u64) {
        self.compressed_count += count;
    }

    fn finalize(&self) -> u32 {
        self.crc.clone().finalize()
    }
}

/// Buffered writer for compressed data with adaptive sizing
///
/// Initial capacity and flush threshold follow the expected entry size so
/// small entries stay cheap and large ones avoid frequent small writes.
struct CompressedBuffer {
    buffer: Vec<u8>,
    flush_threshold: usize,
}

impl CompressedBuffer {
    /// - Tiny entries (<10KB): 8KB initial, 256KB threshold
    /// - Small entries (<100KB): 32KB initial, 512KB threshold
    /// - Medium entries (<1MB): 128KB initial, 2MB threshold
    /// - Large entries (<10MB): 256KB initial, 4MB threshold
    /// - Unknown or larger: 512KB initial, 8MB threshold
    fn with_size_hint(size_hint: Option<u64>) -> Self {
        let (initial_capacity, flush_threshold) = match size_hint {
            Some(size) if size < 10_000 => (8 * 1024, 256 * 1024),
            Some(size) if size < 100_000 => (32 * 1024, 512 * 1024),
            Some(size) if size < 1_000_000 => (128 * 1024, 2 * 1024 * 1024),
            Some(size) if size < 10_000_000 => (256 * 1024, 4 * 1024 * 1024),
            _ => (512 * 1024, 8 * 1024 * 1024),
        };

        Self {
            buffer: Vec::with_capacity(initial_capacity),
            flush_threshold,
        }
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    fn should_flush(&self) -> bool {
        self.buffer.len() >= self.flush_threshold
    }
}

impl Write for CompressedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write> ZipEncoder<W> {
    /// Create an encoder with default compression level (6) using DEFLATE
    pub fn new(writer: W) -> Self {
        Self::with_method(writer, CompressionMethod::Deflate, 6)
    }

    /// Create an encoder with specified compression method and level
    ///
    /// # Arguments
    /// * `writer` - Any writer; seeking is never needed
    /// * `method` - Compression method to use (Stored, Deflate or Zstd)
    /// * `compression_level` - Compression level (0-9 for DEFLATE, 1-21 for Zstd)
    pub fn with_method(writer: W, method: CompressionMethod, compression_level: u32) -> Self {
        Self {
            output: CountingWriter {
                inner: writer,
                position: 0,
            },
            entries: Vec::new(),
            current_entry: None,
            compression_level,
            compression_method: method,
        }
    }

    /// Number of finished entries
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Bytes written to the output so far
    pub fn bytes_written(&self) -> u64 {
        self.output.position
    }

    /// Start a new entry, finishing the previous one if it is still open
    ///
    /// `size_hint` is the expected uncompressed size; it only tunes buffering.
    pub fn start_entry(&mut self, name: &str, size_hint: Option<u64>) -> Result<()> {
        self.finish_entry()?;

        if name.len() > u16::MAX as usize {
            return Err(ArchiveError::invalid_name(name, "name longer than 65535 bytes"));
        }

        let local_header_offset = self.output.position;
        let compression_method = self.compression_method.to_zip_method();

        let encoder: Box<dyn CompressorWrite> = match self.compression_method {
            CompressionMethod::Stored => Box::new(StoredCompressor {
                buffer: CompressedBuffer::with_size_hint(size_hint),
            }),
            CompressionMethod::Deflate => Box::new(DeflateCompressor {
                encoder: DeflateEncoder::new(
                    CompressedBuffer::with_size_hint(size_hint),
                    Compression::new(self.compression_level.min(9)),
                ),
            }),
            #[cfg(feature = "zstd-support")]
            CompressionMethod::Zstd => {
                let mut encoder = zstd::Encoder::new(
                    CompressedBuffer::with_size_hint(size_hint),
                    self.compression_level as i32,
                )?;
                encoder.include_checksum(false)?; // ZIP uses CRC32, not zstd checksum
                Box::new(ZstdCompressor { encoder })
            }
        };

        // Local file header; CRC and sizes follow in the data descriptor
        let out = &mut self.output;
        out.write_all(&LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes())?;
        out.write_all(&version_needed(compression_method, false).to_le_bytes())?;
        out.write_all(&(FLAG_DATA_DESCRIPTOR | FLAG_UTF8).to_le_bytes())?;
        out.write_all(&compression_method.to_le_bytes())?;
        out.write_all(&DOS_TIME_MIDNIGHT.to_le_bytes())?;
        out.write_all(&DOS_DATE_1980.to_le_bytes())?;
        out.write_all(&0u32.to_le_bytes())?; // crc32 placeholder
        out.write_all(&0u32.to_le_bytes())?; // compressed size placeholder
        out.write_all(&0u32.to_le_bytes())?; // uncompressed size placeholder
        out.write_all(&(name.len() as u16).to_le_bytes())?;
        out.write_all(&0u16.to_le_bytes())?; // extra len
        out.write_all(name.as_bytes())?;

        self.current_entry = Some(CurrentEntry {
            name: name.to_string(),
            local_header_offset,
            encoder,
            counter: CrcCounter::new(),
            compression_method,
        });

        Ok(())
    }

    /// Write uncompressed data to the current entry
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let entry = self
            .current_entry
            .as_mut()
            .ok_or_else(|| ArchiveError::corrupt("no entry started"))?;

        entry.counter.update_uncompressed(data);
        entry.encoder.write_all(data)?;

        // Hand compressed bytes to the output once enough have accumulated
        let buffer = entry.encoder.get_buffer_mut();
        if buffer.should_flush() {
            let compressed_data = buffer.take();
            self.output.write_all(&compressed_data)?;
            entry.counter.add_compressed(compressed_data.len() as u64);
        }

        Ok(())
    }

    /// Finish the current entry and write its data descriptor
    ///
    /// Does nothing when no entry is open.
    pub fn finish_entry(&mut self) -> Result<()> {
        let Some(mut entry) = self.current_entry.take() else {
            return Ok(());
        };

        let mut buffer = entry.encoder.finish_compression()?;
        let remaining_data = buffer.take();
        if !remaining_data.is_empty() {
            self.output.write_all(&remaining_data)?;
            entry.counter.add_compressed(remaining_data.len() as u64);
        }

        let crc = entry.counter.finalize();
        let compressed_size = entry.counter.compressed_count;
        let uncompressed_size = entry.counter.uncompressed_count;

        self.output.write_all(&DATA_DESCRIPTOR_SIGNATURE.to_le_bytes())?;
        self.output.write_all(&crc.to_le_bytes())?;
        // ZIP64 data descriptor carries 64-bit sizes
        if compressed_size >= u32::MAX as u64 || uncompressed_size >= u32::MAX as u64 {
            self.output.write_all(&compressed_size.to_le_bytes())?;
            self.output.write_all(&uncompressed_size.to_le_bytes())?;
        } else {
            self.output
                .write_all(&(compressed_size as u32).to_le_bytes())?;
            self.output
                .write_all(&(uncompressed_size as u32).to_le_bytes())?;
        }

        self.entries.push(EntryRecord {
            name: entry.name,
            local_header_offset: entry.local_header_offset,
            crc32: crc,
            compressed_size,
            uncompressed_size,
            compression_method: entry.compression_method,
        });
        Ok(())
    }

    /// Finish the archive (write central directory and return the writer)
    pub fn finish(mut self) -> Result<W> {
        self.finish_entry()?;

        let central_dir_offset = self.output.position;

        for entry in &self.entries {
            Self::write_central_directory_header(&mut self.output, entry)?;
        }

        let central_dir_size = self.output.position - central_dir_offset;

        let need_zip64 = self.entries.len() >= u16::MAX as usize
            || central_dir_size >= u32::MAX as u64
            || central_dir_offset >= u32::MAX as u64;

        if need_zip64 {
            self.write_zip64_end_records(central_dir_offset, central_dir_size)?;
        }

        let out = &mut self.output;
        out.write_all(&END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes())?;
        out.write_all(&0u16.to_le_bytes())?; // disk number
        out.write_all(&0u16.to_le_bytes())?; // disk with central dir

        let entry_count = if self.entries.len() >= u16::MAX as usize {
            u16::MAX
        } else {
            self.entries.len() as u16
        };
        out.write_all(&entry_count.to_le_bytes())?; // entries on this disk
        out.write_all(&entry_count.to_le_bytes())?; // total entries
        out.write_all(&clamp_u32(central_dir_size).to_le_bytes())?;
        out.write_all(&clamp_u32(central_dir_offset).to_le_bytes())?;
        out.write_all(&0u16.to_le_bytes())?; // comment len

        out.flush()?;
        Ok(self.output.inner)
    }

    fn write_central_directory_header(
        out: &mut CountingWriter<W>,
        entry: &EntryRecord,
    ) -> Result<()> {
        // ZIP64 extra field holds the values whose 32-bit slots overflow, in
        // fixed order: uncompressed size, compressed size, header offset
        let mut zip64_data: Vec<u8> = Vec::new();
        if entry.uncompressed_size >= u32::MAX as u64 {
            zip64_data.extend_from_slice(&entry.uncompressed_size.to_le_bytes());
        }
        if entry.compressed_size >= u32::MAX as u64 {
            zip64_data.extend_from_slice(&entry.compressed_size.to_le_bytes());
        }
        if entry.local_header_offset >= u32::MAX as u64 {
            zip64_data.extend_from_slice(&entry.local_header_offset.to_le_bytes());
        }
        let mut extra_field: Vec<u8> = Vec::new();
        if !zip64_data.is_empty() {
            extra_field.extend_from_slice(&ZIP64_EXTRA_FIELD_ID.to_le_bytes());
            extra_field.extend_from_slice(&(zip64_data.len() as u16).to_le_bytes());
            extra_field.extend_from_slice(&zip64_data);
        }
        let version = version_needed(entry.compression_method, !zip64_data.is_empty());

        out.write_all(&CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes())?;
        out.write_all(&version.to_le_bytes())?; // version made by
        out.write_all(&version.to_le_bytes())?; // version needed
        out.write_all(&(FLAG_DATA_DESCRIPTOR | FLAG_UTF8).to_le_bytes())?;
        out.write_all(&entry.compression_method.to_le_bytes())?;
        out.write_all(&DOS_TIME_MIDNIGHT.to_le_bytes())?;
        out.write_all(&DOS_DATE_1980.to_le_bytes())?;
        out.write_all(&entry.crc32.to_le_bytes())?;
        out.write_all(&clamp_u32(entry.compressed_size).to_le_bytes())?;
        out.write_all(&clamp_u32(entry.uncompressed_size).to_le_bytes())?;
        out.write_all(&(entry.name.len() as u16).to_le_bytes())?;
        out.write_all(&(extra_field.len() as u16).to_le_bytes())?;
        out.write_all(&0u16.to_le_bytes())?; // file comment len
        out.write_all(&0u16.to_le_bytes())?; // disk number start
        out.write_all(&0u16.to_le_bytes())?; // internal attrs
        out.write_all(&0u32.to_le_bytes())?; // external attrs
        out.write_all(&clamp_u32(entry.local_header_offset).to_le_bytes())?;
        out.write_all(entry.name.as_bytes())?;
        out.write_all(&extra_field)?;
        Ok(())
    }

    fn write_zip64_end_records(&mut self, central_dir_offset: u64, central_dir_size: u64) -> Result<()> {
        let zip64_eocd_offset = self.output.position;
        let entry_count = self.entries.len() as u64;
        let out = &mut self.output;

        out.write_all(&ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes())?;
        // size of the remaining record: versions(4) + disks(8) + counts(16) + cd size/offset(16)
        out.write_all(&44u64.to_le_bytes())?;
        out.write_all(&45u16.to_le_bytes())?; // version made by
        out.write_all(&45u16.to_le_bytes())?; // version needed
        out.write_all(&0u32.to_le_bytes())?; // disk number
        out.write_all(&0u32.to_le_bytes())?; // disk where central dir starts
        out.write_all(&entry_count.to_le_bytes())?; // entries on this disk
        out.write_all(&entry_count.to_le_bytes())?; // total entries
        out.write_all(&central_dir_size.to_le_bytes())?;
        out.write_all(&central_dir_offset.to_le_bytes())?;

        out.write_all(&ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE.to_le_bytes())?;
        out.write_all(&0u32.to_le_bytes())?; // disk with ZIP64 EOCD
        out.write_all(&zip64_eocd_offset.to_le_bytes())?;
        out.write_all(&1u32.to_le_bytes())?; // total number of disks
        Ok(())
    }
}

/// 32-bit field value, or the ZIP64 placeholder when it does not fit
fn clamp_u32(value: u64) -> u32 {
    if value >= u32::MAX as u64 {
        u32::MAX
    } else {
        value as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_archive_is_a_bare_eocd() {
        let bytes = ZipEncoder::new(Vec::new()).finish().unwrap();
        assert_eq!(bytes.len(), 22);
        assert_eq!(&bytes[..4], &[0x50, 0x4b, 0x05, 0x06]);
    }

    #[test]
    fn stored_entry_layout() {
        let mut zip = ZipEncoder::with_method(Vec::new(), CompressionMethod::Stored, 0);
        zip.start_entry("a.txt", Some(5)).unwrap();
        zip.write_data(b"hello").unwrap();
        zip.finish_entry().unwrap();
        assert_eq!(zip.entry_count(), 1);
        let bytes = zip.finish().unwrap();

        // local header is 30 bytes + name, then the raw content
        assert_eq!(&bytes[..4], &LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes());
        assert_eq!(&bytes[30..35], b"a.txt");
        assert_eq!(&bytes[35..40], b"hello");
        // data descriptor: signature, crc, sizes
        assert_eq!(&bytes[40..44], &DATA_DESCRIPTOR_SIGNATURE.to_le_bytes());
        assert_eq!(&bytes[44..48], &crc32fast::hash(b"hello").to_le_bytes());
        assert_eq!(&bytes[48..52], &5u32.to_le_bytes());
        assert_eq!(&bytes[52..56], &5u32.to_le_bytes());
        assert_eq!(&bytes[56..60], &CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
    }

    #[test]
    fn write_without_entry_fails() {
        let mut zip = ZipEncoder::new(Vec::new());
        assert!(zip.write_data(b"orphan").is_err());
    }

    #[test]
    fn oversized_name_rejected() {
        let mut zip = ZipEncoder::new(Vec::new());
        let name = "x".repeat(u16::MAX as usize + 1);
        assert!(matches!(
            zip.start_entry(&name, None),
            Err(ArchiveError::InvalidName { .. })
        ));
        assert_eq!(zip.bytes_written(), 0);
    }
}
