//! Streaming ZIP decoder
//!
//! Reads the central directory once, then decompresses entries on demand
//! straight from the source. Every entry stream verifies its CRC-32 and
//! uncompressed size when it reaches the end.

use super::{
    CENTRAL_DIRECTORY_SIGNATURE, END_OF_CENTRAL_DIRECTORY_SIGNATURE, LOCAL_FILE_HEADER_SIGNATURE,
    METHOD_DEFLATE, METHOD_STORED, ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE,
    ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE, ZIP64_EXTRA_FIELD_ID,
};
#[cfg(feature = "zstd-support")]
use super::METHOD_ZSTD;
use crate::error::{ArchiveError, Result};
use crc32fast::Hasher as Crc32;
use flate2::read::DeflateDecoder;
use std::io::{self, BufReader, Read, Seek, SeekFrom};

/// EOCD is 22 bytes plus a comment of at most 65535 bytes
const EOCD_SEARCH_WINDOW: u64 = 22 + u16::MAX as u64;

/// Entry in the ZIP central directory
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub name: String,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub compression_method: u16,
    pub offset: u64,
}

/// Streaming ZIP decoder over any seekable source
pub struct ZipDecoder<R: Read + Seek> {
    source: BufReader<R>,
    entries: Vec<ZipEntry>,
}

impl<R: Read + Seek> ZipDecoder<R> {
    /// Read the central directory of the archive in `source`
    pub fn new(source: R) -> Result<Self> {
        let mut source = BufReader::new(source);
        let entries = read_central_directory(&mut source)?;
        Ok(ZipDecoder { source, entries })
    }

    /// All entries, in central directory order
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Find an entry by name
    pub fn find_entry(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Read an entry's decompressed data into a vector
    pub fn read_entry(&mut self, entry: &ZipEntry) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(entry.uncompressed_size.min(1 << 24) as usize);
        self.entry_reader(entry)?.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Read an entry by name
    pub fn read_entry_by_name(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find_entry(name)
            .ok_or_else(|| ArchiveError::EntryNotFound(name.to_string()))?
            .clone();

        self.read_entry(&entry)
    }

    /// Get a streaming reader for an entry
    ///
    /// The reader decompresses on-the-fly and fails with `InvalidData` if the
    /// content does not match the recorded CRC-32 or size.
    pub fn entry_reader(&mut self, entry: &ZipEntry) -> Result<Box<dyn Read + '_>> {
        self.seek_to_entry_data(entry)?;

        let limited_reader = (&mut self.source).take(entry.compressed_size);

        let decompressed: Box<dyn Read + '_> = match entry.compression_method {
            METHOD_DEFLATE => Box::new(DeflateDecoder::new(limited_reader)),
            METHOD_STORED => Box::new(limited_reader),
            #[cfg(feature = "zstd-support")]
            METHOD_ZSTD => Box::new(zstd::Decoder::new(limited_reader)?),
            other => return Err(ArchiveError::UnsupportedCompression(other)),
        };

        Ok(Box::new(VerifyingReader {
            inner: decompressed,
            crc: Crc32::new(),
            read: 0,
            expected_crc: entry.crc32,
            expected_size: entry.uncompressed_size,
        }))
    }

    /// Position the source at the first byte of the entry's data
    fn seek_to_entry_data(&mut self, entry: &ZipEntry) -> Result<()> {
        self.source.seek(SeekFrom::Start(entry.offset))?;

        let header = (|| -> io::Result<(u32, u16, u16)> {
            let signature = read_u32_le(&mut self.source)?;
            // version, flags, method, time, date, crc, sizes
            self.source.seek_relative(22)?;
            let filename_len = read_u16_le(&mut self.source)?;
            let extra_len = read_u16_le(&mut self.source)?;
            Ok((signature, filename_len, extra_len))
        })();
        let (signature, filename_len, extra_len) =
            header.map_err(|e| ArchiveError::from_structure_io(e, "local file header"))?;

        if signature != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(ArchiveError::corrupt(format!(
                "invalid local file header signature for {}: 0x{:08x}",
                entry.name, signature
            )));
        }

        self.source
            .seek_relative(filename_len as i64 + extra_len as i64)?;
        Ok(())
    }

    /// Give back the underlying source
    pub fn into_inner(self) -> R {
        self.source.into_inner()
    }
}

/// Checks CRC-32 and size once the wrapped stream is exhausted
struct VerifyingReader<'a> {
    inner: Box<dyn Read + 'a>,
    crc: Crc32,
    read: u64,
    expected_crc: u32,
    expected_size: u64,
}

impl Read for VerifyingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.crc.update(&buf[..n]);
            self.read += n as u64;
            if self.read > self.expected_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "entry is longer than its recorded size",
                ));
            }
        } else if buf.is_empty() {
            return Ok(0);
        } else {
            if self.read != self.expected_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "entry size mismatch: expected {} bytes, got {}",
                        self.expected_size, self.read
                    ),
                ));
            }
            let crc = self.crc.clone().finalize();
            if crc != self.expected_crc {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "CRC-32 mismatch: expected 0x{:08x}, got 0x{:08x}",
                        self.expected_crc, crc
                    ),
                ));
            }
        }
        Ok(n)
    }
}

/// Read the central directory from the archive
fn read_central_directory<R: Read + Seek>(file: &mut R) -> Result<Vec<ZipEntry>> {
    let eocd_offset = find_eocd(file)?;

    file.seek(SeekFrom::Start(eocd_offset))?;
    let eocd = (|| -> io::Result<(u16, u32, u32)> {
        let _signature = read_u32_le(file)?;
        // disk number fields
        file.seek(SeekFrom::Current(4))?;
        let _entries_on_disk = read_u16_le(file)?;
        // These values may be placeholder 0xFFFF/0xFFFFFFFF when ZIP64 is used
        let total_entries = read_u16_le(file)?;
        let cd_size = read_u32_le(file)?;
        let cd_offset = read_u32_le(file)?;
        Ok((total_entries, cd_size, cd_offset))
    })();
    let (total_entries_16, cd_size_32, cd_offset_32) =
        eocd.map_err(|e| ArchiveError::from_structure_io(e, "end of central directory"))?;

    let mut total_entries = total_entries_16 as u64;
    let mut cd_offset = cd_offset_32 as u64;

    if total_entries_16 == 0xFFFF || cd_size_32 == 0xFFFFFFFF || cd_offset_32 == 0xFFFFFFFF {
        let (zip64_total_entries, zip64_cd_offset) = read_zip64_eocd(file, eocd_offset)?;
        total_entries = zip64_total_entries;
        cd_offset = zip64_cd_offset;
    }

    if cd_offset > eocd_offset {
        return Err(ArchiveError::corrupt(format!(
            "central directory offset {} lies past the end record at {}",
            cd_offset, eocd_offset
        )));
    }

    file.seek(SeekFrom::Start(cd_offset))?;

    // Each header is at least 46 bytes, which bounds a sane entry count
    let capacity = total_entries.min((eocd_offset - cd_offset) / 46) as usize;
    let mut entries = Vec::with_capacity(capacity);
    for index in 0..total_entries {
        let entry = read_central_directory_header(file)
            .map_err(|e| match e {
                ArchiveError::Io(io) => ArchiveError::from_structure_io(io, "central directory"),
                other => other,
            })?
            .ok_or_else(|| {
                ArchiveError::corrupt(format!(
                    "central directory ends after {} of {} entries",
                    index, total_entries
                ))
            })?;
        entries.push(entry);
    }

    Ok(entries)
}

/// Read one central directory header; `None` when the signature does not match
fn read_central_directory_header<R: Read + Seek>(file: &mut R) -> Result<Option<ZipEntry>> {
    let signature = read_u32_le(file)?;
    if signature != CENTRAL_DIRECTORY_SIGNATURE {
        return Ok(None);
    }

    // version made by, version needed, flags
    file.seek(SeekFrom::Current(6))?;
    let compression_method = read_u16_le(file)?;
    // modification time and date
    file.seek(SeekFrom::Current(4))?;
    let crc32 = read_u32_le(file)?;

    // Sizes may be 0xFFFFFFFF placeholders meaning ZIP64
    let compressed_size_32 = read_u32_le(file)?;
    let uncompressed_size_32 = read_u32_le(file)?;
    let filename_len = read_u16_le(file)? as usize;
    let extra_len = read_u16_le(file)? as usize;
    let comment_len = read_u16_le(file)? as i64;

    // disk number, internal attributes, external attributes
    file.seek(SeekFrom::Current(8))?;
    let offset_32 = read_u32_le(file)?;

    let mut filename_buf = vec![0u8; filename_len];
    file.read_exact(&mut filename_buf)?;
    let name = String::from_utf8(filename_buf)
        .map_err(|_| ArchiveError::corrupt("entry name is not valid UTF-8"))?;

    let mut extra_buf = vec![0u8; extra_len];
    file.read_exact(&mut extra_buf)?;

    let mut compressed_size = compressed_size_32 as u64;
    let mut uncompressed_size = uncompressed_size_32 as u64;
    let mut offset = offset_32 as u64;

    if compressed_size_32 == 0xFFFFFFFF
        || uncompressed_size_32 == 0xFFFFFFFF
        || offset_32 == 0xFFFFFFFF
    {
        let zip64 = find_extra_field(&extra_buf, ZIP64_EXTRA_FIELD_ID).ok_or_else(|| {
            ArchiveError::corrupt(format!("{}: ZIP64 placeholder without ZIP64 extra field", name))
        })?;
        // Values appear in fixed order, only for the fields that overflowed
        let mut values = zip64.chunks_exact(8).map(le_u64);
        let mut next = |field: &str| {
            values.next().ok_or_else(|| {
                ArchiveError::corrupt(format!("{}: ZIP64 extra field lacks {}", name, field))
            })
        };
        if uncompressed_size_32 == 0xFFFFFFFF {
            uncompressed_size = next("uncompressed size")?;
        }
        if compressed_size_32 == 0xFFFFFFFF {
            compressed_size = next("compressed size")?;
        }
        if offset_32 == 0xFFFFFFFF {
            offset = next("header offset")?;
        }
    }

    file.seek(SeekFrom::Current(comment_len))?;

    Ok(Some(ZipEntry {
        name,
        crc32,
        compressed_size,
        uncompressed_size,
        compression_method,
        offset,
    }))
}

/// Body of the first extra field with the given header id
fn find_extra_field(extra: &[u8], id: u16) -> Option<&[u8]> {
    let mut i = 0usize;
    while i + 4 <= extra.len() {
        let field_id = u16::from_le_bytes([extra[i], extra[i + 1]]);
        let data_len = u16::from_le_bytes([extra[i + 2], extra[i + 3]]) as usize;
        i += 4;
        if i + data_len > extra.len() {
            return None;
        }
        if field_id == id {
            return Some(&extra[i..i + data_len]);
        }
        i += data_len;
    }
    None
}

/// When EOCD indicates ZIP64 usage, read the ZIP64 locator and record.
///
/// Returns (total entries, central directory offset).
fn read_zip64_eocd<R: Read + Seek>(file: &mut R, eocd_offset: u64) -> Result<(u64, u64)> {
    // The locator is 20 bytes and sits directly before the EOCD
    let locator_offset = eocd_offset
        .checked_sub(20)
        .ok_or_else(|| ArchiveError::corrupt("ZIP64 EOCD locator not found"))?;
    file.seek(SeekFrom::Start(locator_offset))?;
    let mut locator = [0u8; 20];
    file.read_exact(&mut locator)
        .map_err(|e| ArchiveError::from_structure_io(e, "ZIP64 EOCD locator"))?;

    if le_u32(&locator[0..4]) != ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE {
        return Err(ArchiveError::corrupt("ZIP64 EOCD locator not found"));
    }
    // signature(4), disk with the ZIP64 EOCD(4), offset of the ZIP64 EOCD(8), total disks(4)
    let zip64_eocd_offset = le_u64(&locator[8..16]);

    file.seek(SeekFrom::Start(zip64_eocd_offset))?;
    let mut record = [0u8; 56];
    file.read_exact(&mut record)
        .map_err(|e| ArchiveError::from_structure_io(e, "ZIP64 end of central directory"))?;

    let sig = le_u32(&record[0..4]);
    if sig != ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE {
        return Err(ArchiveError::corrupt(format!(
            "invalid ZIP64 EOCD signature: 0x{:08x}",
            sig
        )));
    }

    // signature(4) size(8) versions(4) disks(8) entries on disk(8) total entries(8)
    // cd size(8) cd offset(8)
    let total_entries = le_u64(&record[32..40]);
    let cd_offset = le_u64(&record[48..56]);

    Ok((total_entries, cd_offset))
}

/// Find the end of central directory record by scanning from the end of the file
fn find_eocd<R: Read + Seek>(file: &mut R) -> Result<u64> {
    let file_size = file.seek(SeekFrom::End(0))?;

    let search_start = file_size.saturating_sub(EOCD_SEARCH_WINDOW);
    file.seek(SeekFrom::Start(search_start))?;

    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;

    let signature = END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes();
    // The fixed part of the record must fit after the signature
    let last_candidate = buffer.len().saturating_sub(22);
    (0..=last_candidate)
        .rev()
        .find(|&i| buffer.len() >= i + 22 && buffer[i..i + 4] == signature)
        .map(|i| search_start + i as u64)
        .ok_or_else(|| ArchiveError::corrupt("end of central directory not found"))
}

fn read_u16_le<R: Read>(file: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    file.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32_le<R: Read>(file: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
