//! # backup-archive: Format-Agnostic Streaming Backup Archives
//!
//! `backup-archive` writes backup containers without caring which container
//! format ends up on disk. Callers hand over a sink and a sequence of
//! `(name, reader)` pairs; a writer chosen at runtime by format identifier
//! streams them into a ZIP or tar container.
//!
//! ## Features
//!
//! - **Pluggable formats**: `zip`, `tar`, `tar.gz`/`tgz`, and `tar.zst`
//!   (with `zstd-support`), selected through a registry
//! - **Streaming Write**: entries are copied chunk by chunk, never loaded whole
//! - **Any Sink**: writers need only `Write`, so files, buffers and pipes all work
//! - **Strict Contract**: validated names, duplicate detection, and a writer
//!   that refuses further work after any I/O fault
//! - **Verification**: readers walk containers in order, with CRC checks on ZIP
//!
//! ## Quick Start
//!
//! ### Writing an archive
//!
//! ```no_run
//! use backup_archive::ArchiveFactory;
//! use std::fs::File;
//!
//! let factory = ArchiveFactory::global();
//! let mut writer = factory.create_writer("zip", Box::new(File::create("backup.zip")?))?;
//!
//! writer.add_entry("a.txt", &mut &b"hello"[..])?;
//! writer.add_entry("dir/b.txt", &mut File::open("/etc/hostname")?)?;
//!
//! writer.close()?;
//! # Ok::<(), backup_archive::ArchiveError>(())
//! ```
//!
//! ### Reading it back
//!
//! ```no_run
//! use backup_archive::ArchiveFactory;
//! use std::path::Path;
//!
//! let mut reader = ArchiveFactory::global().open_file_reader(Path::new("backup.zip"))?;
//! while let Some(mut entry) = reader.next_entry()? {
//!     let data = entry.read_to_vec()?;
//!     println!("{}: {} bytes", entry.name(), data.len());
//! }
//! reader.close()?;
//! # Ok::<(), backup_archive::ArchiveError>(())
//! ```
//!
//! ### Writing to memory
//!
//! ```
//! use backup_archive::{read_all_entries, ArchiveFactory};
//! use std::io::Cursor;
//! use std::sync::{Arc, Mutex};
//!
//! # use std::io::Write;
//! # #[derive(Clone, Default)]
//! # struct Shared(Arc<Mutex<Vec<u8>>>);
//! # impl Write for Shared {
//! #     fn write(&mut self, b: &[u8]) -> std::io::Result<usize> { self.0.lock().unwrap().write(b) }
//! #     fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
//! # }
//! let buffer = Shared::default();
//! let factory = ArchiveFactory::global();
//!
//! let mut writer = factory.create_writer("tar", Box::new(buffer.clone()))?;
//! writer.add_entry("notes.txt", &mut &b"in memory"[..])?;
//! writer.close()?;
//!
//! let bytes = buffer.0.lock().unwrap().clone();
//! let mut reader = factory.create_reader("tar", Box::new(Cursor::new(bytes)))?;
//! let entries = read_all_entries(&mut *reader)?;
//! assert_eq!(entries[0].1, b"in memory");
//! # Ok::<(), backup_archive::ArchiveError>(())
//! ```

pub mod copy;
pub mod entry;
pub mod error;
pub mod formats;
pub mod reader;
pub mod registry;
pub mod writer;

pub use copy::AbortHandle;
pub use entry::EntryName;
pub use error::{ArchiveError, Result};
pub use formats::tar::{TarArchiveReader, TarArchiveWriter};
pub use formats::zip::{ZipArchiveReader, ZipArchiveWriter, ZipDecoder, ZipEncoder, ZipEntry};
pub use reader::{read_all_entries, ArchiveEntry, ArchiveReader, ReadSeek, Source};
pub use registry::{
    ArchiveFactory, FormatDescriptor, FormatRegistry, ReaderConstructor, WriterConstructor,
};
pub use writer::{
    write_entries, ArchiveWriter, CompressionMethod, EntryLedger, Sink, WriterOptions,
    WriterState, DEFAULT_COMPRESSION_LEVEL,
};
