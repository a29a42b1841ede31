//! Format registry and archive factory
//!
//! A [`FormatRegistry`] maps identifiers such as `"zip"` or `"tar.gz"` to a
//! [`FormatDescriptor`]: the pair of constructors that bind a writer to a
//! sink or a reader to a source. [`ArchiveFactory`] wraps a registry behind a
//! lock and is what callers use to create writers and readers.
//!
//! ## Identifier policy
//!
//! - Lookup is ASCII case-insensitive: identifiers are stored and looked up
//!   in lowercase, so `"ZIP"` and `"zip"` name the same format.
//! - There is no fallback: an unknown identifier is `UnsupportedFormat`.
//! - Registration is append-only: registering an identifier that is already
//!   present fails with `DuplicateFormat` and keeps the existing descriptor.
//!
//! The process-wide factory ([`ArchiveFactory::global`]) is created on first
//! use and seeded with the built-in formats.

use crate::error::{ArchiveError, Result};
use crate::formats;
use crate::reader::{ArchiveReader, Source};
use crate::writer::{ArchiveWriter, Sink, WriterOptions};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Binds a new writer to `sink`
pub type WriterConstructor = fn(Sink, &WriterOptions) -> Result<Box<dyn ArchiveWriter>>;

/// Binds a new reader to `source`
pub type ReaderConstructor = fn(Source) -> Result<Box<dyn ArchiveReader>>;

/// Immutable (identifier, writer constructor, reader constructor) triple
#[derive(Clone, Copy)]
pub struct FormatDescriptor {
    id: &'static str,
    new_writer: WriterConstructor,
    new_reader: ReaderConstructor,
}

impl FormatDescriptor {
    pub const fn new(
        id: &'static str,
        new_writer: WriterConstructor,
        new_reader: ReaderConstructor,
    ) -> Self {
        Self {
            id,
            new_writer,
            new_reader,
        }
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    /// Bind a writer for this format to `sink`
    pub fn create_writer(&self, sink: Sink, options: &WriterOptions) -> Result<Box<dyn ArchiveWriter>> {
        (self.new_writer)(sink, options)
    }

    /// Bind a reader for this format to `source`
    pub fn create_reader(&self, source: Source) -> Result<Box<dyn ArchiveReader>> {
        (self.new_reader)(source)
    }
}

impl fmt::Debug for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatDescriptor")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

fn normalize(id: &str) -> String {
    id.to_ascii_lowercase()
}

/// Table of registered formats
#[derive(Debug, Default)]
pub struct FormatRegistry {
    formats: HashMap<String, FormatDescriptor>,
}

impl FormatRegistry {
    /// Registry with no formats
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry seeded with every built-in format
    pub fn with_builtin_formats() -> Self {
        let mut registry = Self::empty();
        for descriptor in formats::builtin_formats() {
            let registered = registry.register(descriptor);
            debug_assert!(registered.is_ok(), "built-in format clash: {:?}", registered);
        }
        registry
    }

    /// Add a format. Fails with `DuplicateFormat` if the identifier is taken.
    pub fn register(&mut self, descriptor: FormatDescriptor) -> Result<()> {
        let key = normalize(descriptor.id());
        if key.is_empty() {
            return Err(ArchiveError::UnsupportedFormat(String::new()));
        }
        if self.formats.contains_key(&key) {
            return Err(ArchiveError::DuplicateFormat(key));
        }
        tracing::debug!(format = %key, "archive format registered");
        self.formats.insert(key, descriptor);
        Ok(())
    }

    /// Look up the descriptor registered under `id`
    pub fn for_format(&self, id: &str) -> Result<FormatDescriptor> {
        self.formats
            .get(&normalize(id))
            .copied()
            .ok_or_else(|| ArchiveError::UnsupportedFormat(id.to_string()))
    }

    /// Resolve a format from a file name by its longest registered suffix.
    ///
    /// `backup.tar.gz` tries `tar.gz`, then `gz`.
    pub fn format_for_path(&self, path: &Path) -> Result<FormatDescriptor> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ArchiveError::UnsupportedFormat(path.display().to_string()))?;

        file_name
            .match_indices('.')
            .filter(|&(i, _)| i > 0)
            .find_map(|(i, _)| self.formats.get(&normalize(&file_name[i + 1..])))
            .copied()
            .ok_or_else(|| ArchiveError::UnsupportedFormat(path.display().to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.formats.contains_key(&normalize(id))
    }

    /// Registered identifiers in their normalized lowercase form, sorted
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.formats.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }
}

static GLOBAL_FACTORY: Lazy<ArchiveFactory> =
    Lazy::new(|| ArchiveFactory::new(FormatRegistry::with_builtin_formats()));

/// Creates writers and readers for registered formats
///
/// Cloning is cheap and clones share the registry.
#[derive(Debug, Clone)]
pub struct ArchiveFactory {
    registry: Arc<RwLock<FormatRegistry>>,
}

impl ArchiveFactory {
    /// Factory over its own registry
    pub fn new(registry: FormatRegistry) -> Self {
        Self {
            registry: Arc::new(RwLock::new(registry)),
        }
    }

    /// The process-wide factory, seeded with the built-in formats
    pub fn global() -> &'static ArchiveFactory {
        &GLOBAL_FACTORY
    }

    /// Add a format; see [`FormatRegistry::register`]
    pub fn register(&self, descriptor: FormatDescriptor) -> Result<()> {
        self.registry.write().register(descriptor)
    }

    pub fn for_format(&self, id: &str) -> Result<FormatDescriptor> {
        self.registry.read().for_format(id)
    }

    pub fn format_for_path(&self, path: &Path) -> Result<FormatDescriptor> {
        self.registry.read().format_for_path(path)
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.registry.read().identifiers()
    }

    /// Writer for `id` bound to `sink`, with default options
    pub fn create_writer(&self, id: &str, sink: Sink) -> Result<Box<dyn ArchiveWriter>> {
        self.create_writer_with(id, sink, &WriterOptions::default())
    }

    /// Writer for `id` bound to `sink`
    ///
    /// The format is resolved before `sink` is touched; an unsupported
    /// identifier drops the sink unwritten.
    pub fn create_writer_with(
        &self,
        id: &str,
        sink: Sink,
        options: &WriterOptions,
    ) -> Result<Box<dyn ArchiveWriter>> {
        let descriptor = self.for_format(id)?;
        descriptor.create_writer(sink, options)
    }

    /// Reader for `id` bound to `source`
    pub fn create_reader(&self, id: &str, source: Source) -> Result<Box<dyn ArchiveReader>> {
        let descriptor = self.for_format(id)?;
        descriptor.create_reader(source)
    }

    /// Create the file at `path` and bind a writer chosen by its extension.
    ///
    /// No file is created when the extension is not registered.
    pub fn create_file_writer(
        &self,
        path: &Path,
        options: &WriterOptions,
    ) -> Result<Box<dyn ArchiveWriter>> {
        let descriptor = self.format_for_path(path)?;
        let file = File::create(path)?;
        tracing::debug!(path = %path.display(), format = descriptor.id(), "creating archive");
        descriptor.create_writer(Box::new(std::io::BufWriter::new(file)), options)
    }

    /// Open the file at `path` and bind a reader chosen by its extension
    pub fn open_file_reader(&self, path: &Path) -> Result<Box<dyn ArchiveReader>> {
        let descriptor = self.format_for_path(path)?;
        let file = File::open(path)?;
        descriptor.create_reader(Box::new(file))
    }
}
