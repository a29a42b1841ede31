//! Chunked entry copy with cooperative abort

use crate::error::{ArchiveError, Result};
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Size of the buffer used to move bytes from a source into a writer
pub(crate) const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Cloneable flag that interrupts an in-progress entry copy.
///
/// The flag is checked between chunks, so a copy blocked inside a single
/// `read` call stops as soon as that call returns. Once aborted the writer
/// is unusable and must be closed or dropped.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Read `source` until EOF, handing each chunk to `sink`.
///
/// `Interrupted` reads are retried unless the abort flag is set. Returns the
/// number of bytes copied.
pub(crate) fn copy_entry<F>(
    source: &mut dyn Read,
    abort: Option<&AbortHandle>,
    mut sink: F,
) -> Result<u64>
where
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        if abort.is_some_and(AbortHandle::is_aborted) {
            return Err(ArchiveError::Aborted);
        }

        let n = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ArchiveError::Io(e)),
        };

        sink(&buffer[..n])?;
        total += n as u64;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Yields `Interrupted` once before every chunk
    struct Flaky<'a> {
        data: &'a [u8],
        interrupt_next: bool,
    }

    impl Read for Flaky<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.interrupt_next {
                self.interrupt_next = false;
                return Err(io::ErrorKind::Interrupted.into());
            }
            self.interrupt_next = true;
            self.data.read(buf)
        }
    }

    #[test]
    fn copies_everything_and_retries_interrupts() {
        let data = vec![7u8; COPY_BUFFER_SIZE * 2 + 13];
        let mut source = Flaky {
            data: &data,
            interrupt_next: true,
        };
        let mut out = Vec::new();
        let copied = copy_entry(&mut source, None, |chunk| {
            out.extend_from_slice(chunk);
            Ok(())
        })
        .unwrap();
        assert_eq!(copied, data.len() as u64);
        assert_eq!(out, data);
    }

    #[test]
    fn stops_when_aborted() {
        let handle = AbortHandle::new();
        let trigger = handle.clone();
        let data = vec![1u8; COPY_BUFFER_SIZE * 4];
        let mut source = &data[..];
        let mut chunks = 0;
        let err = copy_entry(&mut source, Some(&handle), |_| {
            chunks += 1;
            trigger.abort();
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, ArchiveError::Aborted));
        assert_eq!(chunks, 1);
    }

    #[test]
    fn source_faults_propagate() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            }
        }
        let err = copy_entry(&mut Broken, None, |_| Ok(())).unwrap_err();
        assert!(matches!(err, ArchiveError::Io(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
    }
}
