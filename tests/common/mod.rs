#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Sink whose bytes stay visible to the test after the writer takes it
#[derive(Clone, Default)]
pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink that raises a flag when it is dropped
pub struct DropFlagSink {
    inner: SharedSink,
    dropped: Arc<AtomicBool>,
}

impl DropFlagSink {
    pub fn new() -> (Self, SharedSink, Arc<AtomicBool>) {
        let inner = SharedSink::default();
        let dropped = Arc::new(AtomicBool::new(false));
        let sink = Self {
            inner: inner.clone(),
            dropped: dropped.clone(),
        };
        (sink, inner, dropped)
    }
}

impl Write for DropFlagSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Drop for DropFlagSink {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

/// Sink that accepts `limit` bytes and then fails every write
pub struct FailingSink {
    pub limit: usize,
    pub written: usize,
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written >= self.limit {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        let n = buf.len().min(self.limit - self.written);
        self.written += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Source that yields `good` bytes and then fails
pub struct FaultingSource {
    pub good: usize,
}

impl Read for FaultingSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.good == 0 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "source went away"));
        }
        let n = buf.len().min(self.good);
        buf[..n].fill(b'x');
        self.good -= n;
        Ok(n)
    }
}

/// Every format compiled into this build
pub fn all_formats() -> Vec<&'static str> {
    let mut formats = vec!["zip", "tar", "tar.gz", "tgz"];
    if cfg!(feature = "zstd-support") {
        formats.push("tar.zst");
    }
    formats
}
