//! Shared byte accounting for a download session.

use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Session-wide tally of bytes received across all workers.
///
/// Only ever grows. Readers see a value consistent with some ordering of
/// the adds, never a torn one.
#[derive(Debug, Default)]
pub struct ByteCounter {
    bytes: AtomicU64,
}

impl ByteCounter {
    /// Create a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add bytes received.
    pub fn add(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Current total.
    pub fn get(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Reader adapter that feeds every chunk into a [`ByteCounter`] as it flows.
///
/// Once the cancellation token fires, the next read fails so the copy loop
/// unwinds and the destination handle is closed.
pub struct CountingReader<'a, R> {
    inner: R,
    counter: &'a ByteCounter,
    cancel: &'a CancellationToken,
}

impl<'a, R: Read> CountingReader<'a, R> {
    pub fn new(inner: R, counter: &'a ByteCounter, cancel: &'a CancellationToken) -> Self {
        Self {
            inner,
            counter,
            cancel,
        }
    }
}

impl<R: Read> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("session cancelled"));
        }
        let n = self.inner.read(buf)?;
        self.counter.add(n as u64);
        Ok(n)
    }
}
