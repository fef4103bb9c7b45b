//! In-memory byte source with call accounting

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{ByteSource, check_read_bounds, closed_source_error};

/// Shared counters for a [`MemoryByteSource`].
///
/// Clones observe the same counters, so a test can keep a handle after moving
/// the source into a reader.
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    reads: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl MemoryStats {
    /// Number of `read_at` calls, successful or not.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `close` calls.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Makes subsequent reads fail with `io::ErrorKind::Other` until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

/// Byte source over an immutable in-memory buffer.
#[derive(Debug)]
pub struct MemoryByteSource {
    data: Arc<[u8]>,
    stats: MemoryStats,
    closed: bool,
}

impl MemoryByteSource {
    /// Wraps `data`.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            stats: MemoryStats::default(),
            closed: false,
        }
    }

    /// Handle to this source's counters.
    pub fn stats(&self) -> MemoryStats {
        self.stats.clone()
    }

    /// Underlying contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

#[async_trait]
impl ByteSource for MemoryByteSource {
    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.stats.reads.fetch_add(1, Ordering::SeqCst);

        if self.closed {
            return Err(closed_source_error());
        }
        if self.stats.failing.load(Ordering::SeqCst) {
            return Err(io::Error::other("simulated read failure"));
        }
        check_read_bounds(offset, buf.len(), self.length())?;

        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_are_counted() {
        let source = MemoryByteSource::new(vec![1u8, 2, 3, 4, 5]);
        let stats = source.stats();

        let mut buf = [0u8; 2];
        source.read_at(3, &mut buf).await.unwrap();

        assert_eq!(buf, [4, 5]);
        assert_eq!(stats.reads(), 1);
    }

    #[tokio::test]
    async fn test_out_of_bounds_read() {
        let source = MemoryByteSource::new(vec![0u8; 4]);

        let mut buf = [0u8; 2];
        let error = source.read_at(3, &mut buf).await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_failing_reads() {
        let source = MemoryByteSource::new(vec![0u8; 4]);
        let stats = source.stats();
        let mut buf = [0u8; 1];

        stats.set_failing(true);
        assert!(source.read_at(0, &mut buf).await.is_err());

        stats.set_failing(false);
        assert!(source.read_at(0, &mut buf).await.is_ok());
    }

    #[tokio::test]
    async fn test_close_is_counted() {
        let mut source = MemoryByteSource::new(vec![0u8; 4]);
        let stats = source.stats();

        source.close().await.unwrap();

        let mut buf = [0u8; 1];
        assert!(source.read_at(0, &mut buf).await.is_err());
        assert_eq!(stats.closes(), 1);
    }
}
