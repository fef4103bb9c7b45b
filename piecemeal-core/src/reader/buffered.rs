//! Generic buffered random-access reader
//!
//! Turns arbitrarily sized, arbitrarily positioned reads into a few bulk window
//! fills plus memory copies. Choosing and filling a window is delegated to a
//! [`WindowFill`] implementation.

use std::ops::Range;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use super::{ReaderError, ReaderResult};

/// Refill hook supplied by a reader specialization.
#[async_trait]
pub trait WindowFill: Send {
    /// Produces a new buffer window containing `position`.
    ///
    /// Implementations resize `buf` to the window length and fill it with the
    /// window's bytes. `position` is always below `file_length`.
    ///
    /// # Errors
    ///
    /// Any failure locating, waiting for, or reading the window. The caller
    /// discards `buf` on error.
    async fn fill(
        &mut self,
        position: u64,
        file_length: u64,
        buf: &mut Vec<u8>,
    ) -> ReaderResult<Range<u64>>;

    /// Releases resources held by the filler. Not called again once it succeeds.
    ///
    /// # Errors
    ///
    /// Failures closing the underlying byte source.
    async fn release(&mut self) -> ReaderResult<()>;

    /// Whether the filler has been closed from outside the reader.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Counters describing buffer effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Number of successful window fills
    pub fills: u64,
    /// Bytes loaded into the buffer by fills
    pub bytes_filled: u64,
    /// Bytes copied out to callers
    pub bytes_served: u64,
}

/// Cursor plus an in-memory window of validated bytes.
///
/// The filler writes into a spare buffer that is swapped in only after a
/// successful fill, so a failed fill leaves the current window intact. Both
/// buffers start empty and grow to the size of the windows the filler returns.
pub struct BufferedReader<F: WindowFill> {
    filler: F,
    buffer: Vec<u8>,
    spare: Vec<u8>,
    window: Range<u64>,
    position: u64,
    file_length: u64,
    closed: bool,
    released: bool,
    stats: ReaderStats,
}

impl<F: WindowFill> BufferedReader<F> {
    /// Creates a reader over `file_length` bytes.
    pub fn new(filler: F, file_length: u64) -> Self {
        Self {
            filler,
            buffer: Vec::new(),
            spare: Vec::new(),
            window: 0..0,
            position: 0,
            file_length,
            closed: false,
            released: false,
            stats: ReaderStats::default(),
        }
    }

    /// The refill hook.
    pub fn filler(&self) -> &F {
        &self.filler
    }

    /// Current cursor position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Length of the readable file.
    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    /// Bytes between the cursor and end of file.
    pub fn bytes_remaining(&self) -> u64 {
        self.file_length - self.position
    }

    /// Range currently held in memory; empty before the first fill.
    pub fn window(&self) -> Range<u64> {
        self.window.clone()
    }

    /// Whether the reader is closed, either directly or through its filler.
    pub fn is_closed(&self) -> bool {
        self.closed || self.filler.is_cancelled()
    }

    /// Buffer counters.
    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Moves the cursor to `position`, clamped to the file length.
    ///
    /// The buffer is kept, so seeking within the current window is free.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Closed` - Reader has been closed
    pub fn seek(&mut self, position: u64) -> ReaderResult<()> {
        self.ensure_open()?;
        self.position = position.min(self.file_length);
        trace!("Seek to {} (window {:?})", self.position, self.window);
        Ok(())
    }

    /// Advances the cursor by up to `count` bytes and returns how far it moved.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Closed` - Reader has been closed
    pub fn skip(&mut self, count: u64) -> ReaderResult<u64> {
        self.ensure_open()?;
        let skipped = count.min(self.bytes_remaining());
        self.position += skipped;
        Ok(skipped)
    }

    /// Copies bytes at the cursor into `dst`, refilling as needed.
    ///
    /// Returns the number of bytes copied, which is less than `dst.len()` only
    /// at end of file. On error the cursor is restored to where it was.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Closed` - Reader has been closed
    /// - Any error from the filler; a cancelled wait also closes the reader
    pub async fn read(&mut self, dst: &mut [u8]) -> ReaderResult<usize> {
        if self.filler.is_cancelled() && !self.closed {
            self.close().await?;
        }
        self.ensure_open()?;

        let start = self.position;
        let mut copied = 0;

        while copied < dst.len() && self.position < self.file_length {
            if !self.window.contains(&self.position) {
                if let Err(error) = self.refill().await {
                    self.position = start;
                    if matches!(error, ReaderError::WaitCancelled { .. }) {
                        self.release_after_cancel().await;
                    }
                    return Err(error);
                }
            } else {
                trace!("Buffer hit at {}", self.position);
            }

            let offset = (self.position - self.window.start) as usize;
            let available = (self.window.end - self.position) as usize;
            let count = available.min(dst.len() - copied);

            dst[copied..copied + count].copy_from_slice(&self.buffer[offset..offset + count]);
            copied += count;
            self.position += count as u64;
        }

        self.stats.bytes_served += copied as u64;
        Ok(copied)
    }

    /// Fills `dst` completely.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Io` with `UnexpectedEof` - End of file reached first;
    ///   the cursor is restored
    /// - Any error from [`BufferedReader::read`]
    pub async fn read_exact(&mut self, dst: &mut [u8]) -> ReaderResult<()> {
        let start = self.position;
        let copied = self.read(dst).await?;
        if copied < dst.len() {
            self.position = start;
            return Err(ReaderError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("needed {} bytes at {}, only {} available", dst.len(), start, copied),
            )));
        }
        Ok(())
    }

    /// Closes the reader and releases the filler.
    ///
    /// The reader stops serving bytes on the first call. The filler is released
    /// exactly once; if releasing fails, a later `close` retries it.
    ///
    /// # Errors
    ///
    /// Failure releasing the filler.
    pub async fn close(&mut self) -> ReaderResult<()> {
        if self.released {
            return Ok(());
        }
        if !self.closed {
            self.closed = true;
            self.window = 0..0;
            self.buffer = Vec::new();
            self.spare = Vec::new();
            debug!("Closing reader at position {}", self.position);
        }

        self.filler.release().await?;
        self.released = true;
        Ok(())
    }

    fn ensure_open(&self) -> ReaderResult<()> {
        if self.is_closed() {
            return Err(ReaderError::Closed);
        }
        Ok(())
    }

    async fn refill(&mut self) -> ReaderResult<()> {
        let window = self
            .filler
            .fill(self.position, self.file_length, &mut self.spare)
            .await?;

        let len = window.end.saturating_sub(window.start);
        if !window.contains(&self.position)
            || window.end > self.file_length
            || self.spare.len() as u64 != len
        {
            return Err(ReaderError::InvalidArgument {
                reason: format!(
                    "fill produced window {:?} ({} bytes) that does not serve position {} of {}",
                    window,
                    self.spare.len(),
                    self.position,
                    self.file_length
                ),
            });
        }

        std::mem::swap(&mut self.buffer, &mut self.spare);
        self.window = window;
        self.stats.fills += 1;
        self.stats.bytes_filled += len;

        debug!(
            "Filled window {}..{} ({} bytes) for position {}",
            self.window.start, self.window.end, len, self.position
        );
        Ok(())
    }

    async fn release_after_cancel(&mut self) {
        if let Err(error) = self.close().await {
            warn!("Failed to release reader after cancelled wait: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Fills fixed-size aligned blocks from a byte vector.
    struct BlockFill {
        data: Vec<u8>,
        block: u64,
        fills: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
        fail: bool,
        release_failures: usize,
    }

    impl BlockFill {
        fn new(data: Vec<u8>, block: u64) -> Self {
            Self {
                data,
                block,
                fills: Arc::new(AtomicUsize::new(0)),
                releases: Arc::new(AtomicUsize::new(0)),
                fail: false,
                release_failures: 0,
            }
        }
    }

    #[async_trait]
    impl WindowFill for BlockFill {
        async fn fill(
            &mut self,
            position: u64,
            file_length: u64,
            buf: &mut Vec<u8>,
        ) -> ReaderResult<Range<u64>> {
            if self.fail {
                return Err(ReaderError::Io(std::io::Error::other("fill failed")));
            }
            self.fills.fetch_add(1, Ordering::SeqCst);
            let start = position / self.block * self.block;
            let end = (start + self.block).min(file_length);
            buf.clear();
            buf.extend_from_slice(&self.data[start as usize..end as usize]);
            Ok(start..end)
        }

        async fn release(&mut self) -> ReaderResult<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if self.release_failures > 0 {
                self.release_failures -= 1;
                return Err(ReaderError::Io(std::io::Error::other("release failed")));
            }
            Ok(())
        }
    }

    fn test_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_read_spanning_multiple_fills() {
        let data = test_data(100);
        let mut reader = BufferedReader::new(BlockFill::new(data.clone(), 8), 100);

        let mut dst = vec![0u8; 30];
        reader.seek(5).unwrap();
        let read = reader.read(&mut dst).await.unwrap();

        assert_eq!(read, 30);
        assert_eq!(dst, data[5..35]);
        assert_eq!(reader.position(), 35);
        assert_eq!(reader.stats().fills, 5);
        assert_eq!(reader.stats().bytes_served, 30);
    }

    #[tokio::test]
    async fn test_seek_within_window_keeps_buffer() {
        let data = test_data(64);
        let filler = BlockFill::new(data.clone(), 16);
        let fills = Arc::clone(&filler.fills);
        let mut reader = BufferedReader::new(filler, 64);

        let mut byte = [0u8; 1];
        reader.seek(17).unwrap();
        reader.read(&mut byte).await.unwrap();
        reader.seek(30).unwrap();
        reader.read(&mut byte).await.unwrap();
        reader.seek(16).unwrap();
        reader.read(&mut byte).await.unwrap();

        assert_eq!(byte[0], data[16]);
        assert_eq!(fills.load(Ordering::SeqCst), 1);
        assert_eq!(reader.window(), 16..32);
    }

    #[tokio::test]
    async fn test_read_at_end_of_file_returns_zero() {
        let mut reader = BufferedReader::new(BlockFill::new(test_data(10), 4), 10);

        reader.seek(1000).unwrap();
        assert_eq!(reader.position(), 10);
        assert_eq!(reader.bytes_remaining(), 0);

        let mut dst = [0u8; 4];
        assert_eq!(reader.read(&mut dst).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_short_read_at_tail() {
        let data = test_data(10);
        let mut reader = BufferedReader::new(BlockFill::new(data.clone(), 4), 10);

        reader.seek(7).unwrap();
        let mut dst = [0u8; 8];
        assert_eq!(reader.read(&mut dst).await.unwrap(), 3);
        assert_eq!(dst[..3], data[7..10]);
    }

    #[tokio::test]
    async fn test_read_exact_restores_cursor_on_eof() {
        let mut reader = BufferedReader::new(BlockFill::new(test_data(10), 4), 10);

        reader.seek(6).unwrap();
        let mut dst = [0u8; 8];
        let error = reader.read_exact(&mut dst).await.unwrap_err();

        assert!(matches!(error, ReaderError::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
        assert_eq!(reader.position(), 6);
    }

    #[tokio::test]
    async fn test_failed_fill_restores_cursor() {
        let mut filler = BlockFill::new(test_data(32), 8);
        filler.fail = true;
        let mut reader = BufferedReader::new(filler, 32);

        reader.seek(12).unwrap();
        let mut dst = [0u8; 4];
        assert!(reader.read(&mut dst).await.is_err());
        assert_eq!(reader.position(), 12);
        assert_eq!(reader.window(), 0..0);
    }

    #[tokio::test]
    async fn test_skip() {
        let mut reader = BufferedReader::new(BlockFill::new(test_data(10), 4), 10);

        assert_eq!(reader.skip(4).unwrap(), 4);
        assert_eq!(reader.skip(100).unwrap(), 6);
        assert_eq!(reader.position(), 10);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let filler = BlockFill::new(test_data(10), 4);
        let releases = Arc::clone(&filler.releases);
        let mut reader = BufferedReader::new(filler, 10);

        reader.close().await.unwrap();
        reader.close().await.unwrap();

        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(matches!(reader.seek(0), Err(ReaderError::Closed)));
        let mut dst = [0u8; 1];
        assert!(matches!(reader.read(&mut dst).await, Err(ReaderError::Closed)));
    }

    #[tokio::test]
    async fn test_window_invariant_holds_after_reads() {
        let data = test_data(50);
        let mut reader = BufferedReader::new(BlockFill::new(data, 7), 50);
        let mut dst = [0u8; 3];

        for position in [0u64, 13, 49, 21, 6, 35] {
            reader.seek(position).unwrap();
            reader.read(&mut dst).await.unwrap();
            let window = reader.window();
            assert!(window.start <= reader.position());
            assert!(reader.position() <= window.end);
            assert!(window.end <= reader.file_length());
        }
    }

    #[tokio::test]
    async fn test_failed_release_is_retried_by_next_close() {
        let mut filler = BlockFill::new(test_data(10), 4);
        filler.release_failures = 1;
        let releases = Arc::clone(&filler.releases);
        let mut reader = BufferedReader::new(filler, 10);

        assert!(reader.close().await.is_err());
        assert!(reader.is_closed());
        let mut dst = [0u8; 1];
        assert!(matches!(reader.read(&mut dst).await, Err(ReaderError::Closed)));

        reader.close().await.unwrap();
        reader.close().await.unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 2);
    }
}
