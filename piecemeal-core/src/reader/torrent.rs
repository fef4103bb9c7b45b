//! Piece-aware reader over a torrent save file
//!
//! The save file is a concatenation of pieces that finish out of order. On a
//! buffer miss the reader waits for the piece under the cursor, then loads the
//! largest window of contiguous finished bytes around it, up to the configured
//! capacity in each direction.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::buffered::{BufferedReader, ReaderStats, WindowFill};
use super::window::{max_backward, max_forward, refill_window};
use super::{ReaderError, ReaderResult};
use crate::config::ReaderConfig;
use crate::pieces::{Piece, PieceList};
use crate::storage::ByteSource;

/// Notified whenever a read has to wait for an unfinished piece.
///
/// Purely observational, e.g. for raising the piece's download priority.
pub trait WaitObserver: Send + Sync {
    /// Called before the reader suspends on `piece`.
    fn on_wait(&self, piece: &Piece);
}

impl<F> WaitObserver for F
where
    F: Fn(&Piece) + Send + Sync,
{
    fn on_wait(&self, piece: &Piece) {
        self(piece)
    }
}

/// Closes a reader from another task.
///
/// A read suspended on a piece wait fails with `ReaderError::WaitCancelled`
/// and every later operation fails with `ReaderError::Closed`.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    closed: Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            closed: Arc::new(closed),
        }
    }

    /// Signals the reader to close.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Whether close has been signalled.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn wait_closed(&self) {
        let mut receiver = self.closed.subscribe();
        loop {
            let closed = *receiver.borrow_and_update();
            if closed {
                return;
            }
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Window filler that only loads bytes from finished pieces.
pub struct PieceWindow<S: ByteSource> {
    source: S,
    pieces: PieceList,
    capacity: u64,
    wait_timeout: Option<Duration>,
    observer: Option<Arc<dyn WaitObserver>>,
    close_handle: CloseHandle,
}

impl<S: ByteSource> PieceWindow<S> {
    /// Pieces backing this reader.
    pub fn pieces(&self) -> &PieceList {
        &self.pieces
    }

    /// Byte source backing this reader.
    pub fn source(&self) -> &S {
        &self.source
    }

    fn locate(&self, position: u64) -> ReaderResult<usize> {
        self.pieces
            .find_piece_index(position)
            .ok_or_else(|| ReaderError::OutOfRange {
                offset: position,
                covered: self.pieces.covered_len(),
            })
    }

    async fn wait_for(&self, piece: &Piece) -> ReaderResult<()> {
        if let Some(observer) = &self.observer {
            observer.on_wait(piece);
        }
        debug!("Waiting for piece {} ({:?})", piece.index(), piece.state());

        let piece_index = piece.index();
        let wait = async {
            tokio::select! {
                _ = piece.wait_finished() => Ok(()),
                _ = self.close_handle.wait_closed() => {
                    Err(ReaderError::WaitCancelled { piece_index })
                }
            }
        };

        match self.wait_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, wait).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Gave up waiting for piece {} after {:?}", piece_index, timeout);
                    Err(ReaderError::WaitTimedOut {
                        piece_index,
                        timeout,
                    })
                }
            },
            None => wait.await,
        }
    }
}

#[async_trait]
impl<S: ByteSource> WindowFill for PieceWindow<S> {
    async fn fill(
        &mut self,
        position: u64,
        file_length: u64,
        buf: &mut Vec<u8>,
    ) -> ReaderResult<Range<u64>> {
        loop {
            let piece_position = self.locate(position)?;
            let piece = match self.pieces.get(piece_position) {
                Some(piece) => Arc::clone(piece),
                None => {
                    return Err(ReaderError::OutOfRange {
                        offset: position,
                        covered: self.pieces.covered_len(),
                    });
                }
            };

            if !piece.is_finished() {
                self.wait_for(&piece).await?;
            }

            let forward = max_forward(&self.pieces, position, self.capacity, piece_position)?;
            if forward == 0 {
                // The engine moved the piece out of Finished after we woke.
                debug!("Piece {} no longer finished, waiting again", piece.index());
                continue;
            }
            let backward = max_backward(&self.pieces, position, self.capacity, piece_position)?;

            let window = refill_window(position, file_length, backward, forward);
            buf.clear();
            buf.resize((window.end - window.start) as usize, 0);
            self.source.read_at(window.start, buf).await?;

            return Ok(window);
        }
    }

    async fn release(&mut self) -> ReaderResult<()> {
        self.close_handle.close();
        self.source.close().await?;
        info!("Released byte source");
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.close_handle.is_closed()
    }
}

impl<S: ByteSource> Drop for PieceWindow<S> {
    fn drop(&mut self) {
        if !self.close_handle.is_closed() {
            warn!("Reader dropped without close, releasing byte source on drop");
        }
        // Outstanding close handles observe the reader as closed.
        self.close_handle.close();
    }
}

/// Seekable stream over a torrent save file whose pieces finish asynchronously.
///
/// Reads transparently wait for the piece under the cursor. Reader position 0
/// maps to the first piece's offset in piece space.
pub struct TorrentReader<S: ByteSource> {
    inner: BufferedReader<PieceWindow<S>>,
    close_handle: CloseHandle,
}

impl<S: ByteSource> TorrentReader<S> {
    /// Creates a reader with the given configuration and no wait observer.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Configuration` - Pieces do not cover the source, or the
    ///   configuration is invalid. The source is closed before returning.
    pub async fn new(source: S, pieces: PieceList, config: &ReaderConfig) -> ReaderResult<Self> {
        Self::builder(source, pieces).config(config.clone()).build().await
    }

    /// Starts building a reader over `source` backed by `pieces`.
    pub fn builder(source: S, pieces: PieceList) -> TorrentReaderBuilder<S> {
        TorrentReaderBuilder {
            source,
            pieces,
            config: ReaderConfig::default(),
            observer: None,
        }
    }

    /// Current cursor position.
    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    /// Length of the underlying file.
    pub fn file_length(&self) -> u64 {
        self.inner.file_length()
    }

    /// Bytes between the cursor and end of file.
    pub fn bytes_remaining(&self) -> u64 {
        self.inner.bytes_remaining()
    }

    /// Range currently buffered.
    pub fn window(&self) -> Range<u64> {
        self.inner.window()
    }

    /// Buffer counters.
    pub fn stats(&self) -> ReaderStats {
        self.inner.stats()
    }

    /// Pieces backing this reader.
    pub fn pieces(&self) -> &PieceList {
        self.inner.filler().pieces()
    }

    /// Byte source backing this reader.
    pub fn source(&self) -> &S {
        self.inner.filler().source()
    }

    /// Whether the reader is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Handle for closing this reader from another task.
    pub fn close_handle(&self) -> CloseHandle {
        self.close_handle.clone()
    }

    /// Moves the cursor, clamped to `[0, file_length]`.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Closed` - Reader has been closed
    pub fn seek(&mut self, position: u64) -> ReaderResult<()> {
        self.inner.seek(position)
    }

    /// Advances the cursor by up to `count` bytes.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Closed` - Reader has been closed
    pub fn skip(&mut self, count: u64) -> ReaderResult<u64> {
        self.inner.skip(count)
    }

    /// Reads up to `dst.len()` bytes at the cursor, waiting for unfinished pieces.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Closed` - Reader has been closed
    /// - `ReaderError::WaitCancelled` - Closed while waiting for a piece
    /// - `ReaderError::WaitTimedOut` - Piece did not finish within the timeout
    /// - `ReaderError::OutOfRange` - No piece covers the cursor
    /// - `ReaderError::Io` - Byte source read failed
    pub async fn read(&mut self, dst: &mut [u8]) -> ReaderResult<usize> {
        self.inner.read(dst).await
    }

    /// Fills `dst` completely.
    ///
    /// # Errors
    ///
    /// As [`TorrentReader::read`], plus `UnexpectedEof` when the file ends first.
    pub async fn read_exact(&mut self, dst: &mut [u8]) -> ReaderResult<()> {
        self.inner.read_exact(dst).await
    }

    /// Closes the reader and its byte source. Idempotent.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Io` - Byte source failed to close on the first call
    pub async fn close(&mut self) -> ReaderResult<()> {
        self.inner.close().await
    }
}

/// Builder for [`TorrentReader`].
pub struct TorrentReaderBuilder<S: ByteSource> {
    source: S,
    pieces: PieceList,
    config: ReaderConfig,
    observer: Option<Arc<dyn WaitObserver>>,
}

impl<S: ByteSource> TorrentReaderBuilder<S> {
    /// Replaces the reader configuration.
    pub fn config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets read-ahead and read-behind capacity in bytes.
    pub fn buffer_capacity_per_direction(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity_per_direction = capacity;
        self
    }

    /// Fails waits that take longer than `timeout`.
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.wait_timeout = Some(timeout);
        self
    }

    /// Registers an observer called before each piece wait.
    pub fn on_wait(mut self, observer: impl WaitObserver + 'static) -> Self {
        let observer: Arc<dyn WaitObserver> = Arc::new(observer);
        self.observer = Some(observer);
        self
    }

    /// Validates coverage and creates the reader.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Configuration` - Invalid configuration or pieces that
    ///   do not cover the whole source. The source is closed before returning.
    pub async fn build(self) -> ReaderResult<TorrentReader<S>> {
        let Self {
            mut source,
            pieces,
            config,
            observer,
        } = self;

        if let Err(error) = validate(&source, &pieces, &config) {
            if let Err(close_error) = source.close().await {
                warn!("Failed to close byte source after rejected configuration: {}", close_error);
            }
            return Err(error);
        }

        let file_length = source.length();
        let capacity = config.buffer_capacity_per_direction;
        let close_handle = CloseHandle::new();

        info!(
            "Opened torrent reader: {} bytes over {} pieces from piece offset {}, {} bytes per direction",
            file_length,
            pieces.len(),
            pieces.logical_start_offset(),
            capacity
        );

        let filler = PieceWindow {
            source,
            pieces,
            capacity: capacity as u64,
            wait_timeout: config.wait_timeout,
            observer,
            close_handle: close_handle.clone(),
        };

        Ok(TorrentReader {
            inner: BufferedReader::new(filler, file_length),
            close_handle,
        })
    }
}

fn validate<S: ByteSource>(source: &S, pieces: &PieceList, config: &ReaderConfig) -> ReaderResult<()> {
    config.validate()?;

    let covered = pieces.covered_len();
    let file_length = source.length();
    if covered < file_length {
        return Err(ReaderError::Configuration {
            reason: format!("file length {file_length} is larger than pieces' range {covered}"),
        });
    }
    Ok(())
}
