//! Seekable readers over partially downloaded torrent files
//!
//! [`BufferedReader`] owns cursor and buffer bookkeeping and delegates window
//! selection to a [`WindowFill`] implementation. [`TorrentReader`] plugs in
//! piece-aware window selection that waits for unfinished pieces and never
//! buffers bytes past the finished frontier. [`BlockingReader`] bridges the
//! async reader into `std::io::Read + Seek`.

pub mod blocking;
pub mod buffered;
pub mod torrent;
pub mod window;

use std::io;
use std::time::Duration;

pub use blocking::BlockingReader;
pub use buffered::{BufferedReader, ReaderStats, WindowFill};
pub use torrent::{CloseHandle, PieceWindow, TorrentReader, TorrentReaderBuilder, WaitObserver};

use crate::pieces::PieceIndex;

/// Errors reported by reader construction and reader operations.
///
/// Per-call errors leave the cursor where it was before the call, so the
/// same operation can be retried.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// Piece layout or reader settings cannot describe the file.
    #[error("Configuration error: {reason}")]
    Configuration {
        /// What is wrong with the configuration
        reason: String,
    },

    /// Precondition violated in buffer window math.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Which precondition failed
        reason: String,
    },

    /// No piece covers the requested reader offset.
    #[error("Offset {offset} is not covered by any piece (covered length {covered})")]
    OutOfRange {
        /// Reader offset that could not be located
        offset: u64,
        /// Bytes covered by the piece sequence
        covered: u64,
    },

    /// Operation attempted after the reader was closed.
    #[error("Reader is closed")]
    Closed,

    /// Reader was closed while waiting for a piece.
    #[error("Wait for piece {piece_index} was cancelled")]
    WaitCancelled {
        /// Piece that was being awaited
        piece_index: PieceIndex,
    },

    /// Piece did not finish within the configured wait timeout.
    #[error("Timed out after {timeout:?} waiting for piece {piece_index}")]
    WaitTimedOut {
        /// Piece that was being awaited
        piece_index: PieceIndex,
        /// Configured timeout
        timeout: Duration,
    },

    /// Physical read from the byte source failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for reader operations
pub type ReaderResult<T> = Result<T, ReaderError>;

impl From<ReaderError> for io::Error {
    fn from(error: ReaderError) -> Self {
        let kind = match error {
            ReaderError::Io(inner) => return inner,
            ReaderError::Configuration { .. } => io::ErrorKind::InvalidData,
            ReaderError::InvalidArgument { .. } | ReaderError::OutOfRange { .. } => {
                io::ErrorKind::InvalidInput
            }
            ReaderError::Closed => io::ErrorKind::BrokenPipe,
            ReaderError::WaitCancelled { .. } => io::ErrorKind::Interrupted,
            ReaderError::WaitTimedOut { .. } => io::ErrorKind::TimedOut,
        };
        io::Error::new(kind, error)
    }
}
