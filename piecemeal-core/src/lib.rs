//! Piecemeal Core - seekable reads over torrents that are still downloading
//!
//! This crate provides a buffered random-access reader over a torrent save
//! file whose pieces finish asynchronously and out of order. Reads wait for
//! the piece under the cursor and buffer only bytes from finished pieces.

pub mod config;
pub mod pieces;
pub mod reader;
pub mod storage;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::{PiecemealConfig, ReaderConfig};
pub use pieces::{Piece, PieceIndex, PieceList, PieceState};
pub use reader::{BlockingReader, CloseHandle, ReaderError, ReaderResult, TorrentReader};
pub use storage::{ByteSource, FileByteSource, MemoryByteSource};

/// Core errors that can bubble up from any Piecemeal subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PiecemealError {
    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Content mismatch in bytes {start}..{end}")]
    ContentMismatch { start: u64, end: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PiecemealError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            PiecemealError::Reader(e) => match e {
                ReaderError::Configuration { reason } => {
                    format!("Pieces do not describe this file: {reason}")
                }
                ReaderError::WaitTimedOut { piece_index, .. } => {
                    format!("Piece {piece_index} did not finish downloading in time")
                }
                ReaderError::WaitCancelled { .. } | ReaderError::Closed => {
                    "Stream was closed".to_string()
                }
                ReaderError::Io(_) => "File system error occurred".to_string(),
                _ => "Read error occurred".to_string(),
            },
            PiecemealError::Configuration { reason } => format!("Invalid configuration: {reason}"),
            PiecemealError::ContentMismatch { start, end } => {
                format!("Bytes {start}..{end} differ from the file on disk")
            }
            PiecemealError::Io(e) => format!("File system error: {e}"),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            PiecemealError::Configuration { .. }
                | PiecemealError::Reader(ReaderError::Configuration { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, PiecemealError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let error = PiecemealError::from(ReaderError::WaitTimedOut {
            piece_index: PieceIndex::new(3),
            timeout: std::time::Duration::from_secs(1),
        });
        assert_eq!(
            error.user_message(),
            "Piece 3 did not finish downloading in time"
        );
        assert!(!error.is_user_error());

        let error = PiecemealError::from(ReaderError::Configuration {
            reason: "gap".to_string(),
        });
        assert!(error.is_user_error());

        let error = PiecemealError::ContentMismatch { start: 4, end: 8 };
        assert_eq!(error.user_message(), "Bytes 4..8 differ from the file on disk");
        assert!(!error.is_user_error());
    }
}
