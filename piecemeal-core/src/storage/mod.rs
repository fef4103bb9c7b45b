//! Randomly addressable byte stores read by the torrent reader
//!
//! A byte source is the physical save file of a torrent (or an in-memory
//! stand-in). Reads are always parameterized by an explicit offset so that
//! several readers may share one store without a shared seek cursor.

pub mod file;
pub mod memory;

use std::io;

use async_trait::async_trait;
pub use file::FileByteSource;
pub use memory::{MemoryByteSource, MemoryStats};

/// Finite store supporting positional reads.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Total length of the store in bytes.
    fn length(&self) -> u64;

    /// Fills `buf` with the bytes starting at `offset`.
    ///
    /// Does not touch any logical reader state.
    ///
    /// # Errors
    ///
    /// - `io::ErrorKind::UnexpectedEof` - Fewer than `buf.len()` bytes remain at `offset`
    /// - Any error reported by the underlying storage, including use after close
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Releases the underlying resource.
    ///
    /// # Errors
    ///
    /// Storage-specific failures while releasing the handle.
    async fn close(&mut self) -> io::Result<()>;
}

pub(crate) fn closed_source_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "byte source is closed")
}

pub(crate) fn check_read_bounds(offset: u64, len: usize, source_len: u64) -> io::Result<()> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= source_len => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("read of {len} bytes at {offset} exceeds source length {source_len}"),
        )),
    }
}
