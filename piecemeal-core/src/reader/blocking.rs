//! Synchronous `std::io` adapter for [`TorrentReader`]
//!
//! Waits for pieces by blocking the calling thread on a tokio runtime handle.
//! Must not be used from inside an async task running on that runtime.

use std::io::{self, Read, Seek, SeekFrom};

use tokio::runtime::Handle;

use super::{ReaderResult, TorrentReader};
use crate::storage::ByteSource;

/// Blocking `Read + Seek` view of a [`TorrentReader`].
pub struct BlockingReader<S: ByteSource> {
    reader: TorrentReader<S>,
    runtime: Handle,
}

impl<S: ByteSource> BlockingReader<S> {
    /// Wraps `reader`, driving its futures on `runtime`.
    pub fn new(reader: TorrentReader<S>, runtime: Handle) -> Self {
        Self { reader, runtime }
    }

    /// The wrapped async reader.
    pub fn get_ref(&self) -> &TorrentReader<S> {
        &self.reader
    }

    /// Unwraps the async reader.
    pub fn into_inner(self) -> TorrentReader<S> {
        self.reader
    }

    /// Length of the underlying file.
    pub fn file_length(&self) -> u64 {
        self.reader.file_length()
    }

    /// Closes the reader, blocking until the byte source is released.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Io` - Byte source failed to close
    pub fn close(&mut self) -> ReaderResult<()> {
        self.runtime.block_on(self.reader.close())
    }
}

impl<S: ByteSource> Read for BlockingReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.runtime
            .block_on(self.reader.read(buf))
            .map_err(io::Error::from)
    }
}

impl<S: ByteSource> Seek for BlockingReader<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.reader.file_length().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.reader.position().checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;

        self.reader.seek(target)?;
        Ok(self.reader.position())
    }
}
