//! Torrent save file accessed through positional I/O

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{ByteSource, check_read_bounds, closed_source_error};

/// Byte source over a file on disk.
///
/// Reads use `pread`-style positional calls on tokio's blocking pool and never
/// move the file cursor, so the handle can serve overlapping reads.
#[derive(Debug)]
pub struct FileByteSource {
    path: PathBuf,
    file: Option<Arc<File>>,
    length: u64,
}

impl FileByteSource {
    /// Opens `path` for reading and records its current length.
    ///
    /// # Errors
    ///
    /// - `io::Error` - If the file cannot be opened or its metadata read
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::File::open(&path).await?;
        let length = file.metadata().await?.len();
        let file = file.into_std().await;

        info!("Opened {} ({} bytes)", path.display(), length);

        Ok(Self {
            path,
            file: Some(Arc::new(file)),
            length,
        })
    }

    /// Path this source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ByteSource for FileByteSource {
    fn length(&self) -> u64 {
        self.length
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let file = Arc::clone(self.file.as_ref().ok_or_else(closed_source_error)?);
        check_read_bounds(offset, buf.len(), self.length)?;

        let len = buf.len();
        let result = tokio::task::spawn_blocking(move || {
            let mut data = vec![0u8; len];
            read_exact_at(&file, &mut data, offset)?;
            Ok(data)
        })
        .await;

        let data = join_blocking_read(result)?;
        buf.copy_from_slice(&data);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        if self.file.take().is_some() {
            debug!("Closed {}", self.path.display());
        }
        Ok(())
    }
}

/// Unwraps a blocking read task, propagating panics and mapping cancellation
/// to `Interrupted`.
fn join_blocking_read<T>(
    result: Result<io::Result<T>, tokio::task::JoinError>,
) -> io::Result<T> {
    match result {
        Ok(inner) => inner,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::Interrupted,
            "blocking read task was cancelled",
        )),
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ));
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
