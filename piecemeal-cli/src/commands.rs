//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use clap::Subcommand;
use piecemeal_core::config::PiecemealConfig;
use piecemeal_core::{
    ByteSource, FileByteSource, Piece, PieceList, PieceState, PiecemealError, ReaderConfig,
    Result, TorrentReader,
};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

const DEFAULT_PIECE_SIZE: &str = "262144";
const CHUNK_SIZE: usize = 64 * 1024;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Stream a byte range of a fully downloaded file to stdout
    Cat {
        /// File to read
        file: PathBuf,
        /// Piece size in bytes
        #[arg(long, default_value = DEFAULT_PIECE_SIZE)]
        piece_size: u64,
        /// Start position in the file
        #[arg(long, default_value = "0")]
        offset: u64,
        /// Number of bytes to stream (default: to end of file)
        #[arg(long)]
        length: Option<u64>,
        /// Read-ahead and read-behind capacity in bytes
        #[arg(long)]
        buffer: Option<usize>,
    },
    /// Read a file while its pieces finish in random order
    Simulate {
        /// File to read
        file: PathBuf,
        /// Piece size in bytes
        #[arg(long, default_value = DEFAULT_PIECE_SIZE)]
        piece_size: u64,
        /// Seed for the piece completion order
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Delay between piece completions in milliseconds
        #[arg(long, default_value = "5")]
        delay_ms: u64,
        /// Read-ahead and read-behind capacity in bytes
        #[arg(long)]
        buffer: Option<usize>,
    },
}

/// Outcome of a verified simulated download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationReport {
    pub bytes_verified: u64,
    pub piece_waits: usize,
    pub window_fills: u64,
    pub bytes_buffered: u64,
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Cat {
            file,
            piece_size,
            offset,
            length,
            buffer,
        } => {
            let config = reader_config(buffer)?;
            let mut stdout = tokio::io::stdout();
            cat_file(&file, piece_size, offset, length, &config, &mut stdout).await?;
            Ok(())
        }
        Commands::Simulate {
            file,
            piece_size,
            seed,
            delay_ms,
            buffer,
        } => {
            let config = reader_config(buffer)?;
            let started = Instant::now();
            let report = simulate_download(&file, piece_size, seed, delay_ms, &config).await?;

            println!(
                "Verified {} bytes in {:.2?}",
                report.bytes_verified,
                started.elapsed()
            );
            println!("  Piece waits: {}", report.piece_waits);
            println!("  Window fills: {}", report.window_fills);
            println!("  Bytes buffered: {}", report.bytes_buffered);
            Ok(())
        }
    }
}

fn reader_config(buffer: Option<usize>) -> Result<ReaderConfig> {
    let mut config = PiecemealConfig::from_env()?.reader;
    if let Some(capacity) = buffer {
        config.buffer_capacity_per_direction = capacity;
    }
    Ok(config)
}

/// Stream `[offset, offset + length)` of a finished file into `out`
///
/// Returns the number of bytes written.
///
/// # Errors
/// - `PiecemealError::Io` - File cannot be opened, read or written out
/// - `PiecemealError::Reader` - Piece layout or configuration is invalid
pub async fn cat_file<W>(
    file: &Path,
    piece_size: u64,
    offset: u64,
    length: Option<u64>,
    config: &ReaderConfig,
    out: &mut W,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut source = FileByteSource::open(file).await?;
    if source.length() == 0 {
        info!("{} is empty, nothing to stream", file.display());
        source.close().await?;
        return Ok(0);
    }

    let pieces = PieceList::uniform(0, piece_size, source.length())?;
    pieces.set_all(PieceState::Finished);

    let mut reader = TorrentReader::new(source, pieces, config).await?;
    reader.seek(offset)?;

    let mut remaining = length.unwrap_or(u64::MAX).min(reader.bytes_remaining());
    let mut written = 0u64;
    let mut chunk = vec![0u8; CHUNK_SIZE];

    while remaining > 0 {
        let want = remaining.min(chunk.len() as u64) as usize;
        let read = reader.read(&mut chunk[..want]).await?;
        if read == 0 {
            break;
        }
        out.write_all(&chunk[..read]).await?;
        remaining -= read as u64;
        written += read as u64;
    }
    out.flush().await?;

    let stats = reader.stats();
    info!(
        "Streamed {} bytes with {} fills ({} bytes buffered)",
        stats.bytes_served, stats.fills, stats.bytes_filled
    );
    reader.close().await?;
    Ok(written)
}

/// Read a file sequentially while a background task finishes pieces in a
/// seeded random order, then verify the bytes against the file
///
/// # Errors
/// - `PiecemealError::Io` - File cannot be opened or read
/// - `PiecemealError::Reader` - Piece layout or configuration is invalid
/// - `PiecemealError::ContentMismatch` - Bytes read through the reader differ
///   from the file
pub async fn simulate_download(
    file: &Path,
    piece_size: u64,
    seed: u64,
    delay_ms: u64,
    config: &ReaderConfig,
) -> Result<SimulationReport> {
    let expected = tokio::fs::read(file).await?;
    let mut source = FileByteSource::open(file).await?;
    if source.length() == 0 {
        info!("{} is empty, nothing to simulate", file.display());
        source.close().await?;
        return Ok(SimulationReport::default());
    }

    let pieces = PieceList::uniform(0, piece_size, source.length())?;

    let mut order: Vec<usize> = (0..pieces.len()).collect();
    order.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));

    let engine_pieces = pieces.clone();
    let delay = Duration::from_millis(delay_ms);
    let engine = tokio::spawn(async move {
        for position in order {
            if let Some(piece) = engine_pieces.get(position) {
                piece.set_state(PieceState::Active);
                tokio::time::sleep(delay).await;
                piece.set_state(PieceState::Finished);
            }
        }
    });

    let waits = Arc::new(AtomicUsize::new(0));
    let wait_counter = Arc::clone(&waits);
    let mut reader = TorrentReader::builder(source, pieces)
        .config(config.clone())
        .on_wait(move |piece: &Piece| {
            wait_counter.fetch_add(1, Ordering::Relaxed);
            info!("Reader waiting on piece {} ({:?})", piece.index(), piece.state());
        })
        .build()
        .await?;

    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut position = 0usize;

    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        if expected.get(position..position + read) != Some(&chunk[..read]) {
            engine.abort();
            reader.close().await?;
            return Err(PiecemealError::ContentMismatch {
                start: position as u64,
                end: (position + read) as u64,
            });
        }
        position += read;
    }

    if let Err(e) = engine.await {
        warn!("Simulated engine task failed: {e}");
    }

    let stats = reader.stats();
    reader.close().await?;

    Ok(SimulationReport {
        bytes_verified: position as u64,
        piece_waits: waits.load(Ordering::Relaxed),
        window_fills: stats.fills,
        bytes_buffered: stats.bytes_filled,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn temp_file(contents: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    fn test_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 13 % 256) as u8).collect()
    }

    #[tokio::test]
    async fn test_cat_streams_requested_range() {
        let data = test_data(1000);
        let file = temp_file(&data);
        let config = PiecemealConfig::for_testing().reader;
        let mut out = Vec::new();

        let written = cat_file(file.path(), 128, 100, Some(300), &config, &mut out)
            .await
            .unwrap();

        assert_eq!(written, 300);
        assert_eq!(out, data[100..400]);
    }

    #[tokio::test]
    async fn test_cat_length_past_end_stops_at_eof() {
        let data = test_data(50);
        let file = temp_file(&data);
        let config = PiecemealConfig::for_testing().reader;
        let mut out = Vec::new();

        let written = cat_file(file.path(), 16, 40, Some(1000), &config, &mut out)
            .await
            .unwrap();

        assert_eq!(written, 10);
        assert_eq!(out, data[40..]);
    }

    #[tokio::test]
    async fn test_cat_empty_file_writes_nothing() {
        let file = temp_file(&[]);
        let config = PiecemealConfig::for_testing().reader;
        let mut out = Vec::new();

        let written = cat_file(file.path(), 16, 0, None, &config, &mut out)
            .await
            .unwrap();

        assert_eq!(written, 0);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_cat_rejects_zero_piece_size() {
        let file = temp_file(&test_data(10));
        let config = PiecemealConfig::for_testing().reader;
        let mut out = Vec::new();

        let error = cat_file(file.path(), 0, 0, None, &config, &mut out)
            .await
            .unwrap_err();

        assert!(error.is_user_error());
    }

    #[tokio::test]
    async fn test_simulate_verifies_whole_file() {
        let data = test_data(5000);
        let file = temp_file(&data);
        let config = PiecemealConfig::for_testing().reader;

        let report = simulate_download(file.path(), 256, 7, 1, &config)
            .await
            .unwrap();

        assert_eq!(report.bytes_verified, 5000);
        assert!(report.window_fills > 0);
    }

    #[tokio::test]
    async fn test_simulate_empty_file() {
        let file = temp_file(&[]);
        let config = PiecemealConfig::for_testing().reader;

        let report = simulate_download(file.path(), 256, 7, 1, &config)
            .await
            .unwrap();

        assert_eq!(report, SimulationReport::default());
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let config = PiecemealConfig::for_testing().reader;
        let mut out = Vec::new();

        let error = cat_file(Path::new("/nonexistent/piecemeal"), 16, 0, None, &config, &mut out)
            .await
            .unwrap_err();

        assert!(matches!(error, PiecemealError::Io(_)));
    }
}
