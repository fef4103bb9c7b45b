//! Centralized configuration for Piecemeal.
//!
//! All tunable reader parameters are defined here to avoid hard-coded
//! values scattered throughout the codebase.

use std::time::Duration;

use crate::reader::{ReaderError, ReaderResult};
use crate::{PiecemealError, Result};

/// Default read-ahead and read-behind capacity per reader, in bytes.
pub const DEFAULT_BUFFER_PER_DIRECTION: usize = 8 * 1024;

/// Central configuration for all Piecemeal components.
///
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct PiecemealConfig {
    pub reader: ReaderConfig,
}

/// Torrent reader buffering and waiting behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Bytes reserved for read-ahead and, independently, for read-behind
    pub buffer_capacity_per_direction: usize,
    /// Maximum time to wait for a single piece (None = wait indefinitely)
    pub wait_timeout: Option<Duration>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            buffer_capacity_per_direction: DEFAULT_BUFFER_PER_DIRECTION,
            wait_timeout: None, // Pieces may legitimately take minutes
        }
    }
}

impl ReaderConfig {
    /// Checks that the configuration can drive a reader.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Configuration` - Zero buffer capacity or zero timeout
    pub fn validate(&self) -> ReaderResult<()> {
        if self.buffer_capacity_per_direction == 0 {
            return Err(ReaderError::Configuration {
                reason: "buffer capacity per direction must be positive".to_string(),
            });
        }
        if self.wait_timeout == Some(Duration::ZERO) {
            return Err(ReaderError::Configuration {
                reason: "wait timeout must be positive when set".to_string(),
            });
        }
        Ok(())
    }
}

impl PiecemealConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    ///
    /// # Errors
    ///
    /// - `PiecemealError::Configuration` - A variable is set but not a number
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(bytes) = parse_env::<usize>("PIECEMEAL_BUFFER_PER_DIRECTION")? {
            config.reader.buffer_capacity_per_direction = bytes;
        }

        if let Some(seconds) = parse_env::<u64>("PIECEMEAL_WAIT_TIMEOUT_SECS")? {
            config.reader.wait_timeout = Some(Duration::from_secs(seconds));
        }

        Ok(config)
    }

    /// Creates a configuration optimized for testing.
    pub fn for_testing() -> Self {
        Self {
            reader: ReaderConfig {
                buffer_capacity_per_direction: 64, // Small windows exercise refills
                wait_timeout: Some(Duration::from_secs(5)),
            },
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PiecemealError::Configuration {
                reason: format!("{name} must be a non-negative integer, got {value:?}"),
            }),
        Err(_) => Ok(None),
    }
}
