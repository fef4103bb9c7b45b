//! Ordered, contiguous piece sequence backing a single file

use std::sync::Arc;

use super::{Piece, PieceIndex, PieceState};
use crate::reader::{ReaderError, ReaderResult};

/// Validated sequence of pieces covering one contiguous range of piece space.
///
/// The sequence need not start at piece-space offset 0. Reader positions are
/// translated by [`PieceList::logical_start_offset`] before lookups. Cloning is
/// cheap and shares piece state with the original.
#[derive(Debug, Clone)]
pub struct PieceList {
    pieces: Vec<Arc<Piece>>,
    logical_start_offset: u64,
}

impl PieceList {
    /// Validates and wraps an ordered piece sequence.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Configuration` - Empty sequence, zero-sized piece, a
    ///   piece ending past `u64::MAX`, non-ascending indices, or a gap/overlap
    ///   between neighbours
    pub fn new(pieces: Vec<Arc<Piece>>) -> ReaderResult<Self> {
        let Some(first) = pieces.first() else {
            return Err(ReaderError::Configuration {
                reason: "piece sequence is empty".to_string(),
            });
        };
        let logical_start_offset = first.offset();

        for piece in &pieces {
            if piece.size() == 0 {
                return Err(ReaderError::Configuration {
                    reason: format!("piece {} has zero size", piece.index()),
                });
            }
            if piece.offset().checked_add(piece.size()).is_none() {
                return Err(ReaderError::Configuration {
                    reason: format!(
                        "piece {} at offset {} with size {} overflows piece space",
                        piece.index(),
                        piece.offset(),
                        piece.size()
                    ),
                });
            }
        }

        for pair in pieces.windows(2) {
            let (current, next) = (&pair[0], &pair[1]);
            if next.index() <= current.index() {
                return Err(ReaderError::Configuration {
                    reason: format!(
                        "piece indices not ascending: {} followed by {}",
                        current.index(),
                        next.index()
                    ),
                });
            }
            let expected = current.offset().checked_add(current.size());
            if expected != Some(next.offset()) {
                return Err(ReaderError::Configuration {
                    reason: format!(
                        "pieces {} and {} are not contiguous: {}+{} != {}",
                        current.index(),
                        next.index(),
                        current.offset(),
                        current.size(),
                        next.offset()
                    ),
                });
            }
        }

        Ok(Self {
            pieces,
            logical_start_offset,
        })
    }

    /// Builds pending pieces of `piece_size` bytes covering `total_len` bytes
    /// starting at piece-space `offset`. The last piece may be shorter.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Configuration` - Zero piece size, zero total length,
    ///   more than `u32::MAX + 1` pieces, or a range past `u64::MAX`
    pub fn uniform(offset: u64, piece_size: u64, total_len: u64) -> ReaderResult<Self> {
        if piece_size == 0 {
            return Err(ReaderError::Configuration {
                reason: "piece size must be positive".to_string(),
            });
        }

        let count = total_len.div_ceil(piece_size);
        if count > u64::from(u32::MAX) + 1 {
            return Err(ReaderError::Configuration {
                reason: format!("{count} pieces exceed the piece index range"),
            });
        }

        let mut pieces = Vec::with_capacity(count as usize);
        for i in 0..count {
            let start = i * piece_size;
            let size = piece_size.min(total_len - start);
            let piece_offset = offset.checked_add(start).ok_or_else(|| ReaderError::Configuration {
                reason: format!("piece {i} starts past the end of piece space"),
            })?;
            pieces.push(Arc::new(Piece::new(PieceIndex::new(i as u32), piece_offset, size)));
        }

        Self::new(pieces)
    }

    /// Smallest piece-space offset in the sequence.
    pub fn logical_start_offset(&self) -> u64 {
        self.logical_start_offset
    }

    /// Number of bytes covered from the logical start offset.
    pub fn covered_len(&self) -> u64 {
        self.pieces
            .last()
            .map(|last| last.offset() + last.size() - self.logical_start_offset)
            .unwrap_or(0)
    }

    /// Number of pieces.
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    /// Always false for a validated list.
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Piece at list position `position`.
    pub fn get(&self, position: usize) -> Option<&Arc<Piece>> {
        self.pieces.get(position)
    }

    /// Iterates pieces in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Piece>> {
        self.pieces.iter()
    }

    /// Whether every piece has finished.
    pub fn all_finished(&self) -> bool {
        self.pieces.iter().all(|piece| piece.is_finished())
    }

    /// Marks every piece with `state`. Intended for engines and tests.
    pub fn set_all(&self, state: PieceState) {
        for piece in &self.pieces {
            piece.set_state(state);
        }
    }

    /// Finds the list position of the piece containing reader offset `view_offset`.
    ///
    /// Binary search over piece boundaries; returns `None` when the offset lies
    /// beyond the covered range.
    pub fn find_piece_index(&self, view_offset: u64) -> Option<usize> {
        let logical = self.logical_start_offset.checked_add(view_offset)?;
        let position = self
            .pieces
            .partition_point(|piece| piece.last_index() < logical);

        self.pieces
            .get(position)
            .filter(|piece| piece.contains(logical))
            .map(|_| position)
    }
}
