//! Buffer window calculations over finished pieces
//!
//! Given a reader position and the piece containing it, these functions measure
//! how many contiguous finished bytes lie ahead of and behind the position, up
//! to a per-direction cap. The window never extends into an unfinished piece.

use std::ops::Range;

use super::{ReaderError, ReaderResult};
use crate::pieces::PieceList;

/// Counts contiguous finished bytes from `view_offset` forward, including the
/// byte at `view_offset`, capped at `cap`.
///
/// `piece_position` is the list position of the piece containing `view_offset`.
///
/// # Errors
///
/// - `ReaderError::InvalidArgument` - Zero cap, or `piece_position` does not
///   contain `view_offset`
pub fn max_forward(
    pieces: &PieceList,
    view_offset: u64,
    cap: u64,
    piece_position: usize,
) -> ReaderResult<u64> {
    let mut current_offset = check_preconditions(pieces, view_offset, cap, piece_position)?;
    let mut position = piece_position;
    let mut accumulated = 0u64;

    while let Some(piece) = pieces.get(position) {
        if !piece.is_finished() {
            return Ok(accumulated);
        }
        accumulated += piece.last_index() - current_offset + 1;
        if accumulated >= cap {
            return Ok(cap);
        }

        current_offset = piece.last_index() + 1;
        position += 1;
    }

    Ok(accumulated)
}

/// Counts contiguous finished bytes strictly before `view_offset`, capped at `cap`.
///
/// # Errors
///
/// - `ReaderError::InvalidArgument` - Zero cap, or `piece_position` does not
///   contain `view_offset`
pub fn max_backward(
    pieces: &PieceList,
    view_offset: u64,
    cap: u64,
    piece_position: usize,
) -> ReaderResult<u64> {
    let mut current_offset = check_preconditions(pieces, view_offset, cap, piece_position)?;
    let mut position = piece_position;
    let mut accumulated = 0u64;

    while let Some(piece) = pieces.get(position) {
        if !piece.is_finished() {
            return Ok(accumulated);
        }
        accumulated += current_offset - piece.start_index();
        if accumulated >= cap {
            return Ok(cap);
        }

        let Some(previous) = position.checked_sub(1) else {
            break;
        };
        current_offset = piece.start_index();
        position = previous;
    }

    Ok(accumulated)
}

/// Window `[position - backward, position + forward)` clamped to `[0, file_length)`.
pub fn refill_window(position: u64, file_length: u64, backward: u64, forward: u64) -> Range<u64> {
    let start = position.saturating_sub(backward);
    let end = position.saturating_add(forward).min(file_length);
    start..end
}

/// Returns the piece-space offset of `view_offset` after validating inputs.
fn check_preconditions(
    pieces: &PieceList,
    view_offset: u64,
    cap: u64,
    piece_position: usize,
) -> ReaderResult<u64> {
    if cap == 0 {
        return Err(ReaderError::InvalidArgument {
            reason: "cap must be positive, but was 0".to_string(),
        });
    }

    let logical = pieces
        .logical_start_offset()
        .checked_add(view_offset)
        .ok_or_else(|| ReaderError::InvalidArgument {
            reason: format!("view offset {view_offset} overflows piece space"),
        })?;

    match pieces.get(piece_position) {
        Some(piece) if piece.contains(logical) => Ok(logical),
        _ => Err(ReaderError::InvalidArgument {
            reason: format!(
                "piece at position {piece_position} does not contain view offset {view_offset}"
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pieces::PieceState;

    fn three_finished_pieces() -> PieceList {
        let list = PieceList::uniform(0, 4, 12).unwrap();
        list.set_all(PieceState::Finished);
        list
    }

    #[test]
    fn test_window_around_middle_piece() {
        let pieces = three_finished_pieces();
        let position = pieces.find_piece_index(6).unwrap();

        let forward = max_forward(&pieces, 6, 4, position).unwrap();
        let backward = max_backward(&pieces, 6, 4, position).unwrap();

        assert_eq!(forward, 4);
        assert_eq!(backward, 4);
        assert_eq!(refill_window(6, 12, backward, forward), 2..10);
    }

    #[test]
    fn test_piece_boundary_at_position() {
        let pieces = three_finished_pieces();

        let forward = max_forward(&pieces, 4, 4, 1).unwrap();
        let backward = max_backward(&pieces, 4, 4, 1).unwrap();

        assert_eq!(forward, 4);
        // Nothing of piece 1 lies behind offset 4; all of piece 0 does.
        assert_eq!(backward, 4);

        let pieces = PieceList::uniform(0, 4, 12).unwrap();
        pieces.get(1).unwrap().set_state(PieceState::Finished);
        pieces.get(2).unwrap().set_state(PieceState::Finished);
        assert_eq!(max_backward(&pieces, 4, 4, 1).unwrap(), 0);
        assert_eq!(refill_window(4, 12, 0, 4), 4..8);
    }

    #[test]
    fn test_stops_at_unfinished_neighbour() {
        let pieces = PieceList::uniform(0, 4, 12).unwrap();
        pieces.get(1).unwrap().set_state(PieceState::Finished);

        assert_eq!(max_forward(&pieces, 5, 100, 1).unwrap(), 3);
        assert_eq!(max_backward(&pieces, 5, 100, 1).unwrap(), 1);
    }

    #[test]
    fn test_uncapped_at_sequence_ends() {
        let pieces = three_finished_pieces();

        assert_eq!(max_forward(&pieces, 0, 100, 0).unwrap(), 12);
        assert_eq!(max_backward(&pieces, 11, 100, 2).unwrap(), 11);
        assert_eq!(max_backward(&pieces, 0, 100, 0).unwrap(), 0);
    }

    #[test]
    fn test_unfinished_current_piece_yields_zero() {
        let pieces = PieceList::uniform(0, 4, 12).unwrap();

        assert_eq!(max_forward(&pieces, 6, 4, 1).unwrap(), 0);
        assert_eq!(max_backward(&pieces, 6, 4, 1).unwrap(), 0);
    }

    #[test]
    fn test_respects_logical_start_offset() {
        let pieces = PieceList::uniform(1000, 4, 12).unwrap();
        pieces.set_all(PieceState::Finished);
        let position = pieces.find_piece_index(6).unwrap();

        assert_eq!(position, 1);
        assert_eq!(max_forward(&pieces, 6, 4, position).unwrap(), 4);
        assert_eq!(max_backward(&pieces, 6, 4, position).unwrap(), 4);
    }

    #[test]
    fn test_zero_cap_is_invalid() {
        let pieces = three_finished_pieces();

        assert!(matches!(
            max_forward(&pieces, 0, 0, 0),
            Err(ReaderError::InvalidArgument { .. })
        ));
        assert!(matches!(
            max_backward(&pieces, 0, 0, 0),
            Err(ReaderError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_wrong_piece_position_is_invalid() {
        let pieces = three_finished_pieces();

        assert!(matches!(
            max_forward(&pieces, 6, 4, 0),
            Err(ReaderError::InvalidArgument { .. })
        ));
        assert!(matches!(
            max_backward(&pieces, 6, 4, 7),
            Err(ReaderError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_refill_window_clamps() {
        assert_eq!(refill_window(2, 12, 4, 4), 0..6);
        assert_eq!(refill_window(10, 12, 4, 4), 6..12);
    }
}
