//! Piece completion state shared between the download engine and readers
//!
//! A [`Piece`] is a fixed byte range in the engine's piece address space whose
//! contents become valid asynchronously. The engine owns the state transitions;
//! readers only observe them and wait for completion.

pub mod list;

use std::fmt;

use tokio::sync::watch;

pub use list::PieceList;

/// Zero-based index of a piece within a torrent.
///
/// Each piece has a sequential index starting from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Download state of a piece as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PieceState {
    /// Not yet requested from any peer
    #[default]
    Pending,
    /// Blocks are being downloaded
    Active,
    /// Downloaded and verified, safe to read
    Finished,
}

impl PieceState {
    /// Whether bytes covered by a piece in this state may be read.
    pub fn is_finished(self) -> bool {
        matches!(self, PieceState::Finished)
    }
}

/// A contiguous byte range of the piece address space with observable completion.
///
/// State changes are broadcast through a watch channel, so any number of tasks
/// can wait on the same piece and all of them wake when it finishes.
#[derive(Debug)]
pub struct Piece {
    index: PieceIndex,
    offset: u64,
    size: u64,
    state: watch::Sender<PieceState>,
}

impl Piece {
    /// Creates a pending piece covering `[offset, offset + size)`.
    pub fn new(index: PieceIndex, offset: u64, size: u64) -> Self {
        Self::with_state(index, offset, size, PieceState::Pending)
    }

    /// Creates a piece with an explicit initial state.
    pub fn with_state(index: PieceIndex, offset: u64, size: u64, state: PieceState) -> Self {
        let (state, _) = watch::channel(state);
        Self {
            index,
            offset,
            size,
            state,
        }
    }

    /// Index of this piece within its torrent.
    pub fn index(&self) -> PieceIndex {
        self.index
    }

    /// Absolute start of this piece in piece space.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length of this piece in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// First piece-space offset covered by this piece.
    pub fn start_index(&self) -> u64 {
        self.offset
    }

    /// Last piece-space offset covered by this piece (inclusive).
    ///
    /// Only meaningful for non-empty pieces, which [`PieceList`] guarantees.
    pub fn last_index(&self) -> u64 {
        self.offset + self.size.saturating_sub(1)
    }

    /// Whether `offset` in piece space falls inside this piece.
    pub fn contains(&self, offset: u64) -> bool {
        self.start_index() <= offset && offset <= self.last_index()
    }

    /// Current download state.
    pub fn state(&self) -> PieceState {
        *self.state.borrow()
    }

    /// Shorthand for `state().is_finished()`.
    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    /// Publishes a new state to every observer.
    ///
    /// Called by the download engine. Readers never mutate piece state.
    pub fn set_state(&self, state: PieceState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::trace!("Piece {} state {:?} -> {:?}", self.index, previous, state);
        }
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<PieceState> {
        self.state.subscribe()
    }

    /// Resolves once this piece is finished; immediately if it already is.
    pub async fn wait_finished(&self) {
        let mut receiver = self.state.subscribe();
        loop {
            let state = *receiver.borrow_and_update();
            if state.is_finished() {
                return;
            }
            // The sender lives in `self`, so the channel cannot close while we wait.
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}
