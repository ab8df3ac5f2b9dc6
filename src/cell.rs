use serde::{Deserialize, Serialize};

/// Stored in place of an adjacency count for mined cells. A real count never
/// exceeds 8.
pub const MINE_VALUE: u8 = 9;

/// Per-cell play state tracked by the game. Flagging and revealing are
/// mutually exclusive by construction.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CellState {
    Hidden,
    Flagged,
    Revealed(u8),
}

impl CellState {
    pub const fn is_hidden(self) -> bool {
        matches!(self, Self::Hidden)
    }

    pub const fn is_flagged(self) -> bool {
        matches!(self, Self::Flagged)
    }

    pub const fn is_revealed(self) -> bool {
        matches!(self, Self::Revealed(_))
    }
}

impl Default for CellState {
    fn default() -> Self {
        Self::Hidden
    }
}

/// What the presentation layer is told to draw for one cell. `Mine` only
/// shows up once the game is lost.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellView {
    Hidden,
    Flagged,
    Count(u8),
    Mine,
}

impl From<CellState> for CellView {
    fn from(state: CellState) -> Self {
        match state {
            CellState::Hidden => CellView::Hidden,
            CellState::Flagged => CellView::Flagged,
            CellState::Revealed(MINE_VALUE) => CellView::Mine,
            CellState::Revealed(count) => CellView::Count(count),
        }
    }
}
