use core::ops::Index;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

pub use cell::*;
pub use error::*;
pub use game::*;
pub use generator::*;
pub use types::*;

mod cell;
mod error;
mod game;
mod generator;
mod types;

/// Validated construction parameters: a `side x side` field containing
/// `mines` mined cells.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    pub side: Coord,
    pub mines: CellCount,
}

impl GameConfig {
    pub const fn new_unchecked(side: Coord, mines: CellCount) -> Self {
        Self { side, mines }
    }

    pub fn new(side: Coord, mines: CellCount) -> Result<Self> {
        if side == 0 || mines > square(side) {
            return Err(GameError::InvalidConfig);
        }
        Ok(Self::new_unchecked(side, mines))
    }

    pub const fn total_cells(&self) -> CellCount {
        square(self.side)
    }
}

/// Immutable mine layout of a square board, with per-cell adjacent-mine
/// counts fixed at construction. Only the play state kept by [`Game`] mutates
/// after this is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Board {
    mine_mask: Array2<bool>,
    adjacent_counts: Array2<u8>,
    mine_count: CellCount,
}

impl Board {
    /// Builds a board from an explicit mine mask, which must be square with a
    /// side length of at least 1.
    pub fn from_mine_mask(mine_mask: Array2<bool>) -> Result<Self> {
        let dim = mine_mask.dim();
        if dim.0 != dim.1 || dim.0 == 0 || dim.0 > usize::from(Coord::MAX) {
            return Err(GameError::InvalidConfig);
        }
        Ok(Self::from_square_mask(mine_mask))
    }

    /// Builds a board with mines at exactly the given coordinates. This is
    /// the deterministic seam used by tests and replays; random play goes
    /// through a [`BoardGenerator`].
    pub fn from_mine_coords(side: Coord, mine_coords: &[Coord2]) -> Result<Self> {
        if side == 0 {
            return Err(GameError::InvalidConfig);
        }
        let mut mine_mask: Array2<bool> = Array2::default((side, side).to_nd_index());

        for &coords in mine_coords {
            if coords.0 >= side || coords.1 >= side {
                return Err(GameError::OutOfBounds);
            }
            mine_mask[coords.to_nd_index()] = true;
        }

        Ok(Self::from_square_mask(mine_mask))
    }

    pub(crate) fn from_square_mask(mine_mask: Array2<bool>) -> Self {
        debug_assert_eq!(mine_mask.dim().0, mine_mask.dim().1);
        let mine_count = mine_mask
            .iter()
            .filter(|&&is_mine| is_mine)
            .count()
            .try_into()
            .unwrap();

        let mut adjacent_counts = Array2::from_elem(mine_mask.raw_dim(), 0u8);
        for ((col, row), slot) in adjacent_counts.indexed_iter_mut() {
            let coords = (col.try_into().unwrap(), row.try_into().unwrap());
            if mine_mask[coords.to_nd_index()] {
                // never read for mined cells
                *slot = MINE_VALUE;
            } else {
                *slot = mine_mask
                    .iter_neighbors(coords)
                    .filter(|&pos| mine_mask[pos.to_nd_index()])
                    .count()
                    .try_into()
                    .unwrap();
            }
        }

        Self {
            mine_mask,
            adjacent_counts,
            mine_count,
        }
    }

    pub fn game_config(&self) -> GameConfig {
        GameConfig::new_unchecked(self.side(), self.mine_count)
    }

    pub fn validate_coords(&self, coords: Coord2) -> Result<Coord2> {
        let side = self.side();
        if coords.0 < side && coords.1 < side {
            Ok(coords)
        } else {
            Err(GameError::OutOfBounds)
        }
    }

    pub fn side(&self) -> Coord {
        self.mine_mask.dim().0.try_into().unwrap()
    }

    pub fn safe_cell_count(&self) -> CellCount {
        self.total_cells() - self.mine_count
    }

    pub fn total_cells(&self) -> CellCount {
        self.mine_mask.len().try_into().unwrap()
    }

    pub fn mine_count(&self) -> CellCount {
        self.mine_count
    }

    pub fn contains_mine(&self, coords: Coord2) -> bool {
        self[coords]
    }

    /// Number of mined cells in the Moore neighborhood. Fixed at
    /// construction; must not be called for a mined cell.
    pub fn adjacent_mine_count(&self, coords: Coord2) -> u8 {
        self.adjacent_counts[coords.to_nd_index()]
    }

    pub(crate) fn iter_neighbors(&self, coords: Coord2) -> NeighborIter {
        self.mine_mask.iter_neighbors(coords)
    }
}

impl Index<Coord2> for Board {
    type Output = bool;

    fn index(&self, coords: Coord2) -> &Self::Output {
        &self.mine_mask[coords.to_nd_index()]
    }
}
