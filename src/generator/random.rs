use ndarray::Array2;
use rand::prelude::*;

use super::*;

/// Places mines by repeated uniform coordinate draws, rejecting duplicates
/// until the requested number of distinct cells is mined. Expected O(mines)
/// draws on sparse fields; degrades as the field fills up, which is fine for
/// the board sizes this crate targets.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RandomBoardGenerator {
    seed: u64,
}

impl RandomBoardGenerator {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn from_entropy() -> Self {
        Self::new(rand::random())
    }
}

impl BoardGenerator for RandomBoardGenerator {
    fn generate(self, config: GameConfig) -> Board {
        let side = usize::from(config.side);
        let mut mine_mask: Array2<bool> = Array2::default((side, side));
        let mut rng = SmallRng::seed_from_u64(self.seed);

        let mut placed: CellCount = 0;
        while placed < config.mines {
            let col = rng.random_range(0..config.side);
            let row = rng.random_range(0..config.side);
            let slot = &mut mine_mask[(col, row).to_nd_index()];
            if *slot {
                continue;
            }
            *slot = true;
            placed += 1;
        }
        log::debug!("generated {}x{} board with {} mines", side, side, placed);

        Board::from_square_mask(mine_mask)
    }
}
