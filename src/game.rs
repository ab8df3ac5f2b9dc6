use chrono::{DateTime, Utc};
use core::ops::BitOr;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{HashSet, VecDeque};

use crate::*;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GameState {
    Ready,
    Active,
    Won,
    Lost,
}

impl GameState {
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Won | Self::Lost)
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::Ready
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevealOutcome {
    NoChange,
    Revealed,
    Won,
    Lost,
}

impl RevealOutcome {
    pub const fn has_update(self) -> bool {
        !matches!(self, Self::NoChange)
    }
}

impl Default for RevealOutcome {
    fn default() -> Self {
        Self::NoChange
    }
}

/// Used to merge outcomes when one action reveals several cells.
impl BitOr for RevealOutcome {
    type Output = RevealOutcome;

    fn bitor(self, rhs: Self) -> Self::Output {
        use RevealOutcome::*;
        match (self, rhs) {
            (Lost, _) | (_, Lost) => Lost,
            (Won, _) | (_, Won) => Won,
            (Revealed, _) | (_, Revealed) => Revealed,
            (NoChange, NoChange) => NoChange,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagOutcome {
    NoChange,
    Changed,
    Won,
}

impl FlagOutcome {
    pub const fn has_update(self) -> bool {
        !matches!(self, Self::NoChange)
    }
}

/// Display updates produced by a reveal-type action, in the order the cells
/// were revealed. Empty with outcome `NoChange` when the action was a no-op.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RevealEffect {
    pub cells: Vec<(Coord2, CellView)>,
    pub outcome: RevealOutcome,
}

/// Result of a flag toggle. `flag_count` is the total number of flags on the
/// board after the action; it is deliberately not capped at the mine count,
/// so a remaining-mines display may go negative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlagEffect {
    pub cell: Option<(Coord2, CellView)>,
    pub flag_count: CellCount,
    pub outcome: FlagOutcome,
}

/// Represents a game from start to finish. Owns its [`Board`] exclusively;
/// the outside world only ever sees effect snapshots and read-only queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Game {
    board: Board,
    grid: Array2<CellState>,
    revealed_count: CellCount,
    flag_count: CellCount,
    correct_flag_count: CellCount,
    state: GameState,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl Game {
    pub fn new(board: Board) -> Self {
        let side = board.side();
        Self {
            board,
            grid: Array2::default((side, side).to_nd_index()),
            revealed_count: 0,
            flag_count: 0,
            correct_flag_count: 0,
            state: Default::default(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Starts a fresh game with the same configuration on a newly generated
    /// board. Returned by value: nothing can keep a stale handle to the old
    /// grid.
    pub fn reset<G: BoardGenerator>(&self, generator: G) -> Self {
        Self::new(generator.generate(self.game_config()))
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn is_won(&self) -> bool {
        matches!(self.state, GameState::Won)
    }

    pub fn is_lost(&self) -> bool {
        matches!(self.state, GameState::Lost)
    }

    pub fn game_config(&self) -> GameConfig {
        self.board.game_config()
    }

    pub fn side(&self) -> Coord {
        self.board.side()
    }

    pub fn total_mines(&self) -> CellCount {
        self.board.mine_count()
    }

    pub fn flag_count(&self) -> CellCount {
        self.flag_count
    }

    /// How many mines have not been flagged yet. Negative once the player
    /// has placed more flags than there are mines.
    pub fn mines_left(&self) -> isize {
        isize::try_from(self.board.mine_count()).unwrap()
            - isize::try_from(self.flag_count).unwrap()
    }

    pub fn cell_view(&self, coords: Coord2) -> CellView {
        self.grid[coords.to_nd_index()].into()
    }

    /// How many seconds have passed since the first effective action, 0 if
    /// the game hasn't started.
    pub fn elapsed_secs(&self) -> u32 {
        if let Some(started_at) = self.started_at {
            (self.ended_at.unwrap_or_else(Utc::now) - started_at)
                .num_seconds()
                .max(0) as u32
        } else {
            0
        }
    }

    /// Reveals a hidden cell. Revealing a mine loses the game and reveals
    /// the whole board; revealing a zero-count cell cascades through its
    /// zero-count region. Already-revealed and flagged cells, and any action
    /// after the game ended, produce an empty effect.
    pub fn reveal(&mut self, coords: Coord2) -> Result<RevealEffect> {
        let coords = self.board.validate_coords(coords)?;
        let mut effect = RevealEffect::default();

        if self.state.is_finished() || !self.grid[coords.to_nd_index()].is_hidden() {
            return Ok(effect);
        }

        self.reveal_cell(coords, &mut effect);
        self.finish_action(&mut effect);
        Ok(effect)
    }

    /// Toggles the flag on a hidden cell. No-op on revealed cells and after
    /// the game ended. Placing the last correct flag can win the game.
    pub fn toggle_flag(&mut self, coords: Coord2) -> Result<FlagEffect> {
        let coords = self.board.validate_coords(coords)?;
        let mut effect = FlagEffect {
            cell: None,
            flag_count: self.flag_count,
            outcome: FlagOutcome::NoChange,
        };

        if self.state.is_finished() {
            return Ok(effect);
        }

        match self.grid[coords.to_nd_index()] {
            CellState::Hidden => {
                self.grid[coords.to_nd_index()] = CellState::Flagged;
                self.flag_count += 1;
                if self.board.contains_mine(coords) {
                    self.correct_flag_count += 1;
                }
                effect.cell = Some((coords, CellView::Flagged));
                effect.outcome = FlagOutcome::Changed;
            }
            CellState::Flagged => {
                self.grid[coords.to_nd_index()] = CellState::Hidden;
                self.flag_count -= 1;
                if self.board.contains_mine(coords) {
                    self.correct_flag_count -= 1;
                }
                effect.cell = Some((coords, CellView::Hidden));
                effect.outcome = FlagOutcome::Changed;
            }
            CellState::Revealed(_) => {}
        }
        effect.flag_count = self.flag_count;

        if effect.outcome.has_update() {
            self.mark_started();
            if self.all_mines_flagged_and_rest_revealed() {
                self.end_game(true);
                effect.outcome = FlagOutcome::Won;
            }
        }
        Ok(effect)
    }

    /// Reveals all hidden unflagged neighbors of a revealed cell whose
    /// adjacent-mine count equals its flagged-neighbor count; any other cell
    /// produces an empty effect. A wrongly placed flag makes this lose the
    /// game exactly like revealing a mine directly.
    pub fn chord_reveal(&mut self, coords: Coord2) -> Result<RevealEffect> {
        let coords = self.board.validate_coords(coords)?;
        let mut effect = RevealEffect::default();

        if self.state.is_finished() {
            return Ok(effect);
        }
        let CellState::Revealed(count) = self.grid[coords.to_nd_index()] else {
            return Ok(effect);
        };
        if count != self.count_flagged_neighbors(coords) {
            return Ok(effect);
        }

        let hidden: SmallVec<[Coord2; 8]> = self
            .board
            .iter_neighbors(coords)
            .filter(|&pos| self.grid[pos.to_nd_index()].is_hidden())
            .collect();

        if hidden.iter().any(|&pos| self.board.contains_mine(pos)) {
            // the player guessed wrong about flag placement
            log::debug!("chord at {:?} uncovered a mine", coords);
            self.reveal_everything(&mut effect);
            self.end_game(false);
            effect.outcome = RevealOutcome::Lost;
            return Ok(effect);
        }

        for pos in hidden {
            self.reveal_cell(pos, &mut effect);
        }
        self.finish_action(&mut effect);
        Ok(effect)
    }

    /// Opens one hidden cell, flood-filling from it when its count is zero.
    /// Cells that stopped being hidden earlier in the same action are
    /// skipped here.
    fn reveal_cell(&mut self, coords: Coord2, effect: &mut RevealEffect) {
        if !self.grid[coords.to_nd_index()].is_hidden() {
            return;
        }

        if self.board.contains_mine(coords) {
            log::debug!("revealed mine at {:?}", coords);
            self.reveal_everything(effect);
            self.end_game(false);
            effect.outcome = effect.outcome | RevealOutcome::Lost;
            return;
        }

        let count = self.board.adjacent_mine_count(coords);
        self.open_cell(coords, count, effect);

        if count == 0 {
            let mut visited = HashSet::from([coords]);
            let mut to_visit: VecDeque<_> = self
                .board
                .iter_neighbors(coords)
                .filter(|&pos| self.grid[pos.to_nd_index()].is_hidden())
                .collect();

            while let Some(visit_coords) = to_visit.pop_front() {
                if !visited.insert(visit_coords) {
                    continue;
                }

                // flagged or meanwhile-opened cells stay untouched
                if !self.grid[visit_coords.to_nd_index()].is_hidden() {
                    continue;
                }

                let visit_count = self.board.adjacent_mine_count(visit_coords);
                self.open_cell(visit_coords, visit_count, effect);

                if visit_count == 0 {
                    to_visit.extend(
                        self.board
                            .iter_neighbors(visit_coords)
                            .filter(|&pos| self.grid[pos.to_nd_index()].is_hidden())
                            .filter(|pos| !visited.contains(pos)),
                    );
                }
            }
        }

        effect.outcome = effect.outcome | RevealOutcome::Revealed;
    }

    fn open_cell(&mut self, coords: Coord2, count: u8, effect: &mut RevealEffect) {
        log::trace!("open cell at {:?}, mine count: {}", coords, count);
        self.grid[coords.to_nd_index()] = CellState::Revealed(count);
        self.revealed_count += 1;
        effect.cells.push((coords, CellView::Count(count)));
    }

    /// Marks every cell revealed and records the final view of the whole
    /// board. Flags are wiped by the overwrite; the game is over and nothing
    /// reads the flag bookkeeping afterwards.
    fn reveal_everything(&mut self, effect: &mut RevealEffect) {
        let side = self.board.side();
        for col in 0..side {
            for row in 0..side {
                let coords = (col, row);
                let state = if self.board.contains_mine(coords) {
                    CellState::Revealed(MINE_VALUE)
                } else {
                    CellState::Revealed(self.board.adjacent_mine_count(coords))
                };
                self.grid[coords.to_nd_index()] = state;
                effect.cells.push((coords, state.into()));
            }
        }
    }

    fn finish_action(&mut self, effect: &mut RevealEffect) {
        if self.state.is_finished() {
            return;
        }
        if effect.outcome.has_update() {
            self.mark_started();
        }
        if self.all_mines_flagged_and_rest_revealed() {
            self.end_game(true);
            effect.outcome = effect.outcome | RevealOutcome::Won;
        }
    }

    /// The win condition: every mine carries a flag and every safe cell has
    /// been revealed. Neither alone is enough.
    fn all_mines_flagged_and_rest_revealed(&self) -> bool {
        self.correct_flag_count == self.board.mine_count()
            && self.revealed_count == self.board.safe_cell_count()
    }

    fn count_flagged_neighbors(&self, coords: Coord2) -> u8 {
        self.board
            .iter_neighbors(coords)
            .filter(|&pos| self.grid[pos.to_nd_index()].is_flagged())
            .count()
            .try_into()
            .unwrap()
    }

    fn mark_started(&mut self) {
        if matches!(self.state, GameState::Ready) {
            let now = Utc::now();
            log::debug!("game started at {}", now);
            self.started_at.replace(now);
            self.state = GameState::Active;
        }
    }

    fn end_game(&mut self, won: bool) {
        if self.state.is_finished() {
            return;
        }

        self.state = if won { GameState::Won } else { GameState::Lost };
        let now = Utc::now();
        self.started_at.get_or_insert(now);
        self.ended_at.replace(now);
        log::debug!("game ended at {}: {:?}", now, self.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game(side: Coord, mines: &[Coord2]) -> Game {
        Game::new(Board::from_mine_coords(side, mines).unwrap())
    }

    #[test]
    fn out_of_bounds_coordinates_are_an_error() {
        let mut game = game(3, &[]);
        assert_eq!(game.reveal((3, 0)), Err(GameError::OutOfBounds));
        assert_eq!(game.toggle_flag((0, 9)), Err(GameError::OutOfBounds));
        assert_eq!(game.chord_reveal((9, 9)), Err(GameError::OutOfBounds));
    }

    #[test]
    fn reveal_is_idempotent() {
        let mut game = game(3, &[(2, 2)]);

        let first = game.reveal((1, 0)).unwrap();
        assert_eq!(first.outcome, RevealOutcome::Revealed);
        assert!(!first.cells.is_empty());

        let second = game.reveal((1, 0)).unwrap();
        assert_eq!(second, RevealEffect::default());
    }

    #[test]
    fn reveal_flagged_cell_is_a_no_op() {
        let mut game = game(3, &[(2, 2)]);
        game.toggle_flag((0, 0)).unwrap();

        assert_eq!(game.reveal((0, 0)).unwrap(), RevealEffect::default());
        assert_eq!(game.cell_view((0, 0)), CellView::Flagged);
    }

    #[test]
    fn cascade_reveals_zero_region_and_its_border() {
        let mut game = game(5, &[(4, 4)]);

        let effect = game.reveal((0, 0)).unwrap();

        // every safe cell opens, each exactly once; the mine stays hidden
        assert_eq!(effect.outcome, RevealOutcome::Revealed);
        assert_eq!(effect.cells.len(), 24);
        let unique: HashSet<Coord2> = effect.cells.iter().map(|&(pos, _)| pos).collect();
        assert_eq!(unique.len(), 24);
        assert!(!unique.contains(&(4, 4)));
        assert_eq!(game.cell_view((4, 4)), CellView::Hidden);

        // the mine's border shows nonzero counts, the rest zero
        assert_eq!(game.cell_view((3, 3)), CellView::Count(1));
        assert_eq!(game.cell_view((3, 4)), CellView::Count(1));
        assert_eq!(game.cell_view((4, 3)), CellView::Count(1));
        assert_eq!(game.cell_view((0, 0)), CellView::Count(0));
        assert_eq!(game.cell_view((2, 2)), CellView::Count(0));

        // all safe cells revealed is not enough to win here
        assert_eq!(game.state(), GameState::Active);
    }

    #[test]
    fn cascade_does_not_open_flagged_cells() {
        let mut game = game(5, &[(4, 4)]);
        game.toggle_flag((2, 2)).unwrap();

        let effect = game.reveal((0, 0)).unwrap();

        assert_eq!(effect.cells.len(), 23);
        assert_eq!(game.cell_view((2, 2)), CellView::Flagged);
    }

    #[test]
    fn flagging_the_last_mine_wins_when_everything_else_is_revealed() {
        let mut game = game(5, &[(4, 4)]);
        game.reveal((0, 0)).unwrap();
        assert!(!game.is_won());

        let effect = game.toggle_flag((4, 4)).unwrap();

        assert_eq!(effect.outcome, FlagOutcome::Won);
        assert_eq!(effect.flag_count, 1);
        assert!(game.is_won());
        assert!(!game.is_lost());
    }

    #[test]
    fn revealing_the_last_safe_cell_wins_when_all_mines_are_flagged() {
        let mut game = game(2, &[(0, 0)]);
        game.toggle_flag((0, 0)).unwrap();
        game.reveal((1, 0)).unwrap();
        game.reveal((0, 1)).unwrap();

        let effect = game.reveal((1, 1)).unwrap();

        assert_eq!(effect.outcome, RevealOutcome::Won);
        assert!(game.is_won());
    }

    #[test]
    fn flag_on_the_wrong_cell_does_not_win() {
        let mut game = game(5, &[(4, 4)]);
        game.toggle_flag((0, 0)).unwrap();
        game.reveal((0, 1)).unwrap();

        // all reachable safe cells are revealed, but (0,0) is wrongly flagged
        assert_eq!(game.state(), GameState::Active);
        assert!(!game.is_won());
    }

    #[test]
    fn revealing_a_mine_loses_and_reveals_the_whole_board() {
        let mut game = game(3, &[(1, 1)]);

        let effect = game.reveal((1, 1)).unwrap();

        assert_eq!(effect.outcome, RevealOutcome::Lost);
        assert!(game.is_lost());
        assert_eq!(effect.cells.len(), 9);
        assert!(effect.cells.contains(&((1, 1), CellView::Mine)));
        assert!(effect.cells.contains(&((0, 0), CellView::Count(1))));
        assert_eq!(game.cell_view((1, 1)), CellView::Mine);
        assert_eq!(game.cell_view((2, 2)), CellView::Count(1));
    }

    #[test]
    fn terminal_game_ignores_further_actions() {
        let mut game = game(3, &[(1, 1)]);
        game.reveal((1, 1)).unwrap();
        assert!(game.is_lost());

        assert_eq!(game.reveal((0, 0)).unwrap(), RevealEffect::default());
        let flag = game.toggle_flag((0, 0)).unwrap();
        assert_eq!(flag.outcome, FlagOutcome::NoChange);
        assert_eq!(flag.cell, None);
        assert_eq!(game.chord_reveal((0, 0)).unwrap(), RevealEffect::default());
    }

    #[test]
    fn flag_count_is_not_capped_at_the_mine_count() {
        let mut game = game(3, &[(0, 0)]);

        game.toggle_flag((0, 1)).unwrap();
        game.toggle_flag((0, 2)).unwrap();
        let effect = game.toggle_flag((1, 0)).unwrap();

        assert_eq!(effect.flag_count, 3);
        assert_eq!(game.mines_left(), -2);

        let effect = game.toggle_flag((1, 0)).unwrap();
        assert_eq!(effect.flag_count, 2);
        assert_eq!(effect.cell, Some(((1, 0), CellView::Hidden)));
        assert_eq!(game.mines_left(), -1);
    }

    #[test]
    fn flagging_a_revealed_cell_is_a_no_op() {
        let mut game = game(3, &[(2, 2)]);
        game.reveal((0, 0)).unwrap();

        let effect = game.toggle_flag((0, 0)).unwrap();
        assert_eq!(effect.outcome, FlagOutcome::NoChange);
        assert_eq!(effect.flag_count, 0);
    }

    #[test]
    fn chord_without_matching_flags_is_a_no_op() {
        let mut game = game(3, &[(0, 1), (2, 1)]);
        game.reveal((1, 1)).unwrap();
        assert_eq!(game.cell_view((1, 1)), CellView::Count(2));
        game.toggle_flag((0, 1)).unwrap();

        // one flag against a count of two
        assert_eq!(game.chord_reveal((1, 1)).unwrap(), RevealEffect::default());
    }

    #[test]
    fn chord_on_a_hidden_cell_is_a_no_op() {
        let mut game = game(3, &[(0, 1), (2, 1)]);
        assert_eq!(game.chord_reveal((1, 1)).unwrap(), RevealEffect::default());
    }

    #[test]
    fn chord_with_correct_flags_reveals_the_rest() {
        let mut game = game(3, &[(0, 1), (2, 1)]);
        game.reveal((1, 1)).unwrap();
        game.toggle_flag((0, 1)).unwrap();
        game.toggle_flag((2, 1)).unwrap();

        let effect = game.chord_reveal((1, 1)).unwrap();

        // six hidden neighbors open, which also completes the win
        assert_eq!(effect.cells.len(), 6);
        assert_eq!(effect.outcome, RevealOutcome::Won);
        assert!(game.is_won());
        assert_eq!(game.cell_view((1, 0)), CellView::Count(2));
        assert_eq!(game.cell_view((1, 2)), CellView::Count(2));
        assert_eq!(game.cell_view((0, 0)), CellView::Count(1));
    }

    #[test]
    fn chord_with_a_misplaced_flag_loses() {
        let mut game = game(3, &[(0, 1), (2, 1)]);
        game.reveal((1, 1)).unwrap();
        game.toggle_flag((0, 1)).unwrap();
        game.toggle_flag((0, 0)).unwrap();

        // two flags match the count, but (2,1) is an unflagged mine
        let effect = game.chord_reveal((1, 1)).unwrap();

        assert_eq!(effect.outcome, RevealOutcome::Lost);
        assert!(game.is_lost());
        assert_eq!(effect.cells.len(), 9);
        assert!(effect.cells.contains(&((2, 1), CellView::Mine)));
    }

    #[test]
    fn mine_free_board_is_won_by_revealing_everything() {
        let mut game = game(2, &[]);

        let effect = game.reveal((0, 0)).unwrap();

        assert_eq!(effect.outcome, RevealOutcome::Won);
        assert_eq!(effect.cells.len(), 4);
        assert!(game.is_won());
    }

    #[test]
    fn fully_mined_board_is_won_by_flagging_everything() {
        let mut game = game(2, &[(0, 0), (0, 1), (1, 0), (1, 1)]);

        game.toggle_flag((0, 0)).unwrap();
        game.toggle_flag((0, 1)).unwrap();
        game.toggle_flag((1, 0)).unwrap();
        let effect = game.toggle_flag((1, 1)).unwrap();

        assert_eq!(effect.outcome, FlagOutcome::Won);
        assert!(game.is_won());
    }

    #[test]
    fn elapsed_is_zero_before_the_first_action() {
        let game = game(3, &[(0, 0)]);
        assert_eq!(game.elapsed_secs(), 0);
        assert_eq!(game.state(), GameState::Ready);
    }

    #[test]
    fn reset_starts_over_with_the_same_config() {
        let mut game = game(4, &[(0, 0), (3, 3)]);
        game.reveal((3, 0)).unwrap();
        game.toggle_flag((0, 0)).unwrap();

        let fresh = game.reset(RandomBoardGenerator::new(11));

        assert_eq!(fresh.game_config(), game.game_config());
        assert_eq!(fresh.state(), GameState::Ready);
        assert_eq!(fresh.flag_count(), 0);
        assert_eq!(fresh.cell_view((3, 0)), CellView::Hidden);
    }

    #[test]
    fn in_progress_game_survives_a_serde_round_trip() {
        let mut game = game(4, &[(1, 2), (3, 0)]);
        game.reveal((0, 0)).unwrap();
        game.toggle_flag((1, 2)).unwrap();

        let json = serde_json::to_string(&game).unwrap();
        let restored: Game = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, game);
    }
}
