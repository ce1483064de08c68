use rayon::prelude::*;

use crate::engine::{Board, Engine, Move};

use super::search_seq::evaluate_direction;
use super::{best_value, pick_best, BranchEval, ExpectimaxConfig, SearchStats};

/// Parallel Expectimax: the four root directions are searched on the rayon pool.
///
/// Each direction owns its transposition cache, so the result is the same
/// as [`super::Expectimax`] for the same config.
pub struct ExpectimaxParallel<'e> {
    engine: &'e Engine,
    cfg: ExpectimaxConfig,
    stats: SearchStats,
}

impl<'e> ExpectimaxParallel<'e> {
    pub fn new(engine: &'e Engine) -> Self {
        Self::with_config(engine, ExpectimaxConfig::default())
    }

    pub fn with_config(engine: &'e Engine, cfg: ExpectimaxConfig) -> Self {
        Self { engine, cfg, stats: SearchStats::default() }
    }

    #[inline]
    pub fn config(&self) -> &ExpectimaxConfig {
        &self.cfg
    }

    /// Compute the best move using parallel expectimax.
    ///
    /// This is a convenience wrapper around `branch_evals` that just picks the best move.
    pub fn best_move(&mut self, board: Board) -> Option<Move> {
        let branches = self.branch_evals(board);
        let best = pick_best(&branches);
        log::debug!("selected {best:?} for {board:?}");
        best
    }

    /// Equivalent to [`Self::best_move`].
    #[inline]
    pub fn get_next_move(&mut self, board: Board) -> Option<Move> {
        self.best_move(board)
    }

    /// Get both the best move and all branch evaluations from one search.
    pub fn best_move_with_branches(&mut self, board: Board) -> (Option<Move>, [BranchEval; 4]) {
        let branches = self.branch_evals(board);
        (pick_best(&branches), branches)
    }

    /// Compute EV for each direction (no normalization) in parallel.
    ///
    /// Returns a fixed array in order: `[Up, Down, Left, Right]` and marks
    /// illegal moves as `legal=false`.
    pub fn branch_evals(&mut self, board: Board) -> [BranchEval; 4] {
        let depth_limit = self.cfg.depth_limit(board);
        let engine = self.engine;
        let cfg = &self.cfg;
        let results: Vec<(BranchEval, SearchStats)> = Move::ALL
            .par_iter()
            .map(|&dir| evaluate_direction(engine, cfg, board, dir, depth_limit))
            .collect();

        // collect preserves the Up, Down, Left, Right order
        let mut stats = SearchStats { depth_limit, ..SearchStats::default() };
        let mut out = Move::ALL.map(BranchEval::illegal);
        for (slot, (branch, dir_stats)) in out.iter_mut().zip(results) {
            stats.absorb(&dir_stats);
            *slot = branch;
        }
        self.stats = stats;
        out
    }

    /// EV at root (max node), equivalent to the best branch EV; 0.0 when no move is legal.
    pub fn state_value(&mut self, board: Board) -> f64 {
        best_value(&self.branch_evals(board))
    }

    /// Statistics collected from the last call to [`Self::best_move`],
    /// [`Self::branch_evals`] or [`Self::state_value`].
    #[inline]
    pub fn last_stats(&self) -> SearchStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expectimax::Expectimax;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn matches_sequential_search() {
        let engine = Engine::new();
        let cfg = ExpectimaxConfig { depth_cap: Some(2), ..Default::default() };
        let mut seq = Expectimax::with_config(&engine, cfg.clone());
        let mut par = ExpectimaxParallel::with_config(&engine, cfg);
        let mut rng = StdRng::seed_from_u64(99);
        let mut b = Board::initial(&mut rng);
        for _ in 0..8 {
            assert_eq!(seq.branch_evals(b), par.branch_evals(b));
            assert_eq!(seq.last_stats(), par.last_stats());
            let (best, _) = par.best_move_with_branches(b);
            let Some(dir) = best else { break };
            assert_eq!(seq.best_move(b), Some(dir));
            b = engine.shift(b, dir).with_random_tile(&mut rng);
        }
    }

    #[test]
    fn no_move_when_stuck() {
        let engine = Engine::new();
        let stuck = Board::from_rows([[1, 2, 1, 2], [2, 1, 2, 1], [1, 2, 1, 2], [2, 1, 2, 1]]);
        let mut par = ExpectimaxParallel::new(&engine);
        assert_eq!(par.best_move(stuck), None);
        assert_eq!(par.state_value(stuck), 0.0);
    }
}
