use std::collections::HashMap;

use ahash::RandomState;

use crate::engine::{Board, Engine, Move};

use super::{best_value, pick_best, BranchEval, ExpectimaxConfig, SearchStats, ROOT_EPSILON};

const TWO_PROB: f64 = 0.9;
const FOUR_PROB: f64 = 0.1;

#[derive(Clone, Copy)]
enum Node {
    Max,
    Chance,
}

#[derive(Clone, Copy)]
struct TranspositionEntry {
    depth: u32,
    heuristic: f64,
}

/// Mutable state of one root-direction search; dropped when it returns.
struct EvalState<'a> {
    engine: &'a Engine,
    cfg: &'a ExpectimaxConfig,
    cache: HashMap<Board, TranspositionEntry, RandomState>,
    cur_depth: u32,
    depth_limit: u32,
    stats: SearchStats,
}

impl<'a> EvalState<'a> {
    fn new(engine: &'a Engine, cfg: &'a ExpectimaxConfig, depth_limit: u32) -> Self {
        Self {
            engine,
            cfg,
            cache: HashMap::with_hasher(RandomState::new()),
            cur_depth: 0,
            depth_limit,
            stats: SearchStats { depth_limit, ..SearchStats::default() },
        }
    }

    fn expectimax(&mut self, board: Board, node: Node, cprob: f64) -> f64 {
        self.stats.nodes += 1;
        match node {
            Node::Max => self.score_move_node(board, cprob),
            Node::Chance => self.score_tilechoose_node(board, cprob),
        }
    }

    fn score_move_node(&mut self, board: Board, cprob: f64) -> f64 {
        let mut best = 0.0;
        self.cur_depth += 1;
        for dir in Move::ALL {
            let new_board = self.engine.shift(board, dir);
            self.stats.moves_evaled += 1;
            if new_board != board {
                let score = self.expectimax(new_board, Node::Chance, cprob);
                if score > best {
                    best = score;
                }
            } else {
                self.stats.no_moves += 1;
            }
        }
        self.cur_depth -= 1;
        best
    }

    fn score_tilechoose_node(&mut self, board: Board, cprob: f64) -> f64 {
        if cprob < self.cfg.prob_cutoff || self.cur_depth >= self.depth_limit {
            self.stats.max_depth = self.stats.max_depth.max(self.cur_depth);
            self.stats.table_hits += 1;
            return self.engine.heuristic(board);
        }
        let cacheable = self.cfg.cache_enabled && self.cur_depth < self.cfg.cache_depth_limit;
        if cacheable {
            if let Some(entry) = self.cache.get(&board) {
                // only reuse values searched with at least as much remaining depth
                if entry.depth <= self.cur_depth {
                    self.stats.cache_hits += 1;
                    return entry.heuristic;
                }
            }
        }

        let num_open = board.count_empty();
        if num_open == 0 {
            return self.engine.heuristic(board);
        }
        let base_prob = cprob / f64::from(num_open);
        let mut score = 0.0;
        let mut tmp = board.raw();
        let mut insert_tile = 1u64;
        while insert_tile != 0 {
            if (tmp & 0xf) == 0 {
                let board2 = Board::from_raw(board.raw() | insert_tile);
                score += self.expectimax(board2, Node::Max, base_prob * TWO_PROB) * TWO_PROB;
                let board4 = Board::from_raw(board.raw() | (insert_tile << 1));
                score += self.expectimax(board4, Node::Max, base_prob * FOUR_PROB) * FOUR_PROB;
            }
            tmp >>= 4;
            insert_tile <<= 4;
        }
        score /= f64::from(num_open);

        if cacheable {
            self.cache
                .entry(board)
                .or_insert(TranspositionEntry { depth: self.cur_depth, heuristic: score });
        }
        score
    }
}

/// Evaluate one root direction with a fresh search state.
pub(super) fn evaluate_direction(
    engine: &Engine,
    cfg: &ExpectimaxConfig,
    board: Board,
    dir: Move,
    depth_limit: u32,
) -> (BranchEval, SearchStats) {
    let new_board = engine.shift(board, dir);
    if new_board == board {
        log::trace!("move {dir}: no change");
        return (BranchEval::illegal(dir), SearchStats { depth_limit, ..SearchStats::default() });
    }
    let mut state = EvalState::new(engine, cfg, depth_limit);
    let ev = state.expectimax(new_board, Node::Chance, 1.0) + ROOT_EPSILON;
    state.stats.cache_size = state.cache.len() as u64;
    let stats = state.stats;
    log::debug!(
        "move {dir}: result {ev:.6}: eval'd {} moves ({} no moves, {} table hits, {} cache hits, {} cache size) (maxdepth={})",
        stats.moves_evaled,
        stats.no_moves,
        stats.table_hits,
        stats.cache_hits,
        stats.cache_size,
        stats.max_depth,
    );
    (BranchEval { dir, ev, legal: true }, stats)
}

/// Single-threaded Expectimax search.
///
/// Borrows the engine tables; each call searches the four root directions
/// one after another.
pub struct Expectimax<'e> {
    engine: &'e Engine,
    cfg: ExpectimaxConfig,
    stats: SearchStats,
}

impl<'e> Expectimax<'e> {
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

    /// Equivalent to [`Self::best_move`].
    #[inline]
    pub fn get_next_move(&mut self, board: Board) -> Option<Move> {
        self.best_move(board)
    }

    /// Compute the best move using expectimax; `None` when no move is legal.
    ///
    /// Example
    /// ```
    /// use expectimax_2048::engine::{Board, Engine};
    /// use expectimax_2048::expectimax::Expectimax;
    /// let engine = Engine::new();
    /// let stuck = Board::from_rows([[1, 2, 1, 2], [2, 1, 2, 1], [1, 2, 1, 2], [2, 1, 2, 1]]);
    /// assert_eq!(Expectimax::new(&engine).best_move(stuck), None);
    /// ```
    pub fn best_move(&mut self, board: Board) -> Option<Move> {
        let branches = self.branch_evals(board);
        let best = pick_best(&branches);
        log::debug!("selected {best:?} for {board:?}");
        best
    }

    /// Compute EV for each direction (no normalization).
    ///
    /// Returns a fixed array in order: `[Up, Down, Left, Right]` and marks
    /// illegal moves as `legal=false`.
    pub fn branch_evals(&mut self, board: Board) -> [BranchEval; 4] {
        let depth_limit = self.cfg.depth_limit(board);
        let mut stats = SearchStats { depth_limit, ..SearchStats::default() };
        let branches = Move::ALL.map(|dir| {
            let (branch, dir_stats) = evaluate_direction(self.engine, &self.cfg, board, dir, depth_limit);
            stats.absorb(&dir_stats);
            branch
        });
        self.stats = stats;
        branches
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
    use rand::{rngs::StdRng, SeedableRng};

    fn shallow() -> ExpectimaxConfig {
        ExpectimaxConfig { depth_cap: Some(2), ..Default::default() }
    }

    #[test]
    fn finds_a_move_on_fresh_boards() {
        let engine = Engine::new();
        let mut ex = Expectimax::with_config(&engine, shallow());
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..4 {
            let b = Board::initial(&mut rng);
            let m = ex.best_move(b).unwrap();
            assert!(engine.can_move(b, m));
        }
    }

    #[test]
    fn no_move_when_stuck() {
        let engine = Engine::new();
        let stuck = Board::from_rows([[1, 2, 1, 2], [2, 1, 2, 1], [1, 2, 1, 2], [2, 1, 2, 1]]);
        let mut ex = Expectimax::new(&engine);
        assert_eq!(ex.best_move(stuck), None);
        assert_eq!(ex.state_value(stuck), 0.0);
        assert!(ex.branch_evals(stuck).iter().all(|b| !b.legal && b.ev == 0.0));
        assert_eq!(ex.last_stats().nodes, 0);
    }

    #[test]
    fn illegal_branches_are_marked() {
        let engine = Engine::new();
        // everything already packed against the top-left corner
        let b = Board::from_rows([[3, 1, 0, 0], [1, 0, 0, 0], [0; 4], [0; 4]]);
        let mut ex = Expectimax::with_config(&engine, shallow());
        let branches = ex.branch_evals(b);
        assert_eq!(branches.map(|br| br.dir), Move::ALL);
        assert!(!branches[0].legal, "up");
        assert!(!branches[2].legal, "left");
        assert!(branches[1].legal && branches[1].ev > 0.0);
        assert!(branches[3].legal && branches[3].ev > 0.0);
        let best = ex.best_move(b).unwrap();
        assert!(best == Move::Down || best == Move::Right);
    }

    #[test]
    fn picks_a_legal_move_near_the_end() {
        let engine = Engine::new();
        // only the bottom-left hole lets tiles slide: left or down
        let b = Board::from_rows([[1, 2, 1, 2], [2, 1, 2, 1], [1, 2, 1, 2], [0, 3, 4, 5]]);
        assert_eq!(engine.legal_moves(b).collect::<Vec<_>>(), vec![Move::Down, Move::Left]);
        let mut ex = Expectimax::new(&engine);
        let best = ex.best_move(b).unwrap();
        assert!(best == Move::Down || best == Move::Left);
        assert_eq!(ex.last_stats().depth_limit, 3);
    }

    #[test]
    fn depth_limit_bounds_the_search() {
        let engine = Engine::new();
        let b = Board::from_rows([[1, 1, 0, 0], [0; 4], [0; 4], [0; 4]]);
        let mut ex = Expectimax::with_config(&engine, ExpectimaxConfig { depth_cap: Some(1), ..Default::default() });
        ex.best_move(b);
        let stats = ex.last_stats();
        assert_eq!(stats.depth_limit, 1);
        assert_eq!(stats.max_depth, 1);
        assert!(stats.table_hits > 0);
    }

    #[test]
    fn cache_does_not_change_the_decision() {
        let engine = Engine::new();
        let mut rng = StdRng::seed_from_u64(21);
        let mut cached = Expectimax::with_config(&engine, shallow());
        let mut uncached =
            Expectimax::with_config(&engine, ExpectimaxConfig { cache_enabled: false, ..shallow() });
        let mut b = Board::initial(&mut rng);
        for _ in 0..6 {
            let evs_cached = cached.branch_evals(b);
            let evs_uncached = uncached.branch_evals(b);
            assert_eq!(uncached.last_stats().cache_hits, 0);
            assert_eq!(uncached.last_stats().cache_size, 0);
            for (c, u) in evs_cached.iter().zip(evs_uncached.iter()) {
                assert_eq!(c.legal, u.legal);
                assert!((c.ev - u.ev).abs() <= 1e-6 * u.ev.abs().max(1.0));
            }
            let dir = cached.best_move(b).unwrap();
            b = engine.shift(b, dir).with_random_tile(&mut rng);
        }
    }

    #[test]
    fn cache_entry_reused_only_from_shallower_depth() {
        let engine = Engine::new();
        let cfg = ExpectimaxConfig::default();
        let b = Board::from_rows([[1, 2, 0, 0], [0; 4], [0; 4], [0; 4]]);
        let planted = TranspositionEntry { depth: 0, heuristic: 42.0 };

        // searched with more remaining depth than now: reuse it
        let mut state = EvalState::new(&engine, &cfg, 2);
        state.cache.insert(b, planted);
        state.cur_depth = 1;
        assert_eq!(state.score_tilechoose_node(b, 1.0), 42.0);
        assert_eq!(state.stats.cache_hits, 1);
        assert_eq!(state.stats.nodes, 0);

        // searched with less remaining depth: search again, keep the old entry
        let mut state = EvalState::new(&engine, &cfg, 2);
        state.cache.insert(b, TranspositionEntry { depth: 2, ..planted });
        state.cur_depth = 1;
        let value = state.score_tilechoose_node(b, 1.0);
        assert_ne!(value, 42.0);
        assert!(state.stats.nodes > 0);
        assert_eq!(state.cache[&b].depth, 2);
        assert_eq!(state.cache[&b].heuristic, 42.0);
    }

    #[test]
    fn cache_depth_limit_bypasses_the_cache() {
        let engine = Engine::new();
        let b = Board::from_rows([[1, 1, 2, 0], [0, 1, 0, 0], [0; 4], [0; 4]]);
        let cfg = ExpectimaxConfig { depth_cap: Some(3), cache_depth_limit: 0, ..Default::default() };
        let mut bypassed = Expectimax::with_config(&engine, cfg);
        let mut uncached =
            Expectimax::with_config(&engine, ExpectimaxConfig { cache_enabled: false, ..bypassed.config().clone() });
        assert_eq!(bypassed.branch_evals(b), uncached.branch_evals(b));
        let stats = bypassed.last_stats();
        assert_eq!(stats.cache_size, 0);
        assert_eq!(stats.cache_hits, 0);
        assert_eq!(stats, uncached.last_stats());

        let mut cached = Expectimax::with_config(&engine, ExpectimaxConfig { depth_cap: Some(3), ..Default::default() });
        cached.branch_evals(b);
        assert!(cached.last_stats().cache_size > 0);
    }

    #[test]
    fn state_value_is_best_branch() {
        let engine = Engine::new();
        let b = Board::from_rows([[2, 1, 0, 0], [1, 0, 0, 0], [0; 4], [0; 4]]);
        let mut ex = Expectimax::with_config(&engine, shallow());
        let branches = ex.branch_evals(b);
        let value = ex.state_value(b);
        let max = branches.iter().filter(|b| b.legal).map(|b| b.ev).fold(0.0, f64::max);
        assert_eq!(value, max);
    }
}
