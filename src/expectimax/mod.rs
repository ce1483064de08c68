//! Expectimax search policy (single-threaded and parallel) for 2048.
//!
//! This module provides two policy implementations:
//! - [`Expectimax`]: single-threaded expectimax.
//! - [`ExpectimaxParallel`]: rayon-based expectimax, one worker per root direction.
//!
//! Both variants share the same public surface and produce identical results:
//! every root direction is searched with its own transposition cache, so the
//! order in which directions run does not matter.
//!
//! Quick start
//! ```
//! use expectimax_2048::engine::{Board, Engine};
//! use expectimax_2048::expectimax::{Expectimax, ExpectimaxConfig, ExpectimaxParallel};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let engine = Engine::new();
//! let mut rng = StdRng::seed_from_u64(123);
//! let b0 = Board::initial(&mut rng);
//!
//! let cfg = ExpectimaxConfig { depth_cap: Some(2), ..Default::default() };
//! let mut ex = Expectimax::with_config(&engine, cfg.clone());
//! let mut ex_par = ExpectimaxParallel::with_config(&engine, cfg);
//! let m = ex.best_move(b0);
//! assert!(m.is_some());
//! assert_eq!(m, ex_par.best_move(b0));
//! ```

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::{Board, Engine, Move};

mod search_par;
mod search_seq;

pub use search_par::ExpectimaxParallel;
pub use search_seq::Expectimax;

/// Chance branches whose cumulative probability drops below this are cut off.
pub const CPROB_THRESH_BASE: f64 = 0.0001;
/// Chance nodes at or below this depth are never cached.
pub const CACHE_DEPTH_LIMIT: u32 = 15;
const MIN_DEPTH: u32 = 3;
// Keeps a legal root move strictly above the 0.0 of an illegal one.
const ROOT_EPSILON: f64 = 1e-6;

/// Configurable knobs for Expectimax.
///
/// - `prob_cutoff`: prune chance branches when cumulative probability falls below this value.
/// - `depth_cap`: optional hard cap for the depth limit (None keeps the dynamic depth).
/// - `cache_enabled`: enable/disable transposition table usage.
/// - `cache_depth_limit`: chance nodes at this depth or deeper bypass the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectimaxConfig {
    pub prob_cutoff: f64,
    pub depth_cap: Option<u32>,
    pub cache_enabled: bool,
    pub cache_depth_limit: u32,
}

impl Default for ExpectimaxConfig {
    fn default() -> Self {
        Self {
            prob_cutoff: CPROB_THRESH_BASE,
            depth_cap: None,
            cache_enabled: true,
            cache_depth_limit: CACHE_DEPTH_LIMIT,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

impl ExpectimaxConfig {
    /// Parse a config from JSON; missing fields keep their defaults.
    ///
    /// ```
    /// use expectimax_2048::expectimax::ExpectimaxConfig;
    /// let cfg = ExpectimaxConfig::from_json_str(r#"{ "depth_cap": 4 }"#).unwrap();
    /// assert_eq!(cfg.depth_cap, Some(4));
    /// assert!(cfg.cache_enabled);
    /// ```
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.prob_cutoff) {
            return Err(ConfigError::Invalid("prob_cutoff must be in [0, 1)"));
        }
        if self.depth_cap == Some(0) {
            return Err(ConfigError::Invalid("depth_cap must be at least 1"));
        }
        Ok(())
    }

    /// Search depth for `board`: `max(3, distinct tiles - 2)`, clamped by `depth_cap`.
    ///
    /// More distinct tiles means a fuller, later-game board, which gets a deeper search.
    pub fn depth_limit(&self, board: Board) -> u32 {
        let dyn_depth = MIN_DEPTH.max(board.distinct_tiles().saturating_sub(2));
        match self.depth_cap {
            Some(cap) => dyn_depth.min(cap),
            None => dyn_depth,
        }
    }
}

/// Per-branch expected value at the root (no normalization).
///
/// - `ev` is the expected value for taking `dir` from the current board.
/// - `legal` is false when the move is a no-op for the current board.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchEval {
    pub dir: Move,
    pub ev: f64,
    pub legal: bool,
}

impl BranchEval {
    fn illegal(dir: Move) -> Self {
        Self { dir, ev: 0.0, legal: false }
    }
}

/// Search counters for a single evaluation, summed over root directions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Search nodes visited (max and chance).
    pub nodes: u64,
    /// Moves tried at max nodes.
    pub moves_evaled: u64,
    /// Moves at max nodes that left the board unchanged.
    pub no_moves: u64,
    /// Chance nodes resolved by the static heuristic.
    pub table_hits: u64,
    /// Chance nodes resolved by the transposition cache.
    pub cache_hits: u64,
    /// Entries left in the transposition caches.
    pub cache_size: u64,
    /// Deepest chance node reached.
    pub max_depth: u32,
    /// Depth limit used for the evaluation.
    pub depth_limit: u32,
}

impl SearchStats {
    fn absorb(&mut self, other: &SearchStats) {
        self.nodes += other.nodes;
        self.moves_evaled += other.moves_evaled;
        self.no_moves += other.no_moves;
        self.table_hits += other.table_hits;
        self.cache_hits += other.cache_hits;
        self.cache_size += other.cache_size;
        self.max_depth = self.max_depth.max(other.max_depth);
        self.depth_limit = self.depth_limit.max(other.depth_limit);
    }
}

/// Best legal move of a root evaluation; the first direction wins ties.
pub fn pick_best(branches: &[BranchEval; 4]) -> Option<Move> {
    let mut best = f64::NEG_INFINITY;
    let mut best_move = None;
    for branch in branches.iter().filter(|branch| branch.legal) {
        if branch.ev > best {
            best = branch.ev;
            best_move = Some(branch.dir);
        }
    }
    best_move
}

fn best_value(branches: &[BranchEval; 4]) -> f64 {
    branches
        .iter()
        .filter(|branch| branch.legal)
        .map(|branch| branch.ev)
        .fold(0.0, f64::max)
}

/// Best move for `board` with the default config and the shared engine tables.
///
/// Returns `None` when no direction changes the board.
pub fn best_move(board: Board) -> Option<Move> {
    Expectimax::new(Engine::shared()).best_move(board)
}
