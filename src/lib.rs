//! expectimax-2048: a bit-packed 2048 engine + Expectimax policy
//!
//! This crate provides:
//! - A compact `Board` type (16 nibbles in a `u64`) and an `Engine` holding the
//!   precomputed move, score and heuristic tables
//! - An Expectimax AI (`expectimax` module) with single-threaded and parallel variants
//! - A headless game session (`game` module) driven by any `MoveSource`
//! - A binary record format for played runs (`trace` module)
//!
//! Quick start:
//! ```
//! use expectimax_2048::engine::{Board, Engine, Move};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! // Build the tables once and share them by reference
//! let engine = Engine::new();
//!
//! // Deterministic board initialization with a seeded RNG
//! let mut rng = StdRng::seed_from_u64(42);
//! let b0 = Board::initial(&mut rng);
//! let b1 = engine.shift(b0, Move::Left);
//! assert!(engine.score(b1) >= engine.score(b0));
//! ```
//!
//! Note: there are also free functions (`engine::shift`, `engine::get_score`,
//! `expectimax::best_move`, ...) backed by a lazily built shared `Engine`.
//!
//! Full loop
//! ```
//! use expectimax_2048::engine::Engine;
//! use expectimax_2048::expectimax::{Expectimax, ExpectimaxConfig};
//! use expectimax_2048::game::Game;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let engine = Engine::new();
//! let cfg = ExpectimaxConfig { depth_cap: Some(2), ..Default::default() };
//! let mut policy = Expectimax::with_config(&engine, cfg);
//! let mut game = Game::new(&engine, StdRng::seed_from_u64(123));
//!
//! // Keep doctests fast: stop after a few moves
//! let summary = game.play(&mut policy, Some(4), |_, _| {});
//! assert_eq!(summary.moves, 4);
//! ```
//!
pub mod engine;
pub mod expectimax;
pub mod game;
pub mod heuristic;
pub mod trace;
