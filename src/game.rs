//! A headless game session driven by any [`MoveSource`].

use rand::Rng;

use crate::engine::{Board, Engine, Move, Score};
use crate::expectimax::{Expectimax, ExpectimaxParallel};

/// What a move source wants to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Move(Move),
    Quit,
}

/// Anything that can pick moves: a search policy, a scripted sequence, or a
/// keyboard adapter living outside this crate.
pub trait MoveSource {
    fn next_action(&mut self, board: Board) -> Action;
}

impl MoveSource for Expectimax<'_> {
    fn next_action(&mut self, board: Board) -> Action {
        self.best_move(board).map_or(Action::Quit, Action::Move)
    }
}

impl MoveSource for ExpectimaxParallel<'_> {
    fn next_action(&mut self, board: Board) -> Action {
        self.best_move(board).map_or(Action::Quit, Action::Move)
    }
}

impl<F: FnMut(Board) -> Action> MoveSource for F {
    fn next_action(&mut self, board: Board) -> Action {
        self(board)
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameError {
    #[error("moving {0} does not change the board")]
    IllegalMove(Move),
    #[error("the game is over")]
    GameOver,
}

/// Why [`Game::play`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEnd {
    /// No direction changes the board.
    NoMoves,
    /// The move source gave up.
    Quit,
    /// The move limit passed to [`Game::play`] was reached.
    MoveLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameSummary {
    pub board: Board,
    pub moves: u32,
    pub score: Score,
    pub highest_tile: u32,
    pub end: GameEnd,
}

/// Points the static score credits to a spawned 4 that was never merged.
const FOUR_TILE_PENALTY: Score = 4;

/// One game: the board, the RNG that spawns tiles and the running score.
pub struct Game<'e, R> {
    engine: &'e Engine,
    rng: R,
    board: Board,
    score_penalty: Score,
    moves: u32,
}

impl<'e, R: Rng> Game<'e, R> {
    /// Start a game on a board with two random seed tiles.
    ///
    /// ```
    /// use expectimax_2048::engine::Engine;
    /// use expectimax_2048::game::Game;
    /// use rand::{rngs::StdRng, SeedableRng};
    /// let engine = Engine::new();
    /// let game = Game::new(&engine, StdRng::seed_from_u64(3));
    /// assert_eq!(game.board().count_empty(), 14);
    /// assert_eq!(game.moves(), 0);
    /// ```
    pub fn new(engine: &'e Engine, rng: R) -> Self {
        let mut game = Self::from_board(engine, Board::EMPTY, rng);
        game.spawn();
        game.spawn();
        game
    }

    /// Continue from an existing board; its tiles are assumed to be built from 2s.
    pub fn from_board(engine: &'e Engine, board: Board, rng: R) -> Self {
        Self { engine, rng, board, score_penalty: 0, moves: 0 }
    }

    #[inline]
    pub fn board(&self) -> Board {
        self.board
    }

    #[inline]
    pub fn moves(&self) -> u32 {
        self.moves
    }

    /// Running score: merge points of the board minus the 4s that spawned.
    pub fn score(&self) -> Score {
        self.engine.score(self.board).saturating_sub(self.score_penalty)
    }

    pub fn is_over(&self) -> bool {
        self.engine.is_game_over(self.board)
    }

    pub fn summary(&self, end: GameEnd) -> GameSummary {
        GameSummary {
            board: self.board,
            moves: self.moves,
            score: self.score(),
            highest_tile: self.board.highest_tile(),
            end,
        }
    }

    /// Slide in `dir`, then spawn a random tile.
    ///
    /// ```
    /// use expectimax_2048::engine::{Board, Engine, Move};
    /// use expectimax_2048::game::{Game, GameError};
    /// use rand::{rngs::StdRng, SeedableRng};
    /// let engine = Engine::new();
    /// let start = Board::from_rows([[1, 0, 0, 0], [0; 4], [0; 4], [0; 4]]);
    /// let mut game = Game::from_board(&engine, start, StdRng::seed_from_u64(5));
    /// assert_eq!(game.step(Move::Left), Err(GameError::IllegalMove(Move::Left)));
    /// let board = game.step(Move::Right).unwrap();
    /// assert_eq!(board.count_empty(), 14);
    /// ```
    pub fn step(&mut self, dir: Move) -> Result<Board, GameError> {
        if self.is_over() {
            return Err(GameError::GameOver);
        }
        let (moved, gained) = self.engine.shift_scored(self.board, dir);
        if moved == self.board {
            return Err(GameError::IllegalMove(dir));
        }
        let before = self.score();
        self.board = moved;
        self.spawn();
        self.moves += 1;
        log::debug!(
            "move #{} {dir}: score={} (+{}), merged {gained}",
            self.moves,
            self.score(),
            self.score().saturating_sub(before),
        );
        Ok(self.board)
    }

    /// Play until the board is stuck, the source quits or `max_moves` is reached.
    ///
    /// `on_step` sees every applied move and the board after the spawn.
    /// Illegal moves from the source are logged and the source is asked again.
    pub fn play<S, F>(&mut self, source: &mut S, max_moves: Option<u32>, mut on_step: F) -> GameSummary
    where
        S: MoveSource + ?Sized,
        F: FnMut(Move, Board),
    {
        let end = loop {
            if self.is_over() {
                break GameEnd::NoMoves;
            }
            if max_moves.is_some_and(|limit| self.moves >= limit) {
                break GameEnd::MoveLimit;
            }
            match source.next_action(self.board) {
                Action::Quit => break GameEnd::Quit,
                Action::Move(dir) => match self.step(dir) {
                    Ok(board) => on_step(dir, board),
                    Err(err) => log::warn!("ignoring move: {err}"),
                },
            }
        };
        let summary = self.summary(end);
        log::info!(
            "game over ({:?}) after {} moves: score {}, highest tile {}",
            summary.end,
            summary.moves,
            summary.score,
            summary.highest_tile,
        );
        summary
    }

    fn spawn(&mut self) {
        if let Some((board, rank)) = self.board.spawn_random_tile(&mut self.rng) {
            if rank == 2 {
                self.score_penalty += FOUR_TILE_PENALTY;
            }
            self.board = board;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expectimax::ExpectimaxConfig;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn score_discounts_spawned_fours() {
        let engine = Engine::new();
        let mut game = Game::new(&engine, StdRng::seed_from_u64(17));
        for dir in Move::ALL.iter().cycle().take(40) {
            let _ = game.step(*dir);
        }
        let fours_credit = engine.score(game.board()) - game.score();
        assert_eq!(fours_credit % FOUR_TILE_PENALTY, 0);
        assert!(game.score() <= engine.score(game.board()));
    }

    #[test]
    fn static_score_never_drops_over_a_step() {
        let engine = Engine::new();
        let mut game = Game::new(&engine, StdRng::seed_from_u64(4));
        let mut last = engine.score(game.board());
        for dir in Move::ALL.iter().cycle().take(60) {
            if game.step(*dir).is_ok() {
                let now = engine.score(game.board());
                assert!(now >= last);
                last = now;
            }
        }
    }

    #[test]
    fn step_on_stuck_board_is_game_over() {
        let engine = Engine::new();
        let stuck = Board::from_rows([[1, 2, 1, 2], [2, 1, 2, 1], [1, 2, 1, 2], [2, 1, 2, 1]]);
        let mut game = Game::from_board(&engine, stuck, StdRng::seed_from_u64(0));
        assert_eq!(game.step(Move::Up), Err(GameError::GameOver));
        let summary = game.play(&mut |_: Board| Action::Quit, None, |_, _| {});
        assert_eq!(summary.end, GameEnd::NoMoves);
        assert_eq!(summary.moves, 0);
    }

    #[test]
    fn play_respects_move_limit_and_quit() {
        let engine = Engine::new();
        let mut game = Game::new(&engine, StdRng::seed_from_u64(8));
        let mut scripted = |board: Board| engine.legal_moves(board).next().map_or(Action::Quit, Action::Move);
        let mut seen = Vec::new();
        let summary = game.play(&mut scripted, Some(5), |dir, board| seen.push((dir, board)));
        assert_eq!(summary.end, GameEnd::MoveLimit);
        assert_eq!(summary.moves, 5);
        assert_eq!(seen.len(), 5);
        assert_eq!(seen.last().map(|&(_, b)| b), Some(game.board()));

        let summary = game.play(&mut |_: Board| Action::Quit, None, |_, _| {});
        assert_eq!(summary.end, GameEnd::Quit);
        assert_eq!(summary.moves, 5);
    }

    #[test]
    fn expectimax_plays_a_short_game() {
        let engine = Engine::new();
        let mut policy =
            Expectimax::with_config(&engine, ExpectimaxConfig { depth_cap: Some(1), ..Default::default() });
        let mut game = Game::new(&engine, StdRng::seed_from_u64(2048));
        let summary = game.play(&mut policy, Some(30), |_, _| {});
        assert_eq!(summary.moves, 30);
        assert!(summary.highest_tile >= 8);
    }
}
