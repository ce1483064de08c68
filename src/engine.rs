use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::heuristic;

/// A direction to move/merge tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Move {
    Up,
    Down,
    Left,
    Right,
}

impl Move {
    /// Every direction, in the order the search enumerates them.
    pub const ALL: [Move; 4] = [Move::Up, Move::Down, Move::Left, Move::Right];

    /// Stable numeric code (`Up = 0` .. `Right = 3`).
    #[inline]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Inverse of [`Move::index`].
    pub fn from_index(idx: u8) -> Option<Move> {
        Move::ALL.get(usize::from(idx)).copied()
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Move::Up => "up",
            Move::Down => "down",
            Move::Left => "left",
            Move::Right => "right",
        };
        f.write_str(name)
    }
}

const LINE_TABLE_SIZE: usize = 0x1_0000; // 65,536 possible 16-bit lines
const ROW_MASK: BoardRaw = 0xFFFF;
const COL_MASK: BoardRaw = 0x000F_000F_000F_000F;
const MAX_RANK: u8 = 15;

type BoardRaw = u64;
type Line = u16;
pub type Score = u64;

/// Packed 4x4 2048 board as 16 4-bit nibbles in a `u64`.
///
/// Nibble `i` (counting from the least significant end) holds the exponent
/// of cell `(row = i / 4, col = i % 4)`; `0` is an empty cell. Column 0 is
/// the left edge and row 0 the top edge, so `Left` slides towards lower
/// nibbles and `Up` towards lower rows.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Board(BoardRaw);

impl Board {
    /// A constant empty board (all zeros).
    pub const EMPTY: Board = Board(0);

    /// Construct a `Board` from its raw packed representation.
    #[inline]
    pub fn from_raw(raw: BoardRaw) -> Self {
        Board(raw)
    }

    /// Consume this `Board`, returning the raw packed `u64`.
    #[inline]
    pub fn into_raw(self) -> BoardRaw {
        self.0
    }

    /// Borrow the raw packed `u64` for this `Board`.
    #[inline]
    pub fn raw(&self) -> BoardRaw {
        self.0
    }

    /// Build a board from a grid of exponents, `rows[row][col]`.
    ///
    /// Exponents are truncated to 4 bits.
    ///
    /// ```
    /// use expectimax_2048::engine::Board;
    /// let b = Board::from_rows([[1, 1, 0, 0], [0; 4], [0; 4], [0; 4]]);
    /// assert_eq!(b.raw(), 0x11);
    /// ```
    pub fn from_rows(rows: [[u8; 4]; 4]) -> Self {
        let raw = rows
            .iter()
            .flatten()
            .enumerate()
            .fold(0, |acc, (idx, &rank)| acc | (BoardRaw::from(rank & 0xf) << (4 * idx)));
        Board(raw)
    }

    /// Exponents of all 16 cells in row-major order.
    pub fn cells(self) -> [u8; 16] {
        let mut cells = [0u8; 16];
        for (idx, cell) in cells.iter_mut().enumerate() {
            *cell = self.tile_exponent(idx);
        }
        cells
    }

    /// Exponents as a `rows[row][col]` grid.
    pub fn rows(self) -> [[u8; 4]; 4] {
        let mut rows = [[0u8; 4]; 4];
        for (idx, &rank) in self.cells().iter().enumerate() {
            rows[idx / 4][idx % 4] = rank;
        }
        rows
    }

    /// Exponent stored at cell `idx` (row-major, 0..16).
    #[inline]
    pub fn tile_exponent(self, idx: usize) -> u8 {
        debug_assert!(idx < 16);
        ((self.0 >> (4 * idx)) & 0xf) as u8
    }

    /// Tile value at cell `idx` (0 if empty), e.g. 2, 4, 8, ...
    #[inline]
    pub fn tile_value(self, idx: usize) -> u32 {
        match self.tile_exponent(idx) {
            0 => 0,
            rank => 1 << rank,
        }
    }

    /// Replace the exponent at cell `idx`.
    #[inline]
    pub fn with_tile(self, idx: usize, rank: u8) -> Self {
        debug_assert!(idx < 16);
        let shift = 4 * idx;
        Board((self.0 & !(0xf << shift)) | (BoardRaw::from(rank & 0xf) << shift))
    }

    /// The 16-bit line holding row `idx`.
    #[inline]
    pub fn row(self, idx: usize) -> u16 {
        extract_line(self.0, idx)
    }

    /// Swap rows and columns.
    #[inline]
    pub fn transpose(self) -> Self {
        Board(transpose(self.0))
    }

    /// Count the number of empty cells on the board (0..=16).
    #[inline]
    pub fn count_empty(self) -> u8 {
        16 - self.count_non_empty()
    }

    /// Count the number of occupied cells on the board.
    #[inline]
    pub fn count_non_empty(self) -> u8 {
        let mut x = self.0;
        x |= x >> 1;
        x |= x >> 2;
        (x & 0x1111_1111_1111_1111).count_ones() as u8
    }

    /// Largest exponent on the board (0 for an empty board).
    pub fn max_exponent(self) -> u8 {
        self.cells().into_iter().max().unwrap_or(0)
    }

    /// Return the highest tile value (e.g., 2048) present on the board.
    #[inline]
    pub fn highest_tile(self) -> u32 {
        match self.max_exponent() {
            0 => 0,
            rank => 1 << rank,
        }
    }

    /// Number of distinct non-empty tile values.
    pub fn distinct_tiles(self) -> u32 {
        let mut bitset = 0u32;
        let mut tmp = self.0;
        while tmp != 0 {
            bitset |= 1 << (tmp & 0xf);
            tmp >>= 4;
        }
        // empty cells don't count
        (bitset >> 1).count_ones()
    }

    /// Insert a random 2 (90%) or 4 (10%) tile into a random empty slot.
    ///
    /// Returns the new board and the exponent placed, or `None` when the
    /// board has no empty cell.
    ///
    /// ```
    /// use expectimax_2048::engine::Board;
    /// use rand::{SeedableRng, rngs::StdRng};
    /// let mut rng = StdRng::seed_from_u64(123);
    /// let (b, rank) = Board::EMPTY.spawn_random_tile(&mut rng).unwrap();
    /// assert_eq!(b.count_empty(), 15);
    /// assert!(rank == 1 || rank == 2);
    /// ```
    pub fn spawn_random_tile<R: Rng + ?Sized>(self, rng: &mut R) -> Option<(Self, u8)> {
        let open = self.count_empty();
        if open == 0 {
            return None;
        }
        let mut index = rng.gen_range(0..open);
        let rank = draw_tile(rng);
        let mut tmp = self.0;
        let mut tile = BoardRaw::from(rank);
        loop {
            while (tmp & 0xf) != 0 {
                tmp >>= 4;
                tile <<= 4;
            }
            if index == 0 {
                break;
            }
            index -= 1;
            tmp >>= 4;
            tile <<= 4;
        }
        Some((Board(self.0 | tile), rank))
    }

    /// Like [`Board::spawn_random_tile`], discarding the exponent. A full
    /// board is returned unchanged.
    #[inline]
    pub fn with_random_tile<R: Rng + ?Sized>(self, rng: &mut R) -> Self {
        self.spawn_random_tile(rng).map_or(self, |(board, _)| board)
    }

    /// A fresh game board carrying two random seed tiles.
    ///
    /// ```
    /// use expectimax_2048::engine::Board;
    /// use rand::{SeedableRng, rngs::StdRng};
    /// let b = Board::initial(&mut StdRng::seed_from_u64(1));
    /// assert_eq!(b.count_empty(), 14);
    /// ```
    pub fn initial<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Board::EMPTY.with_random_tile(rng).with_random_tile(rng)
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Board({:#018x})", self.0)
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const RULE: &str = "-----------------------------";
        writeln!(f, "{RULE}")?;
        for row in self.rows() {
            for rank in row {
                match rank {
                    0 => write!(f, "|{:>6}", "")?,
                    r => write!(f, "|{:>6}", 1u32 << r)?,
                }
            }
            writeln!(f, "|")?;
        }
        write!(f, "{RULE}")
    }
}

impl From<BoardRaw> for Board {
    fn from(v: BoardRaw) -> Self {
        Board::from_raw(v)
    }
}

impl From<Board> for BoardRaw {
    fn from(b: Board) -> Self {
        b.into_raw()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseBoardError {
    #[error("empty board string")]
    Empty,
    #[error("board string has {0} hex digits, at most 16 allowed")]
    TooLong(usize),
    #[error("invalid hex digit {0:?}")]
    InvalidDigit(char),
}

/// Parse a packed board from hex, with or without a `0x` prefix.
///
/// ```
/// use expectimax_2048::engine::Board;
/// let b: Board = "0x0000_0000_0000_0011".parse().unwrap();
/// assert_eq!(b.count_empty(), 14);
/// ```
impl FromStr for Board {
    type Err = ParseBoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let mut raw: BoardRaw = 0;
        let mut count = 0;
        for ch in digits.chars().filter(|&c| c != '_') {
            let digit = ch.to_digit(16).ok_or(ParseBoardError::InvalidDigit(ch))?;
            count += 1;
            if count > 16 {
                return Err(ParseBoardError::TooLong(digits.chars().filter(|&c| c != '_').count()));
            }
            raw = (raw << 4) | BoardRaw::from(digit);
        }
        if count == 0 {
            return Err(ParseBoardError::Empty);
        }
        Ok(Board(raw))
    }
}

/// Precomputed per-line tables for move execution, scoring and heuristics.
///
/// Built once by [`Engine::new`] and read-only afterwards; share it by
/// reference between searches and games.
pub struct Engine {
    row_delta: Box<[Line]>,
    score: Box<[Score]>,
    heuristic: Box<[f64]>,
}

impl Engine {
    /// Build all lookup tables.
    pub fn new() -> Self {
        // Allocate on the heap to avoid large stack frames
        let mut row_delta = vec![0 as Line; LINE_TABLE_SIZE];
        let mut score_table = vec![0 as Score; LINE_TABLE_SIZE];
        for (val, (delta, score)) in row_delta.iter_mut().zip(score_table.iter_mut()).enumerate() {
            let line = val as Line;
            let cells = line_to_cells(line);
            *delta = line ^ cells_to_line(slide_line(cells));
            *score = calc_score(cells);
        }
        Engine {
            row_delta: row_delta.into_boxed_slice(),
            score: score_table.into_boxed_slice(),
            heuristic: heuristic::build_table(),
        }
    }

    /// Process-wide instance, built on first use. Safe to call multiple times.
    pub fn shared() -> &'static Engine {
        SHARED.get_or_init(Engine::new)
    }

    /// Return the board resulting from sliding/merging tiles in `dir` (no random insert).
    ///
    /// An unchanged board means the move is illegal.
    ///
    /// ```
    /// use expectimax_2048::engine::{Board, Engine, Move};
    /// let engine = Engine::new();
    /// let b = Board::from_rows([[1, 1, 0, 0], [0; 4], [0; 4], [0; 4]]);
    /// assert_eq!(engine.shift(b, Move::Left).rows()[0], [2, 0, 0, 0]);
    /// ```
    #[inline]
    pub fn shift(&self, board: Board, dir: Move) -> Board {
        match dir {
            Move::Left => self.shift_rows(board, false),
            Move::Right => self.shift_rows(board, true),
            Move::Up => self.shift_cols(board, false),
            Move::Down => self.shift_cols(board, true),
        }
    }

    /// Shift and report the points earned by the merges of this move.
    pub fn shift_scored(&self, board: Board, dir: Move) -> (Board, Score) {
        let moved = self.shift(board, dir);
        let gained = self.score(moved).saturating_sub(self.score(board));
        (moved, gained)
    }

    /// True if `dir` changes the board.
    #[inline]
    pub fn can_move(&self, board: Board, dir: Move) -> bool {
        self.shift(board, dir) != board
    }

    /// Directions that change the board, in search order.
    pub fn legal_moves(&self, board: Board) -> impl Iterator<Item = Move> + '_ {
        Move::ALL.into_iter().filter(move |&dir| self.can_move(board, dir))
    }

    /// Return true if no legal moves remain.
    ///
    /// ```
    /// use expectimax_2048::engine::{Board, Engine};
    /// let engine = Engine::new();
    /// // Nothing slides on an empty board.
    /// assert!(engine.is_game_over(Board::EMPTY));
    /// ```
    pub fn is_game_over(&self, board: Board) -> bool {
        self.legal_moves(board).next().is_none()
    }

    /// Total merge score implied by the tiles on `board`.
    ///
    /// This assumes every tile was built from 2s; see
    /// [`crate::game::Game::score`] for the session score.
    pub fn score(&self, board: Board) -> Score {
        (0..4).fold(0, |acc, idx| acc + lookup(&self.score, extract_line(board.0, idx)))
    }

    /// Static desirability of `board`, summed over its rows and columns.
    pub fn heuristic(&self, board: Board) -> f64 {
        self.heuristic_rows(board.0) + self.heuristic_rows(transpose(board.0))
    }

    fn heuristic_rows(&self, raw: BoardRaw) -> f64 {
        (0..4).fold(0., |acc, idx| acc + lookup(&self.heuristic, extract_line(raw, idx)))
    }

    #[inline(always)]
    fn line_delta(&self, line: Line, reversed: bool) -> Line {
        if reversed {
            reverse_line(lookup(&self.row_delta, reverse_line(line)))
        } else {
            lookup(&self.row_delta, line)
        }
    }

    fn shift_rows(&self, board: Board, reversed: bool) -> Board {
        let res = (0..4).fold(board.0, |acc, row_idx| {
            let delta = self.line_delta(extract_line(board.0, row_idx), reversed);
            acc ^ (BoardRaw::from(delta) << (16 * row_idx))
        });
        Board(res)
    }

    fn shift_cols(&self, board: Board, reversed: bool) -> Board {
        let transposed = transpose(board.0);
        let res = (0..4).fold(board.0, |acc, col_idx| {
            let delta = self.line_delta(extract_line(transposed, col_idx), reversed);
            acc ^ (unpack_col(delta) << (4 * col_idx))
        });
        Board(res)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").field("lines", &self.row_delta.len()).finish_non_exhaustive()
    }
}

static SHARED: OnceLock<Engine> = OnceLock::new();

/// Initialize the shared tables. Safe to call multiple times.
pub fn new() -> &'static Engine {
    Engine::shared()
}

/// Slide/merge tiles in the given direction using the shared tables.
pub fn shift(board: Board, direction: Move) -> Board {
    Engine::shared().shift(board, direction)
}

/// Compute the total score for a board using the shared tables.
pub fn get_score(board: Board) -> Score {
    Engine::shared().score(board)
}

/// Heuristic value of a board using the shared tables.
pub fn heuristic_score(board: Board) -> f64 {
    Engine::shared().heuristic(board)
}

/// True if no move in any direction changes the board.
pub fn is_game_over(board: Board) -> bool {
    Engine::shared().is_game_over(board)
}

/// Count the number of zero tiles.
pub fn count_empty(board: Board) -> u8 {
    board.count_empty()
}

// Credit to Nneonneo
pub(crate) fn transpose(x: BoardRaw) -> BoardRaw {
    let a1 = x & 0xF0F0_0F0F_F0F0_0F0F;
    let a2 = x & 0x0000_F0F0_0000_F0F0;
    let a3 = x & 0x0F0F_0000_0F0F_0000;
    let a = a1 | (a2 << 12) | (a3 >> 12);
    let b1 = a & 0xFF00_FF00_00FF_00FF;
    let b2 = a & 0x00FF_00FF_0000_0000;
    let b3 = a & 0x0000_0000_FF00_FF00;
    b1 | (b2 >> 24) | (b3 << 24)
}

#[inline(always)]
fn extract_line(board: BoardRaw, line_idx: usize) -> Line {
    ((board >> (16 * line_idx)) & ROW_MASK) as Line
}

/// Spread a line into column 0, one nibble per row.
#[inline(always)]
fn unpack_col(line: Line) -> BoardRaw {
    let tmp = BoardRaw::from(line);
    (tmp | (tmp << 12) | (tmp << 24) | (tmp << 36)) & COL_MASK
}

#[inline(always)]
fn reverse_line(line: Line) -> Line {
    (line >> 12) | ((line >> 4) & 0x00F0) | ((line << 4) & 0x0F00) | (line << 12)
}

#[inline(always)]
fn lookup<T: Copy>(table: &[T], line: Line) -> T {
    debug_assert_eq!(table.len(), LINE_TABLE_SIZE);
    // SAFETY: every table holds LINE_TABLE_SIZE entries and a `u16` index is below that.
    unsafe { *table.get_unchecked(usize::from(line)) }
}

pub(crate) fn line_to_cells(line: Line) -> [u8; 4] {
    [
        (line & 0xf) as u8,
        ((line >> 4) & 0xf) as u8,
        ((line >> 8) & 0xf) as u8,
        ((line >> 12) & 0xf) as u8,
    ]
}

fn cells_to_line(cells: [u8; 4]) -> Line {
    cells
        .iter()
        .rev()
        .fold(0, |acc, &rank| (acc << 4) | Line::from(rank))
}

/// Slide a line towards index 0, merging each equal pair once.
///
/// Two rank-15 tiles collapse into a single rank-15 tile; the rank never wraps.
fn slide_line(cells: [u8; 4]) -> [u8; 4] {
    let mut out = [0u8; 4];
    let mut len = 0;
    let mut merged = false;
    for rank in cells.into_iter().filter(|&r| r != 0) {
        if len > 0 && !merged && out[len - 1] == rank {
            out[len - 1] = (rank + 1).min(MAX_RANK);
            merged = true;
        } else {
            out[len] = rank;
            len += 1;
            merged = false;
        }
    }
    out
}

// Credit to Nneonneo
fn calc_score(cells: [u8; 4]) -> Score {
    cells
        .iter()
        .filter(|&&rank| rank >= 2)
        // the score is the total sum of the tile and all intermediate merged tiles
        .map(|&rank| (Score::from(rank) - 1) * (1 << rank))
        .sum()
}

fn draw_tile<R: Rng + ?Sized>(rng: &mut R) -> u8 {
    if rng.gen_range(0..10) < 9 {
        1
    } else {
        2
    }
}
