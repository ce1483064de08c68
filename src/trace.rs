//! Binary run records: the start board, every move and every resulting board.
//!
//! Layout (little-endian):
//! `magic "E2R1" | version u8 | steps u32 | start_unix_s u64 | elapsed_s f32 |
//! final_score u64 | highest_tile u32 | engine_len u16 | engine utf8 |
//! states u64 * (steps + 1) | moves u8 * steps | crc32c u32`

use std::fs;
use std::io;
use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::engine::{Board, Engine, Move};

const MAGIC: &[u8; 4] = b"E2R1";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 4 + 8 + 4 + 8 + 4 + 2;
const CHECKSUM_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub steps: u32,
    pub start_unix_s: u64,
    pub elapsed_s: f32,
    pub final_score: u64,
    pub highest_tile: u32,
    pub engine: Option<String>,
}

impl Meta {
    /// Pretty-printed JSON, as shown by `inspect --json`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> Result<Meta, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub meta: Meta,
    /// Boards after every step, starting with the initial board (`steps + 1` entries).
    pub states: Vec<Board>,
    pub moves: Vec<Move>,
}

#[derive(thiserror::Error, Debug)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid magic or version")]
    MagicOrVersion,
    #[error("file too short or malformed")]
    Malformed,
    #[error("checksum mismatch")]
    Checksum,
    #[error("engine name longer than {} bytes", u16::MAX)]
    EngineNameTooLong,
    #[error("{states} states do not match {moves} moves")]
    LengthMismatch { states: usize, moves: usize },
}

impl Run {
    pub fn encode(&self) -> Result<Vec<u8>, TraceError> {
        if self.states.len() != self.moves.len() + 1 || self.meta.steps as usize != self.moves.len() {
            return Err(TraceError::LengthMismatch { states: self.states.len(), moves: self.moves.len() });
        }
        let engine = self.meta.engine.as_deref().unwrap_or("").as_bytes();
        let engine_len = u16::try_from(engine.len()).map_err(|_| TraceError::EngineNameTooLong)?;

        let mut buf =
            Vec::with_capacity(HEADER_LEN + engine.len() + self.states.len() * 8 + self.moves.len() + CHECKSUM_LEN);
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        buf.extend_from_slice(&self.meta.steps.to_le_bytes());
        buf.extend_from_slice(&self.meta.start_unix_s.to_le_bytes());
        buf.extend_from_slice(&self.meta.elapsed_s.to_le_bytes());
        buf.extend_from_slice(&self.meta.final_score.to_le_bytes());
        buf.extend_from_slice(&self.meta.highest_tile.to_le_bytes());
        buf.extend_from_slice(&engine_len.to_le_bytes());
        buf.extend_from_slice(engine);
        for board in &self.states {
            buf.extend_from_slice(&board.raw().to_le_bytes());
        }
        buf.extend(self.moves.iter().map(|dir| dir.index()));

        let checksum = crc32c::crc32c(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Run, TraceError> {
        if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(TraceError::Malformed);
        }
        // Validate checksum first so field reads only see intact data
        let (content, trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
        let mut trailer = Reader::new(trailer);
        if trailer.u32()? != crc32c::crc32c(content) {
            return Err(TraceError::Checksum);
        }

        let mut r = Reader::new(content);
        if r.take(4)? != MAGIC || r.u8()? != VERSION {
            return Err(TraceError::MagicOrVersion);
        }
        let steps = r.u32()?;
        let start_unix_s = r.u64()?;
        let elapsed_s = f32::from_bits(r.u32()?);
        let final_score = r.u64()?;
        let highest_tile = r.u32()?;
        let engine_len = usize::from(r.u16()?);
        let engine = match r.take(engine_len)? {
            [] => None,
            bytes => Some(std::str::from_utf8(bytes).map_err(|_| TraceError::Malformed)?.to_owned()),
        };

        let step_count = steps as usize;
        if r.remaining() != (step_count + 1) * 8 + step_count {
            return Err(TraceError::Malformed);
        }
        let states = (0..=step_count)
            .map(|_| r.u64().map(Board::from_raw))
            .collect::<Result<Vec<_>, _>>()?;
        let moves = r
            .take(step_count)?
            .iter()
            .map(|&code| Move::from_index(code).ok_or(TraceError::Malformed))
            .collect::<Result<Vec<_>, _>>()?;

        let meta = Meta { steps, start_unix_s, elapsed_s, final_score, highest_tile, engine };
        Ok(Run { meta, states, moves })
    }

    /// First step whose recorded board is not the previous board shifted by
    /// the recorded move plus exactly one spawned 2 or 4.
    pub fn first_inconsistent_step(&self, engine: &Engine) -> Option<usize> {
        self.moves
            .iter()
            .zip(self.states.windows(2))
            .position(|(&dir, pair)| {
                let shifted = engine.shift(pair[0], dir);
                if shifted == pair[0] {
                    return true;
                }
                // a 2 or a 4 sets exactly one of the two low bits of an empty nibble
                let spawned = pair[1].raw() ^ shifted.raw();
                if spawned.count_ones() != 1 {
                    return true;
                }
                let bit = spawned.trailing_zeros() as usize;
                bit % 4 > 1 || shifted.tile_exponent(bit / 4) != 0
            })
    }

    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), TraceError> {
        fs::write(path, self.encode()?)?;
        Ok(())
    }

    pub fn read_from_path<P: AsRef<Path>>(path: P) -> Result<Run, TraceError> {
        let data = fs::read(path)?;
        Run::decode(&data)
    }
}

/// Cursor over a byte slice that fails with [`TraceError::Malformed`] when short.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TraceError> {
        if self.buf.len() < n {
            return Err(TraceError::Malformed);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], TraceError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, TraceError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, TraceError> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32, TraceError> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64, TraceError> {
        self.array().map(u64::from_le_bytes)
    }
}

/// Collects a run while a game is played; see [`crate::game::Game::play`].
#[derive(Debug)]
pub struct Recorder {
    started: Instant,
    start_unix_s: u64,
    states: Vec<Board>,
    moves: Vec<Move>,
}

impl Recorder {
    pub fn new(initial: Board) -> Self {
        let mut states = Vec::with_capacity(1024);
        states.push(initial);
        Self { started: Instant::now(), start_unix_s: now_unix_seconds(), states, moves: Vec::with_capacity(1024) }
    }

    pub fn record(&mut self, dir: Move, board: Board) {
        self.moves.push(dir);
        self.states.push(board);
    }

    pub fn steps(&self) -> usize {
        self.moves.len()
    }

    pub fn finish(self, final_score: u64, engine: Option<String>) -> Run {
        let highest_tile = self.states.iter().map(|b| b.highest_tile()).max().unwrap_or(0);
        let meta = Meta {
            steps: self.moves.len() as u32,
            start_unix_s: self.start_unix_s,
            elapsed_s: self.started.elapsed().as_secs_f32(),
            final_score,
            highest_tile,
            engine,
        };
        Run { meta, states: self.states, moves: self.moves }
    }
}

pub fn now_unix_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn small_run() -> Run {
        let mut rec = Recorder::new(Board::from_raw(0x11));
        rec.record(Move::Left, Board::from_raw(0x1002));
        rec.record(Move::Down, Board::from_raw(0x2000_0000_0000_1000));
        rec.finish(4, Some("test-engine".to_string()))
    }

    #[test]
    fn round_trip_file() {
        let run = small_run();
        assert_eq!(run.meta.steps, 2);
        assert_eq!(run.meta.highest_tile, 4);
        let tmp = NamedTempFile::new().unwrap();
        run.write_to_path(tmp.path()).unwrap();
        assert_eq!(Run::read_from_path(tmp.path()).unwrap(), run);
    }

    #[test]
    fn meta_as_json() {
        let meta = small_run().meta;
        let text = meta.to_json().unwrap();
        assert!(text.contains(r#""final_score": 4"#));
        assert!(text.contains(r#""engine": "test-engine""#));
        assert_eq!(Meta::from_json(&text).unwrap(), meta);
        let bare = Meta::from_json(r#"{"steps":0,"start_unix_s":1,"elapsed_s":0.5,"final_score":0,"highest_tile":2,"engine":null}"#)
            .unwrap();
        assert_eq!(bare.engine, None);
    }

    #[test]
    fn checksum_mismatch() {
        let mut bytes = small_run().encode().unwrap();
        bytes[HEADER_LEN + 3] ^= 0xFF;
        assert!(matches!(Run::decode(&bytes), Err(TraceError::Checksum)));
    }

    #[test]
    fn malformed_bounds() {
        let mut bytes = small_run().encode().unwrap();
        // Truncate and re-seal so only the length check can fail
        bytes.truncate(bytes.len() - CHECKSUM_LEN - 1);
        let crc = crc32c::crc32c(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        assert!(matches!(Run::decode(&bytes), Err(TraceError::Malformed)));
        assert!(matches!(Run::decode(&bytes[..10]), Err(TraceError::Malformed)));
    }

    #[test]
    fn bad_magic_and_moves() {
        let mut bytes = small_run().encode().unwrap();
        bytes[0] = b'X';
        let len = bytes.len();
        let crc = crc32c::crc32c(&bytes[..len - CHECKSUM_LEN]);
        bytes[len - CHECKSUM_LEN..].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(Run::decode(&bytes), Err(TraceError::MagicOrVersion)));

        let mut bytes = small_run().encode().unwrap();
        let last_move = bytes.len() - CHECKSUM_LEN - 1;
        bytes[last_move] = 9;
        let crc = crc32c::crc32c(&bytes[..len - CHECKSUM_LEN]);
        bytes[len - CHECKSUM_LEN..].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(Run::decode(&bytes), Err(TraceError::Malformed)));
    }

    #[test]
    fn replay_consistency() {
        let engine = Engine::new();
        // [1,1,0,0] left -> [2,0,0,0], then a 2 spawns in the last cell of row 0;
        // the recorded down move does not match
        let run = small_run();
        assert_eq!(run.first_inconsistent_step(&engine), Some(1));
        let mut rec = Recorder::new(Board::from_raw(0x11));
        rec.record(Move::Left, Board::from_raw(0x1002));
        rec.record(Move::Right, Board::from_raw(0x0001_1200));
        let run = rec.finish(4, None);
        assert_eq!(run.first_inconsistent_step(&engine), None);
        let mut rec = Recorder::new(Board::from_raw(0x11));
        rec.record(Move::Left, Board::from_raw(0x3002));
        assert_eq!(rec.finish(4, None).first_inconsistent_step(&engine), Some(0));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut run = small_run();
        run.moves.pop();
        assert!(matches!(run.encode(), Err(TraceError::LengthMismatch { .. })));
    }
}
