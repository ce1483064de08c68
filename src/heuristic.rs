//! Per-line static evaluation used at search leaves.
//!
//! A board's heuristic is the sum of the line values of its four rows and
//! its four columns; see [`crate::engine::Engine::heuristic`].

use crate::engine::line_to_cells;

/// Baseline added to every line so values stay positive for normal boards.
pub const LOST_PENALTY: f64 = 200_000.0;
pub const MONOTONICITY_POWER: f64 = 4.0;
pub const MONOTONICITY_WEIGHT: f64 = 47.0;
pub const SUM_POWER: f64 = 3.5;
pub const SUM_WEIGHT: f64 = 11.0;
pub const MERGES_WEIGHT: f64 = 700.0;
pub const EMPTY_WEIGHT: f64 = 270.0;

pub(crate) fn build_table() -> Box<[f64]> {
    (0..=u16::MAX)
        .map(|line| line_heuristic(line_to_cells(line)))
        .collect()
}

// Credit to Nneonneo for heuristic structure
pub(crate) fn line_heuristic(line: [u8; 4]) -> f64 {
    LOST_PENALTY + calc_empty(&line) + calc_merges(&line) - calc_monotonicity(&line) - calc_sum(&line)
}

fn calc_sum(line: &[u8; 4]) -> f64 {
    line.iter()
        .fold(0., |acc, &rank| acc + f64::from(rank).powf(SUM_POWER))
        * SUM_WEIGHT
}

fn calc_empty(line: &[u8; 4]) -> f64 {
    line.iter().filter(|&&rank| rank == 0).count() as f64 * EMPTY_WEIGHT
}

/// Runs of equal tiles, ignoring gaps: a run of `k + 1` equal ranks counts `1 + k`.
fn calc_merges(line: &[u8; 4]) -> f64 {
    let mut prev = 0;
    let mut counter = 0u32;
    let mut merges = 0u32;
    for &rank in line.iter().filter(|&&rank| rank != 0) {
        if prev == rank {
            counter += 1;
        } else if counter > 0 {
            merges += 1 + counter;
            counter = 0;
        }
        prev = rank;
    }
    if counter > 0 {
        merges += 1 + counter;
    }
    f64::from(merges) * MERGES_WEIGHT
}

fn calc_monotonicity(line: &[u8; 4]) -> f64 {
    let mut monotonicity_left = 0.;
    let mut monotonicity_right = 0.;
    for pair in line.windows(2) {
        let tile1 = f64::from(pair[0]).powf(MONOTONICITY_POWER);
        let tile2 = f64::from(pair[1]).powf(MONOTONICITY_POWER);
        if pair[0] > pair[1] {
            monotonicity_left += tile1 - tile2;
        } else {
            monotonicity_right += tile2 - tile1;
        }
    }
    f64::min(monotonicity_left, monotonicity_right) * MONOTONICITY_WEIGHT
}
