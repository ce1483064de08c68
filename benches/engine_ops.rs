use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use expectimax_2048::engine::{Board, Engine, Move};
use rand::{rngs::StdRng, SeedableRng};
use std::hint::black_box;

fn corpus(engine: &Engine) -> Vec<Board> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut boards = vec![Board::EMPTY];
    let mut b = Board::initial(&mut rng);
    boards.push(b);
    // walk the move cycle to get boards of increasing density
    let seq = [Move::Left, Move::Up, Move::Right, Move::Down];
    for i in 0..40 {
        let nb = engine.shift(b, seq[i % seq.len()]);
        if nb != b {
            b = nb.with_random_tile(&mut rng);
        }
        boards.push(b);
    }
    boards
}

fn bench_shift(c: &mut Criterion) {
    let engine = Engine::new();
    let boards = corpus(&engine);
    for dir in Move::ALL {
        c.bench_function(&format!("shift/{dir}"), |bch| {
            bch.iter(|| {
                let mut acc = 0u64;
                for &bd in &boards {
                    acc ^= engine.shift(bd, dir).raw();
                }
                black_box(acc)
            })
        });
    }
    c.bench_function("shift/scored_left", |bch| {
        bch.iter(|| {
            let mut acc = 0u64;
            for &bd in &boards {
                acc = acc.wrapping_add(engine.shift_scored(bd, Move::Left).1);
            }
            black_box(acc)
        })
    });
}

fn bench_board_queries(c: &mut Criterion) {
    let engine = Engine::new();
    let boards = corpus(&engine);
    c.bench_function("board/score", |bch| {
        bch.iter(|| boards.iter().map(|&bd| engine.score(bd)).sum::<u64>())
    });
    c.bench_function("board/heuristic", |bch| {
        bch.iter(|| boards.iter().fold(0f64, |acc, &bd| acc.mul_add(1.000_000_1, engine.heuristic(bd))))
    });
    c.bench_function("board/is_game_over", |bch| {
        bch.iter(|| boards.iter().filter(|&&bd| engine.is_game_over(bd)).count())
    });
    c.bench_function("board/count_empty", |bch| {
        bch.iter(|| boards.iter().map(|bd| u32::from(bd.count_empty())).sum::<u32>())
    });
    c.bench_function("board/transpose", |bch| {
        bch.iter(|| boards.iter().fold(0u64, |acc, bd| acc ^ bd.transpose().raw()))
    });
    c.bench_function("board/with_random_tile", |bch| {
        bch.iter_batched(
            || (Board::EMPTY, StdRng::seed_from_u64(7)),
            |(mut bd, mut rng)| {
                for _ in 0..16 {
                    bd = bd.with_random_tile(&mut rng);
                }
                black_box(bd)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_tables(c: &mut Criterion) {
    c.bench_function("engine/new", |bch| bch.iter(|| black_box(Engine::new())));
}

criterion_group!(engine_ops, bench_shift, bench_board_queries, bench_tables);
criterion_main!(engine_ops);
