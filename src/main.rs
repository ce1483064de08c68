use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use expectimax_2048::engine::{Board, Engine};
use expectimax_2048::expectimax::{pick_best, Expectimax, ExpectimaxConfig, ExpectimaxParallel};
use expectimax_2048::game::{Game, MoveSource};
use expectimax_2048::trace::{Recorder, Run};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{rngs::StdRng, SeedableRng};

#[derive(Debug, Parser)]
#[command(name = "expectimax-2048", version, about = "Play and analyze 2048 with an Expectimax AI")]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Let the AI play one full game
    Play {
        /// Seed for tile spawns (random when omitted)
        #[arg(long)]
        seed: Option<u64>,
        /// Search the four root directions on the rayon pool
        #[arg(long)]
        parallel: bool,
        /// JSON file with search settings
        #[arg(long)]
        config: Option<PathBuf>,
        /// Stop after this many moves
        #[arg(long)]
        max_moves: Option<u32>,
        /// Write the played run to this file
        #[arg(long)]
        out: Option<PathBuf>,
        /// No spinner and no final board
        #[arg(short, long)]
        quiet: bool,
    },
    /// Show the search result for a single board (hex, one nibble per cell)
    Eval {
        board: Board,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        parallel: bool,
    },
    /// Summarize a recorded run and check it replays cleanly
    Inspect {
        file: PathBuf,
        /// Print the run metadata as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let engine = Engine::shared();

    match args.cmd {
        Cmd::Play { seed, parallel, config, max_moves, out, quiet } => {
            let cfg = load_config(config.as_deref())?;
            play(engine, cfg, seed, parallel, max_moves, out.as_deref(), quiet)
        }
        Cmd::Eval { board, config, parallel } => {
            let cfg = load_config(config.as_deref())?;
            eval(engine, cfg, board, parallel);
            Ok(())
        }
        Cmd::Inspect { file, json } => inspect(engine, &file, json),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ExpectimaxConfig> {
    match path {
        Some(path) => ExpectimaxConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(ExpectimaxConfig::default()),
    }
}

fn play(
    engine: &Engine,
    cfg: ExpectimaxConfig,
    seed: Option<u64>,
    parallel: bool,
    max_moves: Option<u32>,
    out: Option<&Path>,
    quiet: bool,
) -> anyhow::Result<()> {
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut game = Game::new(engine, rng);
    let mut recorder = Recorder::new(game.board());
    let mut policy: Box<dyn MoveSource + '_> = if parallel {
        Box::new(ExpectimaxParallel::with_config(engine, cfg))
    } else {
        Box::new(Expectimax::with_config(engine, cfg))
    };
    log::info!("starting game (parallel={parallel}, seed={seed:?})");

    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner} {elapsed_precise} | Moves: {msg}")?
                .tick_chars("⠁⠃⠇⠧⠷⠿⠻⠟⠯⠷⠧⠇⠃"),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    };

    let start = Instant::now();
    let summary = game.play(policy.as_mut(), max_moves, |dir, board| {
        recorder.record(dir, board);
        let moves = recorder.steps();
        if moves % 16 == 0 {
            let rate = moves as f64 / start.elapsed().as_secs_f64().max(1e-6);
            pb.set_message(format!("{moves} | moves/sec: {rate:.1} | score: {}", engine.score(board)));
        }
    });
    pb.finish_and_clear();

    if !quiet {
        println!("{}", summary.board);
        println!(
            "Moves: {} | moves/sec: {:.1} | score: {} | highest tile: {} | end: {:?}",
            summary.moves,
            f64::from(summary.moves) / start.elapsed().as_secs_f64().max(1e-6),
            summary.score,
            summary.highest_tile,
            summary.end,
        );
    }

    if let Some(path) = out {
        let engine_label = format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let run = recorder.finish(summary.score, Some(engine_label));
        run.write_to_path(path).with_context(|| format!("failed to write run to {}", path.display()))?;
        log::info!("wrote {} steps to {}", run.meta.steps, path.display());
    }
    Ok(())
}

fn eval(engine: &Engine, cfg: ExpectimaxConfig, board: Board, parallel: bool) {
    let depth_limit = cfg.depth_limit(board);
    let (branches, stats) = if parallel {
        let mut ex = ExpectimaxParallel::with_config(engine, cfg);
        (ex.branch_evals(board), ex.last_stats())
    } else {
        let mut ex = Expectimax::with_config(engine, cfg);
        (ex.branch_evals(board), ex.last_stats())
    };

    println!("{board}");
    println!("score: {} | heuristic: {:.1} | depth limit: {depth_limit}", engine.score(board), engine.heuristic(board));
    for branch in &branches {
        if branch.legal {
            println!("  {:<5} {:.6}", branch.dir.to_string(), branch.ev);
        } else {
            println!("  {:<5} -", branch.dir.to_string());
        }
    }
    match pick_best(&branches) {
        Some(dir) => println!("best: {dir}"),
        None => println!("best: none (game over)"),
    }
    println!(
        "nodes: {} | moves: {} ({} no-ops) | table hits: {} | cache hits: {} | cache size: {} | max depth: {}",
        stats.nodes,
        stats.moves_evaled,
        stats.no_moves,
        stats.table_hits,
        stats.cache_hits,
        stats.cache_size,
        stats.max_depth,
    );
}

fn inspect(engine: &Engine, path: &Path, json: bool) -> anyhow::Result<()> {
    let run = Run::read_from_path(path).with_context(|| format!("failed to read run from {}", path.display()))?;
    let meta = &run.meta;
    if json {
        println!("{}", meta.to_json()?);
        return match run.first_inconsistent_step(engine) {
            Some(step) => anyhow::bail!("step {step} does not follow from the previous board"),
            None => Ok(()),
        };
    }
    println!("engine: {}", meta.engine.as_deref().unwrap_or("-"));
    println!("started: {} (unix) | elapsed: {:.1}s", meta.start_unix_s, meta.elapsed_s);
    println!("steps: {} | final score: {} | highest tile: {}", meta.steps, meta.final_score, meta.highest_tile);
    if let Some(last) = run.states.last() {
        println!("{last}");
    }
    match run.first_inconsistent_step(engine) {
        Some(step) => anyhow::bail!("step {step} does not follow from the previous board"),
        None => println!("replay: ok"),
    }
    Ok(())
}
