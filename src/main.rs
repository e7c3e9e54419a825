//! ZVD RDOQ CLI
//!
//! Runs the quantization optimizer on blocks read from JSON files, or on
//! synthetic blocks across a range of lambdas.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;
use zvd_rdoq::{
    init, quantize_blocks, BlockParams, Config, ContextSnapshot, LambdaCalc, Quantizer, Rdoq,
    RdoqConfig, TransformBlock,
};

#[derive(Parser)]
#[command(name = "zvd-rdoq")]
#[command(about = "ZVD RDOQ - rate-distortion optimized quantization", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Number of threads to use
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Engine configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Quantize the blocks in a JSON file
    Blocks {
        /// Input file holding an array of blocks
        input: PathBuf,

        /// QP the context snapshot is initialized for
        #[arg(long, default_value = "32")]
        snapshot_qp: u8,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Compare RDOQ with plain rounding on random blocks over a lambda range
    Sweep {
        /// Block width and height
        #[arg(short, long, default_value = "8")]
        size: usize,

        /// Quantization parameter
        #[arg(short, long, default_value = "32")]
        qp: u8,

        /// Number of random blocks
        #[arg(short, long, default_value = "64")]
        blocks: usize,

        /// Random seed
        #[arg(long, default_value = "1")]
        seed: u64,
    },

    /// Write the default engine configuration
    InitConfig {
        /// Output file path
        output: PathBuf,
    },
}

#[derive(Serialize)]
struct BlockReport {
    levels: Vec<i32>,
    num_nonzero: usize,
    distortion: i64,
    bits: f64,
    cost: i64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config {
        max_threads: cli.threads,
        verbose: cli.verbose,
        debug: cli.debug,
    };

    init(config)?;

    info!("ZVD RDOQ v{}", zvd_rdoq::VERSION);

    let engine_config = match &cli.config {
        Some(path) => RdoqConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RdoqConfig::default(),
    };

    match cli.command {
        Commands::Blocks {
            input,
            snapshot_qp,
            json,
        } => {
            info!("Quantizing blocks from {}", input.display());
            cmd_blocks(&input, engine_config, snapshot_qp, json)?;
        }
        Commands::Sweep {
            size,
            qp,
            blocks,
            seed,
        } => {
            info!("Sweeping {} {}x{} blocks at QP {}", blocks, size, size, qp);
            cmd_sweep(engine_config, size, qp, blocks, seed)?;
        }
        Commands::InitConfig { output } => {
            engine_config.save(&output)?;
            println!("Wrote {}", output.display());
        }
    }

    Ok(())
}

fn cmd_blocks(input: &Path, config: RdoqConfig, snapshot_qp: u8, json: bool) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let originals: Vec<TransformBlock> = serde_json::from_str(&text)?;

    let engine = Rdoq::new(config)?;
    let snapshot = ContextSnapshot::new(snapshot_qp);

    let mut blocks = originals.clone();
    let counts = quantize_blocks(&engine, &mut blocks, &snapshot)?;

    let mut reports = Vec::with_capacity(blocks.len());
    for ((original, block), num_nonzero) in originals.iter().zip(&blocks).zip(counts) {
        let cost = engine.block_cost(&original.coeffs, &block.coeffs, &block.params, &snapshot)?;
        reports.push(BlockReport {
            levels: block.coeffs.clone(),
            num_nonzero,
            distortion: cost.distortion,
            bits: cost.bits_f64(),
            cost: cost.cost,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!("{:<6} {:<8} {:<6} {:>12} {:>10} {:>14}", "Block", "Size", "NNZ", "Distortion", "Bits", "Cost");
    println!("─────────────────────────────────────────────────────────────");
    for (i, (report, block)) in reports.iter().zip(&blocks).enumerate() {
        println!(
            "{:<6} {:<8} {:<6} {:>12} {:>10.2} {:>14}",
            i,
            format!("{}x{}", block.params.width, block.params.height),
            report.num_nonzero,
            report.distortion,
            report.bits,
            report.cost
        );
    }
    Ok(())
}

/// Random coefficients that fall off away from DC like a real residual
fn random_block(rng: &mut StdRng, size: usize) -> Vec<i32> {
    (0..size * size)
        .map(|i| {
            let (x, y) = (i % size, i / size);
            let amplitude = 400 / (1 + x + y) as i32;
            if rng.gen_bool(0.3) {
                0
            } else {
                rng.gen_range(-amplitude..=amplitude)
            }
        })
        .collect()
}

fn cmd_sweep(config: RdoqConfig, size: usize, qp: u8, blocks: usize, seed: u64) -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let inputs: Vec<Vec<i32>> = (0..blocks).map(|_| random_block(&mut rng, size)).collect();

    let mut engine = Rdoq::new(config)?;
    let quantizer = Quantizer::new(qp, config.bit_depth)?;
    let snapshot = ContextSnapshot::new(qp);
    let base_lambda = LambdaCalc::fixed_lambda(qp);
    let log2_size = size.trailing_zeros() as u8;

    println!("Base lambda (Q8): {}", base_lambda);
    println!("{:<8} {:>10} {:>12} {:>12} {:>14}", "Scale", "NNZ", "Bits", "Distortion", "Cost vs round");
    println!("─────────────────────────────────────────────────────────────");

    for scale in [0.0, 0.25, 0.5, 1.0, 2.0, 4.0] {
        let lambda = (base_lambda as f64 * scale).round() as i64;
        let params = BlockParams::new(size, size, qp, true, lambda)?;

        let (mut nnz, mut bits, mut distortion) = (0usize, 0f64, 0i64);
        let (mut rdoq_cost, mut round_cost) = (0i64, 0i64);
        for coeffs in &inputs {
            let mut levels = coeffs.clone();
            nnz += engine.quantize_block(&mut levels, &params, &snapshot)?;
            let cost = engine.block_cost(coeffs, &levels, &params, &snapshot)?;
            bits += cost.bits_f64();
            distortion += cost.distortion;
            rdoq_cost += cost.cost;

            let mut rounded = vec![0i32; coeffs.len()];
            quantizer.quantize(coeffs, &mut rounded, log2_size, log2_size, true)?;
            round_cost += engine.block_cost(coeffs, &rounded, &params, &snapshot)?.cost;
        }

        let ratio = if round_cost > 0 {
            rdoq_cost as f64 / round_cost as f64
        } else {
            1.0
        };
        println!(
            "{:<8} {:>10.2} {:>12.1} {:>12} {:>13.1}%",
            scale,
            nnz as f64 / blocks.max(1) as f64,
            bits / blocks.max(1) as f64,
            distortion,
            ratio * 100.0
        );
    }
    Ok(())
}
