//! Common test utilities for ZVD RDOQ integration tests
//!
//! Helpers for building coefficient blocks, context snapshots and block
//! parameters shared by the test suites.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use zvd_rdoq::cabac::ContextTrainer;
use zvd_rdoq::syntax::write_block;
use zvd_rdoq::{BlockParams, ContextSnapshot, ScanOrder, ScanPattern};

/// Square block sizes supported by the engine
pub const BLOCK_SIZES: [usize; 4] = [4, 8, 16, 32];

// ============================================================================
// Coefficient Blocks
// ============================================================================

/// Seeded generator so every run sees the same blocks
pub fn test_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Residual-like block: magnitudes fall off away from DC and about a third
/// of the coefficients are zero
pub fn random_block(rng: &mut StdRng, width: usize, height: usize, peak: i32) -> Vec<i32> {
    (0..width * height)
        .map(|i| {
            let (x, y) = (i % width, i / width);
            let amplitude = (peak / (1 + x + y) as i32).max(1);
            if rng.gen_bool(0.35) {
                0
            } else {
                rng.gen_range(-amplitude..=amplitude)
            }
        })
        .collect()
}

/// Fixed 8×8 block whose coefficients are either far below half a QP 32
/// step (16) or at least two steps, so every zero/nonzero decision is
/// dominated by distortion for lambdas up to 256
pub fn separated_block_8x8() -> Vec<i32> {
    vec![
        118, -77, 45, 0, 3, 0, 0, 0, //
        -96, 52, -5, 33, 0, 0, 1, 0, //
        61, 0, -39, 6, 0, -2, 0, 0, //
        -4, 35, 0, 0, 7, 0, 0, 0, //
        0, 0, -2, 0, 0, 0, 0, 0, //
        40, 0, 0, 0, 0, 0, 0, 0, //
        0, -1, 0, 0, 0, 0, 0, 0, //
        0, 0, 0, 0, 0, 0, 0, 0, //
    ]
}

// ============================================================================
// Context Snapshots
// ============================================================================

/// Snapshot adapted on a few coded blocks, as the encoder would hold it
/// partway through a slice
pub fn trained_snapshot(qp: u8, seed: u64) -> ContextSnapshot {
    let mut snapshot = ContextSnapshot::new(qp);
    let mut rng = test_rng(seed);
    let scan = ScanOrder::new(3, 3, ScanPattern::Diagonal).expect("valid scan");
    {
        let mut trainer = ContextTrainer::new(&mut snapshot);
        for _ in 0..8 {
            let levels: Vec<i32> = random_block(&mut rng, 8, 8, 12)
                .into_iter()
                .map(|c| c / 3)
                .collect();
            write_block(&mut trainer, &levels, &scan, true);
            write_block(&mut trainer, &levels, &scan, false);
        }
    }
    snapshot
}

// ============================================================================
// Block Parameters
// ============================================================================

/// Luma block parameters with a Q8 lambda
pub fn luma_params(width: usize, height: usize, qp: u8, lambda: i64) -> BlockParams {
    BlockParams::new(width, height, qp, true, lambda).expect("valid block params")
}
