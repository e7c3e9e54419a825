//! Parallel quantization of independent blocks
//!
//! Blocks of a frame that share one context snapshot do not depend on each
//! other's levels, so they can be optimized concurrently. The batch is cut
//! into at most one contiguous run per pool thread, and each run gets one
//! engine sharing the read-only tables.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BlockParams, Rdoq};
use crate::cabac::ContextSnapshot;
use crate::error::Result;

/// A transform block and the parameters it is quantized with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformBlock {
    /// Raster-ordered coefficients; replaced by levels once quantized
    pub coeffs: Vec<i32>,
    pub params: BlockParams,
}

impl TransformBlock {
    pub fn new(coeffs: Vec<i32>, params: BlockParams) -> Self {
        Self { coeffs, params }
    }

    /// Number of nonzero entries
    pub fn num_nonzero(&self) -> usize {
        self.coeffs.iter().filter(|&&c| c != 0).count()
    }
}

/// Quantize every block in place
///
/// Returns the nonzero count of each block in input order. Fails with the
/// first error in input order; blocks are left partially processed then.
pub fn quantize_blocks(
    engine: &Rdoq,
    blocks: &mut [TransformBlock],
    snapshot: &ContextSnapshot,
) -> Result<Vec<usize>> {
    let run_len = run_len(blocks.len(), rayon::current_num_threads());
    let mut workers: Vec<Rdoq> = (0..blocks.len().div_ceil(run_len))
        .map(|_| engine.worker())
        .collect();
    debug!(
        blocks = blocks.len(),
        workers = workers.len(),
        "quantizing blocks in parallel"
    );

    let results: Vec<Vec<Result<usize>>> = workers
        .par_iter_mut()
        .zip(blocks.par_chunks_mut(run_len))
        .map(|(worker, run)| {
            run.iter_mut()
                .map(|block| worker.quantize_block(&mut block.coeffs, &block.params, snapshot))
                .collect()
        })
        .collect();

    results.into_iter().flatten().collect()
}

/// Blocks per worker so that no more workers than threads are created
fn run_len(num_blocks: usize, threads: usize) -> usize {
    num_blocks.div_ceil(threads.max(1)).max(1)
}
