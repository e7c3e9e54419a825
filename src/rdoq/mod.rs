//! Rate-Distortion Optimized Quantization (RDOQ)
//!
//! Chooses the quantized level of every coefficient in a transform block so
//! that distortion plus λ × estimated bits is minimized, instead of rounding
//! each coefficient on its own.
//!
//! # Pipeline
//!
//! 1. **Candidates**: every coefficient gets `{0, floor, floor + 1}` (or a
//!    subset) with the distortion of each ([`level`])
//! 2. **Lists**: each coefficient group becomes a run-level list ([`list`])
//! 3. **Trellis**: CGs are optimized from the last one down, keeping or
//!    dropping each pair and possibly zeroing whole CGs ([`trellis`])
//! 4. **Last position**: the block's terminal coefficient is re-chosen over
//!    every kept pair, then trailing pairs inside lower CGs are trimmed
//!    ([`last_pos`])
//!
//! Rates come from [`estimate`], which drives the real syntax binarizers
//! through a non-adapting bit counter. All per-block buffers live in an
//! [`RdoqScratch`] so blocks are optimized without allocating.
//!
//! # Example
//!
//! ```
//! use zvd_rdoq::cabac::ContextSnapshot;
//! use zvd_rdoq::rdoq::{BlockParams, Rdoq, RdoqConfig};
//!
//! let mut engine = Rdoq::new(RdoqConfig::default()).unwrap();
//! let snapshot = ContextSnapshot::new(32);
//!
//! let mut block = [0i32; 16];
//! block[0] = 50;
//! let params = BlockParams::new(4, 4, 32, true, 0).unwrap();
//!
//! let nnz = engine.quantize_block(&mut block, &params, &snapshot).unwrap();
//! assert_eq!(nnz, 1);
//! assert_eq!(block[0], 3);
//! ```

pub mod batch;
pub mod estimate;
pub mod last_pos;
pub mod level;
pub mod list;
pub mod trellis;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::cabac::{BitCounter, ContextSnapshot};
use crate::error::{Error, Result};
use crate::quant::{validate_bit_depth, FlatWeight, QuantParams, QuantTables, QuantWeight};
use crate::rdo::RdCost;
use crate::scan::{
    ScanOrder, ScanPattern, ScanTables, CG_SIZE, MAX_CGS, MAX_COEFFS, MAX_LOG2_TU, MIN_LOG2_TU,
};
use crate::syntax::write_block;

pub use batch::{quantize_blocks, TransformBlock};
pub use estimate::RateEstimator;
pub use last_pos::{LastPosSearch, Terminal};
pub use level::LevelInfo;
pub use crate::quant::MAX_COEFF_MAGNITUDE;
pub use list::{build_cg_list, CgList, Node, NodeArena, NodeKind};
pub use trellis::{CgOutcome, CgTrellis, CostState, PairCost};

/// Largest accepted Q8 lambda
pub const MAX_LAMBDA: i64 = 1 << 36;

/// Highest intra prediction mode index
pub const MAX_INTRA_MODE: u8 = 34;

/// Per-block parameters supplied by mode decision and rate control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockParams {
    /// Block width in samples (4, 8, 16 or 32)
    pub width: usize,
    /// Block height in samples (4, 8, 16 or 32)
    pub height: usize,
    /// Quantization parameter
    pub qp: u8,
    /// Luma or chroma block
    pub is_luma: bool,
    /// Intra prediction mode, `None` for inter blocks
    #[serde(default)]
    pub intra_mode: Option<u8>,
    /// Rate-distortion weight, Q8 fixed point
    pub lambda: i64,
}

impl BlockParams {
    /// Parameters for an inter block
    pub fn new(width: usize, height: usize, qp: u8, is_luma: bool, lambda: i64) -> Result<Self> {
        let params = Self {
            width,
            height,
            qp,
            is_luma,
            intra_mode: None,
            lambda,
        };
        params.validate()?;
        Ok(params)
    }

    /// Mark the block as intra coded with the given prediction mode
    pub fn with_intra_mode(mut self, mode: u8) -> Result<Self> {
        self.intra_mode = Some(mode);
        self.validate()?;
        Ok(self)
    }

    /// Check dimensions, lambda and intra mode
    ///
    /// The QP range depends on the bit depth and is checked when the block
    /// is quantized.
    pub fn validate(&self) -> Result<()> {
        for dim in [self.width, self.height] {
            let valid = dim.is_power_of_two()
                && (1 << MIN_LOG2_TU..=1 << MAX_LOG2_TU).contains(&dim);
            if !valid {
                return Err(Error::invalid_input(format!(
                    "Invalid block size: {}x{}",
                    self.width, self.height
                )));
            }
        }
        if !(0..=MAX_LAMBDA).contains(&self.lambda) {
            return Err(Error::invalid_input(format!(
                "Lambda {} outside 0..={}",
                self.lambda, MAX_LAMBDA
            )));
        }
        if let Some(mode) = self.intra_mode {
            if mode > MAX_INTRA_MODE {
                return Err(Error::invalid_input(format!("Invalid intra mode: {}", mode)));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn log2_width(&self) -> u8 {
        self.width.trailing_zeros() as u8
    }

    #[inline]
    pub fn log2_height(&self) -> u8 {
        self.height.trailing_zeros() as u8
    }

    /// log2 of the larger block dimension
    #[inline]
    pub fn tu_level(&self) -> u8 {
        self.log2_width().max(self.log2_height())
    }

    #[inline]
    pub fn num_coeffs(&self) -> usize {
        self.width * self.height
    }

    /// Scan pattern this block is coded with
    pub fn scan_pattern(&self) -> ScanPattern {
        ScanPattern::select(
            self.intra_mode,
            self.log2_width(),
            self.log2_height(),
            self.is_luma,
        )
    }
}

/// Engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RdoqConfig {
    /// Sample bit depth (8 or 10)
    pub bit_depth: u8,
    /// Let the trellis zero whole coefficient groups
    pub cg_zeroing: bool,
    /// Re-choose the block's last position after the trellis
    pub global_search: bool,
    /// Fall back to plain floor-rounded levels when they are cheaper
    ///
    /// Adds two full passes of the block syntax writer to every block, even
    /// when the search settled on an all-zero block. The fallback rarely
    /// wins, so latency-bound callers can turn it off.
    pub floor_fallback: bool,
}

impl Default for RdoqConfig {
    fn default() -> Self {
        Self {
            bit_depth: 8,
            cg_zeroing: true,
            global_search: true,
            floor_fallback: true,
        }
    }
}

impl RdoqConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_bit_depth(self.bit_depth)
    }

    /// Parse configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RdoqConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Read-only tables shared by every block
#[derive(Debug, Clone)]
pub struct RdoqTables {
    pub scans: ScanTables,
    pub quant: QuantTables,
}

impl RdoqTables {
    pub fn new(quant: QuantTables) -> Result<Self> {
        Ok(Self {
            scans: ScanTables::new()?,
            quant,
        })
    }
}

/// Per-worker buffers reused across blocks
#[derive(Debug, Clone)]
pub struct RdoqScratch {
    infos: Box<[LevelInfo]>,
    floor: Box<[i32]>,
    arena: NodeArena,
    states: Box<[CostState]>,
}

impl RdoqScratch {
    pub fn new() -> Self {
        Self {
            infos: vec![LevelInfo::default(); MAX_COEFFS].into_boxed_slice(),
            floor: vec![0; MAX_COEFFS].into_boxed_slice(),
            arena: NodeArena::default(),
            states: vec![CostState::default(); MAX_CGS].into_boxed_slice(),
        }
    }
}

impl Default for RdoqScratch {
    fn default() -> Self {
        Self::new()
    }
}

fn check_block_len(have: usize, need: usize) -> Result<()> {
    if have < need {
        return Err(Error::BufferTooSmall { need, have });
    }
    if have > need {
        return Err(Error::invalid_input(format!(
            "Block holds {} coefficients, expected {}",
            have, need
        )));
    }
    Ok(())
}

/// Everything derived once per block
struct BlockSetup<'a> {
    quant: QuantParams,
    scan: &'a ScanOrder,
    snapshot: &'a ContextSnapshot,
    est: RateEstimator<'a>,
    is_luma: bool,
    lambda: i64,
}

impl<'a> BlockSetup<'a> {
    fn new(
        params: &BlockParams,
        tables: &'a RdoqTables,
        snapshot: &'a ContextSnapshot,
        bit_depth: u8,
    ) -> Result<Self> {
        params.validate()?;
        let (log2_width, log2_height) = (params.log2_width(), params.log2_height());
        let quant = QuantParams::new(&tables.quant, params.qp, bit_depth, log2_width, log2_height)?;
        let scan = tables
            .scans
            .get(log2_width, log2_height, params.scan_pattern());

        Ok(Self {
            quant,
            scan,
            snapshot,
            est: RateEstimator::new(snapshot, scan, params.is_luma),
            is_luma: params.is_luma,
            lambda: params.lambda,
        })
    }

    /// Fill `infos` in scan order; returns the highest scan index that can
    /// be nonzero
    fn generate<W: QuantWeight + ?Sized>(
        &self,
        coeffs: &[i32],
        weight: &W,
        infos: &mut [LevelInfo],
    ) -> Option<usize> {
        let mut last = None;
        for (idx, info) in infos.iter_mut().enumerate().rev() {
            let raster = self.scan.raster(idx);
            let (x, y) = self.scan.position(idx);
            let (scale, dequant) = self.quant.weighted_scales(weight.weight(x, y));
            info.generate(coeffs[raster], idx, raster, x, y, &self.quant, scale, dequant);
            if last.is_none() && info.can_be_nonzero() {
                last = Some(idx);
            }
        }
        last
    }

    /// Exact RD cost of coding `levels` for the coefficients in `infos`
    fn rd_cost_of(&self, infos: &[LevelInfo], levels: &[i32]) -> RdCost {
        let distortion = infos
            .iter()
            .map(|info| info.distortion(&self.quant, levels[info.raster_pos as usize].abs()))
            .sum();
        let mut counter = BitCounter::new(self.snapshot);
        write_block(&mut counter, levels, self.scan, self.is_luma);
        RdCost::new(distortion, counter.bits(), self.lambda)
    }

    fn optimize<W: QuantWeight + ?Sized>(
        &self,
        block: &mut [i32],
        config: &RdoqConfig,
        weight: &W,
        scratch: &mut RdoqScratch,
    ) -> usize {
        let num_coeffs = self.scan.num_coeffs();
        let RdoqScratch {
            infos,
            floor,
            arena,
            states,
        } = scratch;
        let infos = &mut infos[..num_coeffs];

        let last = self.generate(block, weight, infos);
        block.fill(0);
        let Some(last) = last else {
            trace!("no coefficient can be nonzero");
            return 0;
        };
        let last_cg = last / CG_SIZE;

        let trellis = CgTrellis::new(&self.est, self.scan, self.lambda, config.cg_zeroing);
        let mut rank = 0u8;
        for cg in (0..=last_cg).rev() {
            let top = (cg == last_cg).then_some(last % CG_SIZE);
            let list = build_cg_list(arena, infos, cg, top);
            let outcome = trellis.optimize(
                arena,
                list,
                infos,
                cg,
                cg == last_cg,
                block,
                &mut rank,
                &mut states[cg],
            );
            trace!(cg, ?outcome, pairs = list.pairs, kept = states[cg].pair_num, "cg optimized");
        }

        if config.global_search {
            let search = LastPosSearch::new(&self.est, self.scan, self.lambda);
            match search.search(states, last_cg + 1, block, true) {
                Some(terminal) => trace!(
                    scan_pos = terminal.scan_pos,
                    cost = terminal.cost,
                    "terminal position chosen"
                ),
                None => trace!("all-zero block is cheapest"),
            }
        }

        if config.floor_fallback {
            let floor = &mut floor[..num_coeffs];
            for info in infos.iter() {
                floor[info.raster_pos as usize] = info.signed(info.floor_level);
            }
            let chosen = self.rd_cost_of(infos, block);
            let naive = self.rd_cost_of(infos, floor);
            if naive.is_better_than(&chosen) {
                trace!(chosen = chosen.cost, naive = naive.cost, "keeping floor levels");
                block.copy_from_slice(floor);
            }
        }

        let num_nonzero = block.iter().filter(|&&level| level != 0).count();
        trace!(num_nonzero, last, "block optimized");
        num_nonzero
    }
}

/// Optimize one transform block in place
///
/// On success `block` holds the signed levels and the return value is the
/// number of nonzero levels (0 iff the block is all zero). `snapshot` is only
/// read.
pub fn rdoq_block<W: QuantWeight + ?Sized>(
    block: &mut [i32],
    params: &BlockParams,
    tables: &RdoqTables,
    snapshot: &ContextSnapshot,
    config: &RdoqConfig,
    weight: &W,
    scratch: &mut RdoqScratch,
) -> Result<usize> {
    check_block_len(block.len(), params.num_coeffs())?;
    if let Some(c) = block
        .iter()
        .find(|c| c.unsigned_abs() > MAX_COEFF_MAGNITUDE)
    {
        return Err(Error::invalid_input(format!(
            "Coefficient {} exceeds magnitude {}",
            c, MAX_COEFF_MAGNITUDE
        )));
    }
    let setup = BlockSetup::new(params, tables, snapshot, config.bit_depth)?;
    Ok(setup.optimize(block, config, weight, scratch))
}

/// Exact RD cost of coding `original` as `levels`
///
/// Distortion uses the same reconstruction as the optimizer and the rate is
/// the full block syntax priced with `snapshot`.
pub fn evaluate_block_cost<W: QuantWeight + ?Sized>(
    original: &[i32],
    levels: &[i32],
    params: &BlockParams,
    tables: &RdoqTables,
    snapshot: &ContextSnapshot,
    bit_depth: u8,
    weight: &W,
) -> Result<RdCost> {
    check_block_len(original.len(), params.num_coeffs())?;
    check_block_len(levels.len(), params.num_coeffs())?;
    let setup = BlockSetup::new(params, tables, snapshot, bit_depth)?;
    let mut infos = vec![LevelInfo::default(); params.num_coeffs()];
    setup.generate(original, weight, &mut infos);
    Ok(setup.rd_cost_of(&infos, levels))
}

/// RDOQ engine: shared tables, configuration and one set of scratch buffers
///
/// An engine is not shared between threads while quantizing; use
/// [`Rdoq::worker`] to get one per thread.
#[derive(Debug)]
pub struct Rdoq {
    config: RdoqConfig,
    tables: Arc<RdoqTables>,
    scratch: RdoqScratch,
}

impl Rdoq {
    /// Create an engine with the default quantization tables
    pub fn new(config: RdoqConfig) -> Result<Self> {
        Self::with_tables(config, QuantTables::default())
    }

    /// Create an engine with custom quantization tables
    pub fn with_tables(config: RdoqConfig, quant: QuantTables) -> Result<Self> {
        config.validate()?;
        let tables = Arc::new(RdoqTables::new(quant)?);
        debug!(
            bit_depth = config.bit_depth,
            cg_zeroing = config.cg_zeroing,
            global_search = config.global_search,
            floor_fallback = config.floor_fallback,
            "RDOQ engine created"
        );
        Ok(Self {
            config,
            tables,
            scratch: RdoqScratch::new(),
        })
    }

    pub fn config(&self) -> &RdoqConfig {
        &self.config
    }

    pub fn tables(&self) -> &RdoqTables {
        &self.tables
    }

    /// Engine sharing this one's tables with its own scratch buffers
    pub fn worker(&self) -> Self {
        Self {
            config: self.config,
            tables: Arc::clone(&self.tables),
            scratch: RdoqScratch::new(),
        }
    }

    /// Optimize a block without weighted quantization
    pub fn quantize_block(
        &mut self,
        block: &mut [i32],
        params: &BlockParams,
        snapshot: &ContextSnapshot,
    ) -> Result<usize> {
        self.quantize_block_weighted(block, params, snapshot, &FlatWeight)
    }

    /// Optimize a block with a weighting matrix
    pub fn quantize_block_weighted<W: QuantWeight + ?Sized>(
        &mut self,
        block: &mut [i32],
        params: &BlockParams,
        snapshot: &ContextSnapshot,
        weight: &W,
    ) -> Result<usize> {
        rdoq_block(
            block,
            params,
            &self.tables,
            snapshot,
            &self.config,
            weight,
            &mut self.scratch,
        )
    }

    /// Exact RD cost of coding `original` as `levels` without weighting
    pub fn block_cost(
        &self,
        original: &[i32],
        levels: &[i32],
        params: &BlockParams,
        snapshot: &ContextSnapshot,
    ) -> Result<RdCost> {
        evaluate_block_cost(
            original,
            levels,
            params,
            &self.tables,
            snapshot,
            self.config.bit_depth,
            &FlatWeight,
        )
    }
}
