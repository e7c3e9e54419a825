//! Run-level coefficient syntax
//!
//! A block is coded as:
//!
//! 1. the position of the last coefficient group holding a nonzero level,
//! 2. for every CG from that one down to CG 0:
//!    - a significance flag (all CGs below the last one),
//!    - the position of the highest nonzero coefficient inside the CG,
//!    - `(level, run)` pairs walking down the CG, where `run` counts the
//!      zeros below the level; the CG ends when the run reaches position 0.
//!
//! Every element is binarized into a [`BinSink`]. Driving the same functions
//! through a [`BitCounter`](crate::cabac::BitCounter) gives the estimated rate
//! and through an arithmetic coder the real bitstream, so the two can never
//! disagree.

use crate::cabac::{BinSink, CtxFamily, CtxId};
use crate::scan::{ScanOrder, CG_SIZE};

/// Rank bucket for `min(|level|, 5)`
pub const TAB_RANK: [u8; 6] = [0, 1, 2, 3, 3, 4];

/// Highest rank bucket
pub const MAX_RANK: u8 = 4;

/// Unary prefix length after which level magnitudes escape to Exp-Golomb
pub const LEVEL_ESCAPE: u32 = 32;

/// Largest coordinate inside a CG
const MAX_CG_COORD: usize = 3;

/// Rank after coding a level of magnitude `abs_level`
#[inline]
pub fn update_rank(rank: u8, abs_level: u32) -> u8 {
    rank.max(TAB_RANK[abs_level.min(5) as usize])
}

/// Level context region: DC, rest of CG 0, any other CG
#[inline]
fn level_region(cg_is_first: bool, pos_in_cg: usize) -> usize {
    match (cg_is_first, pos_in_cg) {
        (true, 0) => 0,
        (true, _) => 1,
        (false, _) => 2,
    }
}

#[inline]
fn level_ctx(rank: u8, region: usize, bin: u32, is_luma: bool) -> CtxId {
    debug_assert!(rank <= MAX_RANK, "rank {} out of range", rank);
    let idx = rank as usize * 6 + region * 2 + bin.min(1) as usize;
    CtxId::new(CtxFamily::Level, is_luma, idx)
}

#[inline]
fn run_ctx(cg_is_first: bool, abs_sum: u32, bin: u32, is_luma: bool) -> CtxId {
    let idx = (cg_is_first as usize) * 8 + (abs_sum.min(7) >> 1) as usize * 2 + bin.min(1) as usize;
    CtxId::new(CtxFamily::Run, is_luma, idx)
}

/// Order-0 Exp-Golomb, bypass coded
pub fn write_exp_golomb<S: BinSink>(sink: &mut S, value: u32) {
    let code = value as u64 + 1;
    let len = 63 - code.leading_zeros();
    for _ in 0..len {
        sink.encode_bypass(1);
    }
    sink.encode_bypass(0);
    sink.encode_bypass_bins((code - (1u64 << len)) as u32, len);
}

/// Magnitude and sign of one nonzero level
///
/// `rank` is the bucket before this level is coded; `pos_in_cg` selects
/// the DC region of CG 0.
pub fn write_level<S: BinSink>(
    sink: &mut S,
    abs_level: u32,
    negative: bool,
    rank: u8,
    cg_is_first: bool,
    pos_in_cg: usize,
    is_luma: bool,
) {
    debug_assert!(abs_level > 0, "zero levels are coded as runs");
    let region = level_region(cg_is_first, pos_in_cg);
    let sym = abs_level - 1;
    let prefix = sym.min(LEVEL_ESCAPE);

    for bin in 0..prefix {
        sink.encode_bin(level_ctx(rank, region, bin, is_luma), 1);
    }
    if sym < LEVEL_ESCAPE {
        sink.encode_bin(level_ctx(rank, region, prefix, is_luma), 0);
    } else {
        write_exp_golomb(sink, sym - LEVEL_ESCAPE);
    }
    sink.encode_bypass(negative as u8);
}

/// Zeros below the level at `pos_in_cg`, truncated unary with max `pos_in_cg`
///
/// `abs_sum` includes the level just coded.
pub fn write_run<S: BinSink>(
    sink: &mut S,
    run: usize,
    pos_in_cg: usize,
    abs_sum: u32,
    cg_is_first: bool,
    is_luma: bool,
) {
    debug_assert!(run <= pos_in_cg, "run {} past CG start at {}", run, pos_in_cg);
    for bin in 0..run as u32 {
        sink.encode_bin(run_ctx(cg_is_first, abs_sum, bin, is_luma), 1);
    }
    if run < pos_in_cg {
        sink.encode_bin(run_ctx(cg_is_first, abs_sum, run as u32, is_luma), 0);
    }
}

/// Coordinates of the highest nonzero coefficient inside a CG
pub fn write_last_pos_in_cg<S: BinSink>(
    sink: &mut S,
    x: usize,
    y: usize,
    is_last_cg: bool,
    cg_is_first: bool,
    is_luma: bool,
) {
    let base = (is_last_cg as usize) * 12 + (cg_is_first as usize) * 6;
    for (axis, value) in [x, y].into_iter().enumerate() {
        debug_assert!(value <= MAX_CG_COORD);
        for bin in 0..value.min(MAX_CG_COORD) {
            let ctx = CtxId::new(CtxFamily::LastPos, is_luma, base + axis * 3 + bin);
            sink.encode_bin(ctx, 1);
        }
        if value < MAX_CG_COORD {
            let ctx = CtxId::new(CtxFamily::LastPos, is_luma, base + axis * 3 + value);
            sink.encode_bin(ctx, 0);
        }
    }
}

/// Grid coordinates of the last CG
///
/// Each axis is truncated unary with max `cgs - 1`; an axis with a single CG
/// costs nothing.
pub fn write_last_cg<S: BinSink>(
    sink: &mut S,
    cg_x: usize,
    cg_y: usize,
    cgs_x: usize,
    cgs_y: usize,
    diagonal: bool,
    is_luma: bool,
) {
    let base = (diagonal as usize) * 6;
    for (axis, (value, count)) in [(cg_x, cgs_x), (cg_y, cgs_y)].into_iter().enumerate() {
        debug_assert!(value < count);
        let max = count - 1;
        for bin in 0..value {
            let ctx = CtxId::new(CtxFamily::LastCg, is_luma, base + axis * 3 + bin.min(2));
            sink.encode_bin(ctx, 1);
        }
        if value < max {
            let ctx = CtxId::new(CtxFamily::LastCg, is_luma, base + axis * 3 + value.min(2));
            sink.encode_bin(ctx, 0);
        }
    }
}

/// "CG holds a nonzero level" flag for CGs below the last one
pub fn write_sig_cg<S: BinSink>(sink: &mut S, significant: bool, cg_is_first: bool, is_luma: bool) {
    let ctx = CtxId::new(CtxFamily::SigCg, is_luma, cg_is_first as usize);
    sink.encode_bin(ctx, significant as u8);
}

/// Code a whole block of raster-ordered levels
///
/// Returns the number of nonzero levels. An all-zero block emits nothing;
/// signaling that is left to the caller's coded-block flag.
pub fn write_block<S: BinSink>(
    sink: &mut S,
    levels: &[i32],
    scan: &ScanOrder,
    is_luma: bool,
) -> usize {
    debug_assert_eq!(levels.len(), scan.num_coeffs());
    let level_at = |idx: usize| levels[scan.raster(idx)];

    let last = match (0..scan.num_coeffs()).rev().find(|&i| level_at(i) != 0) {
        Some(last) => last,
        None => return 0,
    };
    let last_cg = last / CG_SIZE;

    let (cgs_x, cgs_y) = scan.cg_grid();
    let (cg_x, cg_y) = scan.cg_position(last_cg);
    write_last_cg(
        sink,
        cg_x,
        cg_y,
        cgs_x,
        cgs_y,
        scan.pattern().is_diagonal(),
        is_luma,
    );

    let mut rank = 0u8;
    let mut num_nonzero = 0;

    for cg in (0..=last_cg).rev() {
        let base = cg * CG_SIZE;
        let cg_is_first = cg == 0;
        let top = (0..CG_SIZE).rev().find(|&p| level_at(base + p) != 0);

        if cg < last_cg {
            write_sig_cg(sink, top.is_some(), cg_is_first, is_luma);
        }
        let Some(top) = top else { continue };

        let (x, y) = scan.position_in_cg(top);
        write_last_pos_in_cg(sink, x, y, cg == last_cg, cg_is_first, is_luma);

        let mut pos = top;
        let mut abs_sum = 0u32;
        loop {
            let level = level_at(base + pos);
            let abs_level = level.unsigned_abs();
            write_level(sink, abs_level, level < 0, rank, cg_is_first, pos, is_luma);
            abs_sum = abs_sum.saturating_add(abs_level);
            rank = update_rank(rank, abs_level);
            num_nonzero += 1;

            let run = (0..pos).rev().take_while(|&p| level_at(base + p) == 0).count();
            write_run(sink, run, pos, abs_sum, cg_is_first, is_luma);
            if run == pos {
                break;
            }
            pos -= run + 1;
        }
    }

    num_nonzero
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cabac::{BitCounter, ContextSnapshot, ContextTrainer, BYPASS_BITS};
    use crate::scan::ScanPattern;

    /// Sink that records every bin
    #[derive(Default)]
    struct Recorder {
        bins: Vec<(Option<CtxId>, u8)>,
    }

    impl BinSink for Recorder {
        fn encode_bin(&mut self, ctx: CtxId, bin: u8) {
            self.bins.push((Some(ctx), bin));
        }

        fn encode_bypass(&mut self, bin: u8) {
            self.bins.push((None, bin));
        }
    }

    #[test]
    fn test_rank_table_boundaries() {
        assert_eq!(update_rank(0, 0), 0);
        assert_eq!(update_rank(0, 1), 1);
        assert_eq!(update_rank(0, 2), 2);
        assert_eq!(update_rank(0, 3), 3);
        assert_eq!(update_rank(0, 4), 3);
        assert_eq!(update_rank(0, 5), 4);
        assert_eq!(update_rank(0, 6), 4);
        assert_eq!(update_rank(0, u32::MAX), MAX_RANK);
        // Never decreases
        assert_eq!(update_rank(4, 1), 4);
        assert_eq!(update_rank(3, 4), 3);
    }

    #[test]
    fn test_exp_golomb_lengths() {
        for (value, bins) in [(0u32, 1usize), (1, 3), (2, 3), (3, 5), (6, 5), (7, 7)] {
            let mut rec = Recorder::default();
            write_exp_golomb(&mut rec, value);
            assert_eq!(rec.bins.len(), bins, "value {}", value);
            assert!(rec.bins.iter().all(|(ctx, _)| ctx.is_none()));
        }

        let mut rec = Recorder::default();
        write_exp_golomb(&mut rec, u32::MAX);
        assert_eq!(rec.bins.len(), 65);
    }

    #[test]
    fn test_level_binarization() {
        let mut rec = Recorder::default();
        write_level(&mut rec, 3, true, 0, true, 0, true);
        let bins: Vec<u8> = rec.bins.iter().map(|b| b.1).collect();
        assert_eq!(bins, vec![1, 1, 0, 1]);
        assert!(rec.bins[3].0.is_none());

        let mut rec = Recorder::default();
        write_level(&mut rec, LEVEL_ESCAPE + 1, false, 2, false, 7, false);
        // 32 context bins, 1-bin Exp-Golomb, sign
        assert_eq!(rec.bins.len(), 34);
        assert!(rec.bins[..32].iter().all(|b| b.1 == 1 && b.0.is_some()));
    }

    #[test]
    fn test_run_binarization() {
        let mut rec = Recorder::default();
        write_run(&mut rec, 0, 0, 1, true, true);
        assert!(rec.bins.is_empty());

        let mut rec = Recorder::default();
        write_run(&mut rec, 2, 5, 1, false, true);
        let bins: Vec<u8> = rec.bins.iter().map(|b| b.1).collect();
        assert_eq!(bins, vec![1, 1, 0]);

        let mut rec = Recorder::default();
        write_run(&mut rec, 5, 5, 1, false, true);
        assert_eq!(rec.bins.len(), 5);
    }

    #[test]
    fn test_last_cg_single_cg_is_free() {
        let mut rec = Recorder::default();
        write_last_cg(&mut rec, 0, 0, 1, 1, true, true);
        assert!(rec.bins.is_empty());

        let mut rec = Recorder::default();
        write_last_cg(&mut rec, 7, 0, 8, 2, true, true);
        // 7 ones (max reached, no terminator) + a 0 for y
        assert_eq!(rec.bins.len(), 8);
    }

    #[test]
    fn test_write_block_empty() {
        let scan = ScanOrder::new(2, 2, ScanPattern::Diagonal).unwrap();
        let snapshot = ContextSnapshot::default();
        let mut counter = BitCounter::new(&snapshot);
        assert_eq!(write_block(&mut counter, &[0; 16], &scan, true), 0);
        assert_eq!(counter.bits(), 0);
    }

    #[test]
    fn test_write_block_dc_only() {
        let scan = ScanOrder::new(2, 2, ScanPattern::Diagonal).unwrap();
        let mut levels = [0i32; 16];
        levels[0] = -2;

        let mut rec = Recorder::default();
        assert_eq!(write_block(&mut rec, &levels, &scan, true), 1);
        // last pos (0,0): two 0 bins; level 2: "1 0" + sign; no run bins at pos 0
        let bins: Vec<u8> = rec.bins.iter().map(|b| b.1).collect();
        assert_eq!(bins, vec![0, 0, 1, 0, 1]);
    }

    #[test]
    fn test_write_block_counts_every_nonzero() {
        let scan = ScanOrder::new(3, 3, ScanPattern::Diagonal).unwrap();
        let mut levels = [0i32; 64];
        levels[0] = 9;
        levels[1] = -1;
        levels[9] = 2;
        levels[63] = 1;
        levels[36] = -40;

        let snapshot = ContextSnapshot::new(32);
        let mut counter = BitCounter::new(&snapshot);
        assert_eq!(write_block(&mut counter, &levels, &scan, false), 5);
        assert!(counter.bits() > 5 * BYPASS_BITS);
    }

    #[test]
    fn test_write_block_trainer_matches_first_pass_count() {
        let scan = ScanOrder::new(2, 3, ScanPattern::Diagonal).unwrap();
        let mut levels = [0i32; 32];
        levels[0] = 3;
        levels[5] = 1;
        levels[17] = -1;

        let mut snapshot = ContextSnapshot::new(30);
        let before = snapshot.clone();
        let mut counter = BitCounter::new(&before);
        write_block(&mut counter, &levels, &scan, true);

        let mut trainer = ContextTrainer::new(&mut snapshot);
        write_block(&mut trainer, &levels, &scan, true);
        let (trained_bits, bins) = (trainer.bits(), trainer.bins());
        assert!(bins > 0);
        assert_ne!(snapshot, before);
        // Adaptation is applied after pricing each bin, so the totals only
        // agree when no context repeats; they must at least be close.
        let diff = (trained_bits as i64 - counter.bits() as i64).abs();
        assert!(diff < counter.bits() as i64);
    }
}
