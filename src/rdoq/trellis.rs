//! Per-CG trellis optimization
//!
//! Walks one CG's run-level list in coding order (highest position first)
//! and decides, pair by pair, whether to keep a nonzero level or merge the
//! coefficient into the zero run of its predecessor. The costs of every kept
//! pair are recorded in a [`CostState`] so the last-position search can
//! re-evaluate terminal positions without pricing levels or runs again.

use super::estimate::RateEstimator;
use super::level::LevelInfo;
use super::list::{CgList, NodeArena, NodeKind};
use crate::rdo::{cost_beats, rd_cost, Cost};
use crate::scan::{ScanOrder, CG_SIZE};
use crate::syntax::update_rank;

/// Costs of one kept pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairCost {
    /// Distortion of the chosen level plus λ × its level bits
    pub level_cost: Cost,
    /// λ × bits of the run below the level
    pub run_cost: Cost,
    /// Distortion if the coefficient were coded as zero
    pub uncoded_cost: Cost,
    /// Level bits
    pub level_bits: u32,
    /// Run bits
    pub run_bits: u32,
    /// Block scan index
    pub scan_pos: u16,
    /// Column inside the CG
    pub pos_x: u8,
    /// Row inside the CG
    pub pos_y: u8,
}

impl PairCost {
    #[inline]
    pub fn coded_cost(&self) -> Cost {
        self.level_cost + self.run_cost
    }

    #[inline]
    pub fn coded_bits(&self) -> u32 {
        self.level_bits + self.run_bits
    }

    #[inline]
    pub fn coords(&self) -> (usize, usize) {
        (self.pos_x as usize, self.pos_y as usize)
    }
}

/// Per-CG cost summary
///
/// `pairs[..pair_num]` are the kept pairs in coding order, so `pairs[0]` is
/// the CG's highest nonzero coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostState {
    pub pairs: [PairCost; CG_SIZE],
    pub pair_num: usize,
    /// λ × bits of a set significance flag
    pub sig_cg_flag_cost: Cost,
    /// λ × bits of a cleared significance flag
    pub sig_cg_flag_cost0: Cost,
    /// λ × bits of the CG's last position when it is not the block's last CG
    pub last_run_cost: Cost,
    pub sig_cg_flag_bits: u32,
    pub sig_cg_flag_bits0: u32,
    pub last_run_bits: u32,
}

impl Default for CostState {
    fn default() -> Self {
        Self {
            pairs: [PairCost::default(); CG_SIZE],
            pair_num: 0,
            sig_cg_flag_cost: 0,
            sig_cg_flag_cost0: 0,
            last_run_cost: 0,
            sig_cg_flag_bits: 0,
            sig_cg_flag_bits0: 0,
            last_run_bits: 0,
        }
    }
}

impl CostState {
    /// Kept pairs in coding order
    #[inline]
    pub fn kept(&self) -> &[PairCost] {
        &self.pairs[..self.pair_num]
    }

    /// Sum of level and run costs over the kept pairs
    pub fn coded_total(&self) -> Cost {
        self.kept().iter().map(PairCost::coded_cost).sum()
    }

    /// Level and run bits over the kept pairs
    pub fn coded_bits_total(&self) -> u32 {
        self.kept().iter().map(PairCost::coded_bits).sum()
    }

    /// Distortion of zeroing every kept pair
    pub fn uncoded_total(&self) -> Cost {
        self.kept().iter().map(|p| p.uncoded_cost).sum()
    }

    /// Cost of this CG when it sits below the block's last CG
    pub fn inner_cost(&self) -> Cost {
        if self.pair_num == 0 {
            self.sig_cg_flag_cost0
        } else {
            self.sig_cg_flag_cost + self.last_run_cost + self.coded_total()
        }
    }

    /// Bits behind [`CostState::inner_cost`]
    pub fn inner_bits(&self) -> u32 {
        if self.pair_num == 0 {
            self.sig_cg_flag_bits0
        } else {
            self.sig_cg_flag_bits + self.last_run_bits + self.coded_bits_total()
        }
    }

    /// Zero the first `count` kept pairs in `block` and drop them
    pub fn drop_leading(&mut self, count: usize, block: &mut [i32], scan: &ScanOrder) {
        let count = count.min(self.pair_num);
        for pair in &self.pairs[..count] {
            block[scan.raster(pair.scan_pos as usize)] = 0;
        }
        self.pairs.copy_within(count..self.pair_num, 0);
        self.pair_num -= count;
    }

    fn reset(&mut self) {
        self.pair_num = 0;
        self.sig_cg_flag_cost = 0;
        self.sig_cg_flag_cost0 = 0;
        self.last_run_cost = 0;
        self.sig_cg_flag_bits = 0;
        self.sig_cg_flag_bits0 = 0;
        self.last_run_bits = 0;
    }
}

/// How a CG came out of the trellis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgOutcome {
    /// At least one pair survived
    Coded,
    /// Every pair was merged into a run
    Empty,
    /// Survivors existed but the whole CG was cheaper as zero
    Zeroed,
}

/// Trellis over the CGs of one block
pub struct CgTrellis<'a> {
    est: &'a RateEstimator<'a>,
    scan: &'a ScanOrder,
    lambda: i64,
    cg_zeroing: bool,
}

impl<'a> CgTrellis<'a> {
    pub fn new(est: &'a RateEstimator<'a>, scan: &'a ScanOrder, lambda: i64, cg_zeroing: bool) -> Self {
        Self {
            est,
            scan,
            lambda,
            cg_zeroing,
        }
    }

    #[inline]
    fn weighted(&self, bits: u32) -> Cost {
        rd_cost(0, self.lambda, bits)
    }

    /// Optimize one CG
    ///
    /// Chosen levels are written to `block` (which must hold zeros for this
    /// CG on entry); `rank` is carried across CGs in coding order.
    #[allow(clippy::too_many_arguments)]
    pub fn optimize(
        &self,
        arena: &mut NodeArena,
        list: CgList,
        infos: &[LevelInfo],
        cg: usize,
        is_last_cg: bool,
        block: &mut [i32],
        rank: &mut u8,
        state: &mut CostState,
    ) -> CgOutcome {
        state.reset();
        let rank_at_start = *rank;

        let mut pred = list.head;
        let mut pred_abs_sum = 0u32;
        let mut cur = arena.get(list.head).next;

        while let Some(idx) = cur {
            let node = *arena.get(idx);
            let info = &infos[node.scan_pos as usize];
            let pos = node.pos as usize;
            let run = node.run as usize;
            let next = node.next;

            let pred_node = *arena.get(pred);
            let pred_is_head = pred_node.kind != NodeKind::RunLevelPair;

            // Bits the predecessor spends if this pair is kept or dropped
            let (pred_keep_bits, pred_zero_bits) = if pred_is_head {
                let keep = self
                    .est
                    .last_pos(self.scan.position_in_cg(pos), is_last_cg, cg);
                let zero = if run < pos {
                    let below = self.scan.position_in_cg(pos - run - 1);
                    self.est.last_pos(below, is_last_cg, cg)
                } else {
                    0
                };
                (keep, zero)
            } else {
                let pred_pos = pred_node.pos as usize;
                let pred_run = pred_node.run as usize;
                (
                    self.est.run(pred_run, pred_pos, pred_abs_sum, cg),
                    self.est.run(pred_run + 1 + run, pred_pos, pred_abs_sum, cg),
                )
            };

            let mut best_cost = rd_cost(info.zero_error(), self.lambda, pred_zero_bits);
            let mut best_bits = pred_zero_bits;
            let mut best = None;
            for k in 1..info.num_levels as usize {
                let level = info.levels[k] as u32;
                let level_bits = self.est.level(level, *rank, cg, pos);
                let run_bits = self.est.run(run, pos, pred_abs_sum + level, cg);
                let bits = level_bits + run_bits + pred_keep_bits;
                let cost = rd_cost(info.errors[k], self.lambda, bits);
                if cost_beats(cost, bits, best_cost, best_bits) {
                    best_cost = cost;
                    best_bits = bits;
                    best = Some((k, level_bits, run_bits));
                }
            }

            match best {
                None => {
                    arena.unlink(idx);
                    let merged = pred_node.run as usize + 1 + run;
                    arena.get_mut(pred).run = merged as u8;
                    if !pred_is_head {
                        let bits = self.est.run(merged, pred_node.pos as usize, pred_abs_sum, cg);
                        let pred_pair = &mut state.pairs[state.pair_num - 1];
                        pred_pair.run_cost = self.weighted(bits);
                        pred_pair.run_bits = bits;
                    }
                }
                Some((k, level_bits, run_bits)) => {
                    let level = info.levels[k];
                    block[info.raster_pos as usize] = info.signed(level);
                    arena.get_mut(idx).level = level;

                    let (x, y) = self.scan.position_in_cg(pos);
                    state.pairs[state.pair_num] = PairCost {
                        level_cost: rd_cost(info.errors[k], self.lambda, level_bits),
                        run_cost: self.weighted(run_bits),
                        uncoded_cost: info.zero_error(),
                        level_bits,
                        run_bits,
                        scan_pos: node.scan_pos,
                        pos_x: x as u8,
                        pos_y: y as u8,
                    };
                    state.pair_num += 1;

                    *rank = update_rank(*rank, level as u32);
                    pred_abs_sum += level as u32;
                    pred = idx;
                }
            }

            cur = next;
        }

        state.sig_cg_flag_bits = self.est.sig_cg(true, cg);
        state.sig_cg_flag_bits0 = self.est.sig_cg(false, cg);
        state.sig_cg_flag_cost = self.weighted(state.sig_cg_flag_bits);
        state.sig_cg_flag_cost0 = self.weighted(state.sig_cg_flag_bits0);
        if state.pair_num == 0 {
            return CgOutcome::Empty;
        }
        state.last_run_bits = self.est.last_pos(state.pairs[0].coords(), false, cg);
        state.last_run_cost = self.weighted(state.last_run_bits);

        // The block's last CG is settled by the last-position search
        if self.cg_zeroing && !is_last_cg {
            let zero_cost = state.uncoded_total() + state.sig_cg_flag_cost0;
            if cost_beats(
                zero_cost,
                state.sig_cg_flag_bits0,
                state.inner_cost(),
                state.inner_bits(),
            ) {
                state.drop_leading(state.pair_num, block, self.scan);
                *rank = rank_at_start;
                return CgOutcome::Zeroed;
            }
        }

        CgOutcome::Coded
    }
}
