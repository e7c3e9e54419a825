//! Global last-position search
//!
//! After the per-CG trellis, every kept pair is a candidate for the block's
//! last significant coefficient. The search prices each candidate from the
//! recorded [`CostState`]s, only re-estimating the last-CG and last-position
//! syntax that moves with the terminal, then trims trailing pairs inside the
//! CGs below the winner.

use super::estimate::RateEstimator;
use super::trellis::CostState;
use crate::rdo::{cost_beats, rd_cost, Cost, MAX_COST};
use crate::scan::{ScanOrder, MAX_CGS};

/// Terminal chosen by the search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terminal {
    /// CG holding the last significant coefficient
    pub cg: usize,
    /// Block scan index of the last significant coefficient
    pub scan_pos: usize,
    /// Estimated cost of the block with this terminal
    pub cost: Cost,
}

pub struct LastPosSearch<'a> {
    est: &'a RateEstimator<'a>,
    scan: &'a ScanOrder,
    lambda: i64,
}

impl<'a> LastPosSearch<'a> {
    pub fn new(est: &'a RateEstimator<'a>, scan: &'a ScanOrder, lambda: i64) -> Self {
        Self { est, scan, lambda }
    }

    #[inline]
    fn weighted(&self, bits: u32) -> Cost {
        rd_cost(0, self.lambda, bits)
    }

    /// Pick the block's terminal position and trim `block` to it
    ///
    /// `states[..num_cgs]` are the trellis results for CGs up to the
    /// provisional last CG. Returns `None` when coding nothing is cheapest;
    /// `block` is then all zero.
    pub fn search(
        &self,
        states: &mut [CostState],
        num_cgs: usize,
        block: &mut [i32],
        refine: bool,
    ) -> Option<Terminal> {
        debug_assert!(num_cgs <= MAX_CGS && num_cgs <= states.len());
        let states = &mut states[..num_cgs];

        // below[c]: cost of CGs 0..c when they sit under the terminal
        let mut below = [0 as Cost; MAX_CGS + 1];
        let mut below_bits = [0u32; MAX_CGS + 1];
        for (c, state) in states.iter().enumerate() {
            below[c + 1] = below[c] + state.inner_cost();
            below_bits[c + 1] = below_bits[c] + state.inner_bits();
        }

        // Coding nothing spends no bits
        let mut best_cost: Cost = states.iter().map(CostState::uncoded_total).sum();
        let mut best_bits = 0u32;
        let mut best: Option<(usize, usize)> = None;
        let mut above: Cost = 0;

        for c in (0..num_cgs).rev() {
            let state = &states[c];
            if state.pair_num > 0 {
                let last_cg_bits = self.est.last_cg(self.scan.cg_position(c));
                let last_cg_cost = self.weighted(last_cg_bits);
                let mut prefix_uncoded: Cost = 0;
                let mut suffix_coded = state.coded_total();
                let mut suffix_bits = state.coded_bits_total();

                for (j, pair) in state.kept().iter().enumerate() {
                    let last_pos_bits = self.est.last_pos(pair.coords(), true, c);
                    let cost = above
                        + prefix_uncoded
                        + last_cg_cost
                        + self.weighted(last_pos_bits)
                        + suffix_coded
                        + below[c];
                    let bits = last_cg_bits + last_pos_bits + suffix_bits + below_bits[c];
                    if cost_beats(cost, bits, best_cost, best_bits) {
                        best_cost = cost;
                        best_bits = bits;
                        best = Some((c, j));
                    }
                    prefix_uncoded += pair.uncoded_cost;
                    suffix_coded -= pair.coded_cost();
                    suffix_bits -= pair.coded_bits();
                }
            }
            above += state.uncoded_total();
        }

        let Some((terminal_cg, first)) = best else {
            for state in states.iter_mut() {
                state.drop_leading(state.pair_num, block, self.scan);
            }
            return None;
        };

        for state in states[terminal_cg + 1..].iter_mut() {
            state.drop_leading(state.pair_num, block, self.scan);
        }
        states[terminal_cg].drop_leading(first, block, self.scan);

        if refine {
            for (c, state) in states[..terminal_cg].iter_mut().enumerate() {
                self.refine_cg(state, c, block);
            }
        }

        Some(Terminal {
            cg: terminal_cg,
            scan_pos: states[terminal_cg].pairs[0].scan_pos as usize,
            cost: best_cost,
        })
    }

    /// Re-pick the highest coded pair of a CG below the terminal
    ///
    /// The CG's significance flag stays set, so only the in-CG last position
    /// and the pairs above it are traded off.
    fn refine_cg(&self, state: &mut CostState, cg: usize, block: &mut [i32]) {
        if state.pair_num < 2 {
            return;
        }

        let mut best_cost = MAX_COST;
        let mut best_bits = u32::MAX;
        let mut best = 0;
        let mut prefix_uncoded: Cost = 0;
        let mut suffix_coded = state.coded_total();
        let mut suffix_bits = state.coded_bits_total();

        for (j, pair) in state.kept().iter().enumerate() {
            let last_pos_bits = self.est.last_pos(pair.coords(), false, cg);
            let cost = prefix_uncoded + self.weighted(last_pos_bits) + suffix_coded;
            let bits = last_pos_bits + suffix_bits;
            if cost_beats(cost, bits, best_cost, best_bits) {
                best_cost = cost;
                best_bits = bits;
                best = j;
            }
            prefix_uncoded += pair.uncoded_cost;
            suffix_coded -= pair.coded_cost();
            suffix_bits -= pair.coded_bits();
        }

        if best > 0 {
            state.drop_leading(best, block, self.scan);
            state.last_run_bits = self.est.last_pos(state.pairs[0].coords(), false, cg);
            state.last_run_cost = self.weighted(state.last_run_bits);
        }
    }
}
