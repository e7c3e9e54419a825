//! Bit-cost estimation
//!
//! Each estimate runs the real binarizer from [`crate::syntax`] into a
//! [`BitCounter`], so the estimated rate of a syntax element is exactly what
//! the entropy coder would spend on it with the same snapshot. Nothing here
//! adapts the snapshot.

use crate::cabac::{BitCounter, ContextSnapshot};
use crate::scan::ScanOrder;
use crate::syntax;

/// Rate estimator for one block
#[derive(Debug, Clone, Copy)]
pub struct RateEstimator<'a> {
    snapshot: &'a ContextSnapshot,
    is_luma: bool,
    diagonal: bool,
    cgs_x: usize,
    cgs_y: usize,
}

impl<'a> RateEstimator<'a> {
    pub fn new(snapshot: &'a ContextSnapshot, scan: &ScanOrder, is_luma: bool) -> Self {
        let (cgs_x, cgs_y) = scan.cg_grid();
        Self {
            snapshot,
            is_luma,
            diagonal: scan.pattern().is_diagonal(),
            cgs_x,
            cgs_y,
        }
    }

    #[inline]
    fn count(&self, f: impl FnOnce(&mut BitCounter<'a>)) -> u32 {
        let mut counter = BitCounter::new(self.snapshot);
        f(&mut counter);
        counter.bits()
    }

    /// Magnitude and sign of a nonzero level
    pub fn level(&self, abs_level: u32, rank: u8, cg: usize, pos_in_cg: usize) -> u32 {
        self.count(|c| {
            syntax::write_level(c, abs_level, false, rank, cg == 0, pos_in_cg, self.is_luma)
        })
    }

    /// Run following the level at `pos_in_cg`
    pub fn run(&self, run: usize, pos_in_cg: usize, abs_sum: u32, cg: usize) -> u32 {
        self.count(|c| syntax::write_run(c, run, pos_in_cg, abs_sum, cg == 0, self.is_luma))
    }

    /// Last position inside a CG, given as CG-local coordinates
    pub fn last_pos(&self, (x, y): (usize, usize), is_last_cg: bool, cg: usize) -> u32 {
        self.count(|c| syntax::write_last_pos_in_cg(c, x, y, is_last_cg, cg == 0, self.is_luma))
    }

    /// Last CG position, given as CG grid coordinates
    pub fn last_cg(&self, (cg_x, cg_y): (usize, usize)) -> u32 {
        self.count(|c| {
            syntax::write_last_cg(
                c,
                cg_x,
                cg_y,
                self.cgs_x,
                self.cgs_y,
                self.diagonal,
                self.is_luma,
            )
        })
    }

    /// CG significance flag
    pub fn sig_cg(&self, significant: bool, cg: usize) -> u32 {
        self.count(|c| syntax::write_sig_cg(c, significant, cg == 0, self.is_luma))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cabac::{ContextTrainer, BYPASS_BITS};
    use crate::scan::ScanPattern;

    #[test]
    fn test_estimates_are_pure() {
        let scan = ScanOrder::new(3, 3, ScanPattern::Diagonal).unwrap();
        let snapshot = ContextSnapshot::new(32);
        let before = snapshot.clone();
        let est = RateEstimator::new(&snapshot, &scan, true);

        let first = est.level(4, 2, 1, 5);
        for _ in 0..10 {
            assert_eq!(est.level(4, 2, 1, 5), first);
            est.run(3, 7, 4, 0);
            est.last_pos((1, 2), true, 3);
            est.last_cg((1, 1));
            est.sig_cg(true, 2);
        }
        assert_eq!(snapshot, before);
    }

    #[test]
    fn test_level_cost_includes_sign() {
        let scan = ScanOrder::new(2, 2, ScanPattern::Diagonal).unwrap();
        let snapshot = ContextSnapshot::equiprobable();
        let est = RateEstimator::new(&snapshot, &scan, true);
        // Equiprobable contexts cost one bit per bin: "0" + sign
        assert_eq!(est.level(1, 0, 0, 0), 2 * BYPASS_BITS);
        // "1 1 0" + sign
        assert_eq!(est.level(3, 0, 0, 0), 4 * BYPASS_BITS);
    }

    #[test]
    fn test_run_zero_at_cg_start_is_free() {
        let scan = ScanOrder::new(2, 2, ScanPattern::Diagonal).unwrap();
        let snapshot = ContextSnapshot::new(22);
        let est = RateEstimator::new(&snapshot, &scan, false);
        assert_eq!(est.run(0, 0, 1, 0), 0);
        assert!(est.run(0, 4, 1, 0) > 0);
    }

    #[test]
    fn test_skewed_snapshot_prefers_trained_symbol() {
        let scan = ScanOrder::new(2, 2, ScanPattern::Diagonal).unwrap();
        let mut snapshot = ContextSnapshot::equiprobable();
        {
            let mut trainer = ContextTrainer::new(&mut snapshot);
            for _ in 0..20 {
                crate::syntax::write_run(&mut trainer, 0, 9, 1, false, true);
            }
        }
        let est = RateEstimator::new(&snapshot, &scan, true);
        assert!(est.run(0, 9, 1, 1) < est.run(1, 9, 1, 1));
    }
}
