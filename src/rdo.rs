//! Rate-Distortion cost arithmetic
//!
//! The optimizer minimizes: **Cost = Distortion + λ × Rate**
//!
//! Everything is fixed point so that costs from different syntax elements
//! add up exactly:
//!
//! - **Distortion**: squared coefficient error normalized to 8-bit samples, Q16
//! - **Rate**: 1/256 bit units (see [`crate::cabac::FRAC_BITS_SCALE`])
//! - **λ (Lambda)**: Q8, so `λ × Rate` lands in Q16 next to the distortion

use crate::cabac::FRAC_BITS_SCALE;

/// Fixed-point RD cost (Q16)
pub type Cost = i64;

/// Cost larger than any reachable block cost
pub const MAX_COST: Cost = i64::MAX / 4;

/// Fractional bits of the lambda fixed-point format
pub const LAMBDA_FRAC_BITS: u32 = 8;

/// Total cost of a distortion plus a rate weighted by lambda
#[inline]
pub fn rd_cost(distortion: i64, lambda: i64, bits: u32) -> Cost {
    distortion + lambda * bits as i64
}

/// Whether `(cost, bits)` beats `(best_cost, best_bits)`
///
/// Equal costs go to the lower rate, so a decision at λ = 0 matches the one
/// made as λ shrinks towards zero.
#[inline]
pub fn cost_beats(cost: Cost, bits: u32, best_cost: Cost, best_bits: u32) -> bool {
    (cost, bits) < (best_cost, best_bits)
}

/// Rate-distortion cost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RdCost {
    /// Distortion (Q16)
    pub distortion: i64,
    /// Rate estimate in 1/256 bits
    pub bits: u32,
    /// Total RD cost (distortion + lambda * bits)
    pub cost: Cost,
}

impl RdCost {
    /// Create a new RD cost
    pub fn new(distortion: i64, bits: u32, lambda: i64) -> Self {
        Self {
            distortion,
            bits,
            cost: rd_cost(distortion, lambda, bits),
        }
    }

    /// Create maximum cost (for initialization)
    pub fn max() -> Self {
        Self {
            distortion: MAX_COST,
            bits: u32::MAX,
            cost: MAX_COST,
        }
    }

    /// Rate in whole bits
    pub fn bits_f64(&self) -> f64 {
        self.bits as f64 / FRAC_BITS_SCALE as f64
    }

    /// Check if this cost is better (lower) than another, ties going to
    /// the lower rate
    pub fn is_better_than(&self, other: &RdCost) -> bool {
        cost_beats(self.cost, self.bits, other.cost, other.bits)
    }
}

/// Lambda calculator for RDO
pub struct LambdaCalc;

impl LambdaCalc {
    /// Calculate lambda from QP
    ///
    /// The quantizer step doubles every 8 QP, so lambda (which tracks the
    /// squared step) doubles every 4: λ = 0.85 × 2^((QP-12)/4)
    pub fn calculate_lambda(qp: u8) -> f64 {
        0.85 * 2.0_f64.powf((qp as f64 - 12.0) / 4.0)
    }

    /// Convert a floating-point lambda to the Q8 format used by the optimizer
    pub fn to_fixed(lambda: f64) -> i64 {
        (lambda.max(0.0) * (1u32 << LAMBDA_FRAC_BITS) as f64).round() as i64
    }

    /// Q8 lambda for a QP
    pub fn fixed_lambda(qp: u8) -> i64 {
        Self::to_fixed(Self::calculate_lambda(qp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rd_cost_creation() {
        let cost = RdCost::new(1000, 512, 256);
        assert_eq!(cost.distortion, 1000);
        assert_eq!(cost.bits, 512);
        assert_eq!(cost.cost, 1000 + 256 * 512);
        assert!((cost.bits_f64() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_rd_cost_comparison() {
        let cost1 = RdCost::new(1000, 100, 10);
        let cost2 = RdCost::new(1500, 100, 10);

        assert!(cost1.is_better_than(&cost2));
        assert!(!cost2.is_better_than(&cost1));
    }

    #[test]
    fn test_rd_cost_tie_goes_to_lower_rate() {
        let cheap = RdCost::new(1000, 100, 0);
        let dear = RdCost::new(1000, 300, 0);

        assert!(cheap.is_better_than(&dear));
        assert!(!dear.is_better_than(&cheap));
        assert!(!cheap.is_better_than(&cheap));
        assert!(cost_beats(500, 10, 500, 11));
        assert!(!cost_beats(501, 0, 500, 11));
    }

    #[test]
    fn test_rd_cost_max() {
        let max = RdCost::max();
        let real = RdCost::new(i64::from(u32::MAX) << 16, u32::MAX, 1 << 16);
        assert!(real.is_better_than(&max));
    }

    #[test]
    fn test_rd_cost_zero_lambda_is_distortion() {
        assert_eq!(rd_cost(4 << 16, 0, 10_000), 4 << 16);
    }

    #[test]
    fn test_lambda_calculation() {
        let lambda_low = LambdaCalc::calculate_lambda(20);
        let lambda_high = LambdaCalc::calculate_lambda(40);
        assert!(lambda_high > lambda_low);

        let ratio = LambdaCalc::calculate_lambda(36) / LambdaCalc::calculate_lambda(32);
        assert!((ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_lambda_fixed_point() {
        assert_eq!(LambdaCalc::to_fixed(1.0), 256);
        assert_eq!(LambdaCalc::to_fixed(-3.0), 0);
        assert_eq!(LambdaCalc::fixed_lambda(12), 218);
    }
}
