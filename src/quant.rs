//! Quantization and Dequantization
//!
//! This module holds the QP-indexed quantization tables, the per-block
//! constants derived from them, and a plain (non-RDO) quantizer.
//!
//! # Quantization Model
//!
//! - **QP Range**: 0-63 plus 8 per extra bit of sample depth (80 table entries)
//! - **Step Size**: doubles every 8 QP
//! - **Scaling**: multiplication + shift, `level = (|c| * scale) >> (15 + shift_bit)`
//! - **Reconstruction**: `rec = (level * dequant + round) >> (dequant_shift - shift_bit)`
//! - **Distortion**: squared reconstruction error, normalized to 8-bit pixel SSE in Q16

use crate::error::{Error, Result};

/// Number of QP entries in the tables
pub const NUM_QP: usize = 80;

/// Forward quantization precision
pub const QUANT_SHIFT: u32 = 15;

/// Distortion fixed-point precision
pub const DIST_FRAC_BITS: u32 = 16;

/// Weighting-matrix multiplier that leaves a coefficient unchanged
pub const WQ_UNITY: u32 = 64;

/// Largest accepted coefficient magnitude
pub const MAX_COEFF_MAGNITUDE: u32 = 1 << 17;

/// Largest reconstruction custom tables may give an accepted coefficient
const MAX_RECONSTRUCTION: i128 = (MAX_COEFF_MAGNITUDE + (MAX_COEFF_MAGNITUDE >> 2)) as i128;

/// Forward scale per QP: `round(32768 * 2^(-qp/8))`
const Q_TAB: [i32; NUM_QP] = [
    32768, 30048, 27554, 25268, 23170, 21247, 19484, 17867, 16384, 15024,
    13777, 12634, 11585, 10624, 9742, 8933, 8192, 7512, 6889, 6317,
    5793, 5312, 4871, 4467, 4096, 3756, 3444, 3158, 2896, 2656,
    2435, 2233, 2048, 1878, 1722, 1579, 1448, 1328, 1218, 1117,
    1024, 939, 861, 790, 724, 664, 609, 558, 512, 470,
    431, 395, 362, 332, 304, 279, 256, 235, 215, 197,
    181, 166, 152, 140, 128, 117, 108, 99, 91, 83,
    76, 70, 64, 59, 54, 49, 45, 41, 38, 35,
];

/// Inverse scale per QP: `round(2^(15 + (qp % 8)/8))`
const IQ_TAB: [i32; NUM_QP] = [
    32768, 35734, 38968, 42495, 46341, 50535, 55109, 60097,
    32768, 35734, 38968, 42495, 46341, 50535, 55109, 60097,
    32768, 35734, 38968, 42495, 46341, 50535, 55109, 60097,
    32768, 35734, 38968, 42495, 46341, 50535, 55109, 60097,
    32768, 35734, 38968, 42495, 46341, 50535, 55109, 60097,
    32768, 35734, 38968, 42495, 46341, 50535, 55109, 60097,
    32768, 35734, 38968, 42495, 46341, 50535, 55109, 60097,
    32768, 35734, 38968, 42495, 46341, 50535, 55109, 60097,
    32768, 35734, 38968, 42495, 46341, 50535, 55109, 60097,
    32768, 35734, 38968, 42495, 46341, 50535, 55109, 60097,
];

/// Inverse shift per QP: `15 - qp/8`
const IQ_SHIFT: [u8; NUM_QP] = [
    15, 15, 15, 15, 15, 15, 15, 15, 14, 14, 14, 14, 14, 14, 14, 14,
    13, 13, 13, 13, 13, 13, 13, 13, 12, 12, 12, 12, 12, 12, 12, 12,
    11, 11, 11, 11, 11, 11, 11, 11, 10, 10, 10, 10, 10, 10, 10, 10,
    9, 9, 9, 9, 9, 9, 9, 9, 8, 8, 8, 8, 8, 8, 8, 8,
    7, 7, 7, 7, 7, 7, 7, 7, 6, 6, 6, 6, 6, 6, 6, 6,
];

/// Check a bit depth is one the tables cover
pub fn validate_bit_depth(bit_depth: u8) -> Result<()> {
    if bit_depth != 8 && bit_depth != 10 {
        return Err(Error::unsupported(format!("Invalid bit depth: {}", bit_depth)));
    }
    Ok(())
}

/// Whether the largest coefficient keeps its level inside `i32` and its
/// reconstruction bounded, under every weight and bit depth
fn fits_level_range(scale: i32, dequant_scale: i32, dequant_shift: u8) -> bool {
    let unity = WQ_UNITY as i128;
    let max_coeff = MAX_COEFF_MAGNITUDE as i128;
    [0u32, 2].iter().all(|&shift_bit| {
        let quant_shift = QUANT_SHIFT + shift_bit;
        let dq_shift = dequant_shift as u32 - shift_bit;
        (1..=u8::MAX as i128).all(|w| {
            let s = (scale as i128 * unity + w / 2) / w;
            let d = dequant_scale as i128 * w / unity;
            let level = ((max_coeff * s) >> quant_shift) + 1;
            let recon = (level * d + (1i128 << (dq_shift - 1))) >> dq_shift;
            level <= i32::MAX as i128 && recon <= MAX_RECONSTRUCTION
        })
    })
}

/// Largest QP valid at a bit depth
#[inline]
pub fn max_qp(bit_depth: u8) -> u8 {
    63 + 8 * bit_depth.saturating_sub(8)
}

/// QP-indexed quantization tables
///
/// Read-only input shared by every block; the shift table is validated on
/// construction so reconstruction never shifts by zero or a negative amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantTables {
    scale: [i32; NUM_QP],
    dequant_scale: [i32; NUM_QP],
    dequant_shift: [u8; NUM_QP],
}

impl QuantTables {
    /// Build custom tables
    pub fn new(
        scale: [i32; NUM_QP],
        dequant_scale: [i32; NUM_QP],
        dequant_shift: [u8; NUM_QP],
    ) -> Result<Self> {
        for qp in 0..NUM_QP {
            if scale[qp] <= 0 || dequant_scale[qp] <= 0 {
                return Err(Error::config(format!(
                    "Quant table entry for QP {} must be positive",
                    qp
                )));
            }
            // Leaves room for the 10-bit shift_bit of 2 while keeping a rounding term
            if !(3..=30).contains(&dequant_shift[qp]) {
                return Err(Error::config(format!(
                    "Dequant shift {} for QP {} out of range 3..=30",
                    dequant_shift[qp], qp
                )));
            }
            if !fits_level_range(scale[qp], dequant_scale[qp], dequant_shift[qp]) {
                return Err(Error::config(format!(
                    "Quant table entry for QP {} overflows the level range",
                    qp
                )));
            }
        }
        Ok(Self {
            scale,
            dequant_scale,
            dequant_shift,
        })
    }

    /// Forward scale for a QP
    #[inline]
    pub fn scale(&self, qp: u8) -> i32 {
        self.scale[qp as usize]
    }

    /// Inverse scale for a QP
    #[inline]
    pub fn dequant_scale(&self, qp: u8) -> i32 {
        self.dequant_scale[qp as usize]
    }

    /// Inverse shift for a QP
    #[inline]
    pub fn dequant_shift(&self, qp: u8) -> u8 {
        self.dequant_shift[qp as usize]
    }
}

impl Default for QuantTables {
    fn default() -> Self {
        Self {
            scale: Q_TAB,
            dequant_scale: IQ_TAB,
            dequant_shift: IQ_SHIFT,
        }
    }
}

/// Per-coefficient quantization multiplier (weighted quantization)
///
/// Returns a multiplier for block position `(x, y)` where [`WQ_UNITY`]
/// means "no weighting". Larger weights quantize more coarsely.
pub trait QuantWeight {
    /// Multiplier at block position `(x, y)`
    fn weight(&self, x: usize, y: usize) -> u32;
}

/// Identity weighting
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatWeight;

impl QuantWeight for FlatWeight {
    #[inline]
    fn weight(&self, _x: usize, _y: usize) -> u32 {
        WQ_UNITY
    }
}

/// 8×8 weighting matrix stretched or subsampled onto a block
#[derive(Debug, Clone)]
pub struct WeightMatrix {
    coeffs: [u8; 64],
    log2_width: u8,
    log2_height: u8,
}

impl WeightMatrix {
    /// Map an 8×8 matrix (row-major) onto a `2^log2_width × 2^log2_height` block
    pub fn new(coeffs: [u8; 64], log2_width: u8, log2_height: u8) -> Result<Self> {
        if coeffs.contains(&0) {
            return Err(Error::invalid_input("Weighting matrix entries must be nonzero"));
        }
        if !(2..=5).contains(&log2_width) || !(2..=5).contains(&log2_height) {
            return Err(Error::invalid_input(format!(
                "Invalid block size for weighting matrix: {}x{}",
                1u32 << log2_width.min(31),
                1u32 << log2_height.min(31)
            )));
        }
        Ok(Self {
            coeffs,
            log2_width,
            log2_height,
        })
    }
}

impl QuantWeight for WeightMatrix {
    #[inline]
    fn weight(&self, x: usize, y: usize) -> u32 {
        let mx = (x << 3) >> self.log2_width;
        let my = (y << 3) >> self.log2_height;
        self.coeffs[my * 8 + mx] as u32
    }
}

/// Quantization constants for one block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantParams {
    /// Quantization parameter
    pub qp: u8,
    /// Sample bit depth
    pub bit_depth: u8,
    /// Forward scale
    pub scale: i32,
    /// Forward shift (`15 + shift_bit`)
    pub quant_shift: u32,
    /// Inverse scale
    pub dequant_scale: i32,
    /// Inverse shift after the bit-depth adjustment
    pub dequant_shift: u32,
    /// Left shift turning a squared coefficient error into Q16 distortion
    pub dist_shift: u32,
}

impl QuantParams {
    /// Derive the constants for a block
    pub fn new(
        tables: &QuantTables,
        qp: u8,
        bit_depth: u8,
        log2_width: u8,
        log2_height: u8,
    ) -> Result<Self> {
        validate_bit_depth(bit_depth)?;
        if qp > max_qp(bit_depth) {
            return Err(Error::invalid_input(format!(
                "Invalid QP {} for bit depth {}",
                qp, bit_depth
            )));
        }

        let shift_bit = (bit_depth - 8) as u32;
        let odd_area = ((log2_width + log2_height) & 1) as u32;

        Ok(Self {
            qp,
            bit_depth,
            scale: tables.scale(qp),
            quant_shift: QUANT_SHIFT + shift_bit,
            dequant_scale: tables.dequant_scale(qp),
            dequant_shift: tables.dequant_shift(qp) as u32 - shift_bit,
            dist_shift: DIST_FRAC_BITS - 2 * shift_bit - odd_area,
        })
    }

    /// Forward and inverse scale after applying a weighting multiplier
    #[inline]
    pub fn weighted_scales(&self, weight: u32) -> (i64, i64) {
        if weight == WQ_UNITY {
            return (self.scale as i64, self.dequant_scale as i64);
        }
        let w = weight as i64;
        let unity = WQ_UNITY as i64;
        (
            (self.scale as i64 * unity + w / 2) / w,
            self.dequant_scale as i64 * w / unity,
        )
    }

    /// Floor-rounded level of an absolute coefficient
    #[inline]
    pub fn floor_level(&self, abs_coeff: i64, scale: i64) -> i64 {
        (abs_coeff * scale) >> self.quant_shift
    }

    /// Reconstruct an absolute level
    #[inline]
    pub fn reconstruct(&self, level: i64, dequant: i64) -> i64 {
        (level * dequant + (1i64 << (self.dequant_shift - 1))) >> self.dequant_shift
    }

    /// Q16 distortion of coding `abs_coeff` as `level`
    #[inline]
    pub fn distortion(&self, abs_coeff: i64, level: i64, dequant: i64) -> i64 {
        let err = abs_coeff - self.reconstruct(level, dequant);
        (err * err) << self.dist_shift
    }
}

/// Plain quantization and dequantization engine
pub struct Quantizer {
    /// Current quantization parameter
    qp: u8,
    /// Bit depth (8 or 10)
    bit_depth: u8,
    /// QP tables
    tables: QuantTables,
}

impl Quantizer {
    /// Create a new quantizer with given QP and the default tables
    pub fn new(qp: u8, bit_depth: u8) -> Result<Self> {
        Self::with_tables(qp, bit_depth, QuantTables::default())
    }

    /// Create a new quantizer with custom tables
    pub fn with_tables(qp: u8, bit_depth: u8, tables: QuantTables) -> Result<Self> {
        validate_bit_depth(bit_depth)?;
        if qp > max_qp(bit_depth) {
            return Err(Error::invalid_input(format!("Invalid QP: {}", qp)));
        }
        Ok(Self {
            qp,
            bit_depth,
            tables,
        })
    }

    /// Set quantization parameter
    pub fn set_qp(&mut self, qp: u8) -> Result<()> {
        if qp > max_qp(self.bit_depth) {
            return Err(Error::invalid_input(format!("Invalid QP: {}", qp)));
        }
        self.qp = qp;
        Ok(())
    }

    /// Get current QP
    pub fn qp(&self) -> u8 {
        self.qp
    }

    /// Tables in use
    pub fn tables(&self) -> &QuantTables {
        &self.tables
    }

    /// Per-block constants
    pub fn params(&self, log2_width: u8, log2_height: u8) -> Result<QuantParams> {
        QuantParams::new(&self.tables, self.qp, self.bit_depth, log2_width, log2_height)
    }

    /// Dead-zone quantization
    ///
    /// Intra blocks round to nearest, inter blocks use a 1/6 rounding offset.
    pub fn quantize(
        &self,
        coeffs: &[i32],
        output: &mut [i32],
        log2_width: u8,
        log2_height: u8,
        is_intra: bool,
    ) -> Result<usize> {
        check_block(coeffs.len(), output.len(), log2_width, log2_height)?;
        let params = self.params(log2_width, log2_height)?;

        let offset = if is_intra {
            1i64 << (params.quant_shift - 1)
        } else {
            (1i64 << params.quant_shift) / 6
        };

        let mut num_nonzero = 0;
        for (out, &c) in output.iter_mut().zip(coeffs) {
            let abs = (c as i64).abs();
            let level = ((abs * params.scale as i64 + offset) >> params.quant_shift) as i32;
            *out = if c < 0 { -level } else { level };
            if level != 0 {
                num_nonzero += 1;
            }
        }
        Ok(num_nonzero)
    }

    /// Dequantize (inverse quantize) levels back to coefficients
    pub fn dequantize(
        &self,
        levels: &[i32],
        output: &mut [i32],
        log2_width: u8,
        log2_height: u8,
    ) -> Result<()> {
        check_block(levels.len(), output.len(), log2_width, log2_height)?;
        let params = self.params(log2_width, log2_height)?;

        for (out, &level) in output.iter_mut().zip(levels) {
            let rec =
                params.reconstruct((level as i64).abs(), params.dequant_scale as i64) as i32;
            *out = if level < 0 { -rec } else { rec };
        }
        Ok(())
    }

    /// Quantization step size in coefficient units
    pub fn step_size(&self) -> f64 {
        let shift = QUANT_SHIFT + (self.bit_depth - 8) as u32;
        (1u64 << shift) as f64 / self.tables.scale(self.qp) as f64
    }
}

fn check_block(input: usize, output: usize, log2_width: u8, log2_height: u8) -> Result<()> {
    if input != output {
        return Err(Error::invalid_input(
            "Coefficient arrays must be same length".to_string(),
        ));
    }
    let expected = 1usize << (log2_width + log2_height);
    if input != expected {
        return Err(Error::invalid_input(format!(
            "Expected {} coefficients for {}x{} block",
            expected,
            1usize << log2_width,
            1usize << log2_height
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantizer_creation() {
        let quantizer = Quantizer::new(32, 8).unwrap();
        assert_eq!(quantizer.qp(), 32);
    }

    #[test]
    fn test_quantizer_invalid_qp() {
        assert!(Quantizer::new(64, 8).is_err());
        assert!(Quantizer::new(79, 10).is_ok());
        assert!(Quantizer::new(80, 10).is_err());
    }

    #[test]
    fn test_quantizer_invalid_bit_depth() {
        assert!(Quantizer::new(32, 12).is_err());
        assert!(Quantizer::new(32, 9).is_err());
    }

    #[test]
    fn test_set_qp() {
        let mut quantizer = Quantizer::new(32, 8).unwrap();
        assert!(quantizer.set_qp(40).is_ok());
        assert_eq!(quantizer.qp(), 40);
        assert!(quantizer.set_qp(70).is_err());
    }

    #[test]
    fn test_tables_step_doubles_every_8_qp() {
        let tables = QuantTables::default();
        for qp in 0..(NUM_QP as u8 - 8) {
            let ratio = tables.scale(qp) as f64 / tables.scale(qp + 8) as f64;
            assert!((ratio - 2.0).abs() < 0.1, "qp {} ratio {}", qp, ratio);
        }
    }

    #[test]
    fn test_tables_inverse_matches_forward() {
        let tables = QuantTables::default();
        for qp in 0..NUM_QP as u8 {
            let product = tables.scale(qp) as f64 * tables.dequant_scale(qp) as f64;
            let unity = (1u64 << (QUANT_SHIFT + tables.dequant_shift(qp) as u32)) as f64;
            assert!((product / unity - 1.0).abs() < 0.02, "qp {}", qp);
        }
    }

    #[test]
    fn test_custom_tables_validation() {
        let mut shift = IQ_SHIFT;
        shift[5] = 0;
        assert!(QuantTables::new(Q_TAB, IQ_TAB, shift).is_err());

        let mut scale = Q_TAB;
        scale[0] = 0;
        assert!(QuantTables::new(scale, IQ_TAB, IQ_SHIFT).is_err());

        assert!(QuantTables::new(Q_TAB, IQ_TAB, IQ_SHIFT).is_ok());
    }

    #[test]
    fn test_custom_tables_reject_level_overflow() {
        // The largest coefficient would quantize past i32
        let result = QuantTables::new([i32::MAX; NUM_QP], [i32::MAX; NUM_QP], [3; NUM_QP]);
        assert!(matches!(result, Err(Error::Config(_))));

        // Levels fit but reconstruct far above the coefficient
        let mut dequant = IQ_TAB;
        dequant[20] = IQ_TAB[20] * 4;
        assert!(QuantTables::new(Q_TAB, dequant, IQ_SHIFT).is_err());

        let mut scale = Q_TAB;
        scale[0] = 1 << 24;
        assert!(QuantTables::new(scale, IQ_TAB, IQ_SHIFT).is_err());
    }

    #[test]
    fn test_params_dc_50_at_qp_32() {
        let params = QuantParams::new(&QuantTables::default(), 32, 8, 2, 2).unwrap();
        assert_eq!(params.quant_shift, 15);
        assert_eq!(params.dist_shift, 16);

        let (scale, dequant) = params.weighted_scales(WQ_UNITY);
        assert_eq!(params.floor_level(50, scale), 3);
        assert_eq!(params.reconstruct(3, dequant), 48);
        assert_eq!(params.distortion(50, 3, dequant), 4 << 16);
        assert_eq!(params.distortion(50, 0, dequant), 2500 << 16);
    }

    #[test]
    fn test_params_distortion_shift() {
        let tables = QuantTables::default();
        assert_eq!(QuantParams::new(&tables, 20, 10, 3, 3).unwrap().dist_shift, 12);
        assert_eq!(QuantParams::new(&tables, 20, 8, 2, 3).unwrap().dist_shift, 15);
        assert!(QuantParams::new(&tables, 70, 8, 2, 2).is_err());
    }

    #[test]
    fn test_quantize_4x4() {
        let quantizer = Quantizer::new(32, 8).unwrap();
        let mut coeffs = vec![0i32; 16];
        coeffs[0] = 50;
        coeffs[1] = -41;
        coeffs[2] = 7;

        let mut output = vec![0i32; 16];
        let nnz = quantizer.quantize(&coeffs, &mut output, 2, 2, true).unwrap();

        assert_eq!(output[0], 3);
        assert_eq!(output[1], -3);
        assert_eq!(output[2], 0);
        assert_eq!(nnz, 2);
    }

    #[test]
    fn test_dequantize_4x4() {
        let quantizer = Quantizer::new(32, 8).unwrap();
        let mut levels = vec![0i32; 16];
        levels[0] = 3;
        levels[3] = -1;

        let mut output = vec![0i32; 16];
        quantizer.dequantize(&levels, &mut output, 2, 2).unwrap();

        assert_eq!(output[0], 48);
        assert_eq!(output[3], -16);
        assert_eq!(output[1], 0);
    }

    #[test]
    fn test_dequantize_invalid_size() {
        let quantizer = Quantizer::new(32, 8).unwrap();
        let levels = vec![0i32; 15];
        let mut output = vec![0i32; 15];
        assert!(quantizer.dequantize(&levels, &mut output, 2, 2).is_err());
    }

    #[test]
    fn test_step_size_increases_with_qp() {
        let q1 = Quantizer::new(20, 8).unwrap();
        let q2 = Quantizer::new(40, 8).unwrap();
        assert!(q2.step_size() > q1.step_size());
        assert!((Quantizer::new(32, 8).unwrap().step_size() - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_weight_is_identity() {
        let params = QuantParams::new(&QuantTables::default(), 24, 8, 3, 3).unwrap();
        assert_eq!(
            params.weighted_scales(FlatWeight.weight(5, 7)),
            (params.scale as i64, params.dequant_scale as i64)
        );
    }

    #[test]
    fn test_weight_matrix_mapping() {
        let mut coeffs = [WQ_UNITY as u8; 64];
        coeffs[63] = 128;
        coeffs[54] = 96;
        assert!(WeightMatrix::new([0; 64], 2, 2).is_err());

        let small = WeightMatrix::new(coeffs, 2, 2).unwrap();
        assert_eq!(small.weight(3, 3), 96);
        assert_eq!(small.weight(2, 3), WQ_UNITY);

        let large = WeightMatrix::new(coeffs, 5, 5).unwrap();
        assert_eq!(large.weight(31, 31), 128);
        assert_eq!(large.weight(27, 27), WQ_UNITY);
        assert_eq!(large.weight(28, 28), 128);
    }
}
