//! Level candidate generation
//!
//! For one coefficient, computes the quantized levels worth considering
//! (`0`, the floor level and the floor level plus one) and the distortion of
//! each.

use crate::quant::QuantParams;

/// Most candidates a coefficient can have
pub const MAX_CANDIDATES: usize = 3;

/// Per-coefficient candidate record
///
/// `levels[0]` is always `0`; the remaining entries ascend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelInfo {
    /// Absolute coefficient before quantization
    pub abs_coeff: i64,
    /// Scan index in the block
    pub scan_pos: u16,
    /// Raster index in the block
    pub raster_pos: u16,
    /// Column in the block
    pub x: u8,
    /// Row in the block
    pub y: u8,
    /// Sign of the coefficient
    pub negative: bool,
    /// Floor-rounded level
    pub floor_level: i32,
    /// Inverse scale used for reconstruction
    pub dequant: i64,
    /// Number of valid entries in `levels` / `errors`
    pub num_levels: u8,
    /// Candidate absolute levels
    pub levels: [i32; MAX_CANDIDATES],
    /// Q16 distortion of each candidate
    pub errors: [i64; MAX_CANDIDATES],
}

impl LevelInfo {
    /// Fill in the candidates for one coefficient
    ///
    /// `scale` and `dequant` are the (possibly weighted) forward and inverse
    /// scales for this coefficient.
    #[allow(clippy::too_many_arguments)]
    pub fn generate(
        &mut self,
        coeff: i32,
        scan_pos: usize,
        raster_pos: usize,
        x: usize,
        y: usize,
        params: &QuantParams,
        scale: i64,
        dequant: i64,
    ) {
        let abs_coeff = (coeff as i64).abs();
        let scaled = abs_coeff * scale;
        let level0 = scaled >> params.quant_shift;
        let remainder = scaled - (level0 << params.quant_shift);
        let lower = remainder < (1i64 << (params.quant_shift - 1));

        self.abs_coeff = abs_coeff;
        self.scan_pos = scan_pos as u16;
        self.raster_pos = raster_pos as u16;
        self.x = x as u8;
        self.y = y as u8;
        self.negative = coeff < 0;
        self.floor_level = level0 as i32;
        self.dequant = dequant;

        self.levels = [0; MAX_CANDIDATES];
        self.num_levels = 1;
        if level0 == 0 {
            if !lower {
                self.push(1);
            }
        } else {
            self.push(level0 as i32);
            if !lower {
                self.push(level0 as i32 + 1);
            }
        }

        for k in 0..self.num_levels as usize {
            self.errors[k] = params.distortion(abs_coeff, self.levels[k] as i64, dequant);
        }
    }

    fn push(&mut self, level: i32) {
        self.levels[self.num_levels as usize] = level;
        self.num_levels += 1;
    }

    /// True if some candidate is nonzero
    #[inline]
    pub fn can_be_nonzero(&self) -> bool {
        self.num_levels > 1
    }

    /// Valid candidate levels
    #[inline]
    pub fn candidates(&self) -> &[i32] {
        &self.levels[..self.num_levels as usize]
    }

    /// Distortion of coding this coefficient as zero
    #[inline]
    pub fn zero_error(&self) -> i64 {
        self.errors[0]
    }

    /// Distortion of an absolute level, if it is a candidate
    pub fn error_of(&self, abs_level: i32) -> Option<i64> {
        self.candidates()
            .iter()
            .position(|&l| l == abs_level)
            .map(|k| self.errors[k])
    }

    /// Distortion of an arbitrary absolute level
    #[inline]
    pub fn distortion(&self, params: &QuantParams, abs_level: i32) -> i64 {
        params.distortion(self.abs_coeff, abs_level as i64, self.dequant)
    }

    /// Apply this coefficient's sign to an absolute level
    #[inline]
    pub fn signed(&self, abs_level: i32) -> i32 {
        if self.negative {
            -abs_level
        } else {
            abs_level
        }
    }
}
