//! Coefficient scanning for block-based transform coding
//!
//! This module implements the scanning patterns used to walk a transform
//! block's coefficients in coding order.
//!
//! # Scanning Patterns
//!
//! Three patterns are supported:
//! - **Diagonal**: Default scan (zig-zag from top-left to bottom-right)
//! - **Horizontal**: Row-by-row scanning
//! - **Vertical**: Column-by-column scanning
//!
//! # Coefficient Groups
//!
//! Coefficients are organized into 4×4 coefficient groups (CGs). A block scan
//! is CG-major: scan index `i` lives in CG `i / 16` (CGs ordered by the same
//! pattern over the CG grid) at position `i % 16` inside that CG.

use crate::error::{Error, Result};

/// Coefficients per coefficient group
pub const CG_SIZE: usize = 16;

/// log2 of the CG edge length
pub const LOG2_CG_DIM: u8 = 2;

/// Smallest supported transform edge (log2)
pub const MIN_LOG2_TU: u8 = 2;

/// Largest supported transform edge (log2)
pub const MAX_LOG2_TU: u8 = 5;

/// Largest number of coefficients in a block
pub const MAX_COEFFS: usize = 1 << (2 * MAX_LOG2_TU);

/// Largest number of CGs in a block
pub const MAX_CGS: usize = MAX_COEFFS / CG_SIZE;

/// Coefficient scanning pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanPattern {
    /// Diagonal scan (default, zig-zag)
    Diagonal = 0,
    /// Horizontal scan
    Horizontal = 1,
    /// Vertical scan
    Vertical = 2,
}

impl ScanPattern {
    /// Select the scan for a block
    ///
    /// Small intra blocks use a mode-dependent scan: near-horizontal
    /// prediction leaves vertical structure in the residual and is scanned
    /// vertically, near-vertical prediction is scanned horizontally. Inter
    /// blocks (`intra_mode == None`) always use the diagonal scan.
    pub fn select(intra_mode: Option<u8>, log2_width: u8, log2_height: u8, is_luma: bool) -> Self {
        let Some(mode) = intra_mode else {
            return ScanPattern::Diagonal;
        };

        let mode_dependent = log2_width == log2_height
            && (log2_width == 2 || (log2_width == 3 && is_luma));
        if !mode_dependent {
            return ScanPattern::Diagonal;
        }

        match mode {
            6..=14 => ScanPattern::Vertical,
            22..=30 => ScanPattern::Horizontal,
            _ => ScanPattern::Diagonal,
        }
    }

    /// True for the diagonal (zig-zag) pattern
    #[inline]
    pub fn is_diagonal(self) -> bool {
        self == ScanPattern::Diagonal
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Generate the scanning order of a `width × height` grid
fn generate_scan_order(width: usize, height: usize, pattern: ScanPattern) -> Vec<(u8, u8)> {
    let mut order = Vec::with_capacity(width * height);

    match pattern {
        ScanPattern::Diagonal => {
            generate_diagonal_scan(width, height, &mut order);
        }
        ScanPattern::Horizontal => {
            for y in 0..height {
                for x in 0..width {
                    order.push((x as u8, y as u8));
                }
            }
        }
        ScanPattern::Vertical => {
            for x in 0..width {
                for y in 0..height {
                    order.push((x as u8, y as u8));
                }
            }
        }
    }

    order
}

/// Generate diagonal (zig-zag) scanning pattern
fn generate_diagonal_scan(width: usize, height: usize, order: &mut Vec<(u8, u8)>) {
    // Processes anti-diagonals in order, alternating direction
    let mut positions = Vec::with_capacity(width.min(height));

    for diag in 0..(width + height - 1) {
        positions.clear();

        for y in 0..height {
            let x = diag.wrapping_sub(y);
            if x < width {
                positions.push((x as u8, y as u8));
            }
        }

        if diag % 2 == 1 {
            positions.reverse();
        }

        order.extend_from_slice(&positions);
    }
}

/// Precomputed scan of one block shape and pattern
#[derive(Debug, Clone)]
pub struct ScanOrder {
    log2_width: u8,
    log2_height: u8,
    pattern: ScanPattern,
    /// Scan index -> raster index
    scan: Vec<u16>,
    /// Scan index -> (x, y) in the block
    coords: Vec<(u8, u8)>,
    /// CG scan index -> (cg_x, cg_y)
    cg_order: Vec<(u8, u8)>,
    /// Position in CG -> (x, y) inside the CG
    in_cg: [(u8, u8); CG_SIZE],
}

impl ScanOrder {
    /// Build the scan for a `2^log2_width × 2^log2_height` block
    pub fn new(log2_width: u8, log2_height: u8, pattern: ScanPattern) -> Result<Self> {
        for log2 in [log2_width, log2_height] {
            if !(MIN_LOG2_TU..=MAX_LOG2_TU).contains(&log2) {
                return Err(Error::invalid_input(format!(
                    "Invalid transform size log2: {}",
                    log2
                )));
            }
        }

        let width = 1usize << log2_width;
        let cgs_x = 1usize << (log2_width - LOG2_CG_DIM);
        let cgs_y = 1usize << (log2_height - LOG2_CG_DIM);

        let cg_order = generate_scan_order(cgs_x, cgs_y, pattern);
        let in_cg_order = generate_scan_order(4, 4, pattern);

        let mut in_cg = [(0u8, 0u8); CG_SIZE];
        in_cg.copy_from_slice(&in_cg_order);

        let num_coeffs = width << log2_height;
        let mut scan = Vec::with_capacity(num_coeffs);
        let mut coords = Vec::with_capacity(num_coeffs);
        for &(cg_x, cg_y) in &cg_order {
            for &(px, py) in &in_cg {
                let x = ((cg_x as usize) << LOG2_CG_DIM) + px as usize;
                let y = ((cg_y as usize) << LOG2_CG_DIM) + py as usize;
                scan.push((y * width + x) as u16);
                coords.push((x as u8, y as u8));
            }
        }

        Ok(Self {
            log2_width,
            log2_height,
            pattern,
            scan,
            coords,
            cg_order,
            in_cg,
        })
    }

    /// Scan pattern
    #[inline]
    pub fn pattern(&self) -> ScanPattern {
        self.pattern
    }

    /// Block width (log2)
    #[inline]
    pub fn log2_width(&self) -> u8 {
        self.log2_width
    }

    /// Block height (log2)
    #[inline]
    pub fn log2_height(&self) -> u8 {
        self.log2_height
    }

    /// Get total number of coefficients
    #[inline]
    pub fn num_coeffs(&self) -> usize {
        self.scan.len()
    }

    /// Get number of coefficient groups
    #[inline]
    pub fn num_cgs(&self) -> usize {
        self.cg_order.len()
    }

    /// CG grid dimensions `(cgs_x, cgs_y)`
    #[inline]
    pub fn cg_grid(&self) -> (usize, usize) {
        (
            1 << (self.log2_width - LOG2_CG_DIM),
            1 << (self.log2_height - LOG2_CG_DIM),
        )
    }

    /// Raster index of a scan index
    #[inline]
    pub fn raster(&self, scan_idx: usize) -> usize {
        self.scan[scan_idx] as usize
    }

    /// Block coordinates of a scan index
    #[inline]
    pub fn position(&self, scan_idx: usize) -> (usize, usize) {
        let (x, y) = self.coords[scan_idx];
        (x as usize, y as usize)
    }

    /// CG grid coordinates of a CG scan index
    #[inline]
    pub fn cg_position(&self, cg_idx: usize) -> (usize, usize) {
        let (x, y) = self.cg_order[cg_idx];
        (x as usize, y as usize)
    }

    /// Coordinates inside the CG of a position in CG (0-15)
    #[inline]
    pub fn position_in_cg(&self, pos: usize) -> (usize, usize) {
        let (x, y) = self.in_cg[pos];
        (x as usize, y as usize)
    }

    /// Iterate raster indices in scan order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.scan.iter().map(|&r| r as usize)
    }
}

/// Every scan variant, built once and shared by all blocks an engine codes
#[derive(Debug, Clone)]
pub struct ScanTables {
    orders: Vec<ScanOrder>,
}

const NUM_LOG2_SIZES: usize = (MAX_LOG2_TU - MIN_LOG2_TU + 1) as usize;

impl ScanTables {
    /// Build all size/pattern combinations
    pub fn new() -> Result<Self> {
        let mut orders = Vec::with_capacity(NUM_LOG2_SIZES * NUM_LOG2_SIZES * 3);
        for log2_width in MIN_LOG2_TU..=MAX_LOG2_TU {
            for log2_height in MIN_LOG2_TU..=MAX_LOG2_TU {
                for pattern in [
                    ScanPattern::Diagonal,
                    ScanPattern::Horizontal,
                    ScanPattern::Vertical,
                ] {
                    orders.push(ScanOrder::new(log2_width, log2_height, pattern)?);
                }
            }
        }
        Ok(Self { orders })
    }

    /// Get the scan for a block shape and pattern
    pub fn get(&self, log2_width: u8, log2_height: u8, pattern: ScanPattern) -> &ScanOrder {
        debug_assert!((MIN_LOG2_TU..=MAX_LOG2_TU).contains(&log2_width));
        debug_assert!((MIN_LOG2_TU..=MAX_LOG2_TU).contains(&log2_height));
        let w = (log2_width - MIN_LOG2_TU) as usize;
        let h = (log2_height - MIN_LOG2_TU) as usize;
        &self.orders[(w * NUM_LOG2_SIZES + h) * 3 + pattern.index()]
    }
}
