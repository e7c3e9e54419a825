//! ZVD RDOQ - Rate-Distortion Optimized Quantization for block video encoding
//!
//! Given the transform coefficients of one block, the engine picks the
//! quantized level of every coefficient so that distortion plus λ × coded
//! bits is as small as it can find, using the same run-level syntax and
//! context-adaptive bit estimates the entropy coder will use.
//!
//! # Architecture
//!
//! - `cabac`: context models, bit-cost tables and bin sinks
//! - `scan`: scan orders and coefficient-group geometry
//! - `quant`: quantization tables, parameters and weighting matrices
//! - `syntax`: binarization of the coefficient syntax elements
//! - `rdo`: fixed-point rate-distortion cost arithmetic
//! - `rdoq`: the optimizer itself, plus parallel batch quantization
//!
//! # Example
//!
//! ```
//! use zvd_rdoq::{BlockParams, ContextSnapshot, LambdaCalc, Rdoq, RdoqConfig};
//!
//! let mut engine = Rdoq::new(RdoqConfig::default()).unwrap();
//! let snapshot = ContextSnapshot::new(27);
//! let params = BlockParams::new(8, 8, 27, true, LambdaCalc::fixed_lambda(27)).unwrap();
//!
//! let mut block = vec![0i32; 64];
//! block[0] = 120;
//! block[1] = -35;
//! let nnz = engine.quantize_block(&mut block, &params, &snapshot).unwrap();
//! assert!(nnz <= 2);
//! ```

pub mod cabac;
pub mod error;
pub mod quant;
pub mod rdo;
pub mod rdoq;
pub mod scan;
pub mod syntax;

pub use cabac::{BinSink, BitCounter, ContextSnapshot, ContextTrainer};
pub use error::{Error, Result};
pub use quant::{FlatWeight, QuantTables, QuantWeight, Quantizer, WeightMatrix};
pub use rdo::{LambdaCalc, RdCost};
pub use rdoq::{
    evaluate_block_cost, quantize_blocks, rdoq_block, BlockParams, Rdoq, RdoqConfig, RdoqScratch,
    RdoqTables, TransformBlock,
};
pub use scan::{ScanOrder, ScanPattern, ScanTables};

/// ZVD RDOQ version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 1;
pub const VERSION_PATCH: u32 = 0;

/// Process-wide settings
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Maximum number of threads used by batch quantization
    pub max_threads: Option<usize>,
    /// Enable verbose logging
    pub verbose: bool,
    /// Enable debug output
    pub debug: bool,
}

/// Initialize the thread pool and logging
pub fn init(config: Config) -> Result<()> {
    if let Some(threads) = config.max_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| Error::init(format!("Failed to initialize thread pool: {}", e)))?;
    }

    if config.verbose || config.debug {
        let level = if config.debug { "debug" } else { "info" };
        tracing_subscriber::fmt()
            .with_env_filter(level)
            .try_init()
            .map_err(|e| Error::init(format!("Failed to initialize logging: {}", e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION_MAJOR, 0);
        assert_eq!(VERSION_MINOR, 1);
        assert_eq!(VERSION_PATCH, 0);
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_threads, None);
        assert!(!config.verbose);
        assert!(!config.debug);
    }

    #[test]
    fn test_init() {
        let config = Config::default();
        assert!(init(config).is_ok());
    }
}
