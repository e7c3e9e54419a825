//! Error types for ZVD RDOQ

use thiserror::Error;

/// Result type alias for RDOQ operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the RDOQ engine
///
/// Every variant reports a caller contract violation detected at an API
/// boundary. The optimizer itself has no runtime failure paths.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Buffer too small
    #[error("Buffer too small: need {need}, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create an unsupported error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create an initialization error
    pub fn init<S: Into<String>>(msg: S) -> Self {
        Error::Init(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_input("block length 17 is not a multiple of 16");
        assert_eq!(
            err.to_string(),
            "Invalid input: block length 17 is not a multiple of 16"
        );

        let err = Error::BufferTooSmall { need: 64, have: 16 };
        assert_eq!(err.to_string(), "Buffer too small: need 64, have 16");
    }

    #[test]
    fn test_error_from_json() {
        let parse: std::result::Result<u32, serde_json::Error> = serde_json::from_str("nope");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Json(_)));
    }
}
