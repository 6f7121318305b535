//! Unified error hierarchy for HRRS
//!
//! Fatal errors (malformed input, invalid configuration) abort a session
//! before any intervals are emitted. Everything below that — short windows,
//! non-convergent fits — is recovered locally and folded into the affected
//! interval's own quality fields, so batch processing is never interrupted
//! by a single bad candidate.

use thiserror::Error;

/// Top-level error type for all HRRS operations
#[derive(Debug, Error)]
pub enum HrrsError {
    /// Malformed sample sequence; fatal for the session
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// Out-of-range or inconsistent configuration; fatal at startup
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors from the import/export collaborator surfaces
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Session-file parsing errors
    #[error("Import error: {0}")]
    Import(String),
}

/// Malformed sample sequence errors
///
/// Any of these aborts the session with no intervals emitted.
#[derive(Debug, Error, PartialEq)]
pub enum DataError {
    /// No samples supplied
    #[error("empty sample sequence")]
    Empty,

    /// Timestamps are not monotonically increasing
    #[error("samples out of order at index {index}: {prev}s followed by {current}s")]
    Unsorted {
        index: usize,
        prev: f64,
        current: f64,
    },

    /// A sample carries a non-finite or non-physiological value
    #[error("malformed sample at index {index}: {reason}")]
    Malformed { index: usize, reason: String },
}

/// Configuration validation errors, checked once before any session runs
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A threshold or window length is outside its valid range
    #[error("invalid parameter {parameter}={value}: {reason}")]
    InvalidParameter {
        parameter: &'static str,
        value: String,
        reason: &'static str,
    },

    /// The horizon set is empty or missing a gate threshold
    #[error("missing threshold for horizon {horizon}s in {table}")]
    MissingHorizonThreshold { horizon: u32, table: &'static str },
}

/// Result type alias for HRRS operations
pub type Result<T> = std::result::Result<T, HrrsError>;
