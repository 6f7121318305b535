// Library interface for the hrrs detection modules
// This allows integration tests to access the core functionality

pub mod batch;
pub mod config;
pub mod detector;
pub mod error;
pub mod export;
pub mod extender;
pub mod fit;
pub mod gates;
pub mod import;
pub mod logging;
pub mod models;
pub mod peaks;
pub mod smoothing;

// Re-export commonly used types for convenience
pub use models::*;
pub use batch::{BatchConfig, BatchProcessor, BatchSummary};
pub use config::DetectionConfig;
pub use detector::detect_session;
pub use error::{DataError, HrrsError, Result};
pub use extender::ExtensionPolicy;
pub use fit::{FitFailure, FitOutcome};
pub use import::CsvImporter;
pub use logging::{LogConfig, LogFormat, LogLevel};
