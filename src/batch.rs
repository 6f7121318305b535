//! Parallel batch detection over many session files using rayon
//!
//! Each file is an independent unit of work: import, detect, collect. Workers
//! share nothing but the immutable configuration, so per-session results are
//! identical whether a session runs alone or inside a batch.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::DetectionConfig;
use crate::detector;
use crate::error::HrrsError;
use crate::import::CsvImporter;
use crate::models::RecoveryInterval;

/// Configuration for batch detection runs
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Number of worker threads (None for the rayon default)
    pub num_threads: Option<usize>,
    /// Show a progress bar while processing
    pub show_progress: bool,
    /// Keep going when a file fails instead of aborting the batch
    pub continue_on_error: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            show_progress: true,
            continue_on_error: true,
        }
    }
}

/// Result of processing a single session file
#[derive(Debug, Clone)]
pub struct SessionResult {
    /// Path to the file that was processed
    pub file_path: PathBuf,
    /// Intervals detected in this session
    pub intervals: Vec<RecoveryInterval>,
    /// Wall-clock duration for this file, in milliseconds
    pub duration_ms: u128,
    /// Whether the file processed cleanly
    pub success: bool,
    /// Error message if processing failed
    pub error: Option<String>,
}

/// Summary of one batch run
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub total_files: usize,
    pub successful_files: usize,
    pub failed_files: usize,
    pub total_intervals: usize,
    pub total_duration_ms: u128,
    /// Per-file results, in input order
    pub results: Vec<SessionResult>,
    pub errors: Vec<(PathBuf, String)>,
}

impl BatchSummary {
    pub fn is_fully_successful(&self) -> bool {
        self.failed_files == 0
    }

    pub fn to_string_pretty(&self) -> String {
        format!(
            "Batch Detection Summary\n  \
             Total Files: {}\n  \
             Successful: {}\n  \
             Failed: {}\n  \
             Intervals Found: {}\n  \
             Total Time: {:.2}s",
            self.total_files,
            self.successful_files,
            self.failed_files,
            self.total_intervals,
            self.total_duration_ms as f64 / 1000.0,
        )
    }
}

/// Batch detection runner
pub struct BatchProcessor {
    pub batch_config: BatchConfig,
    detection_config: DetectionConfig,
}

impl BatchProcessor {
    pub fn new(detection_config: DetectionConfig) -> Self {
        Self::with_config(detection_config, BatchConfig::default())
    }

    pub fn with_config(detection_config: DetectionConfig, batch_config: BatchConfig) -> Self {
        Self {
            batch_config,
            detection_config,
        }
    }

    /// Import and detect over all files, in parallel
    pub fn process_files(&self, file_paths: &[PathBuf]) -> Result<BatchSummary> {
        let start_time = std::time::Instant::now();
        info!("Starting batch detection over {} files", file_paths.len());

        if let Some(threads) = self.batch_config.num_threads {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
                .ok(); // Already-built global pool is fine.
        }

        let progress = if self.batch_config.show_progress {
            let bar = ProgressBar::new(file_paths.len() as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                    )?
                    .progress_chars("#>-"),
            );
            Some(bar)
        } else {
            None
        };

        let results: Vec<SessionResult> = file_paths
            .par_iter()
            .map(|path| {
                let result = self.process_one(path.clone());
                if let Some(bar) = &progress {
                    bar.inc(1);
                }
                result
            })
            .collect();

        if let Some(bar) = progress {
            bar.finish_with_message("done");
        }

        let mut errors = Vec::new();
        for result in &results {
            if let Some(error) = &result.error {
                warn!(file = %result.file_path.display(), error, "session failed");
                errors.push((result.file_path.clone(), error.clone()));
                if !self.batch_config.continue_on_error {
                    anyhow::bail!(
                        "Batch aborted on {}: {}",
                        result.file_path.display(),
                        error
                    );
                }
            }
        }

        let summary = BatchSummary {
            total_files: results.len(),
            successful_files: results.iter().filter(|r| r.success).count(),
            failed_files: results.iter().filter(|r| !r.success).count(),
            total_intervals: results.iter().map(|r| r.intervals.len()).sum(),
            total_duration_ms: start_time.elapsed().as_millis(),
            results,
            errors,
        };

        info!(
            files = summary.total_files,
            failed = summary.failed_files,
            intervals = summary.total_intervals,
            "batch detection complete"
        );
        Ok(summary)
    }

    fn process_one(&self, file_path: PathBuf) -> SessionResult {
        let start = std::time::Instant::now();
        let outcome = CsvImporter::new()
            .import_file(&file_path)
            .and_then(|session| {
                detector::detect_session(&session, &self.detection_config)
                    .map_err(HrrsError::from)
            });

        match outcome {
            Ok(intervals) => SessionResult {
                file_path,
                intervals,
                duration_ms: start.elapsed().as_millis(),
                success: true,
                error: None,
            },
            Err(error) => SessionResult {
                file_path,
                intervals: Vec::new(),
                duration_ms: start.elapsed().as_millis(),
                success: false,
                error: Some(error.to_string()),
            },
        }
    }
}
