//! Interval export
//!
//! Two shapes: full-fidelity JSON (the `RecoveryInterval` records as-is, maps
//! and fits included) and a flat CSV projection with one row per interval for
//! spreadsheet work. Export never filters; callers decide which statuses to
//! keep before handing intervals over.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::models::RecoveryInterval;

/// Write intervals as pretty-printed JSON
pub fn export_json(intervals: &[RecoveryInterval], path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, intervals)
        .with_context(|| "Failed to serialize intervals to JSON")?;
    writer.flush()?;

    info!(count = intervals.len(), path = %path.display(), "intervals exported as JSON");
    Ok(())
}

/// Flat per-interval projection for the CSV export
#[derive(Debug, Serialize)]
struct IntervalRow<'a> {
    session_id: &'a str,
    start_seconds: f64,
    duration_seconds: f64,
    peak_hr: f64,
    nadir_hr: f64,
    termination: String,
    hrr60: Option<f64>,
    hrr120: Option<f64>,
    hrr300: Option<f64>,
    accepted_horizon: Option<u32>,
    tau: Option<f64>,
    quality_status: String,
    auto_reject_reason: Option<&'a str>,
    flags: String,
    actionable: bool,
}

impl<'a> From<&'a RecoveryInterval> for IntervalRow<'a> {
    fn from(interval: &'a RecoveryInterval) -> Self {
        IntervalRow {
            session_id: &interval.session_id,
            start_seconds: interval.start_seconds,
            duration_seconds: interval.duration_seconds,
            peak_hr: interval.peak_hr,
            nadir_hr: interval.nadir_hr,
            termination: interval.termination.to_string(),
            hrr60: interval.hrr_at_horizon.get(&60).copied(),
            hrr120: interval.hrr_at_horizon.get(&120).copied(),
            hrr300: interval.hrr_at_horizon.get(&300).copied(),
            accepted_horizon: interval.accepted_horizon,
            tau: interval.tau,
            quality_status: interval.quality_status.to_string(),
            auto_reject_reason: interval.auto_reject_reason.as_deref(),
            flags: interval.flags.join(";"),
            actionable: interval.actionable,
        }
    }
}

/// Write intervals as flat CSV, one row each
pub fn export_csv(intervals: &[RecoveryInterval], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;

    for interval in intervals {
        writer.serialize(IntervalRow::from(interval))?;
    }
    writer.flush()?;

    info!(count = intervals.len(), path = %path.display(), "intervals exported as CSV");
    Ok(())
}
