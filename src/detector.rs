//! Session-level detection orchestrator
//!
//! Runs the full pipeline over one session: validate the raw samples, smooth,
//! find and validate candidate peaks, extend each validated peak, derive the
//! per-horizon metrics, and classify through the quality gates. The only
//! cross-candidate state is the time-exclusion cursor: once an interval is
//! accepted (pass or flagged), every candidate inside its span is consumed by
//! it and skipped. Rejected and suppressed intervals exclude nothing.
//!
//! The whole walk is deterministic; identical input and configuration yield
//! identical records.

use tracing::{debug, info};

use crate::config::DetectionConfig;
use crate::error::DataError;
use crate::extender;
use crate::fit;
use crate::gates;
use crate::models::{QualityStatus, RecoveryInterval, Session, SmoothedSeries};
use crate::peaks;
use crate::smoothing;

/// Detect all recovery intervals in one session
///
/// Returns every accepted interval plus the displayable rejections, ordered
/// by start time. Candidate-level gate failures are normal control flow and
/// never surface as errors; only malformed input does.
pub fn detect_session(
    session: &Session,
    config: &DetectionConfig,
) -> Result<Vec<RecoveryInterval>, DataError> {
    validate_samples(session)?;

    let series = smoothing::smooth(&session.samples, config.smoothing_kernel_width);
    let session_min_hr = series
        .samples()
        .iter()
        .map(|s| s.heart_rate)
        .fold(f64::INFINITY, f64::min);

    let candidates = peaks::find_candidates(&series, config.peak_prominence, config.peak_min_distance);
    debug!(
        session_id = %session.id,
        candidates = candidates.len(),
        "candidate peaks located"
    );

    let mut intervals = Vec::new();
    // First index not yet claimed by an accepted interval.
    let mut exclusion_cursor = 0usize;

    for candidate in candidates {
        if candidate.index < exclusion_cursor {
            continue;
        }

        let peak = match peaks::validate_peak(&series, candidate, config) {
            Ok(peak) => peak,
            Err(_) => continue,
        };

        let extension = extender::extend(&series, &peak, config);
        let metrics = fit::compute_metrics(&series, peak.index, extension.end_index, config);

        let Some(outcome) = gates::evaluate(&peak, &extension, &metrics, session_min_hr, config)
        else {
            continue;
        };

        // Only accepted intervals claim their span; a displayed rejection
        // leaves later candidates free.
        if matches!(
            outcome.quality_status,
            QualityStatus::Pass | QualityStatus::Flagged
        ) {
            exclusion_cursor = extension.end_index + 1;
        }
        intervals.push(assemble(session, &series, &peak, &extension, &metrics, outcome));
    }

    info!(
        session_id = %session.id,
        intervals = intervals.len(),
        "session detection complete"
    );
    Ok(intervals)
}

/// Reject sessions the pipeline cannot reason about
fn validate_samples(session: &Session) -> Result<(), DataError> {
    if session.samples.is_empty() {
        return Err(DataError::Empty);
    }

    let mut prev_time = f64::NEG_INFINITY;
    for (index, sample) in session.samples.iter().enumerate() {
        if !sample.elapsed_seconds.is_finite() {
            return Err(DataError::Malformed {
                index,
                reason: "non-finite timestamp".to_string(),
            });
        }
        if !sample.heart_rate.is_finite() || sample.heart_rate < 0.0 {
            return Err(DataError::Malformed {
                index,
                reason: format!("invalid heart rate {}", sample.heart_rate),
            });
        }
        if sample.elapsed_seconds <= prev_time {
            return Err(DataError::Unsorted {
                index,
                prev: prev_time,
                current: sample.elapsed_seconds,
            });
        }
        prev_time = sample.elapsed_seconds;
    }

    Ok(())
}

fn assemble(
    session: &Session,
    series: &SmoothedSeries,
    peak: &crate::models::ValidatedPeak,
    extension: &extender::Extension,
    metrics: &fit::IntervalMetrics,
    outcome: gates::GateOutcome,
) -> RecoveryInterval {
    // An accepted interval's recorded span is its accepted horizon, so
    // durations of usable intervals always come from the horizon set. The
    // raw walked span still drives candidate exclusion in the caller.
    let end_index = match outcome.accepted_horizon {
        Some(horizon) => {
            let target = peak.start_seconds + horizon as f64;
            (peak.index..=extension.end_index)
                .min_by(|&a, &b| {
                    let da = (series.time(a) - target).abs();
                    let db = (series.time(b) - target).abs();
                    da.total_cmp(&db)
                })
                .unwrap_or(extension.end_index)
        }
        None => extension.end_index,
    };
    let nadir_index = (peak.index..=end_index)
        .min_by(|&a, &b| series.hr(a).total_cmp(&series.hr(b)))
        .unwrap_or(peak.index);

    RecoveryInterval {
        session_id: session.id.clone(),
        start_seconds: peak.start_seconds,
        end_seconds: series.time(end_index),
        duration_seconds: series.time(end_index) - peak.start_seconds,
        peak_hr: peak.peak_hr,
        nadir_hr: series.hr(nadir_index),
        nadir_offset_seconds: series.time(nadir_index) - peak.start_seconds,
        termination: extension.reason,
        hr_at_horizon: metrics.hr_at_horizon.clone(),
        hrr_at_horizon: metrics.hrr_at_horizon.clone(),
        exp_fits: metrics
            .exp_fits
            .iter()
            .map(|(&h, outcome)| (h, outcome.into()))
            .collect(),
        linear_fits: metrics
            .linear_fits
            .iter()
            .map(|(key, fit)| (key.clone(), fit.into()))
            .collect(),
        accepted_horizon: outcome.accepted_horizon,
        tau: outcome.tau,
        quality_status: outcome.quality_status,
        auto_reject_reason: outcome.auto_reject_reason,
        flags: outcome.flags,
        actionable: outcome.actionable,
    }
}
