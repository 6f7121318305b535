//! Quality gate pipeline
//!
//! Turns the raw metrics for one interval into an accept / flag / reject
//! decision. Horizons are evaluated longest first: a recovery that holds up
//! over 300 seconds tells the coaching logic more than the same descent cut
//! at 60. An interval is accepted at the longest horizon whose duration,
//! fit quality, and HRR minimum all pass; failing everything, it is either
//! displayed as rejected with a human-readable reason or, when too short to
//! be informative, suppressed outright.
//!
//! Independent downgrade gates can still demote an accepted interval to
//! `flagged` for human review. The pipeline is a pure function of the
//! metrics; the only cross-interval state (the time-exclusion cursor) lives
//! in the session orchestrator.

use tracing::debug;

use crate::config::DetectionConfig;
use crate::extender::Extension;
use crate::fit::IntervalMetrics;
use crate::models::{QualityStatus, ValidatedPeak};

/// Decision produced by the gate pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub quality_status: QualityStatus,

    /// Horizon the interval was accepted at, if any
    pub accepted_horizon: Option<u32>,

    /// Decay constant from the accepted horizon's fit, if any
    pub tau: Option<f64>,

    /// Human-readable reason when rejected
    pub auto_reject_reason: Option<String>,

    /// Review flags raised by the downgrade gates
    pub flags: Vec<String>,

    /// Confident enough to feed coaching logic
    pub actionable: bool,
}

/// Classify one interval; `None` means "suppress entirely"
pub fn evaluate(
    peak: &ValidatedPeak,
    extension: &Extension,
    metrics: &IntervalMetrics,
    session_min_hr: f64,
    config: &DetectionConfig,
) -> Option<GateOutcome> {
    let duration = extension.duration_seconds;

    // Longest horizon first.
    let mut accepted: Option<(u32, Option<f64>)> = None;
    for horizon in config.gate_horizons_desc() {
        if duration + 1e-9 < horizon as f64 {
            continue;
        }
        let Some(&hrr) = metrics.hrr_at_horizon.get(&horizon) else {
            continue;
        };
        let min_hrr = config.min_hrr_per_horizon[&horizon];
        let min_r2 = config.min_segment_r2_per_gate[&horizon];
        let fit = metrics.exp_fits.get(&horizon);
        let r_squared = fit.map_or(0.0, |f| f.gate_r_squared());

        if hrr >= min_hrr && r_squared >= min_r2 {
            accepted = Some((horizon, fit.and_then(|f| f.tau())));
            break;
        }
    }

    if let Some((horizon, tau)) = accepted {
        let flags = downgrade_flags(peak, extension, metrics, tau, session_min_hr, config);
        let status = if flags.is_empty() {
            QualityStatus::Pass
        } else {
            QualityStatus::Flagged
        };
        debug!(
            start = peak.start_seconds,
            horizon,
            ?status,
            "interval accepted"
        );
        return Some(GateOutcome {
            quality_status: status,
            accepted_horizon: Some(horizon),
            tau,
            auto_reject_reason: None,
            actionable: status == QualityStatus::Pass,
            flags,
        });
    }

    // Nothing qualified: explain or suppress.
    if duration < config.min_display_duration_seconds {
        debug!(
            start = peak.start_seconds,
            duration, "interval suppressed: too short to display"
        );
        return None;
    }

    Some(GateOutcome {
        quality_status: QualityStatus::Rejected,
        accepted_horizon: None,
        tau: None,
        auto_reject_reason: Some(rejection_reason(duration, metrics, config)),
        flags: Vec::new(),
        actionable: false,
    })
}

/// Build the `hrr60=4<9` style explanation for a displayed rejection
fn rejection_reason(
    duration: f64,
    metrics: &IntervalMetrics,
    config: &DetectionConfig,
) -> String {
    // Explain against the longest horizon the data actually reached.
    for horizon in config.gate_horizons_desc() {
        if duration + 1e-9 < horizon as f64 {
            continue;
        }
        let Some(&hrr) = metrics.hrr_at_horizon.get(&horizon) else {
            continue;
        };
        let min_hrr = config.min_hrr_per_horizon[&horizon];
        if hrr < min_hrr {
            return format!("hrr{}={}<{}", horizon, hrr.round() as i64, min_hrr);
        }
        let min_r2 = config.min_segment_r2_per_gate[&horizon];
        let r_squared = metrics
            .exp_fits
            .get(&horizon)
            .map_or(0.0, |f| f.gate_r_squared());
        return format!("r2_{}={:.2}<{}", horizon, r_squared, min_r2);
    }

    let shortest_gate = config
        .gate_horizons_desc()
        .last()
        .copied()
        .unwrap_or_default();
    format!("duration={}s<{}", duration.round() as i64, shortest_gate)
}

/// Independent gates that demote an accepted interval to `flagged`
fn downgrade_flags(
    peak: &ValidatedPeak,
    extension: &Extension,
    metrics: &IntervalMetrics,
    tau: Option<f64>,
    session_min_hr: f64,
    config: &DetectionConfig,
) -> Vec<String> {
    let mut flags = Vec::new();

    // The drop should use a meaningful share of the session's HR range.
    let session_range = peak.peak_hr - session_min_hr;
    if session_range > 0.0 {
        let reserve_used = (peak.peak_hr - extension.nadir_hr) / session_range;
        if reserve_used < config.min_reserve_fraction {
            flags.push(format!("low_reserve_used={:.2}", reserve_used));
        }
    }

    // A 60s value sitting on the nadir means the descent bottomed out
    // suspiciously early.
    if let Some(&hr60) = metrics.hr_at_horizon.get(&60) {
        if hr60 - extension.nadir_hr < config.min_hr60_nadir_gap {
            flags.push(format!(
                "hr60_near_nadir={:.1}",
                hr60 - extension.nadir_hr
            ));
        }
    }

    if let Some(tau) = tau {
        if tau < config.tau_plausible_min || tau > config.tau_plausible_max {
            flags.push(format!("tau_implausible={:.1}", tau));
        }
    }

    if let Some(mid) = metrics.linear_fits.get("30-60") {
        if mid.r_squared < config.min_mid_descent_r2 {
            flags.push(format!("noisy_mid_descent_r2={:.2}", mid.r_squared));
        }
    }

    flags
}
