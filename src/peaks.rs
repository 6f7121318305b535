//! Peak candidate finder and validator
//!
//! Finding where a recovery could start is a two-step affair. The candidate
//! finder is purely topographic: local maxima with enough prominence and
//! spacing. The validator then applies the physiological gates in order,
//! short-circuiting on the first failure:
//!
//! 1. **Is-a-peak**: the candidate must sit materially above the mean of the
//!    preceding lookback window (skipped at session start).
//! 2. **No-double-peak**: nothing in the lookahead window may rise more than
//!    a small tolerance above the candidate; if it does, a higher apex is
//!    imminent and this one is not the true recovery start.
//! 3. **Genuine-descent**: over the first few seconds after the peak the
//!    cumulative upward movement must stay under a small noise budget.
//!
//! A gate failure rejects the candidate and tells the caller where to resume
//! scanning; it never aborts the session.

use tracing::debug;

use crate::config::DetectionConfig;
use crate::models::{CandidatePeak, SmoothedSeries, ValidatedPeak};

/// Which gate rejected a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateFailure {
    /// Not materially above the lookback window's mean
    NotAPeak,
    /// A higher value follows within the lookahead window
    DoublePeak,
    /// The signal does not actually descend after the candidate
    NoInitialDescent,
}

/// Rejection with a resume position for the caller's scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateRejection {
    /// Index at which the caller should resume scanning
    pub resume_at: usize,

    /// The gate that failed
    pub failure: GateFailure,
}

/// Find candidate peaks: local maxima with topographic prominence of at
/// least `prominence`, pairwise separated by at least `min_distance` samples
///
/// Positions come back in increasing time order. When two maxima sit closer
/// than `min_distance`, the higher one wins.
pub fn find_candidates(
    series: &SmoothedSeries,
    prominence: f64,
    min_distance: usize,
) -> Vec<CandidatePeak> {
    let n = series.len();
    if n < 2 {
        return Vec::new();
    }

    // Local maxima, session edges included. On flat tops the leftmost
    // sample carries the peak.
    let mut maxima: Vec<usize> = Vec::new();
    for i in 0..n {
        let rises_in = i == 0 || series.hr(i) > series.hr(i - 1);
        let falls_out = i == n - 1 || series.hr(i) >= series.hr(i + 1);
        if rises_in && falls_out {
            maxima.push(i);
        }
    }

    let mut prominent: Vec<usize> = maxima
        .into_iter()
        .filter(|&i| topographic_prominence(series, i) >= prominence)
        .collect();

    // Enforce spacing highest-first, so a tall peak suppresses its
    // shoulders rather than the other way round.
    prominent.sort_by(|&a, &b| series.hr(b).total_cmp(&series.hr(a)));

    let mut kept: Vec<usize> = Vec::new();
    for i in prominent {
        if kept
            .iter()
            .all(|&j| i.abs_diff(j) >= min_distance)
        {
            kept.push(i);
        }
    }

    kept.sort_unstable();
    kept.into_iter().map(|index| CandidatePeak { index }).collect()
}

/// Topographic prominence of the maximum at `i`
///
/// On each side, walk until a strictly higher sample (or the series edge)
/// and record the lowest point passed; prominence is the peak height above
/// the higher of the two side minima. A side with no samples at all (the
/// peak sits on the series edge) is an unbounded drop, so the other side's
/// minimum alone sets the prominence. A session that opens or closes at the
/// apex is still a peak.
fn topographic_prominence(series: &SmoothedSeries, i: usize) -> f64 {
    let height = series.hr(i);

    let mut left_min: Option<f64> = None;
    let mut j = i;
    while j > 0 {
        j -= 1;
        if series.hr(j) > height {
            break;
        }
        left_min = Some(left_min.map_or(series.hr(j), |m| m.min(series.hr(j))));
    }

    let mut right_min: Option<f64> = None;
    let mut j = i;
    while j + 1 < series.len() {
        j += 1;
        if series.hr(j) > height {
            break;
        }
        right_min = Some(right_min.map_or(series.hr(j), |m| m.min(series.hr(j))));
    }

    let key_saddle = match (left_min, right_min) {
        (Some(left), Some(right)) => left.max(right),
        (Some(left), None) => left,
        (None, Some(right)) => right,
        (None, None) => height,
    };
    height - key_saddle
}

/// Run the validation gates on a candidate
///
/// On failure the caller resumes scanning at `resume_at` (the next sample);
/// the session is never aborted from here.
pub fn validate_peak(
    series: &SmoothedSeries,
    candidate: CandidatePeak,
    config: &DetectionConfig,
) -> Result<ValidatedPeak, GateRejection> {
    let i = candidate.index;
    let peak_time = series.time(i);
    let peak_hr = series.hr(i);
    let reject = |failure: GateFailure| GateRejection {
        resume_at: i + 1,
        failure,
    };

    // Gate 1: is-a-peak. Skipped when there is no preceding window.
    let lookback_start = peak_time - config.lookback_seconds;
    let lookback: Vec<f64> = (0..i)
        .filter(|&j| series.time(j) >= lookback_start)
        .map(|j| series.hr(j))
        .collect();
    if !lookback.is_empty() {
        let mean = lookback.iter().sum::<f64>() / lookback.len() as f64;
        if peak_hr - mean < config.min_rise_before_peak {
            debug!(
                index = i,
                peak_hr,
                lookback_mean = mean,
                "candidate rejected: not a peak"
            );
            return Err(reject(GateFailure::NotAPeak));
        }
    }

    // Gate 2: no-double-peak.
    let lookahead_end = peak_time + config.lookahead_seconds;
    for j in i + 1..series.len() {
        if series.time(j) > lookahead_end {
            break;
        }
        if series.hr(j) > peak_hr + config.double_peak_tolerance {
            debug!(
                index = i,
                higher_index = j,
                "candidate rejected: higher peak imminent"
            );
            return Err(reject(GateFailure::DoublePeak));
        }
    }

    // Gate 3: genuine descent. Tiny upticks are noise; their sum is not.
    let descent_end = peak_time + config.initial_descent_seconds;
    let mut uptick_budget_used = 0.0;
    let mut previous = peak_hr;
    let mut window_samples = 0usize;
    for j in i + 1..series.len() {
        if series.time(j) > descent_end {
            break;
        }
        let delta = series.hr(j) - previous;
        if delta > 0.0 {
            uptick_budget_used += delta;
        }
        previous = series.hr(j);
        window_samples += 1;
    }
    if window_samples < 2 || uptick_budget_used > config.initial_uptick_tolerance {
        debug!(
            index = i,
            window_samples,
            uptick_budget_used,
            "candidate rejected: no genuine initial descent"
        );
        return Err(reject(GateFailure::NoInitialDescent));
    }

    Ok(ValidatedPeak {
        index: i,
        start_seconds: peak_time,
        peak_hr,
    })
}
