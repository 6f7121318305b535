//! Curve-fit and metrics engine
//!
//! Computes, per supported horizon, the absolute HRR and the quality of a
//! single-exponential recovery model fitted to the descent:
//!
//! ```text
//! hr(t) = hr_final + delta_hr * exp(-t / tau)
//! ```
//!
//! with `hr_final` in `[0, peak]`, `delta_hr` in `[0, 100]` bpm and `tau` in
//! `[5, 300]` seconds. For a fixed `tau` the model is linear in `hr_final`
//! and `delta_hr`, so the solver reduces to a bounded one-dimensional search
//! over `tau` (coarse grid, then golden-section refinement) with a closed
//! form least-squares solve at each step. The iteration count is hard-capped;
//! a window that cannot be fitted yields an explicit [`FitOutcome::Failed`]
//! rather than an error or a silent zero.
//!
//! All metrics here are read-only derivations; nothing mutates the
//! interval's timing fields.

use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::DetectionConfig;
use crate::models::{LinearSegment, SegmentFit, SmoothedSeries};

/// Bounds and iteration caps for the exponential solver
const TAU_MIN: f64 = 5.0;
const TAU_MAX: f64 = 300.0;
const DELTA_HR_MAX: f64 = 100.0;
const TAU_GRID_POINTS: usize = 48;
const MAX_REFINE_ITERATIONS: usize = 40;
const TAU_TOLERANCE: f64 = 0.05;

/// Minimum samples in a window before a fit is attempted
pub const MIN_FIT_SAMPLES: usize = 10;

/// Sub-windows (seconds from peak) for the cheap linear descent signal
const LINEAR_WINDOWS: [(f64, f64); 4] = [(0.0, 30.0), (30.0, 60.0), (0.0, 60.0), (0.0, 120.0)];

/// How far a sample may sit from the exact horizon mark and still count
const HORIZON_SLACK_SECONDS: f64 = 2.0;

/// Why an exponential fit produced no usable parameters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FitFailure {
    /// Window too short to fit (fewer than [`MIN_FIT_SAMPLES`] samples)
    #[error("too few samples: {count}")]
    TooFewSamples { count: usize },

    /// The window shows no net descent; the model cannot apply
    #[error("no net descent in window")]
    NoDescent,

    /// The solver could not produce a finite, bounded solution
    #[error("solver did not converge")]
    NonConvergent,
}

/// Converged exponential fit parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpFit {
    /// Asymptotic heart rate the decay approaches, bpm
    pub hr_final: f64,

    /// Decay amplitude, bpm
    pub delta_hr: f64,

    /// Decay time constant, seconds
    pub tau: f64,

    /// Coefficient of determination, in [0, 1]
    pub r_squared: f64,
}

/// Outcome of one fit attempt
///
/// Callers can tell "attempted and poor" (converged with low R-squared)
/// apart from "not attempted / not attainable" (failed with a reason).
#[derive(Debug, Clone, PartialEq)]
pub enum FitOutcome {
    Converged(ExpFit),
    Failed(FitFailure),
}

impl FitOutcome {
    /// R-squared for gate checks; failed fits gate closed with 0
    pub fn gate_r_squared(&self) -> f64 {
        match self {
            FitOutcome::Converged(fit) => fit.r_squared,
            FitOutcome::Failed(_) => 0.0,
        }
    }

    pub fn tau(&self) -> Option<f64> {
        match self {
            FitOutcome::Converged(fit) => Some(fit.tau),
            FitOutcome::Failed(_) => None,
        }
    }
}

impl From<&FitOutcome> for SegmentFit {
    fn from(outcome: &FitOutcome) -> Self {
        match outcome {
            FitOutcome::Converged(fit) => SegmentFit {
                r_squared: Some(fit.r_squared),
                tau: Some(fit.tau),
                failure: None,
            },
            FitOutcome::Failed(failure) => SegmentFit {
                r_squared: None,
                tau: None,
                failure: Some(failure.to_string()),
            },
        }
    }
}

/// Plain linear regression result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl From<&LinearFit> for LinearSegment {
    fn from(fit: &LinearFit) -> Self {
        LinearSegment {
            slope: fit.slope,
            r_squared: fit.r_squared,
        }
    }
}

/// All derived metrics for one interval window
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalMetrics {
    /// Heart rate at each reached horizon (seconds from peak)
    pub hr_at_horizon: BTreeMap<u32, f64>,

    /// Peak minus horizon value
    pub hrr_at_horizon: BTreeMap<u32, f64>,

    /// Exponential fit over `[0, horizon]` per reached horizon
    pub exp_fits: BTreeMap<u32, FitOutcome>,

    /// Linear descent fits over the fixed sub-windows, labelled "start-end"
    pub linear_fits: BTreeMap<String, LinearFit>,
}

/// Ordinary least-squares line through `(t, y)`
///
/// Returns `None` when fewer than two points are given or the time values
/// are degenerate. A perfectly flat `y` yields `r_squared = 1.0` (the line
/// explains everything there is to explain).
pub fn linear_regression(t: &[f64], y: &[f64]) -> Option<LinearFit> {
    if t.len() != y.len() || t.len() < 2 {
        return None;
    }

    let t_mean = t.iter().mean();
    let y_mean = y.iter().mean();

    let mut ss_tt = 0.0;
    let mut ss_ty = 0.0;
    for (&ti, &yi) in t.iter().zip(y.iter()) {
        ss_tt += (ti - t_mean) * (ti - t_mean);
        ss_ty += (ti - t_mean) * (yi - y_mean);
    }

    if ss_tt <= f64::EPSILON {
        return None;
    }

    let slope = ss_ty / ss_tt;
    let intercept = y_mean - slope * t_mean;

    let ss_tot: f64 = y.iter().map(|&yi| (yi - y_mean) * (yi - y_mean)).sum();
    let r_squared = if ss_tot <= f64::EPSILON {
        1.0
    } else {
        let ss_res: f64 = t
            .iter()
            .zip(y.iter())
            .map(|(&ti, &yi)| {
                let pred = intercept + slope * ti;
                (yi - pred) * (yi - pred)
            })
            .sum();
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    };

    Some(LinearFit {
        slope,
        intercept,
        r_squared,
    })
}

/// Fit the bounded exponential recovery model to `(t, y)`
///
/// `t` is seconds from the peak (starting at 0), `y` the smoothed heart
/// rates, `peak_hr` the upper bound on `hr_final`.
pub fn fit_exponential(t: &[f64], y: &[f64], peak_hr: f64) -> FitOutcome {
    if t.len() != y.len() || t.len() < MIN_FIT_SAMPLES {
        return FitOutcome::Failed(FitFailure::TooFewSamples { count: t.len() });
    }

    // The model only describes a descent.
    let net_drop = y[0] - y[y.len() - 1];
    if net_drop <= 0.0 {
        return FitOutcome::Failed(FitFailure::NoDescent);
    }

    let y_mean = y.iter().mean();
    let ss_tot: f64 = y.iter().map(|&yi| (yi - y_mean) * (yi - y_mean)).sum();
    if ss_tot <= f64::EPSILON {
        return FitOutcome::Failed(FitFailure::NonConvergent);
    }

    // Coarse log-spaced grid over tau.
    let log_min = TAU_MIN.ln();
    let log_max = TAU_MAX.ln();
    let mut best: Option<(f64, f64, f64, f64)> = None; // (sse, tau, hr_final, delta)
    let mut best_grid_index = 0usize;

    for k in 0..TAU_GRID_POINTS {
        let frac = k as f64 / (TAU_GRID_POINTS - 1) as f64;
        let tau = (log_min + frac * (log_max - log_min)).exp();
        if let Some((sse, hr_final, delta)) = solve_for_tau(t, y, tau, peak_hr) {
            if best.map_or(true, |(b, _, _, _)| sse < b) {
                best = Some((sse, tau, hr_final, delta));
                best_grid_index = k;
            }
        }
    }

    let (_, grid_tau, _, _) = match best {
        Some(b) => b,
        None => return FitOutcome::Failed(FitFailure::NonConvergent),
    };

    // Golden-section refinement between the grid neighbours of the minimum.
    let neighbour = |k: isize| -> f64 {
        let k = k.clamp(0, TAU_GRID_POINTS as isize - 1) as f64;
        let frac = k / (TAU_GRID_POINTS - 1) as f64;
        (log_min + frac * (log_max - log_min)).exp()
    };
    let mut lo = neighbour(best_grid_index as isize - 1);
    let mut hi = neighbour(best_grid_index as isize + 1);
    if lo > hi {
        std::mem::swap(&mut lo, &mut hi);
    }

    let phi = (5f64.sqrt() - 1.0) / 2.0;
    let sse_at = |tau: f64| {
        solve_for_tau(t, y, tau, peak_hr)
            .map(|(sse, _, _)| sse)
            .unwrap_or(f64::INFINITY)
    };

    let mut a = lo;
    let mut b = hi;
    let mut x1 = b - phi * (b - a);
    let mut x2 = a + phi * (b - a);
    let mut f1 = sse_at(x1);
    let mut f2 = sse_at(x2);

    for _ in 0..MAX_REFINE_ITERATIONS {
        if (b - a).abs() < TAU_TOLERANCE {
            break;
        }
        if f1 < f2 {
            b = x2;
            x2 = x1;
            f2 = f1;
            x1 = b - phi * (b - a);
            f1 = sse_at(x1);
        } else {
            a = x1;
            x1 = x2;
            f1 = f2;
            x2 = a + phi * (b - a);
            f2 = sse_at(x2);
        }
    }

    let refined_tau = ((a + b) / 2.0).clamp(TAU_MIN, TAU_MAX);
    let candidates = [grid_tau, refined_tau];
    let mut final_best: Option<(f64, f64, f64, f64)> = None;
    for &tau in &candidates {
        if let Some((sse, hr_final, delta)) = solve_for_tau(t, y, tau, peak_hr) {
            if final_best.map_or(true, |(b, _, _, _)| sse < b) {
                final_best = Some((sse, tau, hr_final, delta));
            }
        }
    }

    match final_best {
        Some((sse, tau, hr_final, delta_hr)) => {
            let r_squared = (1.0 - sse / ss_tot).clamp(0.0, 1.0);
            if !r_squared.is_finite() {
                return FitOutcome::Failed(FitFailure::NonConvergent);
            }
            FitOutcome::Converged(ExpFit {
                hr_final,
                delta_hr,
                tau,
                r_squared,
            })
        }
        None => FitOutcome::Failed(FitFailure::NonConvergent),
    }
}

/// Closed-form least squares for fixed tau, with bound clamping
///
/// Returns `(sse, hr_final, delta_hr)` or `None` for a degenerate basis.
fn solve_for_tau(t: &[f64], y: &[f64], tau: f64, peak_hr: f64) -> Option<(f64, f64, f64)> {
    let basis: Vec<f64> = t.iter().map(|&ti| (-ti / tau).exp()).collect();

    let x_mean = basis.iter().mean();
    let y_mean = y.iter().mean();

    let mut ss_xx = 0.0;
    let mut ss_xy = 0.0;
    for (&xi, &yi) in basis.iter().zip(y.iter()) {
        ss_xx += (xi - x_mean) * (xi - x_mean);
        ss_xy += (xi - x_mean) * (yi - y_mean);
    }
    if ss_xx <= f64::EPSILON {
        return None;
    }

    let delta_hr = (ss_xy / ss_xx).clamp(0.0, DELTA_HR_MAX);
    let hr_final = (y_mean - delta_hr * x_mean).clamp(0.0, peak_hr);

    let sse: f64 = basis
        .iter()
        .zip(y.iter())
        .map(|(&xi, &yi)| {
            let pred = hr_final + delta_hr * xi;
            (yi - pred) * (yi - pred)
        })
        .sum();

    sse.is_finite().then_some((sse, hr_final, delta_hr))
}

/// Compute all per-horizon metrics for the window `[peak_index, end_index]`
pub fn compute_metrics(
    series: &SmoothedSeries,
    peak_index: usize,
    end_index: usize,
    config: &DetectionConfig,
) -> IntervalMetrics {
    let peak_time = series.time(peak_index);
    let peak_hr = series.hr(peak_index);
    let duration = series.time(end_index) - peak_time;

    let mut hr_at_horizon = BTreeMap::new();
    let mut hrr_at_horizon = BTreeMap::new();
    let mut exp_fits = BTreeMap::new();

    for &horizon in &config.metric_horizons {
        let horizon_s = horizon as f64;
        if horizon_s > duration + 1e-9 {
            continue;
        }
        let Some(sample_index) =
            closest_sample(series, peak_index, end_index, peak_time + horizon_s)
        else {
            continue;
        };

        let hr = series.hr(sample_index);
        hr_at_horizon.insert(horizon, hr);
        hrr_at_horizon.insert(horizon, peak_hr - hr);

        let (t, y) = window(series, peak_index, end_index, 0.0, horizon_s);
        exp_fits.insert(horizon, fit_exponential(&t, &y, peak_hr));
    }

    let mut linear_fits = BTreeMap::new();
    for &(start, end) in &LINEAR_WINDOWS {
        if end > duration + 1e-9 {
            continue;
        }
        let (t, y) = window(series, peak_index, end_index, start, end);
        if let Some(fit) = linear_regression(&t, &y) {
            linear_fits.insert(format!("{}-{}", start as u32, end as u32), fit);
        }
    }

    IntervalMetrics {
        hr_at_horizon,
        hrr_at_horizon,
        exp_fits,
        linear_fits,
    }
}

/// Sample nearest to `target_time` inside the interval, within slack
fn closest_sample(
    series: &SmoothedSeries,
    peak_index: usize,
    end_index: usize,
    target_time: f64,
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for i in peak_index..=end_index {
        let distance = (series.time(i) - target_time).abs();
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((i, distance));
        }
    }
    best.and_then(|(i, d)| (d <= HORIZON_SLACK_SECONDS).then_some(i))
}

/// Collect `(t, y)` pairs for `[start, end]` seconds from the peak
fn window(
    series: &SmoothedSeries,
    peak_index: usize,
    end_index: usize,
    start: f64,
    end: f64,
) -> (Vec<f64>, Vec<f64>) {
    let peak_time = series.time(peak_index);
    let mut t = Vec::new();
    let mut y = Vec::new();
    for i in peak_index..=end_index {
        let offset = series.time(i) - peak_time;
        if offset + 1e-9 >= start && offset <= end + 1e-9 {
            t.push(offset);
            y.push(series.hr(i));
        }
    }
    (t, y)
}
