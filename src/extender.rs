//! Interval extender
//!
//! Walks forward from a validated peak, tracking the lowest heart rate seen
//! so far (the running nadir) and deciding where the recovery window ends.
//! This is a small state machine:
//!
//! ```text
//! Descending --(initial window elapses)--> Monitoring --(rule fires)--> Terminated
//! ```
//!
//! While `Monitoring`, a sample below the running nadir updates the nadir and
//! resets the above-nadir stopwatch; a sample above it runs the stopwatch up.
//! The walk terminates with reason "plateau" when the rise over the nadir
//! exceeds the phase-dependent ceiling *and* the stopwatch exceeds the
//! plateau budget — recovery has stalled, almost always because activity
//! resumed. The hard cap and end-of-data terminate the walk otherwise.
//!
//! Two historical extension heuristics survive as interchangeable policies
//! behind the same walker, selected by configuration: the adaptive
//! observer-with-stopwatch described above, and a fixed sliding window that
//! ignores plateau logic and simply runs to the cap. Gate thresholds and
//! curve fitting are shared either way.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::DetectionConfig;
use crate::models::{SmoothedSeries, TerminationReason, ValidatedPeak};

/// Extension strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionPolicy {
    /// Observer-with-stopwatch: plateau detection ends the walk early
    Adaptive,
    /// Fixed window: run to the cap (or the data's end), nadir-tracking only
    SlidingWindow,
}

/// Walker state; `Descending` covers the initial post-peak window before
/// plateau rules arm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkerState {
    Descending,
    Monitoring,
}

/// Result of walking one validated peak forward
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extension {
    /// Last sample index inside the interval
    pub end_index: usize,

    /// Index of the lowest heart rate reached
    pub nadir_index: usize,

    /// Lowest heart rate reached, bpm
    pub nadir_hr: f64,

    /// Why the walk stopped
    pub reason: TerminationReason,

    /// Raw interval duration in seconds
    pub duration_seconds: f64,
}

/// Extend a validated peak into a full interval window
pub fn extend(
    series: &SmoothedSeries,
    peak: &ValidatedPeak,
    config: &DetectionConfig,
) -> Extension {
    match config.extension_policy {
        ExtensionPolicy::Adaptive => extend_adaptive(series, peak, config),
        ExtensionPolicy::SlidingWindow => extend_sliding(series, peak, config),
    }
}

fn extend_adaptive(
    series: &SmoothedSeries,
    peak: &ValidatedPeak,
    config: &DetectionConfig,
) -> Extension {
    let peak_time = peak.start_seconds;

    let mut state = WalkerState::Descending;
    let mut nadir_index = peak.index;
    let mut nadir_hr = peak.peak_hr;
    let mut above_nadir_seconds = 0.0;
    let mut last_index = peak.index;
    let mut last_time = peak_time;

    for i in peak.index + 1..series.len() {
        let elapsed = series.time(i) - peak_time;

        // Hard cap fires before the sample past it is admitted.
        if elapsed > config.extension_cap_seconds + 1e-9 {
            return finish(
                series,
                peak,
                last_index,
                nadir_index,
                nadir_hr,
                TerminationReason::HorizonReached,
            );
        }

        let dt = series.time(i) - last_time;
        let hr = series.hr(i);

        if state == WalkerState::Descending && elapsed >= config.initial_descent_seconds {
            state = WalkerState::Monitoring;
        }

        if hr < nadir_hr {
            nadir_hr = hr;
            nadir_index = i;
            above_nadir_seconds = 0.0;
        } else {
            above_nadir_seconds += dt;
            let ceiling = if elapsed <= config.rise_phase_split_seconds {
                config.max_rise_from_nadir_early
            } else {
                config.max_rise_from_nadir_late
            };
            if state == WalkerState::Monitoring
                && hr - nadir_hr > ceiling
                && above_nadir_seconds > config.max_plateau_seconds
            {
                trace!(
                    index = i,
                    rise = hr - nadir_hr,
                    above_nadir_seconds,
                    "extension terminated: plateau"
                );
                return finish(
                    series,
                    peak,
                    i,
                    nadir_index,
                    nadir_hr,
                    TerminationReason::Plateau,
                );
            }
        }

        last_index = i;
        last_time = series.time(i);
    }

    finish(
        series,
        peak,
        last_index,
        nadir_index,
        nadir_hr,
        TerminationReason::EndOfData,
    )
}

fn extend_sliding(
    series: &SmoothedSeries,
    peak: &ValidatedPeak,
    config: &DetectionConfig,
) -> Extension {
    let peak_time = peak.start_seconds;

    let mut nadir_index = peak.index;
    let mut nadir_hr = peak.peak_hr;
    let mut last_index = peak.index;

    for i in peak.index + 1..series.len() {
        let elapsed = series.time(i) - peak_time;
        if elapsed > config.extension_cap_seconds + 1e-9 {
            return finish(
                series,
                peak,
                last_index,
                nadir_index,
                nadir_hr,
                TerminationReason::HorizonReached,
            );
        }
        if series.hr(i) < nadir_hr {
            nadir_hr = series.hr(i);
            nadir_index = i;
        }
        last_index = i;
    }

    finish(
        series,
        peak,
        last_index,
        nadir_index,
        nadir_hr,
        TerminationReason::EndOfData,
    )
}

fn finish(
    series: &SmoothedSeries,
    peak: &ValidatedPeak,
    end_index: usize,
    nadir_index: usize,
    nadir_hr: f64,
    reason: TerminationReason,
) -> Extension {
    Extension {
        end_index,
        nadir_index,
        nadir_hr,
        reason,
        duration_seconds: series.time(end_index) - peak.start_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sample;

    fn series(values: &[f64]) -> SmoothedSeries {
        SmoothedSeries::new(
            values
                .iter()
                .enumerate()
                .map(|(i, &hr)| Sample::new(i as f64, hr))
                .collect(),
        )
    }

    fn peak_at(series: &SmoothedSeries, index: usize) -> ValidatedPeak {
        ValidatedPeak {
            index,
            start_seconds: series.time(index),
            peak_hr: series.hr(index),
        }
    }

    fn decay(peak: f64, floor: f64, tau: f64, seconds: usize) -> Vec<f64> {
        (0..=seconds)
            .map(|i| floor + (peak - floor) * (-(i as f64) / tau).exp())
            .collect()
    }

    #[test]
    fn test_clean_decay_runs_to_cap() {
        let values = decay(160.0, 100.0, 40.0, 400);
        let s = series(&values);
        let config = DetectionConfig::default();

        let ext = extend(&s, &peak_at(&s, 0), &config);
        assert_eq!(ext.reason, TerminationReason::HorizonReached);
        assert!((ext.duration_seconds - config.extension_cap_seconds).abs() < 1.5);
    }

    #[test]
    fn test_short_stream_ends_with_end_of_data() {
        let values = decay(160.0, 100.0, 40.0, 80);
        let s = series(&values);
        let config = DetectionConfig::default();

        let ext = extend(&s, &peak_at(&s, 0), &config);
        assert_eq!(ext.reason, TerminationReason::EndOfData);
        assert_eq!(ext.end_index, s.len() - 1);
        assert!((ext.duration_seconds - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_nadir_is_monotone_running_minimum() {
        // Descent with a bump: nadir must never rise.
        let mut values = decay(160.0, 110.0, 30.0, 100);
        for v in values[60..75].iter_mut() {
            *v += 6.0;
        }
        let s = series(&values);
        let mut config = DetectionConfig::default();
        // Keep the walk alive through the bump for this check.
        config.max_rise_from_nadir_early = 50.0;
        config.max_rise_from_nadir_late = 50.0;

        let ext = extend(&s, &peak_at(&s, 0), &config);
        let min_hr = values[..=ext.end_index]
            .iter()
            .fold(f64::INFINITY, |a, &b| a.min(b));
        assert!((ext.nadir_hr - min_hr).abs() < 1e-9);
    }

    #[test]
    fn test_plateau_terminates_walk() {
        // Decay to ~121 bpm by t=65, then a 4 bpm rise held for 10 s.
        let mut values = decay(150.0, 115.0, 35.0, 64);
        let held = values[64] + 4.0;
        values.extend(std::iter::repeat(held).take(10));
        values.extend(decay(held, 110.0, 35.0, 60));
        let s = series(&values);

        let mut config = DetectionConfig::default();
        config.max_rise_from_nadir_early = 3.0;
        config.max_rise_from_nadir_late = 3.0;
        config.max_plateau_seconds = 5.0;

        let ext = extend(&s, &peak_at(&s, 0), &config);
        assert_eq!(ext.reason, TerminationReason::Plateau);
        assert!(
            ext.duration_seconds >= 65.0 && ext.duration_seconds <= 75.0,
            "terminated at {}s",
            ext.duration_seconds
        );
        assert!(ext.duration_seconds < 120.0);
    }

    #[test]
    fn test_stopwatch_resets_on_new_nadir() {
        // A brief rise, then a fresh low: the stopwatch must restart, so the
        // later plateau needs its full budget again before terminating.
        let mut values = decay(150.0, 120.0, 25.0, 50);
        let bump = values[50] + 4.0;
        values.extend(std::iter::repeat(bump).take(4)); // below plateau budget
        values.extend(decay(values[50] - 1.0, 112.0, 25.0, 30)); // new nadir
        let s = series(&values);

        let mut config = DetectionConfig::default();
        config.max_rise_from_nadir_early = 3.0;
        config.max_rise_from_nadir_late = 3.0;
        config.max_plateau_seconds = 5.0;

        let ext = extend(&s, &peak_at(&s, 0), &config);
        // Walk survives the short bump and runs to the end of the data.
        assert_eq!(ext.reason, TerminationReason::EndOfData);
    }

    #[test]
    fn test_plateau_rules_disarmed_during_initial_descent() {
        // A rebound above the nadir right after the peak, inside the
        // initial descent window.
        let mut values = vec![150.0, 148.0];
        values.extend(std::iter::repeat(149.2).take(6)); // 1.2 bpm over nadir
        values.extend(decay(149.2, 110.0, 30.0, 120));
        let s = series(&values);

        let mut config = DetectionConfig::default();
        config.max_rise_from_nadir_early = 0.5;
        config.max_plateau_seconds = 2.0;
        config.initial_descent_seconds = 10.0;

        let ext = extend(&s, &peak_at(&s, 0), &config);
        // The rebound sits inside Descending; the walk continues past it.
        assert_ne!(ext.reason, TerminationReason::Plateau);
    }

    #[test]
    fn test_sliding_window_ignores_plateau() {
        let mut values = decay(150.0, 115.0, 35.0, 64);
        let held = values[64] + 4.0;
        values.extend(std::iter::repeat(held).take(40));
        let s = series(&values);

        let mut config = DetectionConfig::default();
        config.extension_policy = ExtensionPolicy::SlidingWindow;
        config.max_rise_from_nadir_early = 3.0;
        config.max_rise_from_nadir_late = 3.0;

        let ext = extend(&s, &peak_at(&s, 0), &config);
        assert_eq!(ext.reason, TerminationReason::EndOfData);
        assert_eq!(ext.end_index, s.len() - 1);
    }

    #[test]
    fn test_cap_respected_exactly() {
        let values = decay(160.0, 100.0, 40.0, 400);
        let s = series(&values);
        let mut config = DetectionConfig::default();
        config.extension_cap_seconds = 120.0;

        let ext = extend(&s, &peak_at(&s, 0), &config);
        assert_eq!(ext.reason, TerminationReason::HorizonReached);
        assert!((ext.duration_seconds - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_phase_dependent_ceiling() {
        // 4 bpm sustained rise at t=30: over the early ceiling (3) but the
        // late ceiling (5) would have allowed it.
        let mut values = decay(150.0, 118.0, 25.0, 29);
        let held = values[29] + 4.0;
        values.extend(std::iter::repeat(held).take(20));
        let s = series(&values);

        let config = DetectionConfig::default();
        let ext = extend(&s, &peak_at(&s, 0), &config);
        assert_eq!(ext.reason, TerminationReason::Plateau);
        assert!(ext.duration_seconds < 60.0);

        // Same shape at t=70 stays under the looser late ceiling.
        let mut values = decay(150.0, 118.0, 25.0, 69);
        let held = values[69] + 4.0;
        values.extend(std::iter::repeat(held).take(20));
        let s = series(&values);
        let ext = extend(&s, &peak_at(&s, 0), &config);
        assert_ne!(ext.reason, TerminationReason::Plateau);
    }
}
