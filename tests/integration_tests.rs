//! End-to-end tests for the HRR detection pipeline
//!
//! Each test feeds a synthetic session through the public entry points
//! (import where relevant, then `detect_session`) and checks the emitted
//! interval records against known physiology.

use proptest::prelude::*;
use std::fs;
use tempfile::tempdir;

use hrrs::config::DetectionConfig;
use hrrs::detector::detect_session;
use hrrs::import::CsvImporter;
use hrrs::models::{QualityStatus, Sample, Session, TerminationReason};

fn session(id: &str, values: &[f64]) -> Session {
    Session::new(
        id,
        values
            .iter()
            .enumerate()
            .map(|(i, &hr)| Sample::new(i as f64, hr))
            .collect(),
    )
}

/// Linear warmup to `peak`, then exponential decay toward `floor`
fn workout(floor: f64, peak: f64, rise_len: usize, tau: f64, fall_len: usize) -> Vec<f64> {
    let mut values = Vec::new();
    for i in 0..rise_len {
        values.push(floor + (peak - floor) * i as f64 / rise_len as f64);
    }
    for i in 0..fall_len {
        values.push(floor + (peak - floor) * (-(i as f64) / tau).exp());
    }
    values
}

#[test]
fn flat_session_produces_no_intervals() {
    // A steady effort still wobbles by a beat or so; none of that ripple may
    // clear the prominence floor.
    let values: Vec<f64> = (0..1200)
        .map(|i| 120.0 + (i as f64 * 0.7).sin())
        .collect();

    let config = DetectionConfig::default();
    let intervals = detect_session(&session("flat", &values), &config).unwrap();
    assert!(intervals.is_empty());
}

#[test]
fn textbook_decay_accepted_at_five_minutes() {
    // hr(t) = 100 + 60 * exp(-t/40) after the peak, sampled at 1 Hz.
    let config = DetectionConfig::default();
    let intervals = detect_session(
        &session("clean", &workout(100.0, 160.0, 60, 40.0, 330)),
        &config,
    )
    .unwrap();

    assert_eq!(intervals.len(), 1);
    let interval = &intervals[0];

    assert_eq!(interval.quality_status, QualityStatus::Pass);
    assert!(interval.actionable);
    assert_eq!(interval.accepted_horizon, Some(300));
    assert_eq!(interval.termination, TerminationReason::HorizonReached);

    let tau = interval.tau.expect("accepted interval carries tau");
    assert!((tau - 40.0).abs() < 2.0, "tau was {}", tau);

    let fit = &interval.exp_fits[&300];
    assert!(fit.r_squared.unwrap() >= 0.99);

    // HRR values grow with the horizon.
    let hrrs: Vec<f64> = interval.hrr_at_horizon.values().copied().collect();
    for pair in hrrs.windows(2) {
        assert!(pair[0] <= pair[1] + 1e-9);
    }
}

#[test]
fn recovery_opening_at_the_first_sample_is_detected() {
    // The recording starts right at the apex: hr(t) = 100 + 60 * exp(-t/40)
    // with no warmup before it. The edge peak must still be found.
    let values: Vec<f64> = (0..340)
        .map(|i| 100.0 + 60.0 * (-(i as f64) / 40.0).exp())
        .collect();

    let config = DetectionConfig::default();
    let intervals = detect_session(&session("cold_open", &values), &config).unwrap();

    assert_eq!(intervals.len(), 1);
    let interval = &intervals[0];
    assert_eq!(interval.quality_status, QualityStatus::Pass);
    assert_eq!(interval.accepted_horizon, Some(300));
    assert!(interval.start_seconds < 3.0);

    let tau = interval.tau.expect("accepted interval carries tau");
    assert!((tau - 40.0).abs() < 2.0, "tau was {}", tau);
}

#[test]
fn plateau_terminates_extension_when_activity_resumes() {
    // Clean decay for 65 s, then heart rate jumps 10 bpm over the nadir and
    // holds: the walk must stop shortly after the jump with reason plateau.
    let mut values = workout(110.0, 165.0, 60, 35.0, 65);
    let resume_hr = *values.last().unwrap();
    values.extend(std::iter::repeat(resume_hr + 10.0).take(120));

    let config = DetectionConfig::default();
    let intervals = detect_session(&session("resumed", &values), &config).unwrap();

    assert_eq!(intervals.len(), 1);
    let interval = &intervals[0];
    assert_eq!(interval.termination, TerminationReason::Plateau);
    // The walk stopped inside the plateau budget of the jump at t=65, so
    // only the 60 s gate can accept; the recorded span snaps to it.
    assert_eq!(interval.accepted_horizon, Some(60));
    assert!(
        (interval.duration_seconds - 60.0).abs() < 1.5,
        "duration was {}",
        interval.duration_seconds
    );
}

#[test]
fn double_peak_defers_to_the_true_apex() {
    // A shoulder peak, a short dip, then a higher apex: no interval may
    // start at the shoulder.
    let mut values: Vec<f64> = (0..95).map(|i| 110.0 + i as f64 * 0.55).collect();
    values.extend(std::iter::repeat(140.0).take(20)); // dip after the shoulder
    values.extend((0..10).map(|i| 140.0 + i as f64 * 2.6)); // surge to the apex
    values.extend((0..330).map(|i| 110.0 + 56.0 * (-(i as f64) / 40.0).exp()));

    let config = DetectionConfig::default();
    let intervals = detect_session(&session("double", &values), &config).unwrap();

    assert!(!intervals.is_empty());
    // Every reported interval starts at or after the true apex.
    for interval in &intervals {
        assert!(
            interval.start_seconds >= 120.0,
            "interval started at shoulder: {}",
            interval.start_seconds
        );
    }
}

#[test]
fn accepted_intervals_never_overlap() {
    let config = DetectionConfig::default();
    let mut values = workout(100.0, 160.0, 60, 40.0, 340);
    values.extend(workout(100.0, 158.0, 60, 35.0, 340));
    values.extend(workout(100.0, 162.0, 60, 45.0, 340));

    let intervals = detect_session(&session("triple", &values), &config).unwrap();
    assert!(intervals.len() >= 2);

    for pair in intervals.windows(2) {
        assert!(pair[0].end_seconds <= pair[1].start_seconds);
    }
}

#[test]
fn rejected_interval_reports_reason_and_is_not_actionable() {
    // Sharp peak with a stalled 6 bpm descent, ending in a real cooldown so
    // the peak keeps its prominence.
    let mut values: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
    values.extend((0..310).map(|i| 154.0 + 6.0 * (-(i as f64) / 20.0).exp()));
    values.extend((0..60).map(|i| 154.0 - i as f64 * 0.9));

    let config = DetectionConfig::default();
    let intervals = detect_session(&session("stalled", &values), &config).unwrap();

    assert_eq!(intervals.len(), 1);
    let interval = &intervals[0];
    assert_eq!(interval.quality_status, QualityStatus::Rejected);
    assert!(!interval.actionable);
    assert!(interval
        .auto_reject_reason
        .as_deref()
        .unwrap()
        .starts_with("hrr"));
}

#[test]
fn nadir_is_the_interval_minimum() {
    let config = DetectionConfig::default();
    let values = workout(100.0, 160.0, 60, 40.0, 330);
    let s = session("nadir", &values);
    let intervals = detect_session(&s, &config).unwrap();

    let interval = &intervals[0];
    // The nadir can sit at most a smoothing kernel's worth above the true
    // series minimum inside the window.
    let window_min = values
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            (*i as f64) >= interval.start_seconds && (*i as f64) <= interval.end_seconds
        })
        .map(|(_, &hr)| hr)
        .fold(f64::INFINITY, f64::min);
    assert!((interval.nadir_hr - window_min).abs() < 1.0);
    assert!(interval.nadir_hr <= interval.peak_hr);
    assert!(interval.nadir_offset_seconds >= 0.0);
    assert!(interval.nadir_offset_seconds <= interval.duration_seconds);
}

#[test]
fn detection_is_deterministic() {
    let config = DetectionConfig::default();
    let mut values = workout(100.0, 160.0, 60, 40.0, 340);
    values.extend(workout(100.0, 155.0, 60, 30.0, 200));
    let s = session("det", &values);

    let first = detect_session(&s, &config).unwrap();
    for _ in 0..3 {
        assert_eq!(detect_session(&s, &config).unwrap(), first);
    }
}

#[test]
fn csv_import_to_detection_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("morning_run.csv");

    let mut content = String::from("time,hr\n");
    for (i, hr) in workout(100.0, 160.0, 60, 40.0, 330).iter().enumerate() {
        content.push_str(&format!("{},{:.2}\n", i, hr));
    }
    fs::write(&path, content).unwrap();

    let session = CsvImporter::new().import_file(&path).unwrap();
    assert_eq!(session.id, "morning_run");

    let intervals = detect_session(&session, &DetectionConfig::default()).unwrap();
    assert_eq!(intervals.len(), 1);
    assert_eq!(intervals[0].session_id, "morning_run");
    assert_eq!(intervals[0].quality_status, QualityStatus::Pass);
}

#[test]
fn sliding_window_policy_runs_to_the_cap() {
    // Same resumed-activity trace as the plateau test, but the fixed-window
    // policy ignores the stall and runs to end of data.
    let mut values = workout(110.0, 165.0, 60, 35.0, 65);
    let resume_hr = *values.last().unwrap();
    values.extend(std::iter::repeat(resume_hr + 10.0).take(120));

    let mut config = DetectionConfig::default();
    config.extension_policy = hrrs::ExtensionPolicy::SlidingWindow;
    let intervals = detect_session(&session("sliding", &values), &config).unwrap();

    assert_eq!(intervals.len(), 1);
    assert_eq!(intervals[0].termination, TerminationReason::EndOfData);
    assert!(intervals[0].duration_seconds > 150.0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Raising the HRR acceptance bar can only demote intervals, never mint
    /// new accepted ones.
    #[test]
    fn stricter_hrr_thresholds_accept_no_more(
        tau in 20.0f64..80.0,
        peak in 150.0f64..180.0,
        extra in 1.0f64..30.0,
    ) {
        let values = workout(100.0, peak, 50, tau, 330);
        let s = session("prop", &values);

        let base = DetectionConfig::default();
        let mut strict = base.clone();
        for threshold in strict.min_hrr_per_horizon.values_mut() {
            *threshold += extra;
        }

        let accepted = |config: &DetectionConfig| -> usize {
            detect_session(&s, config)
                .unwrap()
                .iter()
                .filter(|i| i.quality_status != QualityStatus::Rejected)
                .count()
        };

        prop_assert!(accepted(&strict) <= accepted(&base));
    }

    /// Every emitted interval keeps its basic geometry regardless of shape.
    #[test]
    fn interval_geometry_invariants(
        tau in 15.0f64..90.0,
        peak in 145.0f64..185.0,
        fall_len in 80usize..340,
    ) {
        let values = workout(100.0, peak, 50, tau, fall_len);
        let s = session("geom", &values);
        let config = DetectionConfig::default();

        for interval in detect_session(&s, &config).unwrap() {
            prop_assert!(interval.end_seconds > interval.start_seconds);
            prop_assert!(
                (interval.duration_seconds - (interval.end_seconds - interval.start_seconds)).abs()
                    < 1e-9
            );
            prop_assert!(interval.nadir_hr <= interval.peak_hr);
            for fit in interval.exp_fits.values() {
                if let Some(r2) = fit.r_squared {
                    prop_assert!((0.0..=1.0).contains(&r2));
                }
            }
        }
    }
}
