//! Core data model for heart-rate-recovery (HRR) interval detection
//!
//! # Sports Science Background
//!
//! After a local peak in exercise heart rate, parasympathetic reactivation
//! drives heart rate back down toward a resting baseline, approximately as a
//! single-exponential decay. The magnitude of that drop over fixed horizons
//! (30/60/120 seconds and beyond) is a well-validated proxy for autonomic
//! recovery and aerobic fitness:
//!
//! - **HRR60 >= 12 bpm** is the classic clinical cut-off for healthy recovery
//! - **Larger drops and smaller decay constants (tau)** indicate better
//!   parasympathetic reactivation
//! - **A stalled descent (plateau)** usually means activity resumed and the
//!   window no longer measures recovery at all
//!
//! The types here flow strictly downstream: raw [`Sample`]s are smoothed into
//! a [`SmoothedSeries`], candidate peaks are promoted to [`ValidatedPeak`]s,
//! and each validated peak that survives extension and quality gating becomes
//! an immutable [`RecoveryInterval`] record. Downstream consumers (storage,
//! review tooling, coaching logic) may annotate these records but never alter
//! the detection-derived fields.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single heart-rate observation within one session
///
/// Input sequences are ordered by `elapsed_seconds` (monotonically
/// increasing); gaps are allowed but never resampled by the detection core.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since session start
    pub elapsed_seconds: f64,

    /// Heart rate in beats per minute
    pub heart_rate: f64,
}

impl Sample {
    pub fn new(elapsed_seconds: f64, heart_rate: f64) -> Self {
        Sample {
            elapsed_seconds,
            heart_rate,
        }
    }
}

/// One complete recorded session, as supplied by the ingestion collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Caller-supplied session identifier, passed through to output records
    pub id: String,

    /// Ordered samples for the whole session
    pub samples: Vec<Sample>,
}

impl Session {
    pub fn new(id: impl Into<String>, samples: Vec<Sample>) -> Self {
        Session {
            id: id.into(),
            samples,
        }
    }
}

/// Noise-reduced copy of a session's heart-rate trace
///
/// All detection decisions read this series; the raw samples are kept
/// untouched alongside it. Same length and timestamps as the input.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedSeries {
    samples: Vec<Sample>,
}

impl SmoothedSeries {
    pub fn new(samples: Vec<Sample>) -> Self {
        SmoothedSeries { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Elapsed seconds at sample `i`
    pub fn time(&self, i: usize) -> f64 {
        self.samples[i].elapsed_seconds
    }

    /// Smoothed heart rate at sample `i`
    pub fn hr(&self, i: usize) -> f64 {
        self.samples[i].heart_rate
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

/// A local maximum flagged by the peak finder; carries no validity judgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidatePeak {
    /// Index into the smoothed series
    pub index: usize,
}

/// A candidate that passed the is-a-peak, no-double-peak, and
/// genuine-descent gates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatedPeak {
    /// Index into the smoothed series
    pub index: usize,

    /// Elapsed seconds at the peak
    pub start_seconds: f64,

    /// Smoothed heart rate at the peak
    pub peak_hr: f64,
}

/// Final quality classification of a detected interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityStatus {
    /// Accepted: confident enough to feed coaching/readiness logic
    Pass,
    /// Accepted on thresholds but downgraded; needs human review
    Flagged,
    /// Displayed for explainability, but not usable
    Rejected,
}

impl fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityStatus::Pass => write!(f, "pass"),
            QualityStatus::Flagged => write!(f, "flagged"),
            QualityStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Why the extension state machine stopped walking forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Heart rate sat above the running nadir past the plateau budget
    Plateau,
    /// The configured extension cap was reached
    HorizonReached,
    /// The sample stream ended first
    EndOfData,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Plateau => write!(f, "plateau"),
            TerminationReason::HorizonReached => write!(f, "horizon reached"),
            TerminationReason::EndOfData => write!(f, "end of data"),
        }
    }
}

/// Exponential-fit summary for one horizon sub-window
///
/// A failed fit is recorded with its reason rather than silently zeroed, so
/// consumers can distinguish "attempted and poor" from "not attempted".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentFit {
    /// Coefficient of determination, in [0, 1]; `None` when the fit failed
    pub r_squared: Option<f64>,

    /// Fitted decay time constant in seconds; `None` when the fit failed
    pub tau: Option<f64>,

    /// Failure reason when the fit did not converge or was not attempted
    pub failure: Option<String>,
}

/// Linear-regression summary over a labelled sub-window (e.g. "30-60")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSegment {
    /// Slope in bpm per second
    pub slope: f64,

    /// Coefficient of determination, in [0, 1]
    pub r_squared: f64,
}

/// The core's final artifact: one classified heart-rate-recovery interval
///
/// Created once per accepted or displayably-rejected candidate and immutable
/// thereafter. Maps are keyed by horizon seconds (30/60/90/120/180/240/300)
/// and only contain horizons the data actually reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryInterval {
    /// Session this interval belongs to
    pub session_id: String,

    /// Elapsed seconds at the validated peak (interval start)
    pub start_seconds: f64,

    /// Elapsed seconds at the interval's recorded end. For accepted
    /// intervals this is the accepted horizon mark, not where the walk
    /// stopped; rejected intervals keep the raw walked end.
    pub end_seconds: f64,

    /// Recorded interval duration in seconds; one of the configured
    /// horizons for any accepted interval
    pub duration_seconds: f64,

    /// Smoothed heart rate at the peak
    pub peak_hr: f64,

    /// Lowest heart rate reached within the interval
    pub nadir_hr: f64,

    /// Seconds from peak to the nadir sample
    pub nadir_offset_seconds: f64,

    /// Why extension stopped
    pub termination: TerminationReason,

    /// Heart rate at each reached horizon
    pub hr_at_horizon: BTreeMap<u32, f64>,

    /// Absolute HRR (peak minus horizon value) at each reached horizon
    pub hrr_at_horizon: BTreeMap<u32, f64>,

    /// Exponential decay fit per reached horizon
    pub exp_fits: BTreeMap<u32, SegmentFit>,

    /// Linear descent-quality fits over fixed sub-windows ("0-30", "30-60", ...)
    pub linear_fits: BTreeMap<String, LinearSegment>,

    /// Horizon the quality pipeline accepted this interval at, if any
    pub accepted_horizon: Option<u32>,

    /// Decay constant from the accepted horizon's fit, if any
    pub tau: Option<f64>,

    /// Final classification
    pub quality_status: QualityStatus,

    /// Human-readable rejection reason (e.g. `hrr60=4<9`)
    pub auto_reject_reason: Option<String>,

    /// Review flags raised by the downgrade gates
    pub flags: Vec<String>,

    /// Confident enough to feed coaching logic
    pub actionable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_status_display() {
        assert_eq!(format!("{}", QualityStatus::Pass), "pass");
        assert_eq!(format!("{}", QualityStatus::Flagged), "flagged");
        assert_eq!(format!("{}", QualityStatus::Rejected), "rejected");
    }

    #[test]
    fn test_termination_reason_display() {
        assert_eq!(format!("{}", TerminationReason::Plateau), "plateau");
        assert_eq!(
            format!("{}", TerminationReason::HorizonReached),
            "horizon reached"
        );
        assert_eq!(format!("{}", TerminationReason::EndOfData), "end of data");
    }

    #[test]
    fn test_smoothed_series_accessors() {
        let series = SmoothedSeries::new(vec![
            Sample::new(0.0, 150.0),
            Sample::new(1.0, 148.0),
            Sample::new(2.0, 146.0),
        ]);

        assert_eq!(series.len(), 3);
        assert_eq!(series.time(1), 1.0);
        assert_eq!(series.hr(2), 146.0);
        assert!(!series.is_empty());
    }

    #[test]
    fn test_interval_serialization_round_trip() {
        let mut hrr = BTreeMap::new();
        hrr.insert(60u32, 22.0);

        let interval = RecoveryInterval {
            session_id: "s1".to_string(),
            start_seconds: 120.0,
            end_seconds: 240.0,
            duration_seconds: 120.0,
            peak_hr: 165.0,
            nadir_hr: 118.0,
            nadir_offset_seconds: 110.0,
            termination: TerminationReason::HorizonReached,
            hr_at_horizon: BTreeMap::new(),
            hrr_at_horizon: hrr,
            exp_fits: BTreeMap::new(),
            linear_fits: BTreeMap::new(),
            accepted_horizon: Some(120),
            tau: Some(42.5),
            quality_status: QualityStatus::Pass,
            auto_reject_reason: None,
            flags: Vec::new(),
            actionable: true,
        };

        let json = serde_json::to_string(&interval).unwrap();
        let back: RecoveryInterval = serde_json::from_str(&json).unwrap();
        assert_eq!(interval, back);
    }
}
