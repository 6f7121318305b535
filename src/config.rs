//! Detection configuration
//!
//! A single immutable parameter bundle constructed once per run and threaded
//! explicitly through every operation. Nothing in the pipeline reads ambient
//! or process-global state; two runs with the same config and input produce
//! byte-identical output.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::extender::ExtensionPolicy;

/// Complete parameter set for HRR interval detection
///
/// Defaults follow the values the detection heuristics were tuned with on
/// 1 Hz wrist/chest-strap data; every field is overridable from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Width of the median + averaging smoothing kernel, in samples.
    /// Must be odd so the median is centered.
    pub smoothing_kernel_width: usize,

    /// Minimum topographic prominence (bpm) for a candidate peak
    pub peak_prominence: f64,

    /// Minimum spacing between candidate peaks, in samples
    pub peak_min_distance: usize,

    /// Window before a candidate used by the is-a-peak gate, in seconds
    pub lookback_seconds: f64,

    /// Candidate must exceed the lookback-window mean by this many bpm
    pub min_rise_before_peak: f64,

    /// Window after a candidate scanned by the no-double-peak gate, in seconds
    pub lookahead_seconds: f64,

    /// How much higher a later sample may sit before the candidate is
    /// dismissed as a false apex, in bpm
    pub double_peak_tolerance: f64,

    /// Length of the genuine-descent check window, in seconds
    pub initial_descent_seconds: f64,

    /// Cumulative upward movement allowed inside the initial descent window
    /// before the candidate fails, in bpm
    pub initial_uptick_tolerance: f64,

    /// Which extension strategy walks the interval forward
    pub extension_policy: ExtensionPolicy,

    /// Allowed rise above the running nadir within the early phase, in bpm
    pub max_rise_from_nadir_early: f64,

    /// Allowed rise above the running nadir after the phase split, in bpm
    pub max_rise_from_nadir_late: f64,

    /// Elapsed seconds from the peak at which the rise ceiling loosens
    pub rise_phase_split_seconds: f64,

    /// Consecutive seconds above the rise ceiling before the interval
    /// terminates with reason "plateau"
    pub max_plateau_seconds: f64,

    /// Hard cap on extension length, in seconds
    pub extension_cap_seconds: f64,

    /// Horizons (seconds from peak) at which HR/HRR metrics are computed
    pub metric_horizons: Vec<u32>,

    /// Minimum bpm drop required to accept at each gate horizon
    #[serde(with = "u32_key_map")]
    pub min_hrr_per_horizon: BTreeMap<u32, f64>,

    /// Minimum exponential-fit R-squared required at each gate horizon
    #[serde(with = "u32_key_map")]
    pub min_segment_r2_per_gate: BTreeMap<u32, f64>,

    /// Intervals shorter than this are suppressed instead of displayed
    /// as rejected, in seconds
    pub min_display_duration_seconds: f64,

    /// Flag gate: minimum share of the session's HR range the drop must use
    pub min_reserve_fraction: f64,

    /// Flag gate: minimum gap between the 60s value and the nadir, in bpm
    pub min_hr60_nadir_gap: f64,

    /// Flag gate: plausible decay-constant range, in seconds
    pub tau_plausible_min: f64,
    pub tau_plausible_max: f64,

    /// Flag gate: minimum linear R-squared over the 30-60s sub-window
    pub min_mid_descent_r2: f64,
}

/// TOML map keys must be strings, so the horizon-keyed tables are written
/// with stringified keys and parsed back to `u32` on load.
mod u32_key_map {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<u32, f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let as_strings: BTreeMap<String, f64> =
            map.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        as_strings.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<u32, f64>, D::Error> {
        let as_strings = BTreeMap::<String, f64>::deserialize(deserializer)?;
        as_strings
            .into_iter()
            .map(|(k, v)| {
                k.parse::<u32>()
                    .map(|key| (key, v))
                    .map_err(|_| D::Error::custom(format!("invalid horizon key: {k}")))
            })
            .collect()
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let mut min_hrr = BTreeMap::new();
        min_hrr.insert(60, 9.0);
        min_hrr.insert(120, 13.0);
        min_hrr.insert(180, 16.0);
        min_hrr.insert(240, 18.0);
        min_hrr.insert(300, 20.0);

        let mut min_r2 = BTreeMap::new();
        for horizon in [60, 120, 180, 240, 300] {
            min_r2.insert(horizon, 0.80);
        }

        DetectionConfig {
            smoothing_kernel_width: 5,
            peak_prominence: 20.0,
            peak_min_distance: 30,
            lookback_seconds: 30.0,
            min_rise_before_peak: 10.0,
            lookahead_seconds: 30.0,
            double_peak_tolerance: 0.5,
            initial_descent_seconds: 10.0,
            initial_uptick_tolerance: 3.0,
            extension_policy: ExtensionPolicy::Adaptive,
            max_rise_from_nadir_early: 3.0,
            max_rise_from_nadir_late: 5.0,
            rise_phase_split_seconds: 60.0,
            max_plateau_seconds: 5.0,
            extension_cap_seconds: 300.0,
            metric_horizons: vec![30, 60, 90, 120, 180, 240, 300],
            min_hrr_per_horizon: min_hrr,
            min_segment_r2_per_gate: min_r2,
            min_display_duration_seconds: 50.0,
            min_reserve_fraction: 0.5,
            min_hr60_nadir_gap: 2.0,
            tau_plausible_min: 8.0,
            tau_plausible_max: 120.0,
            min_mid_descent_r2: 0.5,
        }
    }
}

impl DetectionConfig {
    /// Validate the whole bundle before any session is processed
    ///
    /// Errors here are fatal at startup; nothing downstream re-checks these
    /// conditions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(
            parameter: &'static str,
            value: f64,
        ) -> Result<(), ConfigError> {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(ConfigError::InvalidParameter {
                    parameter,
                    value: value.to_string(),
                    reason: "must be positive and finite",
                })
            }
        }

        fn non_negative(
            parameter: &'static str,
            value: f64,
        ) -> Result<(), ConfigError> {
            if value >= 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(ConfigError::InvalidParameter {
                    parameter,
                    value: value.to_string(),
                    reason: "must be non-negative and finite",
                })
            }
        }

        if self.smoothing_kernel_width == 0 {
            return Err(ConfigError::InvalidParameter {
                parameter: "smoothing_kernel_width",
                value: self.smoothing_kernel_width.to_string(),
                reason: "must be at least 1",
            });
        }
        if self.smoothing_kernel_width % 2 == 0 {
            return Err(ConfigError::InvalidParameter {
                parameter: "smoothing_kernel_width",
                value: self.smoothing_kernel_width.to_string(),
                reason: "must be odd so the median window is centered",
            });
        }

        positive("peak_prominence", self.peak_prominence)?;
        positive("lookback_seconds", self.lookback_seconds)?;
        positive("lookahead_seconds", self.lookahead_seconds)?;
        positive("initial_descent_seconds", self.initial_descent_seconds)?;
        positive("extension_cap_seconds", self.extension_cap_seconds)?;
        positive("rise_phase_split_seconds", self.rise_phase_split_seconds)?;
        positive("min_display_duration_seconds", self.min_display_duration_seconds)?;
        non_negative("min_rise_before_peak", self.min_rise_before_peak)?;
        non_negative("double_peak_tolerance", self.double_peak_tolerance)?;
        non_negative("initial_uptick_tolerance", self.initial_uptick_tolerance)?;
        non_negative("max_rise_from_nadir_early", self.max_rise_from_nadir_early)?;
        non_negative("max_rise_from_nadir_late", self.max_rise_from_nadir_late)?;
        non_negative("max_plateau_seconds", self.max_plateau_seconds)?;
        non_negative("min_hr60_nadir_gap", self.min_hr60_nadir_gap)?;

        if self.peak_min_distance == 0 {
            return Err(ConfigError::InvalidParameter {
                parameter: "peak_min_distance",
                value: "0".to_string(),
                reason: "must be at least 1 sample",
            });
        }

        if self.metric_horizons.is_empty() {
            return Err(ConfigError::InvalidParameter {
                parameter: "metric_horizons",
                value: "[]".to_string(),
                reason: "at least one horizon is required",
            });
        }
        if self.metric_horizons.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::InvalidParameter {
                parameter: "metric_horizons",
                value: format!("{:?}", self.metric_horizons),
                reason: "horizons must be strictly increasing",
            });
        }

        for (&horizon, &hrr) in &self.min_hrr_per_horizon {
            non_negative("min_hrr_per_horizon", hrr)?;
            if !self.metric_horizons.contains(&horizon) {
                return Err(ConfigError::InvalidParameter {
                    parameter: "min_hrr_per_horizon",
                    value: horizon.to_string(),
                    reason: "gate horizon is not in metric_horizons",
                });
            }
            if !self.min_segment_r2_per_gate.contains_key(&horizon) {
                return Err(ConfigError::MissingHorizonThreshold {
                    horizon,
                    table: "min_segment_r2_per_gate",
                });
            }
        }
        if self.min_hrr_per_horizon.is_empty() {
            return Err(ConfigError::InvalidParameter {
                parameter: "min_hrr_per_horizon",
                value: "{}".to_string(),
                reason: "at least one gate horizon is required",
            });
        }

        for (&horizon, &r2) in &self.min_segment_r2_per_gate {
            if !(0.0..=1.0).contains(&r2) {
                return Err(ConfigError::InvalidParameter {
                    parameter: "min_segment_r2_per_gate",
                    value: format!("{}:{}", horizon, r2),
                    reason: "R-squared thresholds must lie in [0, 1]",
                });
            }
        }

        if !(0.0..=1.0).contains(&self.min_reserve_fraction) {
            return Err(ConfigError::InvalidParameter {
                parameter: "min_reserve_fraction",
                value: self.min_reserve_fraction.to_string(),
                reason: "must lie in [0, 1]",
            });
        }
        if !(0.0..=1.0).contains(&self.min_mid_descent_r2) {
            return Err(ConfigError::InvalidParameter {
                parameter: "min_mid_descent_r2",
                value: self.min_mid_descent_r2.to_string(),
                reason: "must lie in [0, 1]",
            });
        }
        if self.tau_plausible_min <= 0.0 || self.tau_plausible_max <= self.tau_plausible_min {
            return Err(ConfigError::InvalidParameter {
                parameter: "tau_plausible_min/max",
                value: format!("{}..{}", self.tau_plausible_min, self.tau_plausible_max),
                reason: "range must be positive and non-empty",
            });
        }

        Ok(())
    }

    /// Gate horizons in descending order (longest evaluated first)
    pub fn gate_horizons_desc(&self) -> Vec<u32> {
        let mut horizons: Vec<u32> = self.min_hrr_per_horizon.keys().copied().collect();
        horizons.sort_unstable_by(|a, b| b.cmp(a));
        horizons
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: DetectionConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        config.validate().map_err(crate::error::HrrsError::from)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Default configuration file path (`~/.hrrs/config.toml`)
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".hrrs")
            .join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        DetectionConfig::default().validate().unwrap();
    }

    #[test]
    fn test_even_kernel_width_rejected() {
        let config = DetectionConfig {
            smoothing_kernel_width: 4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gate_horizon_requires_r2_threshold() {
        let mut config = DetectionConfig::default();
        config.min_segment_r2_per_gate.remove(&120);
        let err = config.validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingHorizonThreshold {
                horizon: 120,
                table: "min_segment_r2_per_gate",
            }
        );
    }

    #[test]
    fn test_gate_horizon_must_be_metric_horizon() {
        let mut config = DetectionConfig::default();
        config.min_hrr_per_horizon.insert(45, 5.0);
        config.min_segment_r2_per_gate.insert(45, 0.8);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_r2_threshold_range_checked() {
        let mut config = DetectionConfig::default();
        config.min_segment_r2_per_gate.insert(60, 1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gate_horizons_longest_first() {
        let config = DetectionConfig::default();
        assert_eq!(config.gate_horizons_desc(), vec![300, 240, 180, 120, 60]);
    }

    #[test]
    fn test_config_file_round_trip() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("detection.toml");

        let mut original = DetectionConfig::default();
        original.peak_prominence = 25.0;
        original.extension_policy = ExtensionPolicy::SlidingWindow;

        original.save_to_file(&config_path).unwrap();
        let loaded = DetectionConfig::load_from_file(&config_path).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_invalid_config_file_rejected() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("detection.toml");

        let bad = DetectionConfig {
            peak_prominence: -1.0,
            ..Default::default()
        };
        // Serialize without validation, then confirm loading refuses it.
        fs::write(&config_path, toml::to_string_pretty(&bad).unwrap()).unwrap();
        assert!(DetectionConfig::load_from_file(&config_path).is_err());
    }
}
