//! Signal preprocessor
//!
//! Optical and chest-strap heart-rate traces carry single-sample spikes
//! (contact loss, motion artifacts) that would otherwise read as peaks or
//! break descent tracking. The preprocessor runs a median filter of width
//! `k` (edge-replicated) to knock out those spikes, then a uniform averaging
//! kernel of the same width to smooth residual jitter. Detection reads only
//! the smoothed trace; raw samples are never overwritten.

use crate::models::{Sample, SmoothedSeries};

/// Smooth a raw sample sequence with a median-then-average kernel
///
/// Series shorter than `kernel_width` are returned unchanged (no smoothing
/// attempted). Deterministic and side-effect free; timestamps pass through
/// untouched.
pub fn smooth(samples: &[Sample], kernel_width: usize) -> SmoothedSeries {
    if samples.len() < kernel_width || kernel_width <= 1 {
        return SmoothedSeries::new(samples.to_vec());
    }

    let values: Vec<f64> = samples.iter().map(|s| s.heart_rate).collect();
    let despiked = median_filter(&values, kernel_width);
    let averaged = moving_average(&despiked, kernel_width);

    let smoothed = samples
        .iter()
        .zip(averaged)
        .map(|(s, hr)| Sample::new(s.elapsed_seconds, hr))
        .collect();

    SmoothedSeries::new(smoothed)
}

/// Median filter with edge replication
fn median_filter(values: &[f64], width: usize) -> Vec<f64> {
    let half = width / 2;
    let mut window = Vec::with_capacity(width);

    (0..values.len())
        .map(|i| {
            window.clear();
            for offset in 0..width {
                // Replicate the first/last value past the edges.
                let j = (i + offset)
                    .saturating_sub(half)
                    .min(values.len() - 1);
                window.push(values[j]);
            }
            window.sort_by(f64::total_cmp);
            window[half]
        })
        .collect()
}

/// Uniform averaging kernel with edge replication
fn moving_average(values: &[f64], width: usize) -> Vec<f64> {
    let half = width / 2;

    (0..values.len())
        .map(|i| {
            let mut sum = 0.0;
            for offset in 0..width {
                let j = (i + offset)
                    .saturating_sub(half)
                    .min(values.len() - 1);
                sum += values[j];
            }
            sum / width as f64
        })
        .collect()
}
