//! Descriptive metrics comparing an original clip with its cleaned version.
//!
//! None of these feed back into processing.

use serde::{Deserialize, Serialize};

use crate::audio_util::Waveform;

/// Reported when the quality heuristic is undefined (e.g. all-zero output).
const DEFAULT_QUALITY_SCORE: f64 = 75.0;
const EPS: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetrics {
    pub original_duration_seconds: f64,
    pub sample_rate: u32,
    pub noise_reduction_db: f64,
    pub snr_improvement_db: f64,
    /// 0-100
    pub quality_score: f64,
    pub processing_steps: Vec<String>,
    pub output_format: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsCalculator;

impl MetricsCalculator {
    pub fn new() -> Self {
        Self
    }

    pub fn calculate(
        &self,
        original: &Waveform,
        cleaned: &Waveform,
        processing_steps: Vec<String>,
    ) -> ProcessingMetrics {
        ProcessingMetrics {
            original_duration_seconds: original.duration_secs(),
            sample_rate: original.sample_rate(),
            noise_reduction_db: noise_reduction_db(original, cleaned),
            snr_improvement_db: snr_improvement_db(original.samples(), cleaned.samples()),
            quality_score: quality_score(cleaned.samples()),
            processing_steps,
            output_format: "wav".to_string(),
        }
    }
}

/// `20 log10(std(original) / std(cleaned))`, 0 when undefined.
pub fn noise_reduction_db(original: &Waveform, cleaned: &Waveform) -> f64 {
    let db = 20.0 * (original.std_dev() / (cleaned.std_dev() + EPS)).log10();
    finite_or(db, 0.0)
}

/// Difference of the cleaned and original SNR estimates, 0 when undefined.
pub fn snr_improvement_db(original: &[f32], cleaned: &[f32]) -> f64 {
    match (estimate_snr_db(original), estimate_snr_db(cleaned)) {
        (Some(before), Some(after)) => finite_or(after - before, 0.0),
        _ => 0.0,
    }
}

/// Mean power over the squared 10th percentile of absolute amplitude.
pub fn estimate_snr_db(samples: &[f32]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let power = mean_square(samples);
    let mut magnitudes: Vec<f64> = samples.iter().map(|&s| (s as f64).abs()).collect();
    let floor = percentile(&mut magnitudes, 10.0)?;
    let snr = 10.0 * (power / (floor * floor + EPS)).log10();
    snr.is_finite().then_some(snr)
}

/// Heuristic 0-100 score from dynamic range and crest factor.
pub fn quality_score(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return DEFAULT_QUALITY_SCORE;
    }
    let (min, max) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &s| {
            (lo.min(s as f64), hi.max(s as f64))
        });
    let rms = mean_square(samples).sqrt();
    let peak = samples.iter().fold(0.0f64, |acc, &s| acc.max((s as f64).abs()));
    let peak_to_rms = peak / (rms + EPS);

    let score = 50.0
        + 20.0 * (max - min + EPS).log10()
        + 30.0 * (1.0 - (peak_to_rms - 3.0).abs() / 10.0);
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        DEFAULT_QUALITY_SCORE
    }
}

/// Linear-interpolated percentile `q` (0-100). Sorts `values` in place.
fn percentile(values: &mut [f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = q / 100.0 * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(values[lo] + (values[hi] - values[lo]) * frac)
}

fn mean_square(samples: &[f32]) -> f64 {
    samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / samples.len() as f64
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn wf(samples: Vec<f32>) -> Waveform {
        Waveform::new(samples, 22050).unwrap()
    }

    #[test]
    fn test_percentile_matches_linear_interpolation() {
        let mut v = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_relative_eq!(percentile(&mut v, 10.0).unwrap(), 1.4);
        assert_relative_eq!(percentile(&mut v, 50.0).unwrap(), 3.0);
        assert_relative_eq!(percentile(&mut v, 100.0).unwrap(), 5.0);
        assert!(percentile(&mut [], 10.0).is_none());
    }

    #[test]
    fn test_noise_reduction_halving() {
        let original = wf((0..1000).map(|i| (i as f32 * 0.1).sin()).collect());
        let cleaned = wf(original.samples().iter().map(|s| s * 0.5).collect());
        assert_relative_eq!(noise_reduction_db(&original, &cleaned), 6.0206, epsilon = 1e-3);
    }

    #[test]
    fn test_uniform_scaling_keeps_snr() {
        let samples: Vec<f32> = (0..2000).map(|i| (i as f32 * 0.05).sin()).collect();
        let scaled: Vec<f32> = samples.iter().map(|s| s * 0.3).collect();
        assert!(snr_improvement_db(&samples, &scaled).abs() < 0.01);
    }

    #[test]
    fn test_quality_score_bounds() {
        let sine: Vec<f32> = (0..2000).map(|i| 0.5 * (i as f32 * 0.05).sin()).collect();
        let score = quality_score(&sine);
        assert!((0.0..=100.0).contains(&score));

        // Silence: tiny dynamic range drives the score to the bottom of the range
        assert_eq!(quality_score(&vec![0.0; 100]), 0.0);
    }

    #[test]
    fn test_metrics_record() {
        let original = wf(vec![0.5; 22050]);
        let cleaned = wf(vec![0.25; 22050]);
        let m = MetricsCalculator::new().calculate(&original, &cleaned, vec!["a".into()]);
        assert_relative_eq!(m.original_duration_seconds, 1.0);
        assert_eq!(m.sample_rate, 22050);
        assert_eq!(m.output_format, "wav");
        assert_eq!(m.processing_steps, vec!["a".to_string()]);
        // Constant signals have zero deviation on both sides
        assert_eq!(m.noise_reduction_db, 0.0);

        let json = serde_json::to_value(&m).unwrap();
        assert!(json.get("snrImprovementDb").is_some());
        assert!(json.get("qualityScore").is_some());
    }
}
