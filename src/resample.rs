//! One-shot sample-rate conversion of a whole clip.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

const SINC_LEN: usize = 256;

/// Resample mono `samples` from `from_rate` to `to_rate`.
///
/// The output is aligned with the input (the sinc filter delay is removed)
/// and holds `round(len * to_rate / from_rate)` samples. Equal rates return a
/// copy of the input.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, String> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let target_len = (samples.len() as f64 * ratio).round() as usize;
    let delay = (SINC_LEN as f64 / 2.0 * ratio).round() as usize;

    // Flush the filter tail with silence so the last input samples come out
    let mut padded = Vec::with_capacity(samples.len() + SINC_LEN);
    padded.extend_from_slice(samples);
    padded.resize(samples.len() + SINC_LEN, 0.0);

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, padded.len(), 1)
        .map_err(|e| format!("Failed to create resampler: {}", e))?;

    let output = resampler
        .process(&[padded], None)
        .map_err(|e| format!("Failed to resample {} -> {} Hz: {}", from_rate, to_rate, e))?
        .into_iter()
        .next()
        .unwrap_or_default();

    let mut aligned: Vec<f32> = output.into_iter().skip(delay).take(target_len).collect();
    aligned.resize(target_len, 0.0);
    Ok(aligned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, secs: f32) -> Vec<f32> {
        let n = (rate as f32 * secs) as usize;
        (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_same_rate_passthrough() {
        let samples = sine(440.0, 16000, 0.1);
        assert_eq!(resample(&samples, 16000, 16000).unwrap(), samples);
    }

    #[test]
    fn test_output_length() {
        let samples = sine(440.0, 22050, 1.0);
        let down = resample(&samples, 22050, 16000).unwrap();
        assert_eq!(down.len(), 16000);

        let up = resample(&down, 16000, 22050).unwrap();
        assert_eq!(up.len(), 22050);
    }

    #[test]
    fn test_level_preserved() {
        let samples = sine(440.0, 44100, 1.0);
        let down = resample(&samples, 44100, 16000).unwrap();
        let mid = &down[2000..14000];
        let rms = (mid.iter().map(|s| s * s).sum::<f32>() / mid.len() as f32).sqrt();
        // 0.5 amplitude sine has RMS ~0.354
        assert!((rms - 0.354).abs() < 0.02, "rms={}", rms);
    }
}
