//! Spectral subtraction against the estimated noise profile
//!
//! The noise magnitude spectrum is the mean STFT magnitude of the profile
//! excerpt. Every bin of the signal is reduced by `alpha` times that estimate
//! but never below `beta` times its own magnitude. Phase is kept.

use super::pipeline::{Stage, StageContext};
use super::stft::{Spectrogram, Stft};
use crate::audio_util::Waveform;
use crate::config::SpectralSettings;
use crate::error::StageError;

pub struct SpectralSubtractor {
    settings: SpectralSettings,
}

impl SpectralSubtractor {
    pub fn new(settings: SpectralSettings) -> Self {
        Self { settings }
    }
}

impl Stage for SpectralSubtractor {
    fn name(&self) -> &'static str {
        "Spectral subtraction"
    }

    fn apply(&self, input: &Waveform, ctx: &StageContext<'_>) -> Result<Waveform, StageError> {
        let s = &self.settings;
        let stft = Stft::new(s.fft_size, s.hop_size)?;

        let noise_mag = stft.analyze(ctx.noise_profile.excerpt.samples())?.mean_magnitude();
        let mut spec = stft.analyze(input.samples())?;
        subtract_noise(&mut spec, &noise_mag, s.alpha, s.beta);

        Waveform::new(stft.synthesize(&spec, input.len())?, input.sample_rate())
    }
}

/// Over-subtract `noise_mag` from every frame with a spectral floor.
///
/// After the call each bin's magnitude is `max(|X| - alpha * N, beta * |X|)`.
pub fn subtract_noise(spec: &mut Spectrogram, noise_mag: &[f32], alpha: f32, beta: f32) {
    for frame in spec.frames.iter_mut() {
        for (c, &noise) in frame.iter_mut().zip(noise_mag) {
            let mag = c.norm();
            if mag <= 0.0 {
                continue;
            }
            let clean = (mag - alpha * noise).max(beta * mag);
            *c = *c * (clean / mag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_clean::noise_profile::{NoiseProfile, ProfileSource};
    use crate::audio_util::rms;

    const RATE: u32 = 22050;

    fn noise(len: usize, amplitude: f32, seed: u32) -> Vec<f32> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                amplitude * ((state as f32 / u32::MAX as f32) * 2.0 - 1.0)
            })
            .collect()
    }

    #[test]
    fn test_floor_and_phase() {
        let stft = Stft::new(2048, 512).unwrap();
        let mut spec = stft.analyze(&noise(8000, 0.5, 99)).unwrap();
        let before = spec.clone();
        // Large noise estimate drives every bin to the floor
        let noise_mag = vec![1.0e3f32; spec.bins];
        subtract_noise(&mut spec, &noise_mag, 2.0, 0.01);

        for (f_before, f_after) in before.frames.iter().zip(&spec.frames) {
            for (a, b) in f_before.iter().zip(f_after) {
                let expected = 0.01 * a.norm();
                assert!((b.norm() - expected).abs() <= 1e-4 * a.norm().max(1.0));
                assert!(b.norm() >= 0.01 * a.norm() * (1.0 - 1e-4));
                if a.norm() > 1e-3 {
                    // Positive real scaling leaves the phase alone
                    assert!((a.arg() - b.arg()).abs() < 1e-4);
                }
            }
        }
    }

    #[test]
    fn test_zero_noise_is_identity() {
        let stft = Stft::new(1024, 256).unwrap();
        let mut spec = stft.analyze(&noise(4000, 0.3, 5)).unwrap();
        let before = spec.clone();
        let zeros = vec![0.0; spec.bins];
        subtract_noise(&mut spec, &zeros, 2.0, 0.01);
        for (fa, fb) in before.frames.iter().zip(&spec.frames) {
            for (a, b) in fa.iter().zip(fb) {
                assert!((a - b).norm() < 1e-6);
            }
        }
    }

    #[test]
    fn test_removes_profiled_noise() {
        let samples = noise(RATE as usize * 2, 0.2, 0xdead_beef);
        let wf = Waveform::new(samples.clone(), RATE).unwrap();
        let profile = NoiseProfile {
            excerpt: Waveform::new(samples[..RATE as usize / 2].to_vec(), RATE).unwrap(),
            start: 0,
            source: ProfileSource::LeadingFallback,
        };
        let ctx = StageContext {
            noise_profile: &profile,
        };

        let out = SpectralSubtractor::new(SpectralSettings::default())
            .apply(&wf, &ctx)
            .unwrap();
        assert_eq!(out.len(), wf.len());
        assert!(rms(out.samples()) < rms(wf.samples()) * 0.5);
    }
}
