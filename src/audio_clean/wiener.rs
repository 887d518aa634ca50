//! Static per-bin Wiener gain
//!
//! Signal power is the mean power of each bin over the whole clip. The gain
//! `P / (P + N)` is computed once and applied to every frame, so the stage
//! shapes the long-term spectrum without any frame-to-frame adaptation.

use super::pipeline::{Stage, StageContext};
use super::stft::Stft;
use crate::audio_util::Waveform;
use crate::config::{WienerNoiseModel, WienerSettings};
use crate::error::StageError;

pub struct AdaptiveSpectralGain {
    settings: WienerSettings,
}

impl AdaptiveSpectralGain {
    pub fn new(settings: WienerSettings) -> Self {
        Self { settings }
    }
}

impl Stage for AdaptiveSpectralGain {
    fn name(&self) -> &'static str {
        "Adaptive Wiener filtering"
    }

    fn apply(&self, input: &Waveform, ctx: &StageContext<'_>) -> Result<Waveform, StageError> {
        let s = &self.settings;
        let stft = Stft::new(s.fft_size, s.hop_size)?;
        let mut spec = stft.analyze(input.samples())?;
        let signal_power = spec.mean_power();

        let noise_power = match s.noise_model {
            WienerNoiseModel::FixedRatio => signal_power
                .iter()
                .map(|p| p * s.noise_power_ratio)
                .collect(),
            WienerNoiseModel::NoiseProfile => {
                if ctx.noise_profile.sample_rate() != input.sample_rate() {
                    return Err(StageError::Other(format!(
                        "noise profile at {} Hz, signal at {} Hz",
                        ctx.noise_profile.sample_rate(),
                        input.sample_rate()
                    )));
                }
                stft.analyze(ctx.noise_profile.excerpt.samples())?.mean_power()
            }
        };

        let gains = wiener_gains(&signal_power, &noise_power);
        for frame in spec.frames.iter_mut() {
            for (c, &g) in frame.iter_mut().zip(&gains) {
                *c *= g;
            }
        }

        Waveform::new(stft.synthesize(&spec, input.len())?, input.sample_rate())
    }
}

/// `P / (P + N)` per bin, unity where both powers vanish.
pub fn wiener_gains(signal_power: &[f32], noise_power: &[f32]) -> Vec<f32> {
    signal_power
        .iter()
        .zip(noise_power)
        .map(|(&p, &n)| {
            let denom = p + n;
            if denom > 0.0 {
                p / denom
            } else {
                1.0
            }
        })
        .collect()
}
