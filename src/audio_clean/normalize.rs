//! Loudness normalization with a peak ceiling.

use super::pipeline::{Stage, StageContext};
use crate::audio_util::Waveform;
use crate::config::NormalizeSettings;
use crate::error::StageError;

pub struct Normalizer {
    settings: NormalizeSettings,
}

impl Normalizer {
    pub fn new(settings: NormalizeSettings) -> Self {
        Self { settings }
    }

    /// Gain that brings `waveform` to the target RMS without the peak
    /// exceeding the ceiling. The ceiling wins when they disagree.
    pub fn gain_for(&self, waveform: &Waveform) -> f32 {
        let rms = waveform.rms();
        if rms <= 0.0 {
            return 1.0;
        }
        let gain = self.settings.target_rms / rms;
        let peak = waveform.peak() * gain;
        if peak > self.settings.peak_ceiling {
            gain * self.settings.peak_ceiling / peak
        } else {
            gain
        }
    }
}

impl Stage for Normalizer {
    fn name(&self) -> &'static str {
        "Audio normalization"
    }

    fn apply(&self, input: &Waveform, _ctx: &StageContext<'_>) -> Result<Waveform, StageError> {
        let gain = self.gain_for(input);
        if gain == 1.0 {
            return Ok(input.clone());
        }
        let samples = input.samples().iter().map(|s| s * gain).collect();
        Waveform::new(samples, input.sample_rate())
    }
}
