//! Voice activity gate
//!
//! The clip is taken to 16 kHz 16-bit PCM and cut into 30 ms frames. Frames
//! classified as non-speech are attenuated, speech passes untouched. A
//! trailing partial frame is dropped, then the result goes back to the
//! input rate.

use super::pipeline::{Stage, StageContext};
use crate::audio_util::{Waveform, PCM16_SCALE};
use crate::config::{VadAggressiveness, VadSettings};
use crate::error::StageError;
use crate::resample::resample;

/// Working rate of the frame classifier
pub const VAD_SAMPLE_RATE: u32 = 16_000;

/// Per-frame speech decision. Implementations must be stateless across frames.
pub trait FrameClassifier: Send + Sync {
    fn is_speech(&self, frame: &[i16]) -> bool;
}

/// Energy plus zero-crossing-rate classifier.
///
/// A frame is speech when it is loud enough and not too noisy (white noise
/// and hiss cross zero on roughly every other sample, voiced speech far less).
/// Higher aggressiveness raises the energy bar and lowers the ZCR ceiling.
#[derive(Debug, Clone, Copy)]
pub struct EnergyZcrClassifier {
    min_energy_dbfs: f32,
    max_zcr: f32,
}

impl EnergyZcrClassifier {
    pub fn new(aggressiveness: VadAggressiveness) -> Self {
        let (min_energy_dbfs, max_zcr) = match aggressiveness.level() {
            0 => (-60.0, 1.0),
            1 => (-55.0, 0.7),
            2 => (-50.0, 0.55),
            _ => (-45.0, 0.45),
        };
        Self {
            min_energy_dbfs,
            max_zcr,
        }
    }
}

impl FrameClassifier for EnergyZcrClassifier {
    fn is_speech(&self, frame: &[i16]) -> bool {
        if frame.is_empty() {
            return false;
        }
        let energy = frame
            .iter()
            .map(|&s| {
                let x = s as f64 / 32768.0;
                x * x
            })
            .sum::<f64>()
            / frame.len() as f64;
        if energy <= 0.0 {
            return false;
        }
        let dbfs = 10.0 * energy.log10();

        dbfs as f32 >= self.min_energy_dbfs && zero_crossing_rate(frame) <= self.max_zcr
    }
}

/// Fraction of adjacent sample pairs whose sign differs.
fn zero_crossing_rate(frame: &[i16]) -> f32 {
    if frame.len() < 2 {
        return 0.0;
    }
    let crossings = frame
        .windows(2)
        .filter(|w| (w[0] >= 0) != (w[1] >= 0))
        .count();
    crossings as f32 / (frame.len() - 1) as f32
}

pub struct VoiceActivityGate {
    settings: VadSettings,
    classifier: Box<dyn FrameClassifier>,
}

impl VoiceActivityGate {
    pub fn new(settings: VadSettings, aggressiveness: VadAggressiveness) -> Self {
        Self::with_classifier(settings, Box::new(EnergyZcrClassifier::new(aggressiveness)))
    }

    pub fn with_classifier(settings: VadSettings, classifier: Box<dyn FrameClassifier>) -> Self {
        Self {
            settings,
            classifier,
        }
    }

    fn frame_len(&self) -> usize {
        (VAD_SAMPLE_RATE as usize * self.settings.frame_ms as usize) / 1000
    }

    /// Gate 16 kHz PCM in place, dropping any trailing partial frame.
    fn gate_pcm(&self, pcm: &mut Vec<i16>) {
        let frame_len = self.frame_len();
        let whole = pcm.len() / frame_len;
        pcm.truncate(whole * frame_len);

        let gain = self.settings.non_speech_gain;
        let mut gated = 0usize;
        for frame in pcm.chunks_exact_mut(frame_len) {
            if !self.classifier.is_speech(frame) {
                gated += 1;
                for s in frame.iter_mut() {
                    *s = (*s as f32 * gain) as i16;
                }
            }
        }
        log::debug!("VAD attenuated {} of {} frames", gated, whole);
    }
}

impl Stage for VoiceActivityGate {
    fn name(&self) -> &'static str {
        "Voice activity detection"
    }

    fn apply(&self, input: &Waveform, _ctx: &StageContext<'_>) -> Result<Waveform, StageError> {
        let frame_len = self.frame_len();
        if frame_len == 0 {
            return Err(StageError::InvalidWaveform("zero-length VAD frame"));
        }

        let at_16k = resample(input.samples(), input.sample_rate(), VAD_SAMPLE_RATE)
            .map_err(StageError::Resample)?;
        if at_16k.len() < frame_len {
            return Err(StageError::TooShort {
                len: at_16k.len(),
                min: frame_len,
            });
        }

        let mut pcm: Vec<i16> = at_16k
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * PCM16_SCALE) as i16)
            .collect();
        self.gate_pcm(&mut pcm);

        let gated: Vec<f32> = pcm.iter().map(|&s| s as f32 / PCM16_SCALE).collect();
        let restored =
            resample(&gated, VAD_SAMPLE_RATE, input.sample_rate()).map_err(StageError::Resample)?;

        Waveform::new(restored, input.sample_rate())
    }
}
