//! Broadband non-stationary noise reduction
//!
//! Two backends:
//! - spectral gate: the noise floor of every bin is a running (2 s) average of
//!   its magnitude; bins well above their floor keep their energy, the rest
//!   are pulled down by `prop_decrease`
//! - rnnoise: recurrent denoiser via nnnoiseless at 48 kHz, blended with the
//!   input by `prop_decrease`

use nnnoiseless::DenoiseState;

use super::pipeline::{Stage, StageContext};
use super::stft::Stft;
use crate::audio_util::{Waveform, PCM16_SCALE};
use crate::config::{BroadbandBackend, BroadbandSettings};
use crate::error::StageError;
use crate::resample::resample;

/// RNNoise runs at a fixed 48 kHz
const RNNOISE_SAMPLE_RATE: u32 = 48_000;

pub struct BroadbandSuppressor {
    settings: BroadbandSettings,
}

impl BroadbandSuppressor {
    pub fn new(settings: BroadbandSettings) -> Self {
        Self { settings }
    }

    fn prop_decrease(&self) -> f32 {
        self.settings.prop_decrease.clamp(0.0, 1.0)
    }

    fn spectral_gate(&self, input: &Waveform) -> Result<Vec<f32>, StageError> {
        let s = &self.settings;
        let rate = input.sample_rate() as f32;
        let stft = Stft::new(s.fft_size, s.hop_size)?;
        let mut spec = stft.analyze(input.samples())?;

        let frames = spec.num_frames();
        let bins = spec.bins;

        // [bin][frame] magnitudes, time runs along the inner axis
        let mut floor: Vec<Vec<f32>> = (0..bins)
            .map(|k| spec.frames.iter().map(|f| f[k].norm()).collect())
            .collect();
        let t_frames = s.time_constant_s * rate / s.hop_size as f32;
        let coeff = smoothing_coefficient(t_frames);
        for row in floor.iter_mut() {
            smooth_forward_backward(row, coeff);
        }

        let mut mask = vec![vec![0.0f32; frames]; bins];
        for k in 0..bins {
            for t in 0..frames {
                let mag = spec.frames[t][k].norm();
                let fl = floor[k][t];
                let above = if fl > 1e-12 { (mag - fl) / fl } else { 0.0 };
                mask[k][t] = sigmoid((above - s.threshold_mult) * s.sigmoid_slope);
            }
        }

        let freq_step = rate / (s.fft_size as f32 / 2.0);
        let time_step_ms = s.hop_size as f32 / rate * 1000.0;
        let freq_kernel = triangular_kernel((s.freq_smooth_hz / freq_step) as usize);
        let time_kernel = triangular_kernel((s.time_smooth_ms / time_step_ms) as usize);
        let mask = smooth_mask(&mask, &freq_kernel, &time_kernel);

        let prop = self.prop_decrease();
        for (t, frame) in spec.frames.iter_mut().enumerate() {
            for (k, c) in frame.iter_mut().enumerate() {
                *c *= mask[k][t] * prop + (1.0 - prop);
            }
        }

        stft.synthesize(&spec, input.len())
    }

    fn rnnoise(&self, input: &Waveform) -> Result<Vec<f32>, StageError> {
        let rate = input.sample_rate();
        let original = input.samples();

        let at_48k = resample(original, rate, RNNOISE_SAMPLE_RATE).map_err(StageError::Resample)?;
        let denoised_48k = run_rnnoise(&at_48k);
        let mut denoised =
            resample(&denoised_48k, RNNOISE_SAMPLE_RATE, rate).map_err(StageError::Resample)?;
        denoised.resize(original.len(), 0.0);

        let prop = self.prop_decrease();
        Ok(original
            .iter()
            .zip(&denoised)
            .map(|(&x, &d)| x * (1.0 - prop) + d * prop)
            .collect())
    }
}

impl Stage for BroadbandSuppressor {
    fn name(&self) -> &'static str {
        "Primary noise reduction"
    }

    fn apply(&self, input: &Waveform, _ctx: &StageContext<'_>) -> Result<Waveform, StageError> {
        let samples = match self.settings.backend {
            BroadbandBackend::SpectralGate => self.spectral_gate(input)?,
            BroadbandBackend::Rnnoise => self.rnnoise(input)?,
        };
        Waveform::new(samples, input.sample_rate())
    }
}

/// RNNoise expects 16-bit scaled floats in 480-sample frames.
fn run_rnnoise(samples: &[f32]) -> Vec<f32> {
    let mut state = DenoiseState::new();
    let mut input = vec![0.0f32; DenoiseState::FRAME_SIZE];
    let mut output = vec![0.0f32; DenoiseState::FRAME_SIZE];
    let mut result = Vec::with_capacity(samples.len());

    for chunk in samples.chunks(DenoiseState::FRAME_SIZE) {
        input.fill(0.0);
        for (dst, &src) in input.iter_mut().zip(chunk) {
            *dst = src * PCM16_SCALE;
        }
        state.process_frame(&mut output, &input);
        result.extend(output[..chunk.len()].iter().map(|&s| s / PCM16_SCALE));
    }

    result
}

/// One-pole coefficient whose forward-backward response has a time constant
/// of `t_frames` frames.
fn smoothing_coefficient(t_frames: f32) -> f32 {
    if t_frames <= 0.0 {
        return 1.0;
    }
    let t2 = t_frames * t_frames;
    ((1.0 + 4.0 * t2).sqrt() - 1.0) / (2.0 * t2)
}

/// Zero-phase one-pole low-pass, initialised at the edge values.
fn smooth_forward_backward(values: &mut [f32], coeff: f32) {
    let Some(&first) = values.first() else {
        return;
    };
    let mut y = first;
    for v in values.iter_mut() {
        y = coeff * *v + (1.0 - coeff) * y;
        *v = y;
    }
    let mut y = values[values.len() - 1];
    for v in values.iter_mut().rev() {
        y = coeff * *v + (1.0 - coeff) * y;
        *v = y;
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Normalized triangle of `2n + 1` taps (a single unit tap for n = 0).
fn triangular_kernel(n: usize) -> Vec<f32> {
    let taps: Vec<f32> = (1..=n + 1)
        .chain((1..=n).rev())
        .map(|k| k as f32 / (n + 1) as f32)
        .collect();
    let sum: f32 = taps.iter().sum();
    taps.into_iter().map(|t| t / sum).collect()
}

/// Zero-padded "same" convolution of one row with a symmetric kernel.
fn convolve_same(row: &[f32], kernel: &[f32]) -> Vec<f32> {
    let half = kernel.len() / 2;
    (0..row.len())
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(j, &w)| {
                    let idx = (i + j).checked_sub(half)?;
                    row.get(idx).map(|&v| v * w)
                })
                .sum()
        })
        .collect()
}

/// Separable 2-D smoothing of a [bin][frame] mask.
fn smooth_mask(mask: &[Vec<f32>], freq_kernel: &[f32], time_kernel: &[f32]) -> Vec<Vec<f32>> {
    let bins = mask.len();
    let frames = mask.first().map_or(0, |r| r.len());

    let time_smoothed: Vec<Vec<f32>> = mask
        .iter()
        .map(|row| convolve_same(row, time_kernel))
        .collect();

    let mut out = vec![vec![0.0f32; frames]; bins];
    for t in 0..frames {
        let column: Vec<f32> = time_smoothed.iter().map(|row| row[t]).collect();
        for (k, v) in convolve_same(&column, freq_kernel).into_iter().enumerate() {
            out[k][t] = v;
        }
    }
    out
}
