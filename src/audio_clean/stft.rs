//! Windowed FFT analysis/synthesis shared by the spectral stages.
//!
//! Conventions:
//! - periodic Hann window of `fft_size` samples, frames every `hop_size`
//! - the signal is zero-padded by `fft_size / 2` on both sides, so frame `t`
//!   is centred on sample `t * hop_size`
//! - frame count is `ceil(len / hop_size) + 1`
//! - synthesis is weighted overlap-add normalized by the summed squared
//!   window, so an unmodified spectrogram reconstructs the input exactly
//!   (up to float rounding) for any `hop_size <= fft_size / 2`

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::error::StageError;

/// Frames x bins complex spectrum.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    pub frames: Vec<Vec<Complex<f32>>>,
    pub bins: usize,
}

impl Spectrogram {
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Mean magnitude per bin across all frames.
    pub fn mean_magnitude(&self) -> Vec<f32> {
        self.mean_over_frames(|c| c.norm())
    }

    /// Mean power (squared magnitude) per bin across all frames.
    pub fn mean_power(&self) -> Vec<f32> {
        self.mean_over_frames(|c| c.norm_sqr())
    }

    fn mean_over_frames(&self, f: impl Fn(&Complex<f32>) -> f32) -> Vec<f32> {
        let mut acc = vec![0.0f64; self.bins];
        for frame in &self.frames {
            for (a, c) in acc.iter_mut().zip(frame) {
                *a += f(c) as f64;
            }
        }
        let n = self.frames.len().max(1) as f64;
        acc.into_iter().map(|a| (a / n) as f32).collect()
    }
}

pub struct Stft {
    fft_size: usize,
    hop_size: usize,
    window: Vec<f32>,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
}

impl Stft {
    pub fn new(fft_size: usize, hop_size: usize) -> Result<Self, StageError> {
        if fft_size < 4 || fft_size % 2 != 0 {
            return Err(StageError::Fft(format!("invalid FFT size {}", fft_size)));
        }
        if hop_size == 0 || hop_size > fft_size / 2 {
            return Err(StageError::Fft(format!(
                "hop size {} must be in 1..={}",
                hop_size,
                fft_size / 2
            )));
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);

        let window = (0..fft_size)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / fft_size as f32).cos()))
            .collect();

        Ok(Self {
            fft_size,
            hop_size,
            window,
            forward,
            inverse,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Centre frequency of `bin` in Hz.
    pub fn bin_frequency(&self, bin: usize, sample_rate: u32) -> f32 {
        bin as f32 * sample_rate as f32 / self.fft_size as f32
    }

    fn num_frames(&self, len: usize) -> usize {
        len.div_ceil(self.hop_size) + 1
    }

    pub fn analyze(&self, samples: &[f32]) -> Result<Spectrogram, StageError> {
        if samples.is_empty() {
            return Err(StageError::TooShort { len: 0, min: 1 });
        }

        let pad = self.fft_size / 2;
        let num_frames = self.num_frames(samples.len());
        let mut padded = vec![0.0f32; (num_frames - 1) * self.hop_size + self.fft_size];
        padded[pad..pad + samples.len()].copy_from_slice(samples);

        let mut frames = Vec::with_capacity(num_frames);
        let mut buffer = self.forward.make_input_vec();

        for t in 0..num_frames {
            let start = t * self.hop_size;
            for ((b, s), w) in buffer
                .iter_mut()
                .zip(&padded[start..start + self.fft_size])
                .zip(&self.window)
            {
                *b = s * w;
            }

            let mut spectrum = self.forward.make_output_vec();
            self.forward
                .process(&mut buffer, &mut spectrum)
                .map_err(|e| StageError::Fft(e.to_string()))?;
            frames.push(spectrum);
        }

        Ok(Spectrogram {
            frames,
            bins: self.bins(),
        })
    }

    /// Overlap-add `spectrogram` back into `len` samples.
    pub fn synthesize(
        &self,
        spectrogram: &Spectrogram,
        len: usize,
    ) -> Result<Vec<f32>, StageError> {
        if spectrogram.bins != self.bins() {
            return Err(StageError::Fft(format!(
                "spectrogram has {} bins, expected {}",
                spectrogram.bins,
                self.bins()
            )));
        }

        let pad = self.fft_size / 2;
        let total = (spectrogram.num_frames().saturating_sub(1)) * self.hop_size + self.fft_size;
        let mut output = vec![0.0f32; total];
        let mut window_sum = vec![0.0f32; total];
        let norm = 1.0 / self.fft_size as f32;

        let mut spectrum = self.inverse.make_input_vec();
        let mut time_buffer = self.inverse.make_output_vec();

        for (t, frame) in spectrogram.frames.iter().enumerate() {
            spectrum.copy_from_slice(frame);
            // A real signal has purely real DC and Nyquist bins
            spectrum[0].im = 0.0;
            if let Some(last) = spectrum.last_mut() {
                last.im = 0.0;
            }

            self.inverse
                .process(&mut spectrum, &mut time_buffer)
                .map_err(|e| StageError::Fft(e.to_string()))?;

            let start = t * self.hop_size;
            for (i, sample) in time_buffer.iter().enumerate() {
                output[start + i] += sample * norm * self.window[i];
                window_sum[start + i] += self.window[i] * self.window[i];
            }
        }

        let mut samples: Vec<f32> = output
            .iter()
            .zip(&window_sum)
            .skip(pad)
            .take(len)
            .map(|(&o, &w)| if w > 1e-6 { o / w } else { 0.0 })
            .collect();
        samples.resize(len, 0.0);
        Ok(samples)
    }
}
