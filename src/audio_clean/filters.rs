//! IIR band isolation: high-pass, low-pass and mains notches
//!
//! High- and low-pass are 4th-order Butterworth, built as two cascaded
//! biquad sections each. Notches remove 50 Hz and 60 Hz hum.

use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Type};
use realfft::num_complex::Complex;

use super::pipeline::{Stage, StageContext};
use crate::audio_util::Waveform;
use crate::config::BandSettings;
use crate::error::StageError;

/// Section Q factors of a 4th-order Butterworth: 1 / (2 cos(k pi / 8)), k = 1, 3
const BUTTERWORTH_4_Q: [f64; 2] = [0.541_196_1, 1.306_563];

#[derive(Debug, Clone, Copy)]
enum Section {
    HighPass,
    LowPass,
    Notch,
}

/// A low-pass this close to Nyquist would do nothing but ring.
const LOWPASS_NYQUIST_LIMIT: f64 = 0.95;

pub struct BandIsolationFilter {
    settings: BandSettings,
}

impl BandIsolationFilter {
    pub fn new(settings: BandSettings) -> Self {
        Self { settings }
    }

    /// Biquad cascade for `sample_rate`, in processing order.
    pub fn design(&self, sample_rate: u32) -> Result<Vec<Coefficients<f64>>, StageError> {
        let fs = sample_rate as f64;
        let nyquist = fs / 2.0;
        let s = &self.settings;
        let mut sections = Vec::with_capacity(6);

        if s.highpass_hz > 0.0 && s.highpass_hz < nyquist {
            for q in BUTTERWORTH_4_Q {
                sections.push(coefficients(Section::HighPass, fs, s.highpass_hz, q)?);
            }
        }

        if s.lowpass_hz < LOWPASS_NYQUIST_LIMIT * nyquist {
            for q in BUTTERWORTH_4_Q {
                sections.push(coefficients(Section::LowPass, fs, s.lowpass_hz, q)?);
            }
        } else {
            log::debug!(
                "Skipping {} Hz low-pass at {} Hz sample rate",
                s.lowpass_hz,
                sample_rate
            );
        }

        for &freq in &s.notch_hz {
            // Notches above Nyquist are skipped
            if freq <= 0.0 || freq >= nyquist {
                continue;
            }
            sections.push(coefficients(Section::Notch, fs, freq, s.notch_q)?);
        }

        Ok(sections)
    }

    /// Magnitude response of the whole cascade at `freq`, in dB.
    pub fn response_db(&self, sample_rate: u32, freq: f64) -> Result<f64, StageError> {
        let omega = 2.0 * std::f64::consts::PI * freq / sample_rate as f64;
        let gain: f64 = self
            .design(sample_rate)?
            .iter()
            .map(|c| section_magnitude(c, omega))
            .product();
        Ok(20.0 * gain.max(1e-300).log10())
    }
}

impl Stage for BandIsolationFilter {
    fn name(&self) -> &'static str {
        "Breathing-specific filtering"
    }

    fn apply(&self, input: &Waveform, _ctx: &StageContext<'_>) -> Result<Waveform, StageError> {
        let sections = self.design(input.sample_rate())?;
        let mut samples: Vec<f64> = input.samples().iter().map(|&s| s as f64).collect();

        for coeffs in sections {
            let mut filter = DirectForm1::<f64>::new(coeffs);
            for sample in samples.iter_mut() {
                *sample = filter.run(*sample);
            }
        }

        Waveform::new(
            samples.into_iter().map(|s| s as f32).collect(),
            input.sample_rate(),
        )
    }
}

fn coefficients(
    section: Section,
    fs: f64,
    f0: f64,
    q: f64,
) -> Result<Coefficients<f64>, StageError> {
    let filter = match section {
        Section::HighPass => Type::HighPass,
        Section::LowPass => Type::LowPass,
        Section::Notch => Type::Notch,
    };
    Coefficients::<f64>::from_params(filter, fs.hz(), f0.hz(), q).map_err(|e| {
        StageError::FilterDesign(format!("{:?} at {} Hz: {:?}", section, f0, e))
    })
}

/// |H(e^jw)| of one normalized biquad section.
fn section_magnitude(c: &Coefficients<f64>, omega: f64) -> f64 {
    let z1 = Complex::from_polar(1.0, -omega);
    let z2 = z1 * z1;
    let num = Complex::new(c.b0, 0.0) + z1 * c.b1 + z2 * c.b2;
    let den = Complex::new(1.0, 0.0) + z1 * c.a1 + z2 * c.a2;
    num.norm() / den.norm()
}
