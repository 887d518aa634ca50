use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::StageError;

/// Sample rates a waveform may carry.
pub const SUPPORTED_SAMPLE_RATES: [u32; 4] = [16_000, 22_050, 44_100, 48_000];

/// Full-scale value used when quantizing to 16-bit PCM.
pub(crate) const PCM16_SCALE: f32 = 32767.0;

/// Mono PCM samples in [-1, 1] tagged with their sample rate.
///
/// Always non-empty and finite. Stages never mutate a waveform they were
/// handed; they build a new one so the input stays available as a fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self, StageError> {
        if samples.is_empty() {
            return Err(StageError::InvalidWaveform("no samples"));
        }
        if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return Err(StageError::InvalidWaveform("unsupported sample rate"));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(StageError::InvalidWaveform("non-finite samples"));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Number of samples covering `ms` milliseconds at this waveform's rate.
    pub fn samples_for_ms(&self, ms: f32) -> usize {
        (ms as f64 * self.sample_rate as f64 / 1000.0) as usize
    }

    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Population standard deviation of the samples.
    pub fn std_dev(&self) -> f64 {
        let n = self.samples.len() as f64;
        let mean = self.samples.iter().map(|&s| s as f64).sum::<f64>() / n;
        let var = self
            .samples
            .iter()
            .map(|&s| {
                let d = s as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        var.sqrt()
    }
}

/// Root-mean-square of a sample slice (0 for an empty slice).
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Encode a waveform as a 16-bit PCM mono WAV file held in memory.
pub fn encode_wav_pcm16(waveform: &Waveform) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: waveform.sample_rate(),
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + waveform.len() * 2));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &sample in waveform.samples() {
            writer.write_sample((sample.clamp(-1.0, 1.0) * PCM16_SCALE) as i16)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}
