//! Noise analysis without processing
//!
//! Reports levels of the noise profile and of the whole clip, the dominant
//! frequency of a Welch power spectrum, the likely mains frequency and which
//! processing steps look worthwhile.

use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};

use crate::audio_clean::noise_profile::NoiseProfileEstimator;
use crate::audio_util::Waveform;
use crate::config::{AudioFormat, PipelineConfig, ProcessingOptions};
use crate::decode::decode;
use crate::error::DecodeError;

const WELCH_SEGMENT: usize = 1024;
const MAINS_FFT_SIZE: usize = 8192;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedProcessing {
    pub noise_reduction_needed: bool,
    pub spectral_filtering_recommended: bool,
    pub voice_activity_detection_recommended: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoiseAnalysis {
    pub audio_duration_seconds: f64,
    pub sample_rate: u32,
    pub noise_level_db: f64,
    pub signal_level_db: f64,
    pub estimated_snr_db: f64,
    pub dominant_frequency_hz: f64,
    pub mains_frequency_hz: f32,
    pub recommended_processing: RecommendedProcessing,
}

/// Decode `bytes` and describe its noise without changing it.
pub fn analyze_noise(
    bytes: &[u8],
    format_hint: Option<AudioFormat>,
    options: &ProcessingOptions,
    config: &PipelineConfig,
) -> Result<NoiseAnalysis, DecodeError> {
    let format = format_hint.unwrap_or(options.audio_format);
    let waveform = decode(bytes, format, options.target_sample_rate())?;
    Ok(analyze_waveform(&waveform, config))
}

pub fn analyze_waveform(waveform: &Waveform, config: &PipelineConfig) -> NoiseAnalysis {
    let profile = NoiseProfileEstimator::new(config.noise_profile.clone()).estimate(waveform);

    let noise_level_db = level_db(profile.excerpt.std_dev());
    let signal_level_db = level_db(waveform.std_dev());
    let estimated_snr_db = signal_level_db - noise_level_db;
    let dominant_frequency_hz = dominant_frequency(waveform.samples(), waveform.sample_rate());
    let mains_frequency_hz =
        detect_mains_frequency(waveform.samples(), waveform.sample_rate() as f32);

    log::debug!(
        "Noise analysis: noise {:.1} dB, signal {:.1} dB, dominant {:.0} Hz, mains {} Hz",
        noise_level_db,
        signal_level_db,
        dominant_frequency_hz,
        mains_frequency_hz
    );

    NoiseAnalysis {
        audio_duration_seconds: waveform.duration_secs(),
        sample_rate: waveform.sample_rate(),
        noise_level_db,
        signal_level_db,
        estimated_snr_db,
        dominant_frequency_hz,
        mains_frequency_hz,
        recommended_processing: RecommendedProcessing {
            noise_reduction_needed: estimated_snr_db < 10.0,
            spectral_filtering_recommended: !(100.0..=8000.0).contains(&dominant_frequency_hz),
            voice_activity_detection_recommended: estimated_snr_db < 5.0,
        },
    }
}

fn level_db(std_dev: f64) -> f64 {
    20.0 * (std_dev + 1e-10).log10()
}

/// Frequency of the strongest bin of a Welch power spectrum.
///
/// Hann-windowed segments of 1024 samples (the whole clip if shorter) with
/// 50% overlap, each mean-removed, averaged in power.
pub fn dominant_frequency(samples: &[f32], sample_rate: u32) -> f64 {
    let seg = WELCH_SEGMENT.min(samples.len());
    if seg < 2 {
        return 0.0;
    }
    let hop = (seg / 2).max(1);

    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(seg);
    let window: Vec<f64> = (0..seg)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / seg as f64).cos()))
        .collect();

    let mut psd = vec![0.0f64; seg / 2 + 1];
    let mut buffer = fft.make_input_vec();
    let mut spectrum = fft.make_output_vec();

    let mut start = 0;
    while start + seg <= samples.len() {
        let segment = &samples[start..start + seg];
        let mean = segment.iter().map(|&s| s as f64).sum::<f64>() / seg as f64;
        for ((b, &s), w) in buffer.iter_mut().zip(segment).zip(&window) {
            *b = (s as f64 - mean) * w;
        }
        if fft.process(&mut buffer, &mut spectrum).is_ok() {
            for (p, c) in psd.iter_mut().zip(&spectrum) {
                *p += c.norm_sqr();
            }
        }
        start += hop;
    }

    let peak_bin = psd
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(i, _)| i);
    peak_bin as f64 * sample_rate as f64 / seg as f64
}

/// Detect whether audio contains 50Hz or 60Hz mains hum
///
/// Compares the energy at the first four harmonics of each candidate.
pub fn detect_mains_frequency(samples: &[f32], sample_rate: f32) -> f32 {
    if samples.len() < MAINS_FFT_SIZE {
        return 60.0; // Default to 60Hz for short clips
    }

    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(MAINS_FFT_SIZE);

    let mut buffer: Vec<f32> = samples[..MAINS_FFT_SIZE].to_vec();
    for (i, sample) in buffer.iter_mut().enumerate() {
        let window =
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / MAINS_FFT_SIZE as f32).cos());
        *sample *= window;
    }

    let mut spectrum = fft.make_output_vec();
    if fft.process(&mut buffer, &mut spectrum).is_err() {
        return 60.0;
    }

    let freq_resolution = sample_rate / MAINS_FFT_SIZE as f32;
    let energy_at = |fundamental: f32| -> f32 {
        (1..=4)
            .map(|h| (fundamental * h as f32 / freq_resolution).round() as usize)
            .filter_map(|bin| spectrum.get(bin))
            .map(|c| c.norm_sqr())
            .sum()
    };

    // 60 Hz unless 50 Hz is clearly stronger
    if energy_at(50.0) > energy_at(60.0) * 1.2 {
        50.0
    } else {
        60.0
    }
}
