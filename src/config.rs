//! Processing options and stage tunables.
//!
//! Both are plain values: a `Pipeline` takes a snapshot of them when it is
//! built and never reads shared settings while a clip is in flight.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::audio_util::SUPPORTED_SAMPLE_RATES;
use crate::error::ConfigError;

/// Output quality, selects the working sample rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    #[default]
    Standard,
    High,
    Premium,
}

impl QualityLevel {
    pub fn sample_rate(self) -> u32 {
        match self {
            QualityLevel::Standard => 22_050,
            QualityLevel::High => 44_100,
            QualityLevel::Premium => 48_000,
        }
    }
}

impl FromStr for QualityLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(QualityLevel::Standard),
            "high" => Ok(QualityLevel::High),
            "premium" => Ok(QualityLevel::Premium),
            _ => Err(ConfigError::UnknownQuality(s.to_string())),
        }
    }
}

/// Container hint for the decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
    #[default]
    Webm,
    M4a,
}

impl AudioFormat {
    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Webm => "webm",
            AudioFormat::M4a => "m4a",
        }
    }

    /// Recognize a format from a file name's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse().ok())
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wav" => Ok(AudioFormat::Wav),
            "mp3" => Ok(AudioFormat::Mp3),
            "webm" => Ok(AudioFormat::Webm),
            "m4a" => Ok(AudioFormat::M4a),
            _ => Err(ConfigError::UnknownFormat(s.to_string())),
        }
    }
}

/// Voice-activity aggressiveness, 0 (most permissive) to 3 (most aggressive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct VadAggressiveness(u8);

impl VadAggressiveness {
    pub const MAX: u8 = 3;

    pub fn level(self) -> u8 {
        self.0
    }
}

impl Default for VadAggressiveness {
    fn default() -> Self {
        Self(2)
    }
}

impl TryFrom<u8> for VadAggressiveness {
    type Error = ConfigError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        if level <= Self::MAX {
            Ok(Self(level))
        } else {
            Err(ConfigError::InvalidAggressiveness(level))
        }
    }
}

impl From<VadAggressiveness> for u8 {
    fn from(value: VadAggressiveness) -> Self {
        value.0
    }
}

/// Per-request processing options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingOptions {
    pub quality_level: QualityLevel,
    pub audio_format: AudioFormat,
    pub vad_aggressiveness: VadAggressiveness,
    /// Explicit working sample rate, overrides `quality_level` when set
    pub sample_rate: Option<u32>,
}

impl ProcessingOptions {
    pub fn target_sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or_else(|| self.quality_level.sample_rate())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.sample_rate {
            Some(rate) if !SUPPORTED_SAMPLE_RATES.contains(&rate) => {
                Err(ConfigError::UnsupportedSampleRate(rate))
            }
            _ => Ok(()),
        }
    }
}

/// Noise-only excerpt search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NoiseProfileSettings {
    /// Silence threshold below the clip's mean loudness (dB)
    pub margin_db: f32,
    pub min_silence_ms: f32,
    pub padding_ms: f32,
    pub max_profile_ms: f32,
    pub fallback_ms: f32,
    /// Loudness analysis block length
    pub block_ms: f32,
}

impl Default for NoiseProfileSettings {
    fn default() -> Self {
        Self {
            margin_db: 20.0,
            min_silence_ms: 200.0,
            padding_ms: 100.0,
            max_profile_ms: 1000.0,
            fallback_ms: 500.0,
            block_ms: 10.0,
        }
    }
}

/// Algorithm used by the broadband suppressor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BroadbandBackend {
    /// Non-stationary spectral gate
    #[default]
    SpectralGate,
    /// Recurrent denoiser (RNNoise) at 48 kHz
    Rnnoise,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadbandSettings {
    pub backend: BroadbandBackend,
    /// Proportion of estimated noise removed (0-1)
    pub prop_decrease: f32,
    pub fft_size: usize,
    pub hop_size: usize,
    /// Time constant of the running noise-floor estimate
    pub time_constant_s: f32,
    pub threshold_mult: f32,
    pub sigmoid_slope: f32,
    pub freq_smooth_hz: f32,
    pub time_smooth_ms: f32,
}

impl Default for BroadbandSettings {
    fn default() -> Self {
        Self {
            backend: BroadbandBackend::SpectralGate,
            prop_decrease: 0.8,
            fft_size: 1024,
            hop_size: 256,
            time_constant_s: 2.0,
            threshold_mult: 2.0,
            sigmoid_slope: 10.0,
            freq_smooth_hz: 500.0,
            time_smooth_ms: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpectralSettings {
    pub fft_size: usize,
    pub hop_size: usize,
    /// Over-subtraction factor
    pub alpha: f32,
    /// Spectral floor relative to the original magnitude
    pub beta: f32,
}

impl Default for SpectralSettings {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            hop_size: 512,
            alpha: 2.0,
            beta: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BandSettings {
    pub highpass_hz: f64,
    pub lowpass_hz: f64,
    pub notch_hz: Vec<f64>,
    pub notch_q: f64,
}

impl Default for BandSettings {
    fn default() -> Self {
        Self {
            highpass_hz: 20.0,
            lowpass_hz: 8000.0,
            notch_hz: vec![50.0, 60.0],
            notch_q: 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VadSettings {
    pub frame_ms: u32,
    /// Gain applied to frames classified as non-speech
    pub non_speech_gain: f32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            frame_ms: 30,
            non_speech_gain: 0.1,
        }
    }
}

/// Where the Wiener stage takes its per-bin noise power from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WienerNoiseModel {
    /// `noise_power_ratio` times the signal power of each bin
    #[default]
    FixedRatio,
    /// Power spectrum of the estimated noise profile
    NoiseProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WienerSettings {
    pub fft_size: usize,
    pub hop_size: usize,
    pub noise_power_ratio: f32,
    pub noise_model: WienerNoiseModel,
}

impl Default for WienerSettings {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            hop_size: 512,
            noise_power_ratio: 0.1,
            noise_model: WienerNoiseModel::FixedRatio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NormalizeSettings {
    pub target_rms: f32,
    pub peak_ceiling: f32,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        Self {
            target_rms: 0.1,
            peak_ceiling: 0.95,
        }
    }
}

/// Tunables for every pipeline stage. Missing fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub noise_profile: NoiseProfileSettings,
    pub broadband: BroadbandSettings,
    pub spectral: SpectralSettings,
    pub band: BandSettings,
    pub vad: VadSettings,
    pub wiener: WienerSettings,
    pub normalize: NormalizeSettings,
}

impl PipelineConfig {
    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Read a JSON config file, using defaults if it is missing or malformed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!(
                    "Failed to load config from {}, using defaults: {}",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_sample_rates() {
        assert_eq!(QualityLevel::Standard.sample_rate(), 22050);
        assert_eq!(QualityLevel::High.sample_rate(), 44100);
        assert_eq!(QualityLevel::Premium.sample_rate(), 48000);
    }

    #[test]
    fn test_options_from_json() {
        let json = r#"{"qualityLevel":"premium","audioFormat":"m4a","vadAggressiveness":3}"#;
        let options: ProcessingOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.quality_level, QualityLevel::Premium);
        assert_eq!(options.audio_format, AudioFormat::M4a);
        assert_eq!(options.vad_aggressiveness.level(), 3);
        assert_eq!(options.target_sample_rate(), 48000);
    }

    #[test]
    fn test_options_defaults() {
        let options: ProcessingOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.audio_format, AudioFormat::Webm);
        assert_eq!(options.vad_aggressiveness.level(), 2);
        assert_eq!(options.target_sample_rate(), 22050);
    }

    #[test]
    fn test_aggressiveness_out_of_range() {
        let json = r#"{"vadAggressiveness":4}"#;
        assert!(serde_json::from_str::<ProcessingOptions>(json).is_err());
        assert!(VadAggressiveness::try_from(4).is_err());
    }

    #[test]
    fn test_sample_rate_override() {
        let options = ProcessingOptions {
            sample_rate: Some(16000),
            ..ProcessingOptions::default()
        };
        assert!(options.validate().is_ok());
        assert_eq!(options.target_sample_rate(), 16000);

        let bad = ProcessingOptions {
            sample_rate: Some(11025),
            ..ProcessingOptions::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::UnsupportedSampleRate(11025))
        ));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("MP3".parse::<AudioFormat>().unwrap(), AudioFormat::Mp3);
        assert!("flac".parse::<AudioFormat>().is_err());
        assert_eq!(
            AudioFormat::from_path(Path::new("breath.wav")),
            Some(AudioFormat::Wav)
        );
        assert_eq!(AudioFormat::from_path(Path::new("breath.ogg")), None);
    }

    #[test]
    fn test_partial_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"spectral":{"alpha":1.5},"vad":{"nonSpeechGain":0.2}}"#).unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.spectral.alpha, 1.5);
        assert_eq!(config.spectral.fft_size, 2048);
        assert_eq!(config.vad.non_speech_gain, 0.2);
        assert_eq!(config.normalize, NormalizeSettings::default());
    }

    #[test]
    fn test_malformed_config_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(PipelineConfig::load(&path).is_err());
        assert_eq!(PipelineConfig::load_or_default(&path), PipelineConfig::default());
        assert_eq!(
            PipelineConfig::load_or_default(&dir.path().join("missing.json")),
            PipelineConfig::default()
        );
    }
}
