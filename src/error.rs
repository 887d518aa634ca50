//! Typed errors for decoding, enhancement stages and the pipeline entry point.

/// Failure to turn input bytes into a usable waveform. Fatal for a run.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("could not read input audio: primary decoder: {primary}; fallback decoder: {fallback}")]
    Unreadable { primary: String, fallback: String },
    #[error("input audio contains no samples")]
    Empty,
    #[error("decoded audio contains non-finite samples")]
    InvalidSamples,
    #[error("unsupported target sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),
    #[error("resampling failed: {0}")]
    Resample(String),
}

/// Internal failure of one enhancement stage.
///
/// Never surfaced to callers of the pipeline: the orchestration logs it and
/// keeps the stage's input.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("input too short: {len} samples, need at least {min}")]
    TooShort { len: usize, min: usize },
    #[error("invalid waveform: {0}")]
    InvalidWaveform(&'static str),
    #[error("filter design failed: {0}")]
    FilterDesign(String),
    #[error("FFT failed: {0}")]
    Fft(String),
    #[error("resampling failed: {0}")]
    Resample(String),
    #[error("{0}")]
    Other(String),
}

/// Error returned by the pipeline entry point.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("failed to encode output WAV: {0}")]
    Encode(#[from] hound::Error),
}

/// Invalid options or configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown audio format '{0}' (expected wav, mp3, webm or m4a)")]
    UnknownFormat(String),
    #[error("unknown quality level '{0}' (expected standard, high or premium)")]
    UnknownQuality(String),
    #[error("VAD aggressiveness must be between 0 and 3, got {0}")]
    InvalidAggressiveness(u8),
    #[error("unsupported sample rate {0} Hz (supported: 16000, 22050, 44100, 48000)")]
    UnsupportedSampleRate(u32),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
