//! Background noise suppression for short breathing and voice recordings.
//!
//! [`process`] decodes a clip, runs it through the cleaning stages and
//! returns a 16-bit PCM WAV with [`ProcessingMetrics`]. Only undecodable
//! input is an error; a stage that fails internally is skipped.

pub mod analysis;
pub mod audio_clean;
pub mod audio_util;
pub mod config;
pub mod decode;
pub mod error;
pub mod metrics;
pub mod resample;

pub use analysis::{analyze_noise, NoiseAnalysis};
pub use audio_clean::{process, Pipeline, ProcessOutput, Stage, StageContext};
pub use audio_util::Waveform;
pub use config::{AudioFormat, PipelineConfig, ProcessingOptions, QualityLevel, VadAggressiveness};
pub use error::{ConfigError, DecodeError, ProcessingError, StageError};
pub use metrics::ProcessingMetrics;
