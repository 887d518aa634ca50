//! Audio cleaning pipeline module
//!
//! Multi-stage noise suppression for short breathing and voice clips:
//! 1. Noise profile estimation (silent-region search)
//! 2. Broadband non-stationary suppression (spectral gate or RNNoise)
//! 3. Spectral subtraction against the noise profile
//! 4. Band isolation (IIR high-pass/low-pass, mains notches)
//! 5. Voice activity gate
//! 6. Static Wiener gain
//! 7. Loudness normalization

pub mod broadband;
pub mod filters;
pub mod noise_profile;
pub mod normalize;
pub mod pipeline;
pub mod spectral;
pub mod stft;
pub mod vad;
pub mod wiener;

pub use pipeline::{process, Pipeline, ProcessOutput, Stage, StageContext};
