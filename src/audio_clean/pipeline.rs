//! Audio cleaning pipeline orchestration
//!
//! Decodes the input, estimates a noise profile, then threads the waveform
//! through every enhancement stage in order. A stage that fails is skipped:
//! its input is passed on unchanged. Only a decode failure aborts a run.

use super::broadband::BroadbandSuppressor;
use super::filters::BandIsolationFilter;
use super::noise_profile::{NoiseProfile, NoiseProfileEstimator};
use super::normalize::Normalizer;
use super::spectral::SpectralSubtractor;
use super::vad::VoiceActivityGate;
use super::wiener::AdaptiveSpectralGain;
use crate::audio_util::{encode_wav_pcm16, Waveform};
use crate::config::{AudioFormat, PipelineConfig, ProcessingOptions};
use crate::decode::decode;
use crate::error::{ProcessingError, StageError};
use crate::metrics::{MetricsCalculator, ProcessingMetrics};

/// Step name reported for the noise profile estimate, which cannot fail.
pub const NOISE_PROFILE_STEP: &str = "Noise profile estimation";

/// Read-only data shared by every stage of one run.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub noise_profile: &'a NoiseProfile,
}

/// One enhancement step. Implementations build a new waveform and leave the
/// input alone, so the caller can fall back to it.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, input: &Waveform, ctx: &StageContext<'_>) -> Result<Waveform, StageError>;
}

/// Result of running one stage through [`apply_or_passthrough`].
pub struct StageOutcome {
    pub waveform: Waveform,
    pub applied: bool,
}

/// Run `stage`, keeping `input` if it fails.
pub fn apply_or_passthrough(
    stage: &dyn Stage,
    input: Waveform,
    ctx: &StageContext<'_>,
) -> StageOutcome {
    match stage.apply(&input, ctx) {
        Ok(waveform) => {
            log::debug!(
                "{}: {} -> {} samples",
                stage.name(),
                input.len(),
                waveform.len()
            );
            StageOutcome {
                waveform,
                applied: true,
            }
        }
        Err(e) => {
            log::warn!("{} failed, passing input through: {}", stage.name(), e);
            StageOutcome {
                waveform: input,
                applied: false,
            }
        }
    }
}

/// Cleaned audio and the metrics describing it.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// 16-bit PCM mono WAV
    pub wav_bytes: Vec<u8>,
    pub waveform: Waveform,
    pub metrics: ProcessingMetrics,
}

/// A configured pipeline. Owns its settings, holds no per-run state and can
/// be shared between threads.
pub struct Pipeline {
    options: ProcessingOptions,
    config: PipelineConfig,
    estimator: NoiseProfileEstimator,
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(options: ProcessingOptions, config: PipelineConfig) -> Self {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(BroadbandSuppressor::new(config.broadband.clone())),
            Box::new(SpectralSubtractor::new(config.spectral.clone())),
            Box::new(BandIsolationFilter::new(config.band.clone())),
            Box::new(VoiceActivityGate::new(
                config.vad.clone(),
                options.vad_aggressiveness,
            )),
            Box::new(AdaptiveSpectralGain::new(config.wiener.clone())),
            Box::new(Normalizer::new(config.normalize.clone())),
        ];
        Self::from_stages(options, config, stages)
    }

    /// Pipeline with a custom stage list, run in the given order.
    pub fn from_stages(
        options: ProcessingOptions,
        config: PipelineConfig,
        stages: Vec<Box<dyn Stage>>,
    ) -> Self {
        let estimator = NoiseProfileEstimator::new(config.noise_profile.clone());
        Self {
            options,
            config,
            estimator,
            stages,
        }
    }

    pub fn options(&self) -> &ProcessingOptions {
        &self.options
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Noise profile the stages of a run on `waveform` would see.
    pub fn noise_profile(&self, waveform: &Waveform) -> NoiseProfile {
        self.estimator.estimate(waveform)
    }

    /// Run every stage on a decoded waveform. Never fails.
    pub fn run(&self, waveform: Waveform) -> Waveform {
        self.run_with_steps(waveform).0
    }

    fn run_with_steps(&self, waveform: Waveform) -> (Waveform, Vec<String>) {
        let profile = self.estimator.estimate(&waveform);
        let ctx = StageContext {
            noise_profile: &profile,
        };

        let mut steps = Vec::with_capacity(self.stages.len() + 1);
        steps.push(NOISE_PROFILE_STEP.to_string());
        let mut current = waveform;
        for stage in &self.stages {
            let outcome = apply_or_passthrough(stage.as_ref(), current, &ctx);
            if outcome.applied {
                steps.push(stage.name().to_string());
            }
            current = outcome.waveform;
        }
        (current, steps)
    }

    /// Decode, clean and re-encode one clip.
    ///
    /// `format_hint` overrides the options' container format. Fails only if
    /// the input cannot be decoded.
    pub fn process(
        &self,
        bytes: &[u8],
        format_hint: Option<AudioFormat>,
    ) -> Result<ProcessOutput, ProcessingError> {
        let format = format_hint.unwrap_or(self.options.audio_format);
        let original = decode(bytes, format, self.options.target_sample_rate())?;
        log::info!(
            "Processing {} samples at {} Hz ({})",
            original.len(),
            original.sample_rate(),
            format
        );

        let (cleaned, steps) = self.run_with_steps(original.clone());
        let metrics = MetricsCalculator::new().calculate(&original, &cleaned, steps);
        let wav_bytes = encode_wav_pcm16(&cleaned)?;

        log::info!(
            "Cleaned clip: {:.1} dB noise reduction, quality {:.0}",
            metrics.noise_reduction_db,
            metrics.quality_score
        );

        Ok(ProcessOutput {
            wav_bytes,
            waveform: cleaned,
            metrics,
        })
    }
}

/// Process one clip with the default stage configuration.
pub fn process(
    bytes: &[u8],
    format_hint: Option<AudioFormat>,
    options: ProcessingOptions,
) -> Result<ProcessOutput, ProcessingError> {
    Pipeline::new(options, PipelineConfig::default()).process(bytes, format_hint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_clean::noise_profile::ProfileSource;

    struct Failing;

    impl Stage for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn apply(
            &self,
            _input: &Waveform,
            _ctx: &StageContext<'_>,
        ) -> Result<Waveform, StageError> {
            Err(StageError::Other("injected".into()))
        }
    }

    struct Halve;

    impl Stage for Halve {
        fn name(&self) -> &'static str {
            "halve"
        }

        fn apply(&self, input: &Waveform, _ctx: &StageContext<'_>) -> Result<Waveform, StageError> {
            Waveform::new(
                input.samples().iter().map(|s| s * 0.5).collect(),
                input.sample_rate(),
            )
        }
    }

    fn waveform() -> Waveform {
        Waveform::new((0..4000).map(|i| (i as f32 * 0.01).sin()).collect(), 16000).unwrap()
    }

    #[test]
    fn test_passthrough_on_failure() {
        let input = waveform();
        let profile = NoiseProfile {
            excerpt: input.clone(),
            start: 0,
            source: ProfileSource::LeadingFallback,
        };
        let ctx = StageContext {
            noise_profile: &profile,
        };

        let outcome = apply_or_passthrough(&Failing, input.clone(), &ctx);
        assert!(!outcome.applied);
        assert_eq!(outcome.waveform, input);

        let outcome = apply_or_passthrough(&Halve, input.clone(), &ctx);
        assert!(outcome.applied);
        assert!((outcome.waveform.peak() - input.peak() * 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_failing_stage_between_others() {
        let stages: Vec<Box<dyn Stage>> = vec![Box::new(Halve), Box::new(Failing), Box::new(Halve)];
        let pipeline =
            Pipeline::from_stages(ProcessingOptions::default(), PipelineConfig::default(), stages);
        let input = waveform();
        let (out, steps) = pipeline.run_with_steps(input.clone());
        assert_eq!(steps, vec![NOISE_PROFILE_STEP, "halve", "halve"]);
        assert!((out.peak() - input.peak() * 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_default_stage_order() {
        let pipeline = Pipeline::new(ProcessingOptions::default(), PipelineConfig::default());
        assert_eq!(
            pipeline.stage_names(),
            vec![
                "Primary noise reduction",
                "Spectral subtraction",
                "Breathing-specific filtering",
                "Voice activity detection",
                "Adaptive Wiener filtering",
                "Audio normalization",
            ]
        );
    }

    #[test]
    fn test_pipeline_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Pipeline>();
    }
}
