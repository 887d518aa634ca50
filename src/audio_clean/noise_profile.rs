//! Locate a noise-only excerpt of a clip.
//!
//! Loudness is measured over short blocks. Blocks quieter than the clip's
//! mean loudness minus a margin are silent; the first run of silent blocks
//! lasting at least `min_silence_ms`, widened by `padding_ms` on each side
//! and cut to `max_profile_ms`, is the profile. Without such a run the
//! leading `min(fallback_ms, len / 4)` samples are used instead.

use crate::audio_util::{rms, Waveform};
use crate::config::NoiseProfileSettings;

/// How the profile was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSource {
    SilentRegion,
    LeadingFallback,
}

/// Excerpt of a clip believed to hold only background noise.
#[derive(Debug, Clone)]
pub struct NoiseProfile {
    pub excerpt: Waveform,
    /// Offset of the excerpt in the source clip, in samples
    pub start: usize,
    pub source: ProfileSource,
}

impl NoiseProfile {
    pub fn sample_rate(&self) -> u32 {
        self.excerpt.sample_rate()
    }
}

pub struct NoiseProfileEstimator {
    settings: NoiseProfileSettings,
}

impl NoiseProfileEstimator {
    pub fn new(settings: NoiseProfileSettings) -> Self {
        Self { settings }
    }

    /// Never fails: a non-empty input always yields a non-empty profile.
    pub fn estimate(&self, waveform: &Waveform) -> NoiseProfile {
        match self.find_silent_region(waveform) {
            Some((start, end)) => {
                log::debug!(
                    "Noise profile from silent region {:.3}s..{:.3}s",
                    start as f64 / waveform.sample_rate() as f64,
                    end as f64 / waveform.sample_rate() as f64
                );
                self.excerpt(waveform, start, end, ProfileSource::SilentRegion)
            }
            None => {
                let len = self.fallback_len(waveform).clamp(1, waveform.len());
                log::debug!("No silent region found, using leading {} samples", len);
                self.excerpt(waveform, 0, len, ProfileSource::LeadingFallback)
            }
        }
    }

    fn fallback_len(&self, waveform: &Waveform) -> usize {
        waveform
            .samples_for_ms(self.settings.fallback_ms)
            .min(waveform.len() / 4)
    }

    fn excerpt(
        &self,
        waveform: &Waveform,
        start: usize,
        end: usize,
        source: ProfileSource,
    ) -> NoiseProfile {
        let samples = waveform.samples()[start..end].to_vec();
        match Waveform::new(samples, waveform.sample_rate()) {
            Ok(excerpt) => NoiseProfile {
                excerpt,
                start,
                source,
            },
            // start < end within a valid waveform, so this only guards the type
            Err(_) => NoiseProfile {
                excerpt: waveform.clone(),
                start: 0,
                source: ProfileSource::LeadingFallback,
            },
        }
    }

    /// Sample range of the first qualifying silent run, padded and truncated.
    fn find_silent_region(&self, waveform: &Waveform) -> Option<(usize, usize)> {
        let samples = waveform.samples();
        let mean_db = to_db(rms(samples));
        if !mean_db.is_finite() {
            // All-zero clip: nothing is quieter than the mean
            return None;
        }
        let threshold_db = mean_db - self.settings.margin_db;

        let block = waveform.samples_for_ms(self.settings.block_ms).max(1);
        let min_len = waveform.samples_for_ms(self.settings.min_silence_ms).max(1);

        let mut run_start: Option<usize> = None;
        let mut region = None;

        for (i, chunk) in samples.chunks(block).enumerate() {
            let pos = i * block;
            if to_db(rms(chunk)) < threshold_db {
                if run_start.is_none() {
                    run_start = Some(pos);
                }
            } else if let Some(start) = run_start.take() {
                if pos - start >= min_len {
                    region = Some((start, pos));
                    break;
                }
            }
        }
        if region.is_none() {
            if let Some(start) = run_start {
                if samples.len() - start >= min_len {
                    region = Some((start, samples.len()));
                }
            }
        }

        let (start, end) = region?;
        let padding = waveform.samples_for_ms(self.settings.padding_ms);
        let max_len = waveform.samples_for_ms(self.settings.max_profile_ms).max(1);

        let start = start.saturating_sub(padding);
        let end = (end + padding).min(samples.len()).min(start + max_len);
        Some((start, end))
    }
}

fn to_db(level: f32) -> f32 {
    20.0 * level.log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 22050;

    fn tone(amplitude: f32, secs: f32) -> Vec<f32> {
        let n = (RATE as f32 * secs) as usize;
        (0..n)
            .map(|i| {
                amplitude * (2.0 * std::f32::consts::PI * 330.0 * i as f32 / RATE as f32).sin()
            })
            .collect()
    }

    fn estimator() -> NoiseProfileEstimator {
        NoiseProfileEstimator::new(NoiseProfileSettings::default())
    }

    #[test]
    fn test_finds_quiet_gap_with_padding() {
        let mut samples = tone(0.8, 0.5);
        samples.extend(tone(0.001, 0.5));
        samples.extend(tone(0.8, 1.0));
        let wf = Waveform::new(samples, RATE).unwrap();

        let profile = estimator().estimate(&wf);
        assert_eq!(profile.source, ProfileSource::SilentRegion);

        // Gap is 0.5s..1.0s, widened by 100 ms each side
        let expected_start = (0.4 * RATE as f32) as i64;
        assert!((profile.start as i64 - expected_start).abs() <= 221);
        let secs = profile.excerpt.duration_secs();
        assert!((secs - 0.7).abs() < 0.02, "profile lasted {}s", secs);
    }

    #[test]
    fn test_profile_truncated_to_one_second() {
        let mut samples = tone(0.8, 0.5);
        samples.extend(tone(0.0005, 2.5));
        samples.extend(tone(0.8, 0.5));
        let wf = Waveform::new(samples, RATE).unwrap();

        let profile = estimator().estimate(&wf);
        assert_eq!(profile.source, ProfileSource::SilentRegion);
        assert_eq!(profile.excerpt.len(), RATE as usize);
    }

    #[test]
    fn test_short_gap_ignored() {
        let mut samples = tone(0.8, 0.5);
        samples.extend(tone(0.001, 0.1));
        samples.extend(tone(0.8, 0.5));
        let wf = Waveform::new(samples, RATE).unwrap();

        let profile = estimator().estimate(&wf);
        assert_eq!(profile.source, ProfileSource::LeadingFallback);
    }

    #[test]
    fn test_fallback_half_second() {
        let wf = Waveform::new(tone(0.5, 4.0), RATE).unwrap();
        let profile = estimator().estimate(&wf);
        assert_eq!(profile.source, ProfileSource::LeadingFallback);
        assert_eq!(profile.start, 0);
        assert_eq!(profile.excerpt.len(), RATE as usize / 2);
    }

    #[test]
    fn test_fallback_quarter_of_short_clip() {
        let wf = Waveform::new(tone(0.5, 1.0), RATE).unwrap();
        let profile = estimator().estimate(&wf);
        assert_eq!(profile.excerpt.len(), RATE as usize / 4);
    }

    #[test]
    fn test_never_empty() {
        for len in [1usize, 2, 3, 7, 100, 5000] {
            let wf = Waveform::new(vec![0.3; len], RATE).unwrap();
            let profile = estimator().estimate(&wf);
            assert!(!profile.excerpt.is_empty());
            assert!(profile.excerpt.len() <= RATE as usize);
            if len >= 4 {
                assert!(profile.excerpt.len() <= len / 4);
            }
        }

        let silent = Waveform::new(vec![0.0; 8000], RATE).unwrap();
        let profile = estimator().estimate(&silent);
        assert_eq!(profile.source, ProfileSource::LeadingFallback);
        assert_eq!(profile.excerpt.len(), 2000);
    }
}
