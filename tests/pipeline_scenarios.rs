use std::io::Cursor;
use std::sync::Arc;

use breath_clean::audio_clean::broadband::BroadbandSuppressor;
use breath_clean::audio_clean::spectral::SpectralSubtractor;
use breath_clean::config::SpectralSettings;
use breath_clean::{
    AudioFormat, Pipeline, PipelineConfig, ProcessingError, ProcessingOptions, Stage,
};

const RATE: u32 = 22050;

/// Uniform white noise, deterministic per seed.
fn noise(len: usize, amplitude: f32, seed: u32) -> Vec<f32> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            amplitude * ((state as f32 / u32::MAX as f32) * 2.0 - 1.0)
        })
        .collect()
}

/// 2 s clip: 0.5 s of noise alone, then a 440 Hz tone in the same noise at ~5 dB SNR.
fn noisy_tone() -> Vec<f32> {
    let total = RATE as usize * 2;
    let lead_in = RATE as usize / 2;
    // Uniform noise of amplitude a has variance a^2 / 3; tone power is 0.125
    let amplitude = (3.0f32 * 0.125 / 10f32.powf(0.5)).sqrt();
    let mut samples = noise(total, amplitude, 0x5eed_1234);
    for (i, s) in samples.iter_mut().enumerate().skip(lead_in) {
        *s += 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / RATE as f32).sin();
    }
    samples
}

fn wav_bytes(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer
                .write_sample((s.clamp(-1.0, 1.0) * 32767.0) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn wav_options() -> ProcessingOptions {
    ProcessingOptions {
        audio_format: AudioFormat::Wav,
        ..ProcessingOptions::default()
    }
}

#[test]
fn noisy_tone_improves_snr() {
    let bytes = wav_bytes(&noisy_tone(), RATE);
    let output =
        breath_clean::process(&bytes, Some(AudioFormat::Wav), ProcessingOptions::default())
            .unwrap();

    let m = &output.metrics;
    assert!(m.snr_improvement_db > 0.0, "{:?}", m);
    assert!((0.0..=100.0).contains(&m.quality_score), "{:?}", m);
    assert_eq!(m.sample_rate, RATE);
    assert!((m.original_duration_seconds - 2.0).abs() < 1e-3);
    assert_eq!(m.output_format, "wav");
    assert_eq!(m.processing_steps.len(), 7, "{:?}", m.processing_steps);

    // Output is a readable 16-bit mono WAV at the working rate
    let reader = hound::WavReader::new(Cursor::new(&output.wav_bytes)).unwrap();
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.spec().bits_per_sample, 16);
    assert_eq!(reader.spec().sample_rate, RATE);
    assert!(output.waveform.peak() <= 0.95 + 1e-4);
}

#[test]
fn failing_spectral_subtraction_passes_broadband_output_through() {
    let bytes = wav_bytes(&noisy_tone(), RATE);
    let config = PipelineConfig::default();

    // An odd FFT size makes the subtractor fail internally
    let broken = SpectralSubtractor::new(SpectralSettings {
        fft_size: 2047,
        ..SpectralSettings::default()
    });
    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(BroadbandSuppressor::new(config.broadband.clone())),
        Box::new(broken),
    ];
    let with_failure = Pipeline::from_stages(wav_options(), config.clone(), stages);

    let stages: Vec<Box<dyn Stage>> =
        vec![Box::new(BroadbandSuppressor::new(config.broadband.clone()))];
    let broadband_only = Pipeline::from_stages(wav_options(), config.clone(), stages);

    let a = with_failure.process(&bytes, None).unwrap();
    let b = broadband_only.process(&bytes, None).unwrap();
    assert_eq!(a.wav_bytes, b.wav_bytes);
    assert!(!a
        .metrics
        .processing_steps
        .iter()
        .any(|s| s == "Spectral subtraction"));
}

#[test]
fn garbled_input_is_decode_error() {
    // Never contains 0xFF, so no MPEG/ADTS sync word can be found either
    let bytes: Vec<u8> = (0..8192u32).map(|i| (i * 7919 % 251) as u8).collect();
    let result =
        breath_clean::process(&bytes, Some(AudioFormat::Webm), ProcessingOptions::default());
    assert!(
        matches!(result, Err(ProcessingError::Decode(_))),
        "{:?}",
        result.map(|o| o.metrics)
    );
}

#[test]
fn concurrent_runs_share_one_pipeline() {
    let bytes = Arc::new(wav_bytes(&noisy_tone(), RATE));
    let pipeline = Arc::new(Pipeline::new(wav_options(), PipelineConfig::default()));

    let outputs: Vec<Vec<u8>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let bytes = Arc::clone(&bytes);
                let pipeline = Arc::clone(&pipeline);
                scope.spawn(move || pipeline.process(&bytes, None).unwrap().wav_bytes)
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn premium_quality_resamples_to_48k() {
    let bytes = wav_bytes(&noisy_tone(), RATE);
    let options = ProcessingOptions {
        quality_level: breath_clean::QualityLevel::Premium,
        ..wav_options()
    };
    let output = breath_clean::process(&bytes, None, options).unwrap();
    assert_eq!(output.metrics.sample_rate, 48000);
    assert_eq!(output.waveform.sample_rate(), 48000);
}

#[test]
fn custom_stage_list_runs_in_order() {
    let stages: Vec<Box<dyn Stage>> = vec![Box::new(BroadbandSuppressor::new(
        PipelineConfig::default().broadband,
    ))];
    let pipeline = Pipeline::from_stages(wav_options(), PipelineConfig::default(), stages);
    assert_eq!(pipeline.stage_names(), vec!["Primary noise reduction"]);
}
