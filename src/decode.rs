//! Decode compressed or raw audio bytes into a normalized mono waveform.
//!
//! The primary path probes the container with symphonia (hinted by the
//! declared format). Opus tracks, which symphonia demuxes but cannot decode,
//! are handed to libopus. If the primary path fails the bytes are retried as
//! RIFF/WAVE with hound. Channels are downmixed by arithmetic mean, the result
//! is resampled to the target rate and scaled so the peak absolute sample is
//! 1.0.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL, CODEC_TYPE_OPUS};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio_util::{Waveform, SUPPORTED_SAMPLE_RATES};
use crate::config::AudioFormat;
use crate::error::DecodeError;
use crate::resample::resample;

/// libopus always decodes at 48 kHz
const OPUS_SAMPLE_RATE: u32 = 48_000;
/// Longest Opus frame: 120 ms at 48 kHz
const OPUS_MAX_FRAME: usize = 5760;

/// Interleaved PCM as it came out of a container.
#[derive(Debug)]
struct DecodedPcm {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
}

/// Decode `bytes` to a mono waveform at `target_rate`.
pub fn decode(
    bytes: &[u8],
    format: AudioFormat,
    target_rate: u32,
) -> Result<Waveform, DecodeError> {
    decode_with(bytes, format, target_rate, decode_with_symphonia)
}

/// [`decode`] with an explicit primary decoder; hound is always the fallback.
fn decode_with<F>(
    bytes: &[u8],
    format: AudioFormat,
    target_rate: u32,
    primary: F,
) -> Result<Waveform, DecodeError>
where
    F: FnOnce(&[u8], AudioFormat) -> Result<DecodedPcm, String>,
{
    if !SUPPORTED_SAMPLE_RATES.contains(&target_rate) {
        return Err(DecodeError::UnsupportedSampleRate(target_rate));
    }

    let pcm = match primary(bytes, format) {
        Ok(pcm) => pcm,
        Err(primary) => {
            log::warn!("Primary decode failed ({}), retrying as WAV: {}", format, primary);
            decode_with_hound(bytes).map_err(|fallback| {
                log::error!("Fallback decode failed: {}", fallback);
                DecodeError::Unreadable { primary, fallback }
            })?
        }
    };

    if pcm.samples.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mono = downmix(&pcm.samples, pcm.channels);
    let mut mono = resample(&mono, pcm.sample_rate, target_rate).map_err(DecodeError::Resample)?;
    if mono.is_empty() {
        // Too short to survive the rate conversion
        return Err(DecodeError::Empty);
    }
    peak_normalize(&mut mono);

    log::debug!(
        "Decoded {} samples ({} ch @ {} Hz) -> {} mono samples @ {} Hz",
        pcm.samples.len(),
        pcm.channels,
        pcm.sample_rate,
        mono.len(),
        target_rate
    );

    Waveform::new(mono, target_rate).map_err(|_| DecodeError::InvalidSamples)
}

fn decode_with_symphonia(bytes: &[u8], format: AudioFormat) -> Result<DecodedPcm, String> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(format.extension());

    let format_opts = FormatOptions::default();
    let metadata_opts = MetadataOptions::default();
    let decoder_opts = DecoderOptions::default();

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &metadata_opts)
        .map_err(|e| format!("Failed to probe format: {}", e))?;

    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or("No audio tracks found")?;

    let track_id = track.id;

    if track.codec_params.codec == CODEC_TYPE_OPUS {
        let head = track
            .codec_params
            .extra_data
            .as_deref()
            .and_then(OpusHead::parse)
            .unwrap_or(OpusHead {
                channels: track.codec_params.channels.map_or(1, |c| c.count()),
                pre_skip: 0,
            });
        return decode_opus_track(reader.as_mut(), track_id, head);
    }

    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count());

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &decoder_opts)
        .map_err(|e| format!("Failed to create decoder: {}", e))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut decode_errors = 0usize;

    while let Some(packet) = next_track_packet(reader.as_mut(), track_id)? {
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                // Corrupt packets are skipped, the stream may still be usable
                decode_errors += 1;
                log::debug!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(format!("Failed to decode packet: {}", e)),
        };

        let spec = *decoded.spec();
        if sample_rate.is_none() {
            sample_rate = Some(spec.rate);
        }
        if channels.is_none() {
            channels = Some(spec.channels.count());
        }

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() {
        return Err(format!(
            "No audio decoded ({} undecodable packets)",
            decode_errors
        ));
    }

    let sample_rate = sample_rate.ok_or("Unknown sample rate")?;
    let channels = channels.filter(|&c| c > 0).ok_or("Unknown channel count")?;

    Ok(DecodedPcm {
        samples,
        channels,
        sample_rate,
    })
}

/// Next packet belonging to `track_id`, `None` at end of stream.
fn next_track_packet(
    reader: &mut dyn FormatReader,
    track_id: u32,
) -> Result<Option<Packet>, String> {
    loop {
        match reader.next_packet() {
            Ok(packet) if packet.track_id() == track_id => return Ok(Some(packet)),
            Ok(_) => continue,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None)
            }
            Err(SymphoniaError::ResetRequired) => return Ok(None),
            Err(e) => return Err(format!("Failed to read packet: {}", e)),
        }
    }
}

/// Fields of the Opus identification header carried as codec private data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpusHead {
    channels: usize,
    /// Samples per channel at 48 kHz to discard from the start
    pre_skip: usize,
}

impl OpusHead {
    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 19 || &data[..8] != b"OpusHead" {
            return None;
        }
        Some(Self {
            channels: data[9] as usize,
            pre_skip: u16::from_le_bytes([data[10], data[11]]) as usize,
        })
    }
}

/// Packet-by-packet Opus decoding into interleaved 48 kHz PCM.
struct OpusStream {
    decoder: opus::Decoder,
    channels: usize,
    frame: Vec<f32>,
    samples: Vec<f32>,
    skip: usize,
    errors: usize,
}

impl OpusStream {
    fn new(head: OpusHead) -> Result<Self, String> {
        let layout = match head.channels {
            1 => opus::Channels::Mono,
            2 => opus::Channels::Stereo,
            n => return Err(format!("Unsupported Opus channel count: {}", n)),
        };
        let decoder = opus::Decoder::new(OPUS_SAMPLE_RATE, layout)
            .map_err(|e| format!("Failed to create Opus decoder: {}", e))?;

        Ok(Self {
            decoder,
            channels: head.channels,
            frame: vec![0.0; OPUS_MAX_FRAME * head.channels],
            samples: Vec::new(),
            skip: head.pre_skip * head.channels,
            errors: 0,
        })
    }

    fn push(&mut self, packet: &[u8]) {
        match self.decoder.decode_float(packet, &mut self.frame, false) {
            Ok(per_channel) => {
                let decoded = &self.frame[..per_channel * self.channels];
                let dropped = self.skip.min(decoded.len());
                self.skip -= dropped;
                self.samples.extend_from_slice(&decoded[dropped..]);
            }
            Err(e) => {
                self.errors += 1;
                log::debug!("Skipping undecodable Opus packet: {}", e);
            }
        }
    }

    fn finish(self) -> Result<DecodedPcm, String> {
        if self.samples.is_empty() {
            return Err(format!(
                "No Opus audio decoded ({} undecodable packets)",
                self.errors
            ));
        }
        Ok(DecodedPcm {
            samples: self.samples,
            channels: self.channels,
            sample_rate: OPUS_SAMPLE_RATE,
        })
    }
}

fn decode_opus_track(
    reader: &mut dyn FormatReader,
    track_id: u32,
    head: OpusHead,
) -> Result<DecodedPcm, String> {
    let mut stream = OpusStream::new(head)?;
    while let Some(packet) = next_track_packet(reader, track_id)? {
        stream.push(&packet.data);
    }
    stream.finish()
}

fn decode_with_hound(bytes: &[u8]) -> Result<DecodedPcm, String> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| format!("Failed to read WAV header: {}", e))?;
    let spec = reader.spec();

    if spec.channels == 0 {
        return Err("WAV declares zero channels".to_string());
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| format!("Failed to read WAV samples: {}", e))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| format!("Failed to read WAV samples: {}", e))?
        }
    };

    Ok(DecodedPcm {
        samples,
        channels: spec.channels as usize,
        sample_rate: spec.sample_rate,
    })
}

/// Average interleaved channels into one.
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Scale so the loudest sample is at full scale. Silence is left untouched.
fn peak_normalize(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak > 0.0 && peak.is_finite() {
        for sample in samples.iter_mut() {
            *sample /= peak;
        }
    }
}
