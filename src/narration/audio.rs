//! PCM handling for narration: decode service clips, resample to the job's
//! rate, stitch with silences, write WAV.
//!
//! ```text
//! clip parts (mp3/wav) → symphonia decode → mono f32 → rubato → target rate
//!                                                                  │
//!            [clip 1] ─ 600 ms ─ [clip 2] ─ 600 ms ─ [clip 3] ◀───┘ → hound 16-bit WAV
//! ```

use crate::error::SynthesisError;
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Silence inserted between consecutive clips.
pub const GAP_MS: u32 = 600;

/// Mono PCM at a known rate.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PcmAudio {
    /// Playback length derived from the sample count.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Offset and length of one clip inside a stitched track, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipSpan {
    pub start_secs: f64,
    pub duration_secs: f64,
}

/// Decode one encoded clip (MP3 or WAV) to mono samples at `target_rate`.
pub fn decode_clip(data: &[u8], target_rate: u32) -> Result<Vec<f32>, SynthesisError> {
    let (samples, source_rate) = decode_mono(data)?;
    if source_rate == target_rate {
        return Ok(samples);
    }
    resample(&samples, source_rate, target_rate)
}

fn decode_mono(data: &[u8]) -> Result<(Vec<f32>, u32), SynthesisError> {
    let cursor = Cursor::new(data.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if data.starts_with(b"RIFF") {
        hint.with_extension("wav");
    } else {
        hint.with_extension("mp3");
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| SynthesisError::AudioDecode(format!("probe failed: {e}")))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| SynthesisError::AudioDecode("no audio track found".into()))?;
    let codec_params = track.codec_params.clone();
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| SynthesisError::AudioDecode(format!("codec init failed: {e}")))?;

    let mut source_rate = codec_params.sample_rate;
    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(SynthesisError::AudioDecode(format!("packet read: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            // A corrupt frame costs a few milliseconds of audio, not the clip.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(SynthesisError::AudioDecode(format!("decode: {e}"))),
        };

        let spec = *decoded.spec();
        source_rate.get_or_insert(spec.rate);
        let channels = spec.channels.count().max(1);

        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        if channels > 1 {
            samples.extend(
                buf.samples()
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        } else {
            samples.extend_from_slice(buf.samples());
        }
    }

    if samples.is_empty() {
        return Err(SynthesisError::AudioDecode("no audio samples decoded".into()));
    }
    let rate = source_rate
        .ok_or_else(|| SynthesisError::AudioDecode("clip has no sample rate".into()))?;
    Ok((samples, rate))
}

/// Resample mono audio from `from_rate` to `to_rate`.
///
/// The output length is exactly `len × to_rate / from_rate` (rounded), with
/// the resampler's delay removed.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, SynthesisError> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let chunk_size = 1024;
    let expected = (samples.len() as f64 * ratio).round() as usize;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, 1)
        .map_err(|e| SynthesisError::AudioDecode(format!("resampler init: {e}")))?;
    let delay = resampler.output_delay();

    let mut output = Vec::with_capacity(expected + delay + chunk_size);
    let silence = vec![0.0f32; chunk_size];
    let mut chunks = samples.chunks(chunk_size).map(|c| c.to_vec()).collect::<Vec<_>>();
    // Flush the filter's tail through with one extra chunk of silence.
    chunks.push(silence);

    for mut chunk in chunks {
        chunk.resize(chunk_size, 0.0);
        let resampled = resampler
            .process(&[chunk], None)
            .map_err(|e| SynthesisError::AudioDecode(format!("resample: {e}")))?;
        if let Some(channel) = resampled.into_iter().next() {
            output.extend(channel);
        }
    }

    let mut trimmed: Vec<f32> = output.into_iter().skip(delay).take(expected).collect();
    trimmed.resize(expected, 0.0);
    Ok(trimmed)
}

/// Concatenate clips in order with [`GAP_MS`] of silence between each pair.
///
/// Returns the track and where each clip landed in it.
pub fn stitch(clips: &[Vec<f32>], sample_rate: u32) -> (PcmAudio, Vec<ClipSpan>) {
    let gap = (u64::from(sample_rate) * u64::from(GAP_MS) / 1000) as usize;
    let total: usize = clips.iter().map(Vec::len).sum::<usize>() + gap * clips.len().saturating_sub(1);
    let rate = f64::from(sample_rate);

    let mut samples = Vec::with_capacity(total);
    let mut spans = Vec::with_capacity(clips.len());
    for (i, clip) in clips.iter().enumerate() {
        if i > 0 {
            samples.resize(samples.len() + gap, 0.0);
        }
        spans.push(ClipSpan {
            start_secs: samples.len() as f64 / rate,
            duration_secs: clip.len() as f64 / rate,
        });
        samples.extend_from_slice(clip);
    }

    (
        PcmAudio {
            samples,
            sample_rate,
        },
        spans,
    )
}

fn pcm16_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn write_pcm16<W: std::io::Write + std::io::Seek>(
    mut writer: hound::WavWriter<W>,
    samples: &[f32],
) -> Result<(), hound::Error> {
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16)?;
    }
    writer.finalize()
}

/// Write mono 16-bit PCM WAV.
pub fn write_wav(path: &Path, audio: &PcmAudio) -> Result<(), hound::Error> {
    let writer = hound::WavWriter::create(path, pcm16_spec(audio.sample_rate))?;
    write_pcm16(writer, &audio.samples)
}

/// Encode mono PCM as an in-memory WAV file.
pub fn wav_bytes(audio: &PcmAudio) -> Result<Vec<u8>, hound::Error> {
    let mut cursor = Cursor::new(Vec::new());
    let writer = hound::WavWriter::new(&mut cursor, pcm16_spec(audio.sample_rate))?;
    write_pcm16(writer, &audio.samples)?;
    Ok(cursor.into_inner())
}
