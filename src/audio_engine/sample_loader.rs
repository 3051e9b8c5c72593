//! Audio decoding functionality.
//!
//! This module turns raw container bytes (default assets, uploads, recordings) into
//! [`DecodedBuffer`]s matching the output stage's channel count and sample rate.
//!
//! Two decoders are provided. [`decode_bytes_to_buffer`] is the primary path used to fill the
//! decode cache and rejects anything it cannot decode cleanly. [`decode_file_lenient`] backs the
//! fallback player: it accepts partial or unusual streams and only fails when nothing at all can
//! be recovered.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::{
    audio::SampleBuffer as SymphoniaSampleBuffer,
    codecs::{CodecParameters, Decoder, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::{MediaSource, MediaSourceStream},
    meta::MetadataOptions,
    probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};

use crate::audio_engine::channels::{map_channels, remap_channels_lenient};
use crate::audio_engine::constants::RESAMPLER_SINC_LEN;
use crate::audio_engine::errors::SampleLoadError;
use crate::messages::DecodedBuffer;

/// Channel count and sample rate every cached clip is converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub channels: usize,
    pub sample_rate: u32,
}

/// Decodes in-memory audio bytes into a buffer matching `format`.
///
/// # Parameters
///
/// - `bytes`: Complete contents of an audio container (mp3, wav, ogg, ...)
/// - `hint`: Optional file extension used to speed up format probing
/// - `format`: Output channel count and sample rate
///
/// # Errors
///
/// Any problem is an error: an unknown container, a missing sample rate or channel layout,
/// a single undecodable packet, or a channel layout other than mono/stereo.
pub fn decode_bytes_to_buffer(
    bytes: Vec<u8>,
    hint: Option<&str>,
    format: OutputFormat,
) -> Result<DecodedBuffer, SampleLoadError> {
    if bytes.is_empty() {
        return Err(SampleLoadError::EmptySource);
    }

    let mut reader = probe(Box::new(Cursor::new(bytes)), hint)?;

    let track = reader
        .default_track()
        .ok_or(SampleLoadError::NoDefaultTrack)?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let file_rate_hz = codec_params
        .sample_rate
        .ok_or(SampleLoadError::MissingSampleRate)?;
    let file_channels = codec_params
        .channels
        .ok_or(SampleLoadError::MissingChannels)?
        .count();

    let mut decoder = make_decoder(&codec_params)?;

    let mut decoded: Vec<f32> = Vec::new();
    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(err) => return Err(SampleLoadError::Decode(err)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let audio_buf = decoder.decode(&packet)?;
        let spec = *audio_buf.spec();
        let duration = audio_buf.capacity() as u64;

        let mut sample_buf = SymphoniaSampleBuffer::<f32>::new(duration, spec);
        sample_buf.copy_interleaved_ref(audio_buf);
        decoded.extend_from_slice(sample_buf.samples());
    }

    if decoded.is_empty() {
        return Err(SampleLoadError::NoAudio);
    }

    let resampled = resample(decoded, file_channels, file_rate_hz, format.sample_rate)?;
    let mapped = map_channels(resampled, file_channels, format.channels)?;

    Ok(DecodedBuffer::new(
        format.channels,
        format.sample_rate,
        mapped,
    ))
}

/// Decodes an audio file as far as possible.
///
/// Undecodable packets are skipped, a truncated stream keeps what was decoded before the
/// truncation, missing stream parameters are taken from the decoded frames, and any channel
/// layout is folded onto the output layout.
pub fn decode_file_lenient(
    path: &Path,
    format: OutputFormat,
) -> Result<DecodedBuffer, SampleLoadError> {
    let file = File::open(path)?;
    let hint = path.extension().and_then(|e| e.to_str());
    let mut reader = probe(Box::new(file), hint)?;

    let track = reader
        .default_track()
        .ok_or(SampleLoadError::NoDefaultTrack)?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = make_decoder(&codec_params)?;

    let mut stream_rate = codec_params.sample_rate;
    let mut stream_channels = codec_params.channels.map(|c| c.count());
    let mut decoded: Vec<f32> = Vec::new();

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::ResetRequired) => break,
            Err(err) if !decoded.is_empty() => {
                log::debug!("Stopping lenient decode early: {err}");
                break;
            }
            Err(err) => return Err(SampleLoadError::Decode(err)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let audio_buf = match decoder.decode(&packet) {
            Ok(buf) => buf,
            Err(SymphoniaError::DecodeError(msg)) => {
                log::debug!("Skipping undecodable packet: {msg}");
                continue;
            }
            Err(SymphoniaError::IoError(err)) => {
                log::debug!("Skipping unreadable packet: {err}");
                continue;
            }
            Err(err) => return Err(SampleLoadError::Decode(err)),
        };

        let spec = *audio_buf.spec();
        stream_rate.get_or_insert(spec.rate);
        stream_channels.get_or_insert(spec.channels.count());

        let duration = audio_buf.capacity() as u64;
        let mut sample_buf = SymphoniaSampleBuffer::<f32>::new(duration, spec);
        sample_buf.copy_interleaved_ref(audio_buf);
        decoded.extend_from_slice(sample_buf.samples());
    }

    let (Some(file_rate_hz), Some(file_channels)) = (stream_rate, stream_channels) else {
        return Err(SampleLoadError::NoAudio);
    };
    if decoded.is_empty() || file_channels == 0 {
        return Err(SampleLoadError::NoAudio);
    }

    let resampled = resample(decoded, file_channels, file_rate_hz, format.sample_rate)?;
    let mapped = remap_channels_lenient(resampled, file_channels, format.channels);
    if mapped.is_empty() {
        return Err(SampleLoadError::NoAudio);
    }

    Ok(DecodedBuffer::new(
        format.channels,
        format.sample_rate,
        mapped,
    ))
}

/// Extension of a file name or URL path, used as a probing hint.
pub fn extension_hint(name: &str) -> Option<&str> {
    let path = name.split(['?', '#']).next().unwrap_or(name);
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
}

fn probe(
    source: Box<dyn MediaSource>,
    extension: Option<&str>,
) -> Result<Box<dyn FormatReader>, SampleLoadError> {
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    Ok(probed.format)
}

fn make_decoder(codec_params: &CodecParameters) -> Result<Box<dyn Decoder>, SampleLoadError> {
    Ok(get_codecs().make(codec_params, &DecoderOptions::default())?)
}

/// Converts interleaved samples from `from_hz` to `to_hz`.
///
/// The whole clip is processed as a single chunk, which suits short sound effects. The output
/// is aligned with the input and has the length the rate change implies.
pub fn resample(
    samples: Vec<f32>,
    channels: usize,
    from_hz: u32,
    to_hz: u32,
) -> Result<Vec<f32>, SampleLoadError> {
    if from_hz == to_hz || channels == 0 || samples.len() < channels {
        return Ok(samples);
    }

    let ratio = to_hz as f64 / from_hz as f64;
    let frames = samples.len() / channels;
    // Trailing silence lets the filter flush the end of the clip.
    let padded = frames + RESAMPLER_SINC_LEN;
    let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(padded); channels];
    for frame in samples.chunks_exact(channels) {
        for (channel, s) in planar.iter_mut().zip(frame) {
            channel.push(*s);
        }
    }
    for channel in &mut planar {
        channel.resize(padded, 0.0);
    }

    let params = SincInterpolationParameters {
        sinc_len: RESAMPLER_SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, padded, channels)?;
    let delay = resampler.output_delay();
    let waves_out = resampler.process(&planar, None)?;

    let available = waves_out.iter().map(Vec::len).min().unwrap_or(0);
    let wanted = (frames as f64 * ratio).round() as usize;
    let end = (delay + wanted).min(available);
    let begin = delay.min(end);

    let mut out = Vec::with_capacity((end - begin) * channels);
    for frame in begin..end {
        for channel in &waves_out {
            out.push(channel[frame]);
        }
    }
    Ok(out)
}
