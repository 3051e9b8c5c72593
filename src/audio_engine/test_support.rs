//! Fixtures shared by the unit tests.

use std::time::{Duration, Instant};

use crate::audio_engine::AudioEngine;
use crate::messages::EngineEvent;

/// Builds a PCM16 WAV file in memory.
///
/// Mono and stereo use the plain PCM header; wider layouts use the extensible header so the
/// channel mask is explicit.
pub fn pcm16_wav_bytes(channels: u16, sample_rate_hz: u32, samples: &[i16]) -> Vec<u8> {
    let bits_per_sample = 16u16;
    let block_align = channels * (bits_per_sample / 8);
    let byte_rate = sample_rate_hz * u32::from(block_align);
    let data_len_bytes = u32::try_from(samples.len() * 2).expect("sample data too large");
    let extensible = channels > 2;
    let fmt_len: u32 = if extensible { 40 } else { 16 };
    let chunk_size = 4 + (8 + fmt_len) + (8 + data_len_bytes);

    let mut out = Vec::with_capacity(chunk_size as usize + 8);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&chunk_size.to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&fmt_len.to_le_bytes());
    let format_tag: u16 = if extensible { 0xFFFE } else { 1 };
    out.extend_from_slice(&format_tag.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate_hz.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());
    if extensible {
        let channel_mask: u32 = (1u32 << channels) - 1;
        out.extend_from_slice(&22u16.to_le_bytes());
        out.extend_from_slice(&bits_per_sample.to_le_bytes());
        out.extend_from_slice(&channel_mask.to_le_bytes());
        // KSDATAFORMAT_SUBTYPE_PCM
        out.extend_from_slice(&[
            0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38,
            0x9B, 0x71,
        ]);
    }

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len_bytes.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }

    out
}

/// A short mono clip at `sample_rate_hz` with every sample at `value`.
pub fn constant_clip_wav(sample_rate_hz: u32, frames: usize, value: i16) -> Vec<u8> {
    pcm16_wav_bytes(1, sample_rate_hz, &vec![value; frames])
}

/// Drives an offline engine until `done` accepts the collected events or the timeout expires.
///
/// Each round renders a block on the offline stage and then polls for events.
pub fn run_until(
    engine: &mut AudioEngine,
    timeout: Duration,
    mut done: impl FnMut(&[EngineEvent]) -> bool,
) -> Vec<EngineEvent> {
    let deadline = Instant::now() + timeout;
    let mut events = Vec::new();
    loop {
        engine.render_offline(256);
        events.extend(engine.poll_events());
        if done(&events) || Instant::now() >= deadline {
            return events;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
