//! Channel layout conversion for decoded clips.

use crate::audio_engine::errors::SampleLoadError;

/// Converts interleaved samples between the layouts the primary decoder accepts.
///
/// Identity, mono to stereo (duplicated) and stereo to mono (averaged) are supported. On outputs
/// wider than stereo, mono and stereo clips fill the front pair and leave the other channels
/// silent. Any other pair is [`SampleLoadError::UnsupportedChannels`].
pub fn map_channels(
    samples: Vec<f32>,
    file_channels: usize,
    output_channels: usize,
) -> Result<Vec<f32>, SampleLoadError> {
    match (file_channels, output_channels) {
        (from, to) if from == to => Ok(samples),
        (1, 2) => Ok(samples.into_iter().flat_map(|s| [s, s]).collect()),
        (2, 1) => Ok(samples
            .chunks_exact(2)
            .map(|pair| (pair[0] + pair[1]) * 0.5)
            .collect()),
        (1 | 2, wide) if wide > 2 => {
            let stereo = map_channels(samples, file_channels, 2)?;
            let mut out = Vec::with_capacity(stereo.len() / 2 * wide);
            for pair in stereo.chunks_exact(2) {
                out.extend_from_slice(pair);
                out.extend(std::iter::repeat_n(0.0, wide - 2));
            }
            Ok(out)
        }
        _ => Err(SampleLoadError::UnsupportedChannels {
            file_channels,
            output_channels,
        }),
    }
}

/// Maps any channel layout onto the output layout, never failing.
///
/// Layouts [`map_channels`] understands are handled by it. Everything else is folded to mono
/// by averaging each frame and then copied to every output channel.
pub fn remap_channels_lenient(
    samples: Vec<f32>,
    file_channels: usize,
    output_channels: usize,
) -> Vec<f32> {
    if file_channels == 0 || output_channels == 0 {
        return Vec::new();
    }

    if file_channels == output_channels || file_channels <= 2 {
        return map_channels(samples, file_channels, output_channels).unwrap_or_default();
    }

    let frames = samples.len() / file_channels;
    let mut out = Vec::with_capacity(frames * output_channels);
    for frame in samples.chunks_exact(file_channels) {
        let mono = frame.iter().sum::<f32>() / file_channels as f32;
        out.extend(std::iter::repeat_n(mono, output_channels));
    }
    out
}
