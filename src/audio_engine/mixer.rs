//! Real-time audio mixer implementation.
//!
//! This module provides the [`RtMixer`] struct which sums one-shot voices into the output
//! buffer and applies the master gain stage to the result.
//!
//! The mixer manages a fixed pool of [`Voice`](crate::audio_engine::voice::Voice) instances
//! playing [`DecodedBuffer`](crate::messages::DecodedBuffer) data produced by
//! [`decode_bytes_to_buffer`](crate::audio_engine::sample_loader::decode_bytes_to_buffer).

use crate::audio_engine::constants::MAX_VOICES;
use crate::audio_engine::voice::Voice;
use crate::messages::{DecodedBuffer, VoiceId};
use cpal::Sample;

/// Real-time mixer holding the voice pool and the master gain.
///
/// All operations are allocation-free and real-time safe. Dropping the last handle of a clip
/// can free memory on the audio thread; clips are only ever released there when the control
/// side has already evicted them.
pub struct RtMixer {
    /// Number of output channels (1 for mono, 2 for stereo).
    channels: usize,

    /// Master gain applied to the sum of all voices.
    master_gain: f32,

    /// Active voices with MAX_VOICES slots.
    voices: [Voice; MAX_VOICES],
}

impl RtMixer {
    /// Creates a new RtMixer.
    ///
    /// # Parameters
    ///
    /// - `channels`: Number of output channels (1 for mono, 2 for stereo)
    /// - `master_gain`: Initial master gain (0.0 to 1.0)
    pub fn new(channels: usize, master_gain: f32) -> Self {
        let mut mixer = Self {
            channels,
            master_gain: 1.0,
            voices: std::array::from_fn(|_| Voice::new()),
        };
        mixer.set_master_gain(master_gain);
        mixer
    }

    /// Starts a one-shot voice.
    ///
    /// Returns `false` when the clip does not match the output channel count or when every
    /// voice slot is busy; the request is dropped deterministically in both cases.
    pub fn start_voice(&mut self, voice_id: VoiceId, sample: DecodedBuffer) -> bool {
        if sample.channels != self.channels {
            return false;
        }

        for voice in &mut self.voices {
            if !voice.active {
                voice.start(voice_id, sample);
                return true;
            }
        }

        false
    }

    /// Stops a voice. Unknown voices are ignored.
    pub fn stop_voice(&mut self, voice_id: VoiceId) {
        for voice in &mut self.voices {
            if voice.is_playing(voice_id) {
                voice.stop();
            }
        }
    }

    /// Stops all active voices.
    pub fn stop_all(&mut self) {
        for voice in &mut self.voices {
            voice.stop();
        }
    }

    /// Sets the master gain.
    ///
    /// Invalid values (NaN, infinite, or outside 0.0..=1.0) are silently ignored.
    pub fn set_master_gain(&mut self, gain: f32) {
        if !gain.is_finite() || !(0.0..=1.0).contains(&gain) {
            return;
        }

        self.master_gain = gain;
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    /// Number of voices currently producing sound.
    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    /// The voice held by each pool slot, in slot order. Idle slots yield `None`.
    pub fn voice_ids(&self) -> impl Iterator<Item = Option<VoiceId>> + '_ {
        self.voices.iter().map(|v| v.active.then_some(v.voice_id))
    }

    /// Renders audio frames to the output buffer.
    ///
    /// Mixes all active voices into the interleaved output buffer. Voices that reach the end
    /// of their clip are freed and reported through `on_voice_ended`.
    pub fn render(&mut self, output: &mut [f32], mut on_voice_ended: impl FnMut(VoiceId)) {
        output.fill(Sample::EQUILIBRIUM);

        if self.channels == 0 {
            return;
        }

        let frames = output.len() / self.channels;
        if frames == 0 {
            return;
        }

        let channels = self.channels;
        let gain = self.master_gain;

        for voice in &mut self.voices {
            if !voice.active {
                continue;
            }

            let Some(sample) = voice.sample.as_ref() else {
                voice.stop();
                continue;
            };

            let sample_frames = sample.frames();
            let remaining = sample_frames.saturating_sub(voice.frame_pos);
            let to_copy = remaining.min(frames);

            let start = voice.frame_pos * channels;
            let source = &sample.samples[start..start + to_copy * channels];
            for (out, s) in output.iter_mut().zip(source) {
                *out += *s * gain;
            }

            voice.frame_pos += to_copy;
            if voice.frame_pos >= sample_frames {
                let voice_id = voice.voice_id;
                voice.stop();
                on_voice_ended(voice_id);
            }
        }
    }

    /// Gets the number of channels configured for this mixer.
    pub fn channels(&self) -> usize {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_sample(channels: usize, frames: usize, value: f32) -> DecodedBuffer {
        DecodedBuffer::new(channels, 48_000, vec![value; channels * frames])
    }

    fn render_collect(mixer: &mut RtMixer, len: usize) -> (Vec<f32>, Vec<VoiceId>) {
        let mut output = vec![0.0; len];
        let mut ended = Vec::new();
        mixer.render(&mut output, |voice| ended.push(voice));
        (output, ended)
    }

    #[test]
    fn test_mixer_creation() {
        let mixer = RtMixer::new(2, 0.49);
        assert_eq!(mixer.channels(), 2);
        assert!((mixer.master_gain() - 0.49).abs() < f32::EPSILON);
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_start_voice() {
        let mut mixer = RtMixer::new(2, 1.0);

        assert!(mixer.start_voice(VoiceId(1), create_test_sample(2, 100, 0.5)));
        assert_eq!(mixer.active_voices(), 1);
    }

    #[test]
    fn test_start_voice_wrong_channels() {
        let mut mixer = RtMixer::new(2, 1.0);

        assert!(!mixer.start_voice(VoiceId(1), create_test_sample(1, 100, 0.5)));
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_stop_voice_only_stops_that_voice() {
        let mut mixer = RtMixer::new(2, 1.0);
        mixer.start_voice(VoiceId(1), create_test_sample(2, 100, 0.5));
        mixer.start_voice(VoiceId(2), create_test_sample(2, 100, 0.3));

        mixer.stop_voice(VoiceId(1));

        assert_eq!(mixer.active_voices(), 1);
        assert!(mixer.voices.iter().any(|v| v.is_playing(VoiceId(2))));
    }

    #[test]
    fn test_stop_unknown_voice_is_noop() {
        let mut mixer = RtMixer::new(1, 1.0);
        mixer.start_voice(VoiceId(1), create_test_sample(1, 10, 0.5));

        mixer.stop_voice(VoiceId(99));

        assert_eq!(mixer.active_voices(), 1);
    }

    #[test]
    fn test_stop_all() {
        let mut mixer = RtMixer::new(2, 1.0);
        mixer.start_voice(VoiceId(1), create_test_sample(2, 100, 0.5));
        mixer.start_voice(VoiceId(2), create_test_sample(2, 100, 0.5));

        mixer.stop_all();

        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_render_silence() {
        let mut mixer = RtMixer::new(2, 1.0);

        let (output, ended) = render_collect(&mut mixer, 200);

        assert!(output.iter().all(|&s| s == 0.0));
        assert!(ended.is_empty());
    }

    #[test]
    fn test_render_applies_master_gain() {
        let mut mixer = RtMixer::new(1, 0.25);
        mixer.start_voice(VoiceId(1), create_test_sample(1, 10, 0.8));

        let (output, _) = render_collect(&mut mixer, 10);

        assert!(output.iter().all(|&s| (s - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_render_zero_gain_is_silent_but_voice_runs() {
        let mut mixer = RtMixer::new(1, 0.0);
        mixer.start_voice(VoiceId(1), create_test_sample(1, 10, 0.8));

        let (output, ended) = render_collect(&mut mixer, 4);

        assert!(output.iter().all(|&s| s == 0.0));
        assert!(ended.is_empty());
        assert_eq!(mixer.active_voices(), 1);
    }

    #[test]
    fn test_one_shot_ends_and_reports() {
        let mut mixer = RtMixer::new(1, 1.0);
        mixer.start_voice(VoiceId(5), create_test_sample(1, 5, 0.5));

        // Render more frames than the clip contains.
        let (output, ended) = render_collect(&mut mixer, 20);

        assert!(output[..5].iter().all(|&s| s == 0.5));
        assert!(output[5..].iter().all(|&s| s == 0.0));
        assert_eq!(ended, vec![VoiceId(5)]);
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_clip_spanning_several_blocks() {
        let samples: Vec<f32> = (0..12).map(|i| i as f32 / 100.0).collect();
        let mut mixer = RtMixer::new(1, 1.0);
        mixer.start_voice(VoiceId(1), DecodedBuffer::new(1, 48_000, samples.clone()));

        let (first, ended_first) = render_collect(&mut mixer, 8);
        let (second, ended_second) = render_collect(&mut mixer, 8);

        assert_eq!(&first[..], &samples[..8]);
        assert_eq!(&second[..4], &samples[8..]);
        assert!(ended_first.is_empty());
        assert_eq!(ended_second, vec![VoiceId(1)]);
    }

    #[test]
    fn test_multiple_voices_mixing() {
        let mut mixer = RtMixer::new(2, 1.0);
        mixer.start_voice(VoiceId(1), create_test_sample(2, 10, 0.3));
        mixer.start_voice(VoiceId(2), create_test_sample(2, 10, 0.2));

        let (output, _) = render_collect(&mut mixer, 20);

        // Output should contain mixed samples (0.3 + 0.2 = 0.5 per channel)
        assert!(output.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_invalid_gain_ignored() {
        let mut mixer = RtMixer::new(2, 0.5);

        mixer.set_master_gain(f32::NAN);
        mixer.set_master_gain(1.5);
        mixer.set_master_gain(-0.1);

        assert!((mixer.master_gain() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_voice_limit() {
        let mut mixer = RtMixer::new(1, 1.0);

        let mut started = 0;
        for i in 0..(MAX_VOICES + 5) {
            if mixer.start_voice(VoiceId(i as u64), create_test_sample(1, 10, 0.5)) {
                started += 1;
            }
        }

        assert_eq!(started, MAX_VOICES);
        assert_eq!(mixer.active_voices(), MAX_VOICES);
    }

    #[test]
    fn test_voice_ids_follow_pool_slots() {
        let mut mixer = RtMixer::new(1, 1.0);
        mixer.start_voice(VoiceId(7), create_test_sample(1, 2, 0.5));
        mixer.start_voice(VoiceId(8), create_test_sample(1, 10, 0.5));

        render_collect(&mut mixer, 4);
        let ids: Vec<_> = mixer.voice_ids().take(2).collect();

        assert_eq!(ids, vec![None, Some(VoiceId(8))]);
        assert_eq!(mixer.voice_ids().count(), MAX_VOICES);
    }
}
