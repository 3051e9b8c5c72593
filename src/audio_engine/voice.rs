//! Voice management for real-time audio mixing.
//!
//! This module provides the [`Voice`] struct which represents one slot of the mixer's fixed
//! voice pool. A voice plays a single clip once from frame zero and then frees itself.
//!
//! Voices are owned by the [`RtMixer`](crate::audio_engine::mixer::RtMixer) and are never
//! allocated on the audio thread.

use crate::messages::{DecodedBuffer, VoiceId};

/// A single voice in the mixer.
#[derive(Debug)]
pub struct Voice {
    /// Whether this voice is currently producing sound.
    pub active: bool,

    /// Identity reported back when the voice finishes.
    pub voice_id: VoiceId,

    /// The clip being played.
    pub sample: Option<DecodedBuffer>,

    /// Current playback position in frames.
    pub frame_pos: usize,
}

impl Voice {
    /// Creates an idle voice.
    pub fn new() -> Self {
        Self {
            active: false,
            voice_id: VoiceId(0),
            sample: None,
            frame_pos: 0,
        }
    }

    /// Starts playing `sample` from frame zero.
    pub fn start(&mut self, voice_id: VoiceId, sample: DecodedBuffer) {
        self.active = true;
        self.voice_id = voice_id;
        self.sample = Some(sample);
        self.frame_pos = 0;
    }

    /// Releases the clip and returns the voice to the idle pool.
    pub fn stop(&mut self) {
        self.active = false;
        self.sample = None;
        self.frame_pos = 0;
    }

    pub fn is_playing(&self, voice_id: VoiceId) -> bool {
        self.active && self.voice_id == voice_id
    }
}

impl Default for Voice {
    fn default() -> Self {
        Self::new()
    }
}
