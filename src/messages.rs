//! Message definitions for communication between the control side and the audio thread.
//!
//! This module defines the enums that serve as the wire format for messages passed through the
//! ring buffers between the caller's thread and the real-time audio thread, plus the events the
//! engine hands back to its caller.

use std::sync::Arc;

/// A fully decoded, ready-to-play clip.
///
/// Samples are interleaved and already converted to the output stage's channel count and
/// sample rate. Clones share the same sample memory.
#[derive(Debug, Clone)]
pub struct DecodedBuffer {
    pub channels: usize,
    pub sample_rate: u32,
    pub samples: Arc<[f32]>,
}

impl DecodedBuffer {
    pub fn new(channels: usize, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            channels,
            sample_rate,
            samples: Arc::from(samples.into_boxed_slice()),
        }
    }

    /// Number of frames in the clip.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels
    }

    pub fn duration_sec(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f32 / self.sample_rate as f32
    }

    /// True if both handles refer to the same decoded data.
    pub fn same_data(&self, other: &DecodedBuffer) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples)
    }
}

/// Identity of one in-flight playback instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(pub u64);

/// Message that is emitted from the control side.
#[derive(Debug, Clone)]
pub enum ControlMessage {
    /// Start a one-shot voice from the beginning of a clip.
    ///
    /// # Parameters
    /// * `voice` - Identity used to report completion
    /// * `sample` - Pre-decoded immutable clip (shared handle)
    PlayVoice { voice: VoiceId, sample: DecodedBuffer },

    /// Stop a voice. Unknown or finished voices are ignored.
    StopVoice { voice: VoiceId },

    /// Stop all currently active voices.
    StopAll(),
}

/// Message that is emitted from the audio thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMessage {
    /// A voice reached the end of its clip.
    VoiceEnded { voice: VoiceId },

    /// A voice could not be started because every voice slot was busy.
    VoiceDropped { voice: VoiceId },
}

/// Events handed to the caller by `AudioEngine::poll_events`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Primary playback for a slot ran to completion.
    Ended { slot_id: String },

    /// A fallback playback ran to completion and released its temporary source.
    FallbackEnded { slot_id: String },

    /// A fallback playback failed; it is no longer playing and its temporary source is gone.
    FallbackFailed { slot_id: String, error: String },

    /// The output stage refused to start a voice; the slot is no longer playing.
    PlaybackFailed { slot_id: String, error: String },
}

impl EngineEvent {
    pub fn slot_id(&self) -> &str {
        match self {
            EngineEvent::Ended { slot_id }
            | EngineEvent::FallbackEnded { slot_id }
            | EngineEvent::FallbackFailed { slot_id, .. }
            | EngineEvent::PlaybackFailed { slot_id, .. } => slot_id,
        }
    }
}
