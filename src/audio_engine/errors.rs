//! Audio-specific error types.

use thiserror::Error;

/// Errors that can occur while turning source bytes into PCM.
#[derive(Debug, Error)]
pub enum SampleLoadError {
    /// Failed to read the source.
    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to decode the audio data.
    #[error("failed to decode audio data: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    /// Failed to create resampler.
    #[error("failed to create resampler: {0}")]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),

    /// Failed to resample audio.
    #[error("failed to resample audio: {0}")]
    Resample(#[from] rubato::ResampleError),

    /// The source contained no bytes at all.
    #[error("audio source is empty")]
    EmptySource,

    /// Audio data has no default track.
    #[error("audio data has no default track")]
    NoDefaultTrack,

    /// Audio data is missing sample rate information.
    #[error("audio data is missing a sample rate")]
    MissingSampleRate,

    /// Audio data is missing channel information.
    #[error("audio data is missing channel information")]
    MissingChannels,

    /// Decoding finished without producing a single frame.
    #[error("no audio frames could be decoded")]
    NoAudio,

    /// Unsupported channel mapping configuration.
    #[error(
        "unsupported channel mapping: file has {file_channels} channels, output has {output_channels} channels (only mono↔stereo supported)"
    )]
    UnsupportedChannels {
        /// Number of channels in the source file.
        file_channels: usize,
        /// Number of channels expected for output.
        output_channels: usize,
    },
}

impl SampleLoadError {
    /// Whether the bytes were present but the primary decoder could not handle them.
    ///
    /// Missing or empty sources are hard failures: there is nothing a more lenient
    /// decoder could do with them.
    pub fn requires_fallback(&self) -> bool {
        match self {
            Self::Io(err) => err.kind() == std::io::ErrorKind::InvalidData,
            Self::EmptySource => false,
            Self::Decode(_)
            | Self::ResamplerConstruction(_)
            | Self::Resample(_)
            | Self::NoDefaultTrack
            | Self::MissingSampleRate
            | Self::MissingChannels
            | Self::NoAudio
            | Self::UnsupportedChannels { .. } => true,
        }
    }
}

/// A per-slot decode failure. Never fatal; the caller decides whether to fall back.
#[derive(Debug, Error)]
#[error("failed to decode sound for slot {slot_id}: {source}")]
pub struct DecodeFailure {
    pub slot_id: String,
    #[source]
    pub source: SampleLoadError,
}

impl DecodeFailure {
    pub fn new(slot_id: impl Into<String>, source: SampleLoadError) -> Self {
        Self {
            slot_id: slot_id.into(),
            source,
        }
    }

    pub fn requires_fallback(&self) -> bool {
        self.source.requires_fallback()
    }
}

/// Errors raised by the output stage and the playback engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no audio output device found")]
    NoOutputDevice,

    #[error("no default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("failed to pause output stream: {0}")]
    PauseStream(#[from] cpal::PauseStreamError),

    #[error("audio engine not initialized")]
    NotInitialized,

    #[error("audio engine has been shut down")]
    Closed,

    #[error("control queue is full")]
    QueueFull,
}

/// Errors raised by the degraded media-element playback path.
#[derive(Debug, Error)]
pub enum FallbackError {
    /// There were no bytes to play.
    #[error("no source to play")]
    MissingSource,

    /// The temporary resource backing the playback could not be created.
    #[error("failed to create temporary source: {0}")]
    TemporarySource(#[from] std::io::Error),

    /// Even the lenient decoder could not produce audio.
    #[error("fallback decode failed: {0}")]
    Decode(#[from] SampleLoadError),

    /// The output stage refused the voice.
    #[error("fallback playback could not start: {0}")]
    Start(#[from] EngineError),
}
