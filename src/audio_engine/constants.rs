//! Audio engine configuration constants and limits.

/// Maximum number of voices that can be active simultaneously.
pub const MAX_VOICES: usize = 32;

/// Minimum user-facing volume (silence).
pub const VOLUME_MIN: i32 = 0;

/// Maximum user-facing volume (unity gain).
pub const VOLUME_MAX: i32 = 100;

/// Volume used when nothing valid has been persisted.
pub const DEFAULT_VOLUME: u8 = 70;

/// Capacity of the control ring buffer (caller -> audio thread).
pub const CONTROL_QUEUE_CAPACITY: usize = 1024;

/// Capacity of the message ring buffer (audio thread -> caller).
pub const AUDIO_QUEUE_CAPACITY: usize = 1024;

/// Fixed device buffer size in frames.
pub const OUTPUT_BUFFER_FRAMES: u32 = 512;

/// Output channel count assumed before a device has been opened.
pub const PREFERRED_OUTPUT_CHANNELS: usize = 2;

/// Output sample rate assumed before a device has been opened.
pub const PREFERRED_OUTPUT_SAMPLE_RATE: u32 = 48_000;

/// Sinc length used when converting clip sample rates.
pub const RESAMPLER_SINC_LEN: usize = 128;

/// Number of generic custom slots after the presets.
pub const CUSTOM_SLOT_COUNT: usize = 4;
