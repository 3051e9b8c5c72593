//! User-facing volume and its mapping onto the master gain stage.
//!
//! Volume is an integer percentage. The applied gain follows a squared curve, `(v / 100)^2`,
//! which leaves more of the slider's travel for quiet settings than a linear map would.

use crate::audio_engine::constants::{DEFAULT_VOLUME, VOLUME_MAX, VOLUME_MIN};

/// Clamps a raw volume request into `VOLUME_MIN..=VOLUME_MAX`.
pub fn clamp_volume(volume: i32) -> u8 {
    volume.clamp(VOLUME_MIN, VOLUME_MAX) as u8
}

/// Gain applied to the master stage for a volume percentage.
pub fn gain_for_volume(volume: i32) -> f32 {
    let normalized = f32::from(clamp_volume(volume)) / VOLUME_MAX as f32;
    normalized * normalized
}

/// Holds the last applied volume, independent of whether an output stage exists.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeController {
    volume: u8,
}

impl VolumeController {
    pub fn new(volume: i32) -> Self {
        Self {
            volume: clamp_volume(volume),
        }
    }

    /// Stores a new volume and returns the gain the stage must apply.
    pub fn set_volume(&mut self, volume: i32) -> f32 {
        self.volume = clamp_volume(volume);
        self.gain()
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn gain(&self) -> f32 {
        gain_for_volume(i32::from(self.volume))
    }
}

impl Default for VolumeController {
    fn default() -> Self {
        Self::new(i32::from(DEFAULT_VOLUME))
    }
}
