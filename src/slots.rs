//! Slot data model: the fixed preset table, per-slot sound sources and their persisted form.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::audio_engine::constants::CUSTOM_SLOT_COUNT;

/// Preset slots in grid order: id, label, emoji.
const PRESETS: [(&str, &str, &str); 12] = [
    ("dog", "Dog", "🐶"),
    ("cat", "Cat", "🐱"),
    ("cow", "Cow", "🐮"),
    ("duck", "Duck", "🦆"),
    ("sheep", "Sheep", "🐑"),
    ("pig", "Pig", "🐷"),
    ("rooster", "Rooster", "🐓"),
    ("chicken", "Chicken", "🐔"),
    ("horse", "Horse", "🐴"),
    ("frog", "Frog", "🐸"),
    ("lion", "Lion", "🦁"),
    ("owl", "Owl", "🦉"),
];

const CUSTOM_EMOJI: &str = "🎤";

const VALID_AUDIO_MIME_TYPES: [&str; 7] = [
    "audio/mpeg",
    "audio/mp3",
    "audio/wav",
    "audio/ogg",
    "audio/webm",
    "audio/mp4",
    "audio/m4a",
];

const VALID_AUDIO_EXTENSIONS: [&str; 5] = ["mp3", "wav", "ogg", "webm", "m4a"];

/// Where a slot's sound currently comes from.
///
/// Serialized as `{"kind": "...", ...}` with camelCase fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum SlotSource {
    /// A static asset shipped with the app.
    Default { url: String },

    /// A user-provided file stored in the blob store.
    Upload { blob_id: String, file_name: String },

    /// A microphone recording stored in the blob store. `created_at` is in Unix milliseconds.
    Recording { blob_id: String, created_at: i64 },

    /// Nothing to play.
    Empty,
}

impl SlotSource {
    /// The blob backing this source, for uploads and recordings.
    pub fn blob_id(&self) -> Option<&str> {
        match self {
            SlotSource::Upload { blob_id, .. } | SlotSource::Recording { blob_id, .. } => {
                Some(blob_id)
            }
            SlotSource::Default { .. } | SlotSource::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, SlotSource::Empty)
    }

    /// Short human-readable summary shown next to the slot.
    pub fn description(&self) -> String {
        match self {
            SlotSource::Default { .. } => "Default sound".to_string(),
            SlotSource::Upload { file_name, .. } => format!("Uploaded: {file_name}"),
            SlotSource::Recording { created_at, .. } => {
                match Local.timestamp_millis_opt(*created_at).single() {
                    Some(date) => format!("Recorded: {}", date.format("%-m/%-d/%Y %-I:%M:%S %p")),
                    None => "Recorded: unknown date".to_string(),
                }
            }
            SlotSource::Empty => "Empty slot".to_string(),
        }
    }
}

/// One playable grid position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: String,
    pub label: String,
    pub emoji: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_url: Option<String>,
    pub current_source: SlotSource,
    pub is_preset: bool,
}

impl Slot {
    fn preset(id: &str, label: &str, emoji: &str) -> Self {
        let url = preset_url(id);
        Self {
            id: id.to_string(),
            label: label.to_string(),
            emoji: emoji.to_string(),
            default_url: Some(url.clone()),
            current_source: SlotSource::Default { url },
            is_preset: true,
        }
    }

    fn custom(index: usize) -> Self {
        Self {
            id: format!("custom-{index}"),
            label: format!("Custom {index}"),
            emoji: CUSTOM_EMOJI.to_string(),
            default_url: None,
            current_source: SlotSource::Empty,
            is_preset: false,
        }
    }

    /// The source a reset returns this slot to.
    pub fn default_source(&self) -> SlotSource {
        match &self.default_url {
            Some(url) => SlotSource::Default { url: url.clone() },
            None => SlotSource::Empty,
        }
    }
}

/// The persisted part of a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotMetadata {
    pub id: String,
    pub current_source: SlotSource,
}

impl From<&Slot> for SlotMetadata {
    fn from(slot: &Slot) -> Self {
        Self {
            id: slot.id.clone(),
            current_source: slot.current_source.clone(),
        }
    }
}

pub fn preset_url(id: &str) -> String {
    format!("/sounds/{id}.mp3")
}

/// The full slot grid in its initial state: presets first, then the custom slots.
pub fn default_slots() -> Vec<Slot> {
    PRESETS
        .iter()
        .map(|(id, label, emoji)| Slot::preset(id, label, emoji))
        .chain((1..=CUSTOM_SLOT_COUNT).map(Slot::custom))
        .collect()
}

pub fn default_slot(id: &str) -> Option<Slot> {
    default_slots().into_iter().find(|slot| slot.id == id)
}

/// Applies persisted sources onto the default grid. Unknown ids are ignored.
pub fn merge_metadata(metadata: &[SlotMetadata]) -> Vec<Slot> {
    let mut slots = default_slots();
    for slot in &mut slots {
        if let Some(stored) = metadata.iter().find(|m| m.id == slot.id) {
            slot.current_source = stored.current_source.clone();
        }
    }
    slots
}

static BLOB_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A blob id of the form `<prefix>-<slotId>-<millis>-<seq>`.
///
/// The sequence number keeps ids made within the same millisecond apart.
pub fn generate_blob_id(prefix: &str, slot_id: &str) -> String {
    let seq = BLOB_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!(
        "{prefix}-{slot_id}-{}-{seq:04}",
        Utc::now().timestamp_millis()
    )
}

/// Accepts a file when either its MIME type or its extension names a supported audio format.
pub fn is_valid_audio_file(file_name: &str, mime_type: &str) -> bool {
    if VALID_AUDIO_MIME_TYPES.contains(&mime_type) {
        return true;
    }

    file_name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| VALID_AUDIO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)))
}

/// Formats a byte count with binary units and at most two decimals, e.g. `1.5 KB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", UNITS[unit])
}
