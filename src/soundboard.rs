//! The soundboard: resolves slot sources into playable audio and implements the user flows
//! (trigger, upload, record, reset, clear, volume) on top of the [`AudioEngine`].

use thiserror::Error;

use crate::audio_engine::{
    AudioEngine, DecodeOutcome, EngineError, FallbackError, PreloadReport, PreloadRequest,
    extension_hint,
};
use crate::messages::{EngineEvent, VoiceId};
use crate::slots::{Slot, SlotSource, default_slots, generate_blob_id, is_valid_audio_file};
use crate::store::{AssetFetcher, BlobStore, SlotStore, StoreError, VolumeStore};

#[derive(Debug, Error)]
pub enum SoundboardError {
    #[error("unknown slot: {0}")]
    UnknownSlot(String),

    #[error("sound for slot {slot_id} not found (blob {blob_id})")]
    BlobNotFound { slot_id: String, blob_id: String },

    #[error("sound for slot {0} is not loaded yet")]
    NotLoaded(String),

    #[error("{0} is not a supported audio file")]
    InvalidAudioFile(String),

    #[error("no audio data for slot {0}")]
    EmptySource(String),

    #[error("slot {0} is not a preset slot")]
    NotPreset(String),

    #[error("slot {0} is not a custom slot")]
    NotCustom(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Fallback(#[from] FallbackError),
}

/// What a trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The slot is empty.
    Ignored,
    /// Started on the low-latency path.
    Played(VoiceId),
    /// Handed to the fallback player.
    Fallback,
}

/// How a stored custom sound will be played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundReadiness {
    /// Decoded and cached.
    Ready,
    /// Only the fallback player can attempt it.
    FallbackOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub preload: PreloadReport,
    /// Custom sounds that will use the fallback player.
    pub fallback_only: Vec<String>,
    /// Slots whose stored blob is gone.
    pub missing_blobs: Vec<String>,
}

pub struct Soundboard {
    slots: Vec<Slot>,
    slot_store: Box<dyn SlotStore>,
    blob_store: Box<dyn BlobStore>,
    volume_store: Box<dyn VolumeStore>,
    assets: Box<dyn AssetFetcher + Sync>,
    engine: AudioEngine,
}

impl Soundboard {
    pub fn new(
        engine: AudioEngine,
        slot_store: impl SlotStore + 'static,
        blob_store: impl BlobStore + 'static,
        volume_store: impl VolumeStore + 'static,
        assets: impl AssetFetcher + Sync + 'static,
    ) -> Self {
        Self {
            slots: default_slots(),
            slot_store: Box::new(slot_store),
            blob_store: Box::new(blob_store),
            volume_store: Box::new(volume_store),
            assets: Box::new(assets),
            engine,
        }
    }

    /// Restores slots and volume, builds the (still locked) output stage and decodes every
    /// sound that can be decoded.
    pub fn load(&mut self) -> LoadReport {
        self.slots = self.slot_store.load();

        if let Err(err) = self.engine.init() {
            log::warn!("Output stage unavailable: {err}");
        }
        self.engine.set_volume(i32::from(self.volume_store.get()));

        let mut report = LoadReport {
            preload: self.preload_defaults(),
            ..LoadReport::default()
        };

        let stored: Vec<(String, SlotSource)> = self
            .slots
            .iter()
            .filter(|slot| slot.current_source.blob_id().is_some())
            .map(|slot| (slot.id.clone(), slot.current_source.clone()))
            .collect();

        for (slot_id, source) in stored {
            match self.decode_stored(&slot_id, &source) {
                Ok(SoundReadiness::Ready) => {}
                Ok(SoundReadiness::FallbackOnly) => report.fallback_only.push(slot_id),
                Err(err) => {
                    log::warn!("Could not restore sound for slot {slot_id}: {err}");
                    report.missing_blobs.push(slot_id);
                }
            }
        }

        log::info!(
            "Soundboard loaded: {} slots, {} preload failures, {} fallback-only, {} missing",
            self.slots.len(),
            report.preload.failures.len(),
            report.fallback_only.len(),
            report.missing_blobs.len()
        );
        report
    }

    /// Fetches and decodes the default asset of every slot that uses one.
    ///
    /// Slots already cached are not fetched again, so this can be called to retry failures.
    pub fn preload_defaults(&mut self) -> PreloadReport {
        let requests: Vec<PreloadRequest> = self
            .slots
            .iter()
            .filter_map(|slot| match &slot.current_source {
                SlotSource::Default { url } => Some(PreloadRequest::new(&slot.id, url)),
                _ => None,
            })
            .collect();
        self.engine.preload_all(&requests, self.assets.as_ref())
    }

    /// Records the first user gesture. Returns `true` if this call unlocked output.
    pub fn unlock(&mut self) -> bool {
        self.engine.unlock()
    }

    /// Plays a slot in response to user input.
    ///
    /// Sound is started before anything else happens. A cached clip takes the low-latency
    /// path; a stored custom sound without a cached clip goes to the fallback player.
    pub fn trigger(&mut self, slot_id: &str) -> Result<TriggerOutcome, SoundboardError> {
        let source = self.slot_ref(slot_id)?.current_source.clone();
        if source.is_empty() {
            return Ok(TriggerOutcome::Ignored);
        }

        // A trigger is a user gesture.
        self.engine.unlock();

        if let Some(buffer) = self.engine.cached(slot_id) {
            let finished = slot_id.to_string();
            let voice = self.engine.play(slot_id, buffer, move || {
                log::debug!("Slot {finished} finished playing");
            })?;
            return Ok(TriggerOutcome::Played(voice));
        }

        match &source {
            SlotSource::Upload { blob_id, .. } | SlotSource::Recording { blob_id, .. } => {
                let bytes = self.blob_store.get(blob_id)?.ok_or_else(|| {
                    SoundboardError::BlobNotFound {
                        slot_id: slot_id.to_string(),
                        blob_id: blob_id.clone(),
                    }
                })?;
                self.engine
                    .play_via_fallback(slot_id, &bytes, source_hint(&source))?;
                Ok(TriggerOutcome::Fallback)
            }
            SlotSource::Default { .. } => Err(SoundboardError::NotLoaded(slot_id.to_string())),
            SlotSource::Empty => Ok(TriggerOutcome::Ignored),
        }
    }

    pub fn stop(&mut self, slot_id: &str) {
        self.engine.stop(slot_id);
    }

    pub fn stop_all(&mut self) {
        self.engine.stop_all();
    }

    /// Replaces a slot's sound with an uploaded file.
    pub fn upload(
        &mut self,
        slot_id: &str,
        file: UploadedFile,
    ) -> Result<SoundReadiness, SoundboardError> {
        self.slot_ref(slot_id)?;
        if !is_valid_audio_file(&file.file_name, &file.mime_type) {
            return Err(SoundboardError::InvalidAudioFile(file.file_name));
        }

        let blob_id = generate_blob_id("upload", slot_id);
        let hint = extension_hint(&file.file_name);
        let readiness = self.replace_sound(slot_id, &blob_id, file.bytes, hint)?;
        self.set_source(
            slot_id,
            SlotSource::Upload {
                blob_id,
                file_name: file.file_name,
            },
        );
        Ok(readiness)
    }

    /// Replaces a slot's sound with a microphone recording taken at `created_at` (Unix ms).
    pub fn record(
        &mut self,
        slot_id: &str,
        bytes: Vec<u8>,
        created_at: i64,
    ) -> Result<SoundReadiness, SoundboardError> {
        self.slot_ref(slot_id)?;

        let blob_id = generate_blob_id("recording", slot_id);
        let readiness = self.replace_sound(slot_id, &blob_id, bytes, None)?;
        self.set_source(
            slot_id,
            SlotSource::Recording {
                blob_id,
                created_at,
            },
        );
        Ok(readiness)
    }

    /// Returns a preset slot to its default sound.
    pub fn reset(&mut self, slot_id: &str) -> Result<(), SoundboardError> {
        let slot = self.slot_ref(slot_id)?;
        if !slot.is_preset {
            return Err(SoundboardError::NotPreset(slot_id.to_string()));
        }
        let default_source = slot.default_source();

        self.engine.stop(slot_id);
        self.delete_slot_blob(slot_id);
        self.engine.evict(slot_id);
        self.set_source(slot_id, default_source.clone());

        if let SlotSource::Default { url } = &default_source
            && let Err(failure) = self.engine.preload(slot_id, url, self.assets.as_ref())
        {
            log::warn!("Reset {slot_id}, but its default sound failed to load: {failure}");
        }
        Ok(())
    }

    /// Empties a custom slot.
    pub fn clear(&mut self, slot_id: &str) -> Result<(), SoundboardError> {
        if self.slot_ref(slot_id)?.is_preset {
            return Err(SoundboardError::NotCustom(slot_id.to_string()));
        }

        self.engine.stop(slot_id);
        self.delete_slot_blob(slot_id);
        self.engine.evict(slot_id);
        self.set_source(slot_id, SlotSource::Empty);
        Ok(())
    }

    /// Applies and persists a volume; out-of-range values are clamped.
    pub fn set_volume(&mut self, volume: i32) {
        self.engine.set_volume(volume);
        if let Err(err) = self.volume_store.set(volume) {
            log::warn!("Failed to persist volume: {err}");
        }
    }

    pub fn volume(&self) -> u8 {
        self.engine.volume()
    }

    /// True while either playback path is busy with the slot.
    pub fn is_playing(&self, slot_id: &str) -> bool {
        self.engine.is_playing(slot_id) || self.engine.is_fallback_playing(slot_id)
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, slot_id: &str) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.id == slot_id)
    }

    pub fn poll_events(&mut self) -> Vec<EngineEvent> {
        self.engine.poll_events()
    }

    /// Deletes stored blobs no slot refers to. Returns how many were deleted.
    pub fn cleanup_unused_blobs(&mut self) -> Result<usize, SoundboardError> {
        let stored = self.blob_store.list_ids()?;
        let mut deleted = 0;
        for id in stored {
            let used = self
                .slots
                .iter()
                .any(|slot| slot.current_source.blob_id() == Some(id.as_str()));
            if used {
                continue;
            }
            match self.blob_store.delete(&id) {
                Ok(()) => deleted += 1,
                Err(err) => log::warn!("Failed to delete unused blob {id}: {err}"),
            }
        }

        if deleted > 0 {
            log::info!("Cleaned up {deleted} unused blobs");
        }
        Ok(deleted)
    }

    pub fn engine(&self) -> &AudioEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut AudioEngine {
        &mut self.engine
    }

    pub fn shutdown(&mut self) {
        self.engine.shutdown();
    }

    fn slot_ref(&self, slot_id: &str) -> Result<&Slot, SoundboardError> {
        self.slot(slot_id)
            .ok_or_else(|| SoundboardError::UnknownSlot(slot_id.to_string()))
    }

    /// Swaps the slot's blob and cached clip for new bytes. The slot's source is left to the
    /// caller, which updates it only after the cache holds the new sound.
    fn replace_sound(
        &mut self,
        slot_id: &str,
        blob_id: &str,
        bytes: Vec<u8>,
        hint: Option<&str>,
    ) -> Result<SoundReadiness, SoundboardError> {
        if bytes.is_empty() {
            return Err(SoundboardError::EmptySource(slot_id.to_string()));
        }

        self.engine.stop(slot_id);
        self.delete_slot_blob(slot_id);
        if let Err(err) = self.blob_store.put(blob_id, &bytes) {
            log::warn!("Failed to store blob {blob_id}: {err}");
        }

        Ok(match self.engine.decode(slot_id, bytes, hint) {
            DecodeOutcome::Ready(_) => SoundReadiness::Ready,
            DecodeOutcome::FallbackRequired(failure) | DecodeOutcome::Failed(failure) => {
                log::info!("Slot {slot_id} will use fallback playback: {failure}");
                SoundReadiness::FallbackOnly
            }
        })
    }

    fn decode_stored(
        &mut self,
        slot_id: &str,
        source: &SlotSource,
    ) -> Result<SoundReadiness, SoundboardError> {
        let Some(blob_id) = source.blob_id() else {
            return Err(SoundboardError::NotLoaded(slot_id.to_string()));
        };
        let bytes = self
            .blob_store
            .get(blob_id)?
            .ok_or_else(|| SoundboardError::BlobNotFound {
                slot_id: slot_id.to_string(),
                blob_id: blob_id.to_string(),
            })?;

        Ok(match self.engine.decode(slot_id, bytes, source_hint(source)) {
            DecodeOutcome::Ready(_) => SoundReadiness::Ready,
            DecodeOutcome::FallbackRequired(_) | DecodeOutcome::Failed(_) => {
                SoundReadiness::FallbackOnly
            }
        })
    }

    fn delete_slot_blob(&mut self, slot_id: &str) {
        let Some(blob_id) = self
            .slot(slot_id)
            .and_then(|slot| slot.current_source.blob_id())
            .map(str::to_string)
        else {
            return;
        };
        if let Err(err) = self.blob_store.delete(&blob_id) {
            log::warn!("Failed to delete blob {blob_id}: {err}");
        }
    }

    fn set_source(&mut self, slot_id: &str, source: SlotSource) {
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == slot_id) {
            slot.current_source = source;
        }
        if let Err(err) = self.slot_store.save(&self.slots) {
            log::warn!("Failed to persist slots: {err}");
        }
    }
}

fn source_hint(source: &SlotSource) -> Option<&str> {
    match source {
        SlotSource::Upload { file_name, .. } => extension_hint(file_name),
        SlotSource::Default { url } => extension_hint(url),
        SlotSource::Recording { .. } | SlotSource::Empty => None,
    }
}
