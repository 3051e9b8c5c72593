use std::collections::VecDeque;

use pyo3::exceptions::{PyKeyError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};

use crate::audio_engine::{AudioEngine, EngineConfig, setup_logger};
use crate::messages::EngineEvent;
use crate::soundboard::{
    SoundReadiness, Soundboard, SoundboardError, TriggerOutcome, UploadedFile,
};
use crate::store::{DirAssetFetcher, DirBlobStore, FileVolumeStore, JsonSlotStore};

fn to_py_err(err: SoundboardError) -> PyErr {
    match err {
        SoundboardError::UnknownSlot(_) => PyKeyError::new_err(err.to_string()),
        SoundboardError::InvalidAudioFile(_)
        | SoundboardError::EmptySource(_)
        | SoundboardError::NotPreset(_)
        | SoundboardError::NotCustom(_) => PyValueError::new_err(err.to_string()),
        _ => PyRuntimeError::new_err(err.to_string()),
    }
}

fn readiness_label(readiness: SoundReadiness) -> &'static str {
    match readiness {
        SoundReadiness::Ready => "ready",
        SoundReadiness::FallbackOnly => "fallback",
    }
}

/// Soundboard backed by files under `data_dir`, with default sounds under `assets_dir`.
#[pyclass(name = "Soundboard", unsendable)]
pub struct PySoundboard {
    inner: Soundboard,
    pending: VecDeque<EngineEvent>,
}

#[pymethods]
impl PySoundboard {
    #[new]
    #[pyo3(signature = (data_dir, assets_dir, offline = false))]
    pub fn new(data_dir: String, assets_dir: String, offline: bool) -> Self {
        setup_logger();

        let config = if offline {
            EngineConfig::offline(2, 48_000)
        } else {
            EngineConfig::default()
        };
        let data_dir = std::path::PathBuf::from(data_dir);

        PySoundboard {
            inner: Soundboard::new(
                AudioEngine::new(config),
                JsonSlotStore::new(data_dir.join("slots.json")),
                DirBlobStore::new(data_dir.join("blobs")),
                FileVolumeStore::new(data_dir.join("volume")),
                DirAssetFetcher::new(assets_dir),
            ),
            pending: VecDeque::new(),
        }
    }

    /// Restore state and decode sounds. Returns a summary dict.
    pub fn load(&mut self, py: Python<'_>) -> PyResult<Py<PyAny>> {
        let report = self.inner.load();

        let failures: Vec<String> = report
            .preload
            .failures
            .iter()
            .map(|f| f.slot_id.clone())
            .collect();

        let dict = PyDict::new(py);
        dict.set_item("loaded", report.preload.loaded)?;
        dict.set_item("preload_failures", failures)?;
        dict.set_item("fallback_only", report.fallback_only)?;
        dict.set_item("missing_blobs", report.missing_blobs)?;
        Ok(dict.into_any().unbind())
    }

    pub fn unlock(&mut self) -> bool {
        self.inner.unlock()
    }

    /// Play a slot. Returns "ignored", "played" or "fallback".
    pub fn trigger(&mut self, slot_id: &str) -> PyResult<&'static str> {
        match self.inner.trigger(slot_id).map_err(to_py_err)? {
            TriggerOutcome::Ignored => Ok("ignored"),
            TriggerOutcome::Played(_) => Ok("played"),
            TriggerOutcome::Fallback => Ok("fallback"),
        }
    }

    pub fn stop(&mut self, slot_id: &str) {
        self.inner.stop(slot_id);
    }

    pub fn stop_all(&mut self) {
        self.inner.stop_all();
    }

    pub fn upload(
        &mut self,
        slot_id: &str,
        file_name: String,
        mime_type: String,
        data: Vec<u8>,
    ) -> PyResult<&'static str> {
        let file = UploadedFile {
            file_name,
            mime_type,
            bytes: data,
        };
        self.inner
            .upload(slot_id, file)
            .map(readiness_label)
            .map_err(to_py_err)
    }

    pub fn record(
        &mut self,
        slot_id: &str,
        data: Vec<u8>,
        created_at_ms: i64,
    ) -> PyResult<&'static str> {
        self.inner
            .record(slot_id, data, created_at_ms)
            .map(readiness_label)
            .map_err(to_py_err)
    }

    pub fn reset(&mut self, slot_id: &str) -> PyResult<()> {
        self.inner.reset(slot_id).map_err(to_py_err)
    }

    pub fn clear(&mut self, slot_id: &str) -> PyResult<()> {
        self.inner.clear(slot_id).map_err(to_py_err)
    }

    pub fn set_volume(&mut self, volume: i32) {
        self.inner.set_volume(volume);
    }

    pub fn volume(&self) -> u8 {
        self.inner.volume()
    }

    pub fn is_playing(&self, slot_id: &str) -> bool {
        self.inner.is_playing(slot_id)
    }

    /// All slots as dicts, in grid order.
    pub fn slots(&self, py: Python<'_>) -> PyResult<Py<PyAny>> {
        let list = PyList::empty(py);
        for slot in self.inner.slots() {
            let dict = PyDict::new(py);
            dict.set_item("id", &slot.id)?;
            dict.set_item("label", &slot.label)?;
            dict.set_item("emoji", &slot.emoji)?;
            dict.set_item("is_preset", slot.is_preset)?;
            dict.set_item("empty", slot.current_source.is_empty())?;
            dict.set_item("description", slot.current_source.description())?;
            list.append(dict)?;
        }
        Ok(list.into_any().unbind())
    }

    /// Poll for the next playback event.
    ///
    /// Returns `None` when no events are available.
    pub fn poll_event(&mut self, py: Python<'_>) -> PyResult<Option<Py<PyAny>>> {
        if self.pending.is_empty() {
            self.pending.extend(self.inner.poll_events());
        }
        let Some(event) = self.pending.pop_front() else {
            return Ok(None);
        };

        let dict = PyDict::new(py);
        dict.set_item("slot_id", event.slot_id())?;
        match &event {
            EngineEvent::Ended { .. } => {
                dict.set_item("type", "ended")?;
            }
            EngineEvent::FallbackEnded { .. } => {
                dict.set_item("type", "fallback_ended")?;
            }
            EngineEvent::FallbackFailed { error, .. } => {
                dict.set_item("type", "fallback_error")?;
                dict.set_item("msg", error)?;
            }
            EngineEvent::PlaybackFailed { error, .. } => {
                dict.set_item("type", "error")?;
                dict.set_item("msg", error)?;
            }
        }

        Ok(Some(dict.into_any().unbind()))
    }

    pub fn cleanup_unused_blobs(&mut self) -> PyResult<usize> {
        self.inner.cleanup_unused_blobs().map_err(to_py_err)
    }

    /// Shut down the audio engine.
    pub fn shut_down(&mut self) {
        self.inner.shutdown();
    }
}
