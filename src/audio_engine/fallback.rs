//! Degraded playback for sources the primary decoder rejects.
//!
//! A fallback session spools the source bytes into a temporary file, decodes it leniently on a
//! worker thread and plays the result once through the master gain stage. The result is never
//! cached, so every trigger pays the full decode cost again.
//!
//! Session lifecycle, driven by [`AudioEngine`](crate::audio_engine::AudioEngine):
//!
//! ```text
//! begin ──> Loading ──(decoded)──> Playing ──(voice ended)──> removed, source released
//!              │                      │
//!              └──(decode error)──────┴──(stop / start failure)──> removed, source released
//! ```

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread;

use tempfile::TempPath;

use crate::audio_engine::errors::{FallbackError, SampleLoadError};
use crate::audio_engine::sample_loader::{OutputFormat, decode_file_lenient};
use crate::messages::{DecodedBuffer, VoiceId};

/// A transient on-disk copy of a clip, deleted exactly once.
#[derive(Debug)]
pub struct TemporarySource {
    path: Option<TempPath>,
}

impl TemporarySource {
    /// Writes `bytes` to a fresh temporary file named with `extension`.
    pub fn create(bytes: &[u8], extension: Option<&str>) -> Result<Self, FallbackError> {
        if bytes.is_empty() {
            return Err(FallbackError::MissingSource);
        }

        let suffix = extension.map(|ext| format!(".{ext}")).unwrap_or_default();
        let mut file = tempfile::Builder::new()
            .prefix("soundboard-")
            .suffix(&suffix)
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;

        Ok(Self {
            path: Some(file.into_temp_path()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Deletes the file. Returns `true` only for the call that actually released it.
    pub fn release(&mut self) -> bool {
        let Some(path) = self.path.take() else {
            return false;
        };

        if let Err(err) = path.close() {
            log::warn!("Failed to delete temporary source: {err}");
        }
        true
    }

    pub fn is_released(&self) -> bool {
        self.path.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    /// The worker is still decoding.
    Loading,
    /// A voice is playing the decoded clip.
    Playing,
}

/// What the engine has to act on after polling the fallback player.
#[derive(Debug)]
pub enum FallbackUpdate {
    /// Decoding finished; the clip must be started on a voice.
    Ready {
        slot_id: String,
        buffer: DecodedBuffer,
    },

    /// The session ended in error and has already been cleaned up.
    Failed {
        slot_id: String,
        error: FallbackError,
    },
}

struct FallbackSession {
    session: u64,
    state: FallbackState,
    source: TemporarySource,
    voice: Option<VoiceId>,
}

impl FallbackSession {
    fn release(&mut self) {
        if self.source.release() {
            log::debug!("Released temporary source for session {}", self.session);
        }
    }
}

struct DecodedMessage {
    slot_id: String,
    session: u64,
    result: Result<DecodedBuffer, SampleLoadError>,
}

pub struct FallbackPlayer {
    sessions: HashMap<String, FallbackSession>,
    decoded_tx: Sender<DecodedMessage>,
    decoded_rx: Receiver<DecodedMessage>,
    next_session: u64,
}

impl FallbackPlayer {
    pub fn new() -> Self {
        let (decoded_tx, decoded_rx) = channel();
        Self {
            sessions: HashMap::new(),
            decoded_tx,
            decoded_rx,
            next_session: 0,
        }
    }

    /// Starts decoding `source` for `slot_id` in the background.
    ///
    /// Any previous session for the slot must have been stopped by the caller.
    pub fn begin(&mut self, slot_id: &str, source: TemporarySource, format: OutputFormat) {
        self.next_session += 1;
        let session = self.next_session;

        if let Some(path) = source.path().map(Path::to_path_buf) {
            let tx = self.decoded_tx.clone();
            let slot = slot_id.to_string();
            thread::spawn(move || {
                let result = decode_file_lenient(&path, format);
                let _ = tx.send(DecodedMessage {
                    slot_id: slot,
                    session,
                    result,
                });
            });
        }

        if let Some(mut previous) = self.sessions.insert(
            slot_id.to_string(),
            FallbackSession {
                session,
                state: FallbackState::Loading,
                source,
                voice: None,
            },
        ) {
            previous.release();
        }
    }

    /// Collects finished decodes. Results for sessions that were stopped meanwhile are dropped.
    pub fn poll(&mut self) -> Vec<FallbackUpdate> {
        let mut updates = Vec::new();
        loop {
            let message = match self.decoded_rx.try_recv() {
                Ok(message) => message,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };

            let current = self
                .sessions
                .get(&message.slot_id)
                .is_some_and(|s| s.session == message.session && s.voice.is_none());
            if !current {
                continue;
            }

            match message.result {
                Ok(buffer) => updates.push(FallbackUpdate::Ready {
                    slot_id: message.slot_id,
                    buffer,
                }),
                Err(err) => {
                    self.remove(&message.slot_id);
                    updates.push(FallbackUpdate::Failed {
                        slot_id: message.slot_id,
                        error: FallbackError::Decode(err),
                    });
                }
            }
        }
        updates
    }

    /// Records the voice now playing the slot's decoded clip.
    pub fn attach_voice(&mut self, slot_id: &str, voice: VoiceId) {
        if let Some(session) = self.sessions.get_mut(slot_id) {
            session.voice = Some(voice);
            session.state = FallbackState::Playing;
        }
    }

    /// Ends the session whose voice finished naturally. Returns its slot id.
    pub fn finish_voice(&mut self, voice: VoiceId) -> Option<String> {
        let slot_id = self
            .sessions
            .iter()
            .find(|(_, s)| s.voice == Some(voice))
            .map(|(slot_id, _)| slot_id.clone())?;
        self.remove(&slot_id);
        Some(slot_id)
    }

    /// Ends a slot's session, returning the voice to silence if one was playing.
    pub fn stop(&mut self, slot_id: &str) -> Option<VoiceId> {
        self.remove(slot_id).and_then(|s| s.voice)
    }

    pub fn stop_all(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            session.release();
        }
    }

    pub fn state(&self, slot_id: &str) -> Option<FallbackState> {
        self.sessions.get(slot_id).map(|s| s.state)
    }

    /// True from a successful `begin` until the session ends, errors, or is stopped.
    pub fn is_playing(&self, slot_id: &str) -> bool {
        self.sessions.contains_key(slot_id)
    }

    /// Voices of the sessions that reached the playing state.
    pub fn voices(&self) -> impl Iterator<Item = VoiceId> + '_ {
        self.sessions.values().filter_map(|s| s.voice)
    }

    pub fn source_path(&self, slot_id: &str) -> Option<PathBuf> {
        self.sessions
            .get(slot_id)
            .and_then(|s| s.source.path())
            .map(Path::to_path_buf)
    }

    fn remove(&mut self, slot_id: &str) -> Option<FallbackSession> {
        let mut session = self.sessions.remove(slot_id)?;
        session.release();
        Some(session)
    }
}

impl Default for FallbackPlayer {
    fn default() -> Self {
        Self::new()
    }
}
