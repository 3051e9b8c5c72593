//! Audio Engine Module
//!
//! This module provides low-latency one-shot playback for the soundboard.
//! It is organized into sub-modules, each with a specific responsibility:
//!
//! - [`audio_stream`]: output stage (CPAL device or offline) and real-time callback
//! - [`channels`]: channel layout conversion
//! - [`constants`]: Configuration constants and limits
//! - [`decode_cache`]: decoded clips keyed by slot id
//! - [`errors`]: Audio-specific error types
//! - [`fallback`]: degraded playback for sources the primary decoder rejects
//! - [`mixer`]: Real-time mixing engine
//! - [`sample_loader`]: Audio decoding and resampling
//! - [`voice`]: Voice management and lifecycle
//! - [`volume`]: volume percentage to gain mapping
//!
//! The main [`AudioEngine`] struct is the single context object owning the output stage, the
//! decode cache and the set of active playbacks. It is driven from one thread; the only other
//! threads are the real-time audio callback (reached through ring buffers) and short-lived
//! decode workers.

use std::collections::HashMap;

use crate::messages::{AudioMessage, ControlMessage, DecodedBuffer, EngineEvent, VoiceId};
use crate::store::AssetFetcher;

mod audio_stream;
mod channels;
pub mod constants;
mod decode_cache;
pub mod errors;
mod fallback;
mod mixer;
mod sample_loader;
mod voice;
mod volume;

#[cfg(test)]
pub(crate) mod test_support;

pub use audio_stream::{OfflineStream, StageState, setup_logger};
pub use decode_cache::{DecodeCache, DecodeOutcome, PreloadReport, PreloadRequest};
pub use errors::{DecodeFailure, EngineError, FallbackError, SampleLoadError};
pub use fallback::FallbackState;
pub use sample_loader::{OutputFormat, extension_hint};
pub use volume::{VolumeController, clamp_volume, gain_for_volume};

use audio_stream::{AudioStreamHandle, create_audio_stream, create_offline_stream};
use constants::{OUTPUT_BUFFER_FRAMES, PREFERRED_OUTPUT_CHANNELS, PREFERRED_OUTPUT_SAMPLE_RATE};
use fallback::{FallbackPlayer, FallbackUpdate, TemporarySource};

/// Where the master output stage sends its audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputBackend {
    /// The host's default output device.
    Device,

    /// A stage that only advances when [`AudioEngine::render_offline`] is called.
    Offline { channels: usize, sample_rate: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub backend: OutputBackend,
    /// Device callback size in frames. Ignored by the offline backend.
    pub buffer_frames: u32,
}

impl EngineConfig {
    pub fn offline(channels: usize, sample_rate: u32) -> Self {
        Self {
            backend: OutputBackend::Offline {
                channels,
                sample_rate,
            },
            buffer_frames: OUTPUT_BUFFER_FRAMES,
        }
    }

    /// Format clips are decoded to before a stage exists.
    fn expected_format(&self) -> OutputFormat {
        match self.backend {
            OutputBackend::Device => OutputFormat {
                channels: PREFERRED_OUTPUT_CHANNELS,
                sample_rate: PREFERRED_OUTPUT_SAMPLE_RATE,
            },
            OutputBackend::Offline {
                channels,
                sample_rate,
            } => OutputFormat {
                channels,
                sample_rate,
            },
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: OutputBackend::Device,
            buffer_frames: OUTPUT_BUFFER_FRAMES,
        }
    }
}

type EndedCallback = Box<dyn FnOnce() + Send + 'static>;

struct ActivePlayback {
    voice: VoiceId,
    on_ended: Option<EndedCallback>,
}

pub struct AudioEngine {
    config: EngineConfig,
    stage: Option<AudioStreamHandle>,
    closed: bool,
    unlocked: bool,
    volume: VolumeController,
    cache: DecodeCache,
    active: HashMap<String, ActivePlayback>,
    fallback: FallbackPlayer,
    next_voice: u64,
}

impl AudioEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            stage: None,
            closed: false,
            unlocked: false,
            volume: VolumeController::default(),
            cache: DecodeCache::new(config.expected_format()),
            active: HashMap::new(),
            fallback: FallbackPlayer::new(),
            next_voice: 0,
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Builds the output stage if it does not exist yet.
    ///
    /// The stage starts suspended and only produces sound once the engine is unlocked. Cached
    /// clips are dropped if the stage's format differs from the one they were decoded for.
    pub fn init(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        if self.stage.is_some() {
            return Ok(());
        }

        let gain = self.volume.gain();
        let handle = match self.config.backend {
            OutputBackend::Device => create_audio_stream(gain, self.config.buffer_frames)?,
            OutputBackend::Offline {
                channels,
                sample_rate,
            } => create_offline_stream(
                OutputFormat {
                    channels,
                    sample_rate,
                },
                gain,
            ),
        };

        log::info!(
            "Output stage ready ({} ch@{} Hz, gain {:.3})",
            handle.format.channels,
            handle.format.sample_rate,
            gain
        );
        self.cache.retarget(handle.format);
        self.stage = Some(handle);

        if self.unlocked {
            self.request_resume();
        }
        Ok(())
    }

    pub fn stage_state(&self) -> StageState {
        if self.closed {
            return StageState::Closed;
        }
        self.stage
            .as_ref()
            .map_or(StageState::Uninitialized, AudioStreamHandle::state)
    }

    /// Format of the stage, or the one it is expected to have once built.
    pub fn output_format(&self) -> OutputFormat {
        self.stage
            .as_ref()
            .map_or(self.cache.format(), |stage| stage.format)
    }

    /// Records the user gesture that allows the stage to produce sound.
    ///
    /// The transition happens once; returns `true` only for the call that performed it.
    pub fn unlock(&mut self) -> bool {
        if self.unlocked {
            return false;
        }
        self.unlocked = true;
        log::info!("Audio output unlocked");

        if let Err(err) = self.init() {
            log::warn!("Output stage unavailable after unlock: {err}");
            return true;
        }
        self.request_resume();
        true
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    /// Fire-and-forget resume of a suspended stage.
    ///
    /// Ignored while locked. Failures are logged and otherwise discarded: playback is
    /// optimistic and may stay silent until a later resume succeeds.
    fn request_resume(&mut self) {
        if !self.unlocked {
            log::debug!("Resume request discarded, output is still locked");
            return;
        }
        let Some(stage) = self.stage.as_mut() else {
            return;
        };
        if stage.state() != StageState::Suspended {
            return;
        }
        if let Err(err) = stage.resume() {
            log::warn!("Failed to resume output stage: {err}");
        }
    }

    /// Stores a volume percentage and applies its gain immediately if the stage exists.
    ///
    /// The gain does not travel through the control queue, so any number of changes can be
    /// made while the stage is suspended.
    pub fn set_volume(&mut self, volume: i32) {
        let gain = self.volume.set_volume(volume);
        if let Some(stage) = self.stage.as_ref() {
            stage.set_gain(gain);
        }
    }

    pub fn volume(&self) -> u8 {
        self.volume.volume()
    }

    /// Gain corresponding to the current volume.
    pub fn applied_gain(&self) -> f32 {
        self.volume.gain()
    }

    pub fn preload(
        &mut self,
        slot_id: &str,
        url: &str,
        fetcher: &dyn AssetFetcher,
    ) -> Result<DecodedBuffer, DecodeFailure> {
        self.cache.preload(slot_id, url, fetcher)
    }

    pub fn preload_all(
        &mut self,
        requests: &[PreloadRequest],
        fetcher: &(dyn AssetFetcher + Sync),
    ) -> PreloadReport {
        self.cache.preload_all(requests, fetcher)
    }

    /// Decodes in-memory bytes into the cache, classifying failures for the caller.
    pub fn decode(&mut self, slot_id: &str, bytes: Vec<u8>, hint: Option<&str>) -> DecodeOutcome {
        self.cache.decode(slot_id, bytes, hint).into()
    }

    pub fn cached(&self, slot_id: &str) -> Option<DecodedBuffer> {
        self.cache.get(slot_id)
    }

    pub fn evict(&mut self, slot_id: &str) -> bool {
        self.cache.evict(slot_id)
    }

    pub fn cache(&self) -> &DecodeCache {
        &self.cache
    }

    /// Starts `buffer` for `slot_id` from its first frame.
    ///
    /// Never blocks: a suspended stage gets a resume request that is not waited on, and a
    /// playback already tracked for the slot is stopped first. The stage is never built here;
    /// without one this fails with [`EngineError::NotInitialized`]. `on_ended` runs from
    /// [`poll_events`](Self::poll_events) when the clip finishes naturally; it is dropped
    /// without being called if the playback is stopped.
    pub fn play(
        &mut self,
        slot_id: &str,
        buffer: DecodedBuffer,
        on_ended: impl FnOnce() + Send + 'static,
    ) -> Result<VoiceId, EngineError> {
        self.require_stage()?;
        self.request_resume();
        self.stop(slot_id);

        let voice = self.allocate_voice();
        self.active.insert(
            slot_id.to_string(),
            ActivePlayback {
                voice,
                on_ended: Some(Box::new(on_ended)),
            },
        );

        if let Err(err) = self.send(ControlMessage::PlayVoice {
            voice,
            sample: buffer,
        }) {
            self.active.remove(slot_id);
            log::warn!("Failed to start playback for slot {slot_id}: {err}");
            return Err(err);
        }

        log::debug!("Playing slot {slot_id} on voice {}", voice.0);
        Ok(voice)
    }

    /// Stops whatever is playing for a slot. A no-op when nothing is.
    pub fn stop(&mut self, slot_id: &str) {
        if let Some(active) = self.active.remove(slot_id) {
            self.silence(active.voice);
        }
        if let Some(voice) = self.fallback.stop(slot_id) {
            self.silence(voice);
        }
    }

    pub fn stop_all(&mut self) {
        self.active.clear();
        self.fallback.stop_all();
        if self.stage.is_some()
            && let Err(err) = self.send(ControlMessage::StopAll())
        {
            log::warn!("Failed to stop all voices: {err}");
        }
    }

    /// True while a primary playback is tracked for the slot.
    pub fn is_playing(&self, slot_id: &str) -> bool {
        self.active.contains_key(slot_id)
    }

    pub fn is_fallback_playing(&self, slot_id: &str) -> bool {
        self.fallback.is_playing(slot_id)
    }

    pub fn fallback_state(&self, slot_id: &str) -> Option<FallbackState> {
        self.fallback.state(slot_id)
    }

    /// Plays bytes the primary decoder rejected, through a temporary file and lenient decode.
    ///
    /// Returns once the session is registered; decoding continues in the background and the
    /// outcome is reported by [`poll_events`](Self::poll_events). Construction failures are
    /// returned directly and never leave the slot in a playing state.
    pub fn play_via_fallback(
        &mut self,
        slot_id: &str,
        bytes: &[u8],
        hint: Option<&str>,
    ) -> Result<(), FallbackError> {
        let source = TemporarySource::create(bytes, hint)?;
        self.require_stage()?;

        self.request_resume();
        self.stop(slot_id);

        let format = self.output_format();
        self.fallback.begin(slot_id, source, format);
        log::debug!("Fallback playback requested for slot {slot_id}");
        Ok(())
    }

    /// Applies everything the audio thread and fallback workers reported since the last call.
    ///
    /// `on_ended` callbacks run here, on the caller's thread.
    pub fn poll_events(&mut self) -> Vec<EngineEvent> {
        let mut messages = Vec::new();
        let mut lost = false;
        if let Some(stage) = self.stage.as_mut() {
            while let Some(message) = stage.try_recv() {
                messages.push(message);
            }
            lost = stage.take_lost_notifications();
        }

        let mut events = Vec::new();
        for message in messages {
            match message {
                AudioMessage::VoiceEnded { voice } => {
                    events.extend(self.end_voice(voice));
                }
                AudioMessage::VoiceDropped { voice } => {
                    if let Some((slot_id, _)) = self.take_active(voice) {
                        log::warn!("Output stage dropped playback for slot {slot_id}");
                        events.push(EngineEvent::PlaybackFailed {
                            slot_id,
                            error: "output stage refused to start the voice".to_string(),
                        });
                    } else if let Some(slot_id) = self.fallback.finish_voice(voice) {
                        log::warn!("Output stage dropped fallback playback for slot {slot_id}");
                        events.push(EngineEvent::FallbackFailed {
                            slot_id,
                            error: "output stage refused to start the voice".to_string(),
                        });
                    }
                }
            }
        }

        if lost {
            events.extend(self.reap_finished_voices());
        }

        for update in self.fallback.poll() {
            match update {
                FallbackUpdate::Ready { slot_id, buffer } => {
                    let voice = self.allocate_voice();
                    match self.send(ControlMessage::PlayVoice {
                        voice,
                        sample: buffer,
                    }) {
                        Ok(()) => self.fallback.attach_voice(&slot_id, voice),
                        Err(err) => {
                            self.fallback.stop(&slot_id);
                            let error = FallbackError::Start(err);
                            log::warn!("Fallback playback failed for slot {slot_id}: {error}");
                            events.push(EngineEvent::FallbackFailed {
                                slot_id,
                                error: error.to_string(),
                            });
                        }
                    }
                }
                FallbackUpdate::Failed { slot_id, error } => {
                    log::warn!("Fallback playback failed for slot {slot_id}: {error}");
                    events.push(EngineEvent::FallbackFailed {
                        slot_id,
                        error: error.to_string(),
                    });
                }
            }
        }

        events
    }

    /// Renders a block on an offline stage. `None` without a stage or for device output.
    pub fn render_offline(&mut self, frames: usize) -> Option<Vec<f32>> {
        self.stage.as_mut()?.render_offline(frames)
    }

    pub fn offline_stage(&self) -> Option<&OfflineStream> {
        self.stage.as_ref()?.offline()
    }

    /// Stops all playback and tears the output stage down for good.
    ///
    /// The unlock is kept; it is process-wide and never reverts.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.stop_all();
        if let Some(mut stage) = self.stage.take()
            && let Err(err) = stage.suspend()
        {
            log::debug!("Failed to suspend output stage during shutdown: {err}");
        }
        self.cache.clear();
        self.closed = true;
        log::info!("Audio engine shut down");
    }

    /// Ends the playback owning `voice`, running its callback. Stale voices match nothing.
    fn end_voice(&mut self, voice: VoiceId) -> Option<EngineEvent> {
        if let Some((slot_id, active)) = self.take_active(voice) {
            if let Some(on_ended) = active.on_ended {
                on_ended();
            }
            return Some(EngineEvent::Ended { slot_id });
        }
        self.fallback
            .finish_voice(voice)
            .map(|slot_id| EngineEvent::FallbackEnded { slot_id })
    }

    /// Ends tracked playbacks whose voices the audio thread no longer holds.
    ///
    /// Only needed after end notifications were lost to a full return ring.
    fn reap_finished_voices(&mut self) -> Vec<EngineEvent> {
        let Some(stage) = self.stage.as_ref() else {
            return Vec::new();
        };
        let finished: Vec<VoiceId> = self
            .active
            .values()
            .map(|active| active.voice)
            .chain(self.fallback.voices())
            .filter(|voice| stage.has_finished(*voice))
            .collect();

        log::warn!(
            "Voice notifications were lost, recovered {} finished playbacks",
            finished.len()
        );
        finished
            .into_iter()
            .filter_map(|voice| self.end_voice(voice))
            .collect()
    }

    fn require_stage(&self) -> Result<(), EngineError> {
        match (&self.stage, self.closed) {
            (Some(_), _) => Ok(()),
            (None, true) => Err(EngineError::Closed),
            (None, false) => Err(EngineError::NotInitialized),
        }
    }

    fn allocate_voice(&mut self) -> VoiceId {
        self.next_voice += 1;
        VoiceId(self.next_voice)
    }

    fn send(&mut self, message: ControlMessage) -> Result<(), EngineError> {
        let stage = self.stage.as_mut().ok_or(if self.closed {
            EngineError::Closed
        } else {
            EngineError::NotInitialized
        })?;
        stage.send(message)
    }

    fn silence(&mut self, voice: VoiceId) {
        if let Err(err) = self.send(ControlMessage::StopVoice { voice }) {
            log::warn!("Failed to stop voice {}: {err}", voice.0);
        }
    }

    /// Removes the active playback owning `voice`. Stale voices match nothing.
    fn take_active(&mut self, voice: VoiceId) -> Option<(String, ActivePlayback)> {
        let slot_id = self
            .active
            .iter()
            .find(|(_, active)| active.voice == voice)
            .map(|(slot_id, _)| slot_id.clone())?;
        self.active.remove_entry(&slot_id)
    }
}

impl Default for AudioEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::audio_engine::test_support::{constant_clip_wav, pcm16_wav_bytes, run_until};

    fn mono_engine() -> AudioEngine {
        let mut engine = AudioEngine::new(EngineConfig::offline(1, 48_000));
        engine.set_volume(100);
        engine
    }

    fn ramp(frames: usize) -> DecodedBuffer {
        DecodedBuffer::new(1, 48_000, (0..frames).map(|i| i as f32 / 1000.0).collect())
    }

    #[test]
    fn test_retrigger_restarts_from_zero() {
        let mut engine = mono_engine();
        engine.unlock();
        engine.play("dog", ramp(100), || {}).unwrap();
        engine.render_offline(10).unwrap();

        engine.play("dog", ramp(100), || {}).unwrap();
        let output = engine.render_offline(3).unwrap();

        assert!(engine.is_playing("dog"));
        assert_eq!(engine.active.len(), 1);
        assert_eq!(engine.offline_stage().unwrap().active_voices(), 1);
        assert!((output[0] - 0.0).abs() < 1e-6);
        assert!((output[1] - 0.001).abs() < 1e-6);
        assert!((output[2] - 0.002).abs() < 1e-6);
    }

    #[test]
    fn test_stale_end_does_not_remove_retriggered_playback() {
        let mut engine = mono_engine();
        engine.unlock();
        engine.play("cat", ramp(4), || {}).unwrap();
        // First voice ends in the audio thread but is not polled yet.
        engine.render_offline(8).unwrap();

        engine.play("cat", ramp(100), || {}).unwrap();
        let events = engine.poll_events();

        assert!(events.is_empty());
        assert!(engine.is_playing("cat"));
    }

    #[test]
    fn test_locked_stage_is_silent_until_unlock() {
        let mut engine = mono_engine();
        engine.init().unwrap();
        engine
            .play("cow", DecodedBuffer::new(1, 48_000, vec![0.5; 64]), || {})
            .unwrap();

        assert_eq!(engine.stage_state(), StageState::Suspended);
        assert!(engine.is_playing("cow"));
        let silent = engine.render_offline(8).unwrap();
        assert!(silent.iter().all(|&s| s == 0.0));

        assert!(engine.unlock());
        assert!(!engine.unlock());
        assert_eq!(engine.stage_state(), StageState::Running);
        let output = engine.render_offline(8).unwrap();
        assert!(output.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_zero_volume_plays_silently() {
        let mut engine = mono_engine();
        engine.unlock();
        engine.set_volume(0);

        let voice = engine.play("duck", DecodedBuffer::new(1, 48_000, vec![0.8; 64]), || {});
        let output = engine.render_offline(16).unwrap();

        assert!(voice.is_ok());
        assert!(engine.is_playing("duck"));
        assert_eq!(engine.offline_stage().unwrap().active_voices(), 1);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_volume_before_init_is_applied_at_init() {
        let mut engine = AudioEngine::new(EngineConfig::offline(2, 44_100));
        engine.set_volume(50);
        assert_eq!(engine.stage_state(), StageState::Uninitialized);

        engine.init().unwrap();

        assert_eq!(engine.volume(), 50);
        let gain = engine.offline_stage().unwrap().master_gain();
        assert!((gain - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_volume_change_reaches_stage() {
        let mut engine = mono_engine();
        engine.unlock();
        engine.set_volume(-5);
        engine.render_offline(1).unwrap();

        assert_eq!(engine.volume(), 0);
        assert_eq!(engine.offline_stage().unwrap().master_gain(), 0.0);
    }

    #[test]
    fn test_on_ended_runs_once_and_removes_handle() {
        let mut engine = mono_engine();
        engine.unlock();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        engine
            .play("sheep", ramp(32), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        engine.render_offline(64).unwrap();
        let events = engine.poll_events();

        assert_eq!(
            events,
            vec![EngineEvent::Ended {
                slot_id: "sheep".to_string()
            }]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!engine.is_playing("sheep"));
        assert!(engine.poll_events().is_empty());
    }

    #[test]
    fn test_stop_is_idempotent_and_skips_callback() {
        let mut engine = mono_engine();
        engine.unlock();
        engine.stop("pig");

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        engine
            .play("pig", ramp(32), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        engine.stop("pig");
        engine.stop("pig");

        let output = engine.render_offline(64).unwrap();
        assert!(output.iter().all(|&s| s == 0.0));
        assert!(!engine.is_playing("pig"));
        assert!(engine.poll_events().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_all_stops_every_slot() {
        let mut engine = mono_engine();
        engine.unlock();
        let clip = DecodedBuffer::new(1, 48_000, vec![0.1; 256]);
        engine.play("horse", clip.clone(), || {}).unwrap();
        engine.play("frog", clip, || {}).unwrap();

        engine.stop_all();
        let output = engine.render_offline(16).unwrap();

        assert!(!engine.is_playing("horse"));
        assert!(!engine.is_playing("frog"));
        assert_eq!(engine.offline_stage().unwrap().active_voices(), 0);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_channel_mismatch_reports_playback_failure() {
        let mut engine = AudioEngine::new(EngineConfig::offline(2, 48_000));
        engine.unlock();
        engine
            .play("lion", DecodedBuffer::new(1, 48_000, vec![0.1; 16]), || {})
            .unwrap();

        engine.render_offline(4).unwrap();
        let events = engine.poll_events();

        assert!(matches!(
            events.as_slice(),
            [EngineEvent::PlaybackFailed { slot_id, .. }] if slot_id == "lion"
        ));
        assert!(!engine.is_playing("lion"));
    }

    #[test]
    fn test_decode_outcomes() {
        let mut engine = mono_engine();

        let ready = engine.decode("custom-1", constant_clip_wav(48_000, 32, 1000), Some("wav"));
        assert!(matches!(ready, DecodeOutcome::Ready(ref b) if b.frames() == 32));
        assert!(engine.cached("custom-1").is_some());

        let fallback = engine.decode("custom-1", b"definitely not audio".to_vec(), None);
        assert!(matches!(fallback, DecodeOutcome::FallbackRequired(_)));
        assert!(engine.cached("custom-1").is_none());

        let failed = engine.decode("custom-2", Vec::new(), None);
        assert!(matches!(failed, DecodeOutcome::Failed(_)));
    }

    #[test]
    fn test_fallback_plays_to_end_and_releases_source() {
        let mut engine = AudioEngine::new(EngineConfig::offline(2, 44_100));
        engine.set_volume(100);
        engine.unlock();
        let quad = pcm16_wav_bytes(4, 44_100, &[8_000; 64]);

        engine
            .play_via_fallback("custom-1", &quad, Some("wav"))
            .unwrap();
        assert!(engine.is_fallback_playing("custom-1"));
        let path = engine.fallback.source_path("custom-1").unwrap();
        assert!(path.exists());

        let events = run_until(&mut engine, Duration::from_secs(5), |events| {
            !events.is_empty()
        });

        assert_eq!(
            events,
            vec![EngineEvent::FallbackEnded {
                slot_id: "custom-1".to_string()
            }]
        );
        assert!(!engine.is_fallback_playing("custom-1"));
        assert!(!path.exists());
    }

    #[test]
    fn test_fallback_error_releases_source() {
        let mut engine = AudioEngine::new(EngineConfig::offline(2, 44_100));
        engine.unlock();

        engine
            .play_via_fallback("custom-2", b"still not audio", Some("webm"))
            .unwrap();
        let path = engine.fallback.source_path("custom-2").unwrap();

        let events = run_until(&mut engine, Duration::from_secs(5), |events| {
            !events.is_empty()
        });

        assert!(matches!(
            events.as_slice(),
            [EngineEvent::FallbackFailed { slot_id, .. }] if slot_id == "custom-2"
        ));
        assert!(!engine.is_fallback_playing("custom-2"));
        assert!(!path.exists());
    }

    #[test]
    fn test_fallback_without_source_never_plays() {
        let mut engine = mono_engine();
        let result = engine.play_via_fallback("custom-3", &[], None);

        assert!(matches!(result, Err(FallbackError::MissingSource)));
        assert!(!engine.is_fallback_playing("custom-3"));
        assert_eq!(engine.fallback_state("custom-3"), None);
    }

    #[test]
    fn test_stop_ends_fallback_session() {
        let mut engine = AudioEngine::new(EngineConfig::offline(2, 44_100));
        engine.init().unwrap();
        let clip = pcm16_wav_bytes(2, 44_100, &[100; 64]);
        engine.play_via_fallback("custom-4", &clip, Some("wav")).unwrap();
        let path = engine.fallback.source_path("custom-4").unwrap();

        engine.stop("custom-4");

        assert!(!engine.is_fallback_playing("custom-4"));
        assert!(!path.exists());
    }

    #[test]
    fn test_shutdown_closes_stage() {
        let mut engine = mono_engine();
        engine.unlock();
        engine.play("owl", ramp(64), || {}).unwrap();

        engine.shutdown();

        assert_eq!(engine.stage_state(), StageState::Closed);
        assert!(engine.is_unlocked());
        assert!(!engine.is_playing("owl"));
        assert!(matches!(
            engine.play("owl", ramp(64), || {}),
            Err(EngineError::Closed)
        ));
        assert!(engine.render_offline(4).is_none());
    }

    #[test]
    fn test_volume_changes_while_locked_do_not_block_playback() {
        let mut engine = mono_engine();
        engine.init().unwrap();
        for i in 0..1_100 {
            engine.set_volume(i % 100);
        }
        engine.set_volume(60);

        engine
            .play("goat", DecodedBuffer::new(1, 48_000, vec![1.0; 64]), || {})
            .unwrap();
        engine.unlock();
        let output = engine.render_offline(4).unwrap();

        let gain = gain_for_volume(60);
        assert_eq!(engine.offline_stage().unwrap().master_gain(), gain);
        assert!(output.iter().all(|&s| (s - gain).abs() < 1e-6));
    }

    #[test]
    fn test_retriggers_while_locked_keep_one_voice_per_slot() {
        let mut engine = mono_engine();
        engine.init().unwrap();
        for _ in 0..2_000 {
            engine.play("hen", ramp(16), || {}).unwrap();
            engine.play("bee", ramp(16), || {}).unwrap();
        }

        engine.unlock();
        engine.render_offline(4).unwrap();

        assert_eq!(engine.offline_stage().unwrap().active_voices(), 2);
    }

    #[test]
    fn test_playback_ends_even_when_notifications_overflow() {
        let mut engine = mono_engine();
        engine.unlock();
        let calls = Arc::new(AtomicUsize::new(0));
        let clip = DecodedBuffer::new(1, 48_000, vec![0.1; 1]);

        for i in 0..1_100 {
            let counter = Arc::clone(&calls);
            engine
                .play(&format!("slot-{i}"), clip.clone(), move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            if (i + 1) % constants::MAX_VOICES == 0 {
                engine.render_offline(1).unwrap();
            }
        }
        engine.render_offline(1).unwrap();

        let events = engine.poll_events();

        assert_eq!(events.len(), 1_100);
        assert!(events.iter().all(|e| matches!(e, EngineEvent::Ended { .. })));
        assert!(engine.active.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1_100);
        assert!(engine.poll_events().is_empty());
    }

    #[test]
    fn test_play_does_not_build_stage() {
        let mut engine = mono_engine();

        let result = engine.play("bat", ramp(8), || {});

        assert!(matches!(result, Err(EngineError::NotInitialized)));
        assert_eq!(engine.stage_state(), StageState::Uninitialized);
        assert!(!engine.is_playing("bat"));
    }
}
