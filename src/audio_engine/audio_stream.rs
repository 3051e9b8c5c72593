//! Audio Stream Module
//!
//! This module owns the master output stage:
//! - Device stream initialization and configuration through CPAL
//! - An offline stage rendered on demand, for tests and headless hosts
//! - Ring buffers carrying control messages in and voice notifications out
//! - Suspend/resume state of the stage

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Stream, StreamConfig};
use env_logger::{Builder, Env};
use rtrb::{Consumer, Producer, PushError, RingBuffer};

use crate::audio_engine::constants::{AUDIO_QUEUE_CAPACITY, CONTROL_QUEUE_CAPACITY, MAX_VOICES};
use crate::audio_engine::errors::EngineError;
use crate::audio_engine::mixer::RtMixer;
use crate::audio_engine::sample_loader::OutputFormat;
use crate::messages::{AudioMessage, ControlMessage, VoiceId};

/// Lifecycle of the master output stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// No stage has been built yet.
    Uninitialized,
    /// Built, but the clock is not running.
    Suspended,
    /// Producing audio.
    Running,
    /// Torn down by an explicit shutdown.
    Closed,
}

/// State shared with the audio thread outside the ring buffers.
///
/// The master gain is a plain value read at the start of every callback. The voice snapshot
/// lets the control side find voices that finished after their end notification was lost to a
/// full return ring.
struct StageShared {
    /// Master gain as `f32` bits.
    gain: AtomicU32,
    /// Highest voice id whose start request the audio thread has handled.
    handled_through: AtomicU64,
    /// Voice id held by each pool slot, 0 when idle.
    voices: [AtomicU64; MAX_VOICES],
    /// Notifications dropped because the return ring was full.
    lost_notifications: AtomicUsize,
}

impl StageShared {
    fn new(gain: f32) -> Self {
        Self {
            gain: AtomicU32::new(gain.to_bits()),
            handled_through: AtomicU64::new(0),
            voices: std::array::from_fn(|_| AtomicU64::new(0)),
            lost_notifications: AtomicUsize::new(0),
        }
    }

    fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    /// Publishes the pool after a callback. Must run on the audio thread only.
    fn publish(&self, mixer: &RtMixer, handled_through: u64, lost: usize) {
        for (slot, id) in self.voices.iter().zip(mixer.voice_ids()) {
            slot.store(id.map_or(0, |v| v.0), Ordering::Relaxed);
        }
        self.handled_through
            .store(handled_through, Ordering::Release);
        // Published last so a reader that sees the new count also sees this snapshot.
        if lost > 0 {
            self.lost_notifications.fetch_add(lost, Ordering::Release);
        }
    }
}

/// The audio-thread half: applies control messages and renders the mix.
struct StreamProcessor {
    consumer: Consumer<ControlMessage>,
    producer: Producer<AudioMessage>,
    mixer: RtMixer,
    shared: Arc<StageShared>,
    handled_through: u64,
}

impl StreamProcessor {
    fn process(&mut self, data: &mut [f32]) {
        self.mixer.set_master_gain(self.shared.gain());
        let mut lost = 0;

        // Process incoming messages in FIFO order
        while let Ok(message) = self.consumer.pop() {
            match message {
                ControlMessage::PlayVoice { voice, sample } => {
                    if !self.mixer.start_voice(voice, sample)
                        && self
                            .producer
                            .push(AudioMessage::VoiceDropped { voice })
                            .is_err()
                    {
                        lost += 1;
                    }
                    self.handled_through = self.handled_through.max(voice.0);
                }
                ControlMessage::StopVoice { voice } => {
                    self.mixer.stop_voice(voice);
                }
                ControlMessage::StopAll() => {
                    self.mixer.stop_all();
                }
            }
        }

        // Render audio
        let producer = &mut self.producer;
        self.mixer.render(data, |voice| {
            if producer.push(AudioMessage::VoiceEnded { voice }).is_err() {
                lost += 1;
            }
        });

        self.shared
            .publish(&self.mixer, self.handled_through, lost);
    }
}

/// An output stage that only advances when asked to render.
pub struct OfflineStream {
    processor: StreamProcessor,
}

impl OfflineStream {
    pub fn active_voices(&self) -> usize {
        self.processor.mixer.active_voices()
    }

    /// Gain the mixer applied during the last render.
    pub fn master_gain(&self) -> f32 {
        self.processor.mixer.master_gain()
    }
}

pub enum OutputStream {
    Device(Stream),
    Offline(OfflineStream),
}

/// Handle to the output stage with associated message channels
pub struct AudioStreamHandle {
    pub stream: OutputStream,
    pub producer: Producer<ControlMessage>,
    pub consumer: Consumer<AudioMessage>,
    pub format: OutputFormat,
    state: StageState,
    shared: Arc<StageShared>,
    /// Messages held back while the stage is not running.
    deferred: Vec<ControlMessage>,
    seen_lost_notifications: usize,
}

impl AudioStreamHandle {
    fn new(
        stream: OutputStream,
        producer: Producer<ControlMessage>,
        consumer: Consumer<AudioMessage>,
        format: OutputFormat,
        shared: Arc<StageShared>,
    ) -> Self {
        Self {
            stream,
            producer,
            consumer,
            format,
            state: StageState::Suspended,
            shared,
            deferred: Vec::new(),
            seen_lost_notifications: 0,
        }
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    /// Starts (or restarts) the stage clock and hands deferred messages to the audio thread.
    pub fn resume(&mut self) -> Result<(), EngineError> {
        if let OutputStream::Device(stream) = &self.stream {
            stream.play()?;
        }
        self.state = StageState::Running;
        self.flush_deferred()
    }

    /// Stops the stage clock. Later messages are held until the next resume.
    pub fn suspend(&mut self) -> Result<(), EngineError> {
        if let OutputStream::Device(stream) = &self.stream {
            stream.pause()?;
        }
        self.state = StageState::Suspended;
        Ok(())
    }

    /// Sets the master gain. The audio thread picks it up on its next callback.
    pub fn set_gain(&self, gain: f32) {
        self.shared.gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    /// Queues a control message for the audio thread.
    ///
    /// While the stage is not running nothing drains the ring, so messages are kept on this
    /// side instead. A stop cancels a held start of the same voice, which keeps the backlog
    /// to at most one start per playing slot.
    pub fn send(&mut self, message: ControlMessage) -> Result<(), EngineError> {
        if self.state != StageState::Running {
            self.defer(message);
            return Ok(());
        }
        self.flush_deferred()?;
        self.producer
            .push(message)
            .map_err(|_| EngineError::QueueFull)
    }

    fn defer(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::StopVoice { voice } => {
                let held = self.deferred.len();
                self.deferred.retain(|m| {
                    !matches!(m, ControlMessage::PlayVoice { voice: v, .. } if *v == voice)
                });
                if self.deferred.len() == held {
                    self.deferred.push(message);
                }
            }
            ControlMessage::StopAll() => {
                self.deferred.clear();
                self.deferred.push(message);
            }
            ControlMessage::PlayVoice { .. } => self.deferred.push(message),
        }
    }

    fn flush_deferred(&mut self) -> Result<(), EngineError> {
        let mut pending = std::mem::take(&mut self.deferred).into_iter();
        while let Some(message) = pending.next() {
            if let Err(PushError::Full(message)) = self.producer.push(message) {
                self.deferred.push(message);
                self.deferred.extend(pending);
                return Err(EngineError::QueueFull);
            }
        }
        Ok(())
    }

    /// Receives a message from the audio thread, if one is pending.
    pub fn try_recv(&mut self) -> Option<AudioMessage> {
        self.consumer.pop().ok()
    }

    /// True if notifications were lost since the last call.
    pub fn take_lost_notifications(&mut self) -> bool {
        let lost = self.shared.lost_notifications.load(Ordering::Acquire);
        if lost == self.seen_lost_notifications {
            return false;
        }
        self.seen_lost_notifications = lost;
        true
    }

    /// True once the audio thread has handled the start of `voice` and no longer holds it.
    ///
    /// A voice the pool refused also counts as finished.
    pub fn has_finished(&self, voice: VoiceId) -> bool {
        voice.0 <= self.shared.handled_through.load(Ordering::Acquire)
            && !self
                .shared
                .voices
                .iter()
                .any(|slot| slot.load(Ordering::Relaxed) == voice.0)
    }

    /// Renders `frames` frames on an offline stage.
    ///
    /// A suspended offline stage outputs silence and does not consume any messages. Returns
    /// `None` for device stages, which are driven by the hardware clock.
    pub fn render_offline(&mut self, frames: usize) -> Option<Vec<f32>> {
        let running = self.state == StageState::Running;
        let OutputStream::Offline(offline) = &mut self.stream else {
            return None;
        };

        let mut data = vec![0.0; frames * self.format.channels];
        if running {
            offline.processor.process(&mut data);
        }
        Some(data)
    }

    pub fn offline(&self) -> Option<&OfflineStream> {
        match &self.stream {
            OutputStream::Offline(offline) => Some(offline),
            OutputStream::Device(_) => None,
        }
    }
}

/// Setup and configure the logger for audio operations
pub fn setup_logger() {
    // Default to `info`; override via `RUST_LOG`, e.g. `RUST_LOG=debug` when troubleshooting.
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .try_init()
        .unwrap_or(()); // Ignore initialization errors
}

fn build_processor(
    channels: usize,
    initial_gain: f32,
) -> (
    StreamProcessor,
    Producer<ControlMessage>,
    Consumer<AudioMessage>,
    Arc<StageShared>,
) {
    // Create ring buffer for incoming messages (caller -> audio thread)
    let (producer_in, consumer_in) = RingBuffer::new(CONTROL_QUEUE_CAPACITY);

    // Create ring buffer for outgoing messages (audio thread -> caller)
    let (producer_out, consumer_out) = RingBuffer::new(AUDIO_QUEUE_CAPACITY);

    let shared = Arc::new(StageShared::new(initial_gain));
    let processor = StreamProcessor {
        consumer: consumer_in,
        producer: producer_out,
        mixer: RtMixer::new(channels, initial_gain),
        shared: Arc::clone(&shared),
        handled_through: 0,
    };
    (processor, producer_in, consumer_out, shared)
}

/// Create and configure the device output stage
///
/// This function:
/// 1. Sets up the default audio device
/// 2. Configures the stream with a fixed buffer size
/// 3. Creates ring buffers for message passing
/// 4. Initializes the mixer with the current master gain
/// 5. Builds the stream and leaves it suspended
pub fn create_audio_stream(
    initial_gain: f32,
    buffer_frames: u32,
) -> Result<AudioStreamHandle, EngineError> {
    setup_logger();

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(EngineError::NoOutputDevice)?;

    let config = device.default_output_config()?;
    let sample_rate = config.sample_rate();
    let channels = config.channels();

    log::info!(
        "Creating output stage... ({} ch@{} Hz)",
        channels,
        sample_rate
    );

    let (mut processor, producer, consumer, shared) =
        build_processor(channels as usize, initial_gain);

    let stream_config = StreamConfig {
        channels,
        sample_rate,
        buffer_size: BufferSize::Fixed(buffer_frames),
    };

    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            processor.process(data);
        },
        |err| {
            log::error!("Audio stream error: {}", err);
        },
        None,
    )?;

    // Some hosts start streams on creation; the stage stays silent until unlocked.
    if let Err(err) = stream.pause() {
        log::debug!("Could not pause freshly built stream: {err}");
    }

    let format = OutputFormat {
        channels: channels as usize,
        sample_rate,
    };
    Ok(AudioStreamHandle::new(
        OutputStream::Device(stream),
        producer,
        consumer,
        format,
        shared,
    ))
}

/// Create an offline output stage with the given format.
pub fn create_offline_stream(format: OutputFormat, initial_gain: f32) -> AudioStreamHandle {
    let (processor, producer, consumer, shared) = build_processor(format.channels, initial_gain);

    AudioStreamHandle::new(
        OutputStream::Offline(OfflineStream { processor }),
        producer,
        consumer,
        format,
        shared,
    )
}
