//! # Player - Playback State Machine & Worker Thread
//!
//! One background worker per player drives the [`DecodeEngine`]. Every
//! decoded frame goes to the attached recording [`Writer`] (if any) first
//! and then into the shared [`FrameRingBuffer`] for the display side.
//!
//! ```text
//!            start()              pause()
//! Stopped ───────────► Running ◄──────────► Paused
//!    ▲                    │       resume()     │
//!    └────────────────────┴────────────────────┘
//!          stop() / end of stream
//! ```
//!
//! Worker phases:
//! 1. prepare: open the engine, configure pacing, `OpenStreamSuccess`
//!    (or `OpenStreamFail` and exit)
//! 2. task: decode, record, push, pace until `Stopped`
//! 3. finish: close engine and writer, `StreamClose`
//!
//! The worker never blocks on the event consumer and no error crosses the
//! thread boundary: failures become [`StreamEvent`]s.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{ConfigProvider, VideoParams};
use crate::decode::DecodeEngine;
use crate::frame::DecodedFrame;
use crate::frame_queue::FrameRingBuffer;
use crate::media::{MediaKind, MediaSource};
use crate::sync::{AnchorReset, Pacer, SleepPolicy, SystemClock};
use crate::writer::Writer;

/// Sleep per iteration while paused
const PAUSE_POLL: Duration = Duration::from_millis(2);

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("no media source set")]
    NoSource,
    #[error("player is not running")]
    NotRunning,
    #[error("recording already active")]
    AlreadyRecording,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Stopped,
    Running,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    OpenStreamSuccess,
    OpenStreamFail { message: String },
    StreamEnd,
    StreamClose,
    StreamError { message: String },
    RecordStarted { path: PathBuf },
    RecordStopped { path: PathBuf, frames: u64 },
}

pub type EventCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

// ============================================================================
// Shared State
// ============================================================================

struct Control {
    state: PlaybackState,
    /// Set by `stop()` so a slow open cannot flip the state back to Running
    stop_requested: bool,
}

#[derive(Default)]
struct RecordSlot {
    /// Path waiting for the worker to open a writer on the next frame
    request: Option<PathBuf>,
    active: Option<Arc<Writer>>,
}

struct Shared {
    control: Mutex<Control>,
    queue: Arc<FrameRingBuffer>,
    record: Mutex<RecordSlot>,
    callback: RwLock<Option<EventCallback>>,
    anchor: Mutex<AnchorReset>,
    fps: Mutex<f64>,
}

impl Shared {
    fn state(&self) -> PlaybackState {
        self.control.lock().state
    }

    /// Worker-side transition to Stopped; the worker is winding down
    fn wind_down(&self) {
        let mut control = self.control.lock();
        control.state = PlaybackState::Stopped;
        control.stop_requested = true;
    }

    fn emit(&self, event: StreamEvent) {
        tracing::debug!(?event, "stream event");
        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(event);
        }
    }

    fn emit_all(&self, events: Vec<StreamEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

/// Close and detach the active writer, if any
fn detach_writer(slot: &mut RecordSlot, events: &mut Vec<StreamEvent>) {
    let Some(writer) = slot.active.take() else {
        return;
    };
    if let Err(e) = writer.close() {
        tracing::warn!(error = %e, "closing recording failed");
        events.push(StreamEvent::StreamError {
            message: e.to_string(),
        });
    }
    let path = writer.output().unwrap_or_default();
    tracing::info!(path = %path.display(), frames = writer.frames_written(), "recording stopped");
    events.push(StreamEvent::RecordStopped {
        path,
        frames: writer.frames_written(),
    });
}

/// Detach the active writer only if a stop was requested on it
fn detach_stopping_writer(slot: &mut RecordSlot, events: &mut Vec<StreamEvent>) {
    if slot.active.as_ref().is_some_and(|w| w.is_stop()) {
        detach_writer(slot, events);
    }
}

fn join_worker(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        tracing::error!("worker thread panicked");
    }
}

// ============================================================================
// Player
// ============================================================================

pub struct Player {
    config: Arc<dyn ConfigProvider>,
    media: Mutex<MediaSource>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    pub fn new(config: Arc<dyn ConfigProvider>) -> Self {
        let params = VideoParams::from_config(config.as_ref());
        Self {
            config,
            media: Mutex::new(MediaSource::None),
            shared: Arc::new(Shared {
                control: Mutex::new(Control {
                    state: PlaybackState::Stopped,
                    stop_requested: false,
                }),
                queue: Arc::new(FrameRingBuffer::new(params.frame_cache)),
                record: Mutex::new(RecordSlot::default()),
                callback: RwLock::new(None),
                anchor: Mutex::new(AnchorReset::default()),
                fps: Mutex::new(0.0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Source for the next `start()` from Stopped
    pub fn set_media(&self, media: MediaSource) {
        *self.media.lock() = media;
    }

    pub fn media(&self) -> MediaSource {
        self.media.lock().clone()
    }

    /// Callback invoked on the worker thread for every event
    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(StreamEvent) + Send + Sync + 'static,
    {
        *self.shared.callback.write() = Some(Arc::new(callback));
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    /// Start playback. From Paused this only resumes; while a worker is
    /// already running it does nothing.
    pub fn start(&self) -> Result<(), PlayerError> {
        {
            let mut control = self.shared.control.lock();
            if control.state == PlaybackState::Paused {
                control.state = PlaybackState::Running;
                self.shared.anchor.lock().reset();
                return Ok(());
            }
        }

        let mut worker = self.worker.lock();
        if let Some(handle) = worker.as_ref() {
            if !handle.is_finished() && !self.shared.control.lock().stop_requested {
                return Ok(());
            }
        }
        if let Some(handle) = worker.take() {
            join_worker(handle);
        }

        let media = self.media();
        if media.kind() == MediaKind::None {
            return Err(PlayerError::NoSource);
        }

        self.shared.control.lock().stop_requested = false;
        self.shared.queue.clear();
        *self.shared.fps.lock() = 0.0;

        let pacer = Pacer::new();
        *self.shared.anchor.lock() = pacer.anchor_handle();

        let shared = self.shared.clone();
        let config = self.config.clone();
        let handle = thread::Builder::new()
            .name("vireo-worker".to_string())
            .spawn(move || run_worker(shared, config, media, pacer))
            .map_err(PlayerError::Spawn)?;
        *worker = Some(handle);
        Ok(())
    }

    /// Pause delivery. A recording with a pending stop is closed here.
    pub fn pause(&self) {
        {
            let mut control = self.shared.control.lock();
            if control.state != PlaybackState::Running {
                return;
            }
            control.state = PlaybackState::Paused;
            self.shared.anchor.lock().reset();
        }

        let mut events = Vec::new();
        detach_stopping_writer(&mut self.shared.record.lock(), &mut events);
        self.shared.emit_all(events);
    }

    pub fn resume(&self) {
        let mut control = self.shared.control.lock();
        if control.state == PlaybackState::Paused {
            control.state = PlaybackState::Running;
            self.shared.anchor.lock().reset();
        }
    }

    /// Stop playback and wait for the worker to finish tearing down.
    ///
    /// A read blocked on a stalled source is released by the I/O timeout,
    /// not by this call.
    pub fn stop(&self) {
        {
            let mut control = self.shared.control.lock();
            control.stop_requested = true;
            control.state = PlaybackState::Stopped;
        }

        if let Some(handle) = self.worker.lock().take() {
            join_worker(handle);
        }

        let mut events = Vec::new();
        {
            let mut slot = self.shared.record.lock();
            slot.request = None;
            detach_writer(&mut slot, &mut events);
        }
        self.shared.emit_all(events);
    }

    /// Record the running stream to `path`. The writer opens on the next
    /// decoded frame.
    pub fn start_record(&self, path: impl Into<PathBuf>) -> Result<(), PlayerError> {
        if self.state() == PlaybackState::Stopped {
            return Err(PlayerError::NotRunning);
        }
        let mut events = Vec::new();
        let result = {
            let mut slot = self.shared.record.lock();
            // A writer only waiting for its stop is finished now
            detach_stopping_writer(&mut slot, &mut events);
            if slot.request.is_some() || slot.active.is_some() {
                Err(PlayerError::AlreadyRecording)
            } else {
                let path = path.into();
                tracing::info!(path = %path.display(), "recording requested");
                slot.request = Some(path);
                Ok(())
            }
        };
        self.shared.emit_all(events);
        result
    }

    /// Record to a timestamped file under the configured record directory
    pub fn start_record_default(&self) -> Result<PathBuf, PlayerError> {
        let params = VideoParams::from_config(self.config.as_ref());
        let dir = params.record_dir.unwrap_or_default();
        let path = default_record_path(&dir, chrono::Local::now());
        self.start_record(path.clone())?;
        Ok(path)
    }

    /// Stop recording. Returns false when nothing was being recorded.
    ///
    /// While frames are flowing the worker closes the writer after the
    /// current frame; otherwise it is closed here.
    pub fn stop_record(&self) -> bool {
        let mut events = Vec::new();
        let stopped = {
            let mut slot = self.shared.record.lock();
            if slot.request.take().is_some() {
                true
            } else if let Some(writer) = slot.active.as_ref() {
                if self.state() == PlaybackState::Running {
                    writer.request_stop();
                } else {
                    detach_writer(&mut slot, &mut events);
                }
                true
            } else {
                false
            }
        };
        self.shared.emit_all(events);
        stopped
    }

    pub fn is_recording(&self) -> bool {
        let slot = self.shared.record.lock();
        slot.request.is_some() || slot.active.as_ref().is_some_and(|w| !w.is_stop())
    }

    /// Oldest buffered frame, for the display consumer
    pub fn pop_frame(&self) -> Option<DecodedFrame> {
        self.shared.queue.pop()
    }

    pub fn frame_queue(&self) -> Arc<FrameRingBuffer> {
        self.shared.queue.clone()
    }

    /// Frame rate of the open stream, 0 before it opens
    pub fn fps(&self) -> f64 {
        *self.shared.fps.lock()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn default_record_path<Tz: chrono::TimeZone>(dir: &Path, now: chrono::DateTime<Tz>) -> PathBuf
where
    Tz::Offset: std::fmt::Display,
{
    dir.join(format!("video_record_{}.mp4", now.format("%Y-%m-%d_%H-%M-%S")))
}

// ============================================================================
// Worker
// ============================================================================

fn run_worker(shared: Arc<Shared>, config: Arc<dyn ConfigProvider>, media: MediaSource, mut pacer: Pacer) {
    let mut engine = DecodeEngine::new(config);
    engine.set_media(media);

    if !prepare(&shared, &mut engine, &mut pacer) {
        return;
    }
    task(&shared, &mut engine, &mut pacer);
    finish(&shared, &mut engine);
}

fn prepare(shared: &Shared, engine: &mut DecodeEngine, pacer: &mut Pacer) -> bool {
    if let Err(e) = engine.open() {
        tracing::error!(source = %engine.media(), error = %e, "open stream failed");
        shared.wind_down();
        shared.emit(StreamEvent::OpenStreamFail {
            message: e.to_string(),
        });
        return false;
    }

    let fps = engine.fps();
    *shared.fps.lock() = fps;
    if engine.media().kind() == MediaKind::Capture {
        pacer.set_policy(SleepPolicy::Wait, Duration::ZERO);
    } else {
        pacer.set_policy(SleepPolicy::Until, Pacer::<SystemClock>::interval_for_fps(fps));
    }

    {
        let mut control = shared.control.lock();
        if !control.stop_requested {
            control.state = PlaybackState::Running;
        }
    }
    shared.emit(StreamEvent::OpenStreamSuccess);
    true
}

fn task(shared: &Shared, engine: &mut DecodeEngine, pacer: &mut Pacer) {
    loop {
        match shared.state() {
            PlaybackState::Stopped => break,
            PlaybackState::Paused => {
                thread::sleep(PAUSE_POLL);
                continue;
            }
            PlaybackState::Running => {}
        }

        match engine.get_frame() {
            Some(frame) => {
                record_frame(shared, engine, &frame);
                shared.queue.push(&frame);
                pacer.sleep();
            }
            None if engine.is_end() => {
                shared.wind_down();
                let mut events = Vec::new();
                {
                    let mut slot = shared.record.lock();
                    slot.request = None;
                    detach_writer(&mut slot, &mut events);
                }
                shared.emit_all(events);
                shared.emit(StreamEvent::StreamEnd);
                break;
            }
            None => {}
        }
    }
}

fn finish(shared: &Shared, engine: &mut DecodeEngine) {
    engine.close();
    let mut events = Vec::new();
    {
        let mut slot = shared.record.lock();
        detach_writer(&mut slot, &mut events);
    }
    shared.emit_all(events);
    shared.emit(StreamEvent::StreamClose);
}

/// Hand `frame` to the recording writer, opening it lazily on the first
/// frame after a request and detaching it once a stop is observed
fn record_frame(shared: &Shared, engine: &DecodeEngine, frame: &DecodedFrame) {
    let mut events = Vec::new();
    {
        let mut slot = shared.record.lock();

        if let Some(path) = slot.request.take() {
            let writer = Writer::with_output(&path);
            let opened = engine
                .encode_template()
                .ok_or_else(|| "stream is not open".to_string())
                .and_then(|template| writer.open(template).map_err(|e| e.to_string()));
            match opened {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "recording started");
                    slot.active = Some(Arc::new(writer));
                    events.push(StreamEvent::RecordStarted { path });
                }
                Err(message) => {
                    tracing::error!(path = %path.display(), error = %message, "recording open failed");
                    events.push(StreamEvent::StreamError { message });
                }
            }
        }

        if let Some(writer) = slot.active.clone() {
            if writer.is_stop() {
                detach_writer(&mut slot, &mut events);
            } else if let Err(e) = writer.write(frame) {
                tracing::error!(error = %e, "recording write failed");
                events.push(StreamEvent::StreamError {
                    message: e.to_string(),
                });
                detach_writer(&mut slot, &mut events);
            }
        }
    }
    shared.emit_all(events);
}

// ============================================================================
// Tests
// ============================================================================
