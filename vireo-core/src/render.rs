//! Display consumer
//!
//! The display side never touches decoder state. A [`FramePump`] thread
//! pops the shared [`FrameRingBuffer`] at a refresh cadence and hands each
//! frame to a [`VideoSink`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::frame::DecodedFrame;
use crate::frame_queue::FrameRingBuffer;
use crate::sync::{Pacer, SleepPolicy};

/// Display collaborator, driven from the pump thread only
pub trait VideoSink: Send {
    /// Draw one frame
    fn render(&mut self, frame: &DecodedFrame);

    /// Present / refresh, called every tick whether or not a frame arrived
    fn update(&mut self);
}

pub struct FramePump {
    running: Arc<AtomicBool>,
    rendered: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl FramePump {
    /// Start pumping `queue` into `sink` every `interval`
    pub fn spawn(
        queue: Arc<FrameRingBuffer>,
        mut sink: Box<dyn VideoSink>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let rendered = Arc::new(AtomicU64::new(0));

        let thread_running = running.clone();
        let thread_rendered = rendered.clone();
        let handle = thread::Builder::new()
            .name("vireo-display".to_string())
            .spawn(move || {
                let mut pacer = Pacer::new();
                pacer.set_policy(SleepPolicy::Until, interval);

                while thread_running.load(Ordering::SeqCst) {
                    if let Some(frame) = queue.pop() {
                        sink.render(&frame);
                        thread_rendered.fetch_add(1, Ordering::Relaxed);
                    }
                    sink.update();
                    pacer.sleep();
                }
                tracing::debug!(
                    frames = thread_rendered.load(Ordering::Relaxed),
                    "display pump stopped"
                );
            })?;

        Ok(Self {
            running,
            rendered,
            handle: Some(handle),
        })
    }

    pub fn frames_rendered(&self) -> u64 {
        self.rendered.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("display pump panicked");
            }
        }
    }
}

impl Drop for FramePump {
    fn drop(&mut self) {
        self.stop();
    }
}
