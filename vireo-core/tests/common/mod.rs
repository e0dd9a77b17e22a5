#![allow(dead_code)]

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use vireo_core::{
    Compression, DecodeEngine, DecodedFrame, EncodeTemplate, MediaSource, Player, PixelFormat,
    Settings, StreamEvent, Writer,
};

/// Planar 4:2:0 test picture whose luma ramp shifts with `index`
pub fn synthetic_frame(width: u32, height: u32, index: u32) -> DecodedFrame {
    let mut frame = DecodedFrame::new(width, height, PixelFormat::Iyuv);
    let luma = (width * height) as usize;
    let data = frame.buffer.as_mut_slice();
    for y in 0..height {
        for x in 0..width {
            data[(y * width + x) as usize] = ((x + y + index * 4) % 220 + 16) as u8;
        }
    }
    for v in &mut data[luma..] {
        *v = 128;
    }
    frame.timestamp_ms = index as i64 * 40;
    frame
}

/// Encode `count` synthetic frames into an MJPEG file at `path`
pub fn write_clip(path: &Path, count: u32, width: u32, height: u32, fps: u32) {
    let writer = Writer::with_output(path);
    writer
        .open(EncodeTemplate::new(Compression::Mjpeg, width, height, fps))
        .unwrap();
    for i in 0..count {
        writer.write(&synthetic_frame(width, height, i)).unwrap();
    }
    assert!(writer.close().unwrap());
    assert_eq!(writer.frames_written(), count as u64);
}

/// Decode every frame of `path` with `settings`
pub fn decode_all(path: &Path, settings: Settings) -> Vec<DecodedFrame> {
    let mut engine = DecodeEngine::new(Arc::new(settings));
    engine.set_media(MediaSource::file(path));
    engine.open().unwrap();

    let mut frames = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(30);
    while !engine.is_end() && Instant::now() < deadline {
        if let Some(frame) = engine.get_frame() {
            frames.push(frame);
        }
    }
    assert!(engine.is_end(), "decode did not reach end of stream");
    engine.close();
    frames
}

pub fn clip_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}

/// Event stream of a player, collected through its callback
pub struct Events {
    rx: mpsc::Receiver<StreamEvent>,
    pub seen: Vec<StreamEvent>,
}

impl Events {
    pub fn attach(player: &Player) -> Self {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        player.set_event_callback(move |event| {
            let _ = tx.lock().send(event);
        });
        Self { rx, seen: Vec::new() }
    }

    /// Wait for the first event matching `pred`, keeping everything seen
    pub fn wait_for(&mut self, pred: impl Fn(&StreamEvent) -> bool, timeout: Duration) -> StreamEvent {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let event = self
                .rx
                .recv_timeout(left)
                .unwrap_or_else(|_| panic!("timed out, events so far: {:?}", self.seen));
            self.seen.push(event.clone());
            if pred(&event) {
                return event;
            }
        }
    }

    pub fn drain(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.seen.push(event);
        }
    }
}
