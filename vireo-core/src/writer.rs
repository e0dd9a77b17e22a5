//! # Encode/Mux Writer
//!
//! Re-encodes decoded frames into a container file.
//!
//! ```text
//! DecodedFrame ─► encoder input frame ─► encoder ─► packets ─► interleaved mux
//!                 (direct fill, or          │         (codec tb → stream tb)
//!                  scaled when the           └─ null frame = flush
//!                  layout differs)
//! ```
//!
//! `open`, `write` and `close` are serialised by one mutex so a UI thread
//! may close while the worker is mid-write. `request_stop` / `is_stop`
//! let the worker notice a stop request and close the writer itself
//! between frames.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::util::frame;
use ffmpeg_next::{codec, encoder, format, Packet, Rational};
use parking_lot::Mutex;

use crate::av;
use crate::frame::{DecodedFrame, PixelFormat};
use crate::media::{Compression, EncodeTemplate};
use crate::pixel_convert::{self, FrameConverter};

pub const DEFAULT_BIT_RATE: usize = 8_500_000;
pub const DEFAULT_GOP: u32 = 10;

/// Container used when the output name does not imply one
const FALLBACK_CONTAINER: &str = "mp4";

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("native library init failed: {0}")]
    Init(#[source] ffmpeg::Error),
    #[error("no output path set")]
    NoOutput,
    #[error("writer already open")]
    AlreadyOpen,
    #[error("writer is not open")]
    NotOpen,
    #[error("invalid encode size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("failed to create output {path}: {source}")]
    CreateOutput {
        path: PathBuf,
        source: ffmpeg::Error,
    },
    #[error("no {0:?} encoder available")]
    NoEncoder(Compression),
    #[error("failed to open encoder: {0}")]
    OpenEncoder(#[source] ffmpeg::Error),
    #[error("failed to write header: {0}")]
    Header(#[source] ffmpeg::Error),
    #[error("encode failed: {0}")]
    Encode(#[source] ffmpeg::Error),
    #[error("failed to write trailer: {0}")]
    Trailer(#[source] ffmpeg::Error),
}

pub fn codec_id(compression: Compression) -> codec::Id {
    match compression {
        Compression::H264 => codec::Id::H264,
        Compression::Hevc => codec::Id::HEVC,
        Compression::Mjpeg => codec::Id::MJPEG,
    }
}

/// Encoder input format for each compression
pub fn encoder_pixel(compression: Compression) -> Pixel {
    match compression {
        Compression::H264 | Compression::Hevc => Pixel::YUV420P,
        Compression::Mjpeg => Pixel::YUVJ420P,
    }
}

// ============================================================================
// Encoder State
// ============================================================================

struct EncoderState {
    octx: format::context::Output,
    encoder: encoder::video::Encoder,
    stream_index: usize,
    codec_time_base: Rational,
    stream_time_base: Rational,
    width: u32,
    height: u32,
    /// Reused encoder input for frames already in the encoder's layout
    input: frame::Video,
    /// Frames in another layout are staged here and scaled
    staging: Option<frame::Video>,
    converter: FrameConverter,
    next_pts: i64,
    packets: u64,
    path: PathBuf,
}

// SAFETY: the native contexts are only touched while the owning
// `Writer`'s mutex is held.
unsafe impl Send for EncoderState {}

impl EncoderState {
    fn open(path: &Path, template: EncodeTemplate) -> Result<Self, WriterError> {
        let width = template.width & !1;
        let height = template.height & !1;
        if width == 0 || height == 0 {
            return Err(WriterError::InvalidSize {
                width: template.width,
                height: template.height,
            });
        }
        let fps = template.fps.max(1) as i32;
        let pixel = encoder_pixel(template.compression);

        let mut octx = match format::output(&path) {
            Ok(octx) => octx,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "container not inferred from name, using {FALLBACK_CONTAINER}");
                format::output_as(&path, FALLBACK_CONTAINER).map_err(|source| {
                    WriterError::CreateOutput {
                        path: path.to_path_buf(),
                        source,
                    }
                })?
            }
        };

        let codec = encoder::find(codec_id(template.compression))
            .ok_or(WriterError::NoEncoder(template.compression))?;
        let global_header = octx.format().flags().contains(format::Flags::GLOBAL_HEADER);

        let mut enc = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(WriterError::OpenEncoder)?;
        enc.set_width(width);
        enc.set_height(height);
        enc.set_format(pixel);
        enc.set_time_base(Rational(1, fps));
        enc.set_frame_rate(Some(Rational(fps, 1)));
        enc.set_bit_rate(DEFAULT_BIT_RATE);
        enc.set_gop(DEFAULT_GOP);
        enc.set_max_b_frames(0);
        if global_header {
            enc.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let encoder = enc.open_as(codec).map_err(WriterError::OpenEncoder)?;

        let stream_index = {
            let mut ost = octx.add_stream(codec).map_err(|source| WriterError::CreateOutput {
                path: path.to_path_buf(),
                source,
            })?;
            ost.set_parameters(&encoder);
            ost.set_time_base(Rational(1, fps));
            ost.index()
        };

        octx.write_header().map_err(WriterError::Header)?;
        let stream_time_base = octx
            .stream(stream_index)
            .map(|s| s.time_base())
            .unwrap_or(Rational(1, fps));

        tracing::info!(
            path = %path.display(),
            compression = ?template.compression,
            width,
            height,
            fps,
            "writer opened"
        );

        Ok(Self {
            octx,
            encoder,
            stream_index,
            codec_time_base: Rational(1, fps),
            stream_time_base,
            width,
            height,
            input: frame::Video::new(pixel, width, height),
            staging: None,
            converter: FrameConverter::new(pixel, width, height),
            next_pts: 0,
            packets: 0,
            path: path.to_path_buf(),
        })
    }

    fn encode_frame(&mut self, frame: &DecodedFrame) -> Result<(), ffmpeg::Error> {
        let pts = self.next_pts;
        let direct =
            frame.format == PixelFormat::Iyuv && frame.width == self.width && frame.height == self.height;

        let input = if direct {
            pixel_convert::copy_planes_in(
                frame.buffer.as_slice(),
                PixelFormat::Iyuv,
                self.width,
                self.height,
                &mut self.input,
            )?;
            &mut self.input
        } else {
            let src_pixel = pixel_convert::to_av_pixel(frame.format);
            let staging = match self.staging.take() {
                Some(s) if s.format() == src_pixel && s.width() == frame.width && s.height() == frame.height => s,
                _ => frame::Video::new(src_pixel, frame.width, frame.height),
            };
            let staging = self.staging.insert(staging);
            pixel_convert::copy_planes_in(
                frame.buffer.as_slice(),
                frame.format,
                frame.width,
                frame.height,
                staging,
            )?;
            self.converter.convert(staging)?
        };
        input.set_pts(Some(pts));
        self.encoder.send_frame(input)?;

        self.next_pts += 1;
        self.drain()
    }

    fn flush(&mut self) -> Result<(), ffmpeg::Error> {
        match self.encoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => {}
            Err(e) => return Err(e),
        }
        self.drain()
    }

    fn drain(&mut self) -> Result<(), ffmpeg::Error> {
        loop {
            let mut packet = Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    packet.set_stream(self.stream_index);
                    packet.rescale_ts(self.codec_time_base, self.stream_time_base);
                    packet.write_interleaved(&mut self.octx)?;
                    self.packets += 1;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {
                    return Ok(())
                }
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

// ============================================================================
// Writer
// ============================================================================

pub struct Writer {
    output: Mutex<Option<PathBuf>>,
    state: Mutex<Option<EncoderState>>,
    opened: AtomicBool,
    stop: AtomicBool,
    frames_written: AtomicU64,
}

impl Writer {
    pub fn new() -> Self {
        Self {
            output: Mutex::new(None),
            state: Mutex::new(None),
            opened: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            frames_written: AtomicU64::new(0),
        }
    }

    pub fn with_output(path: impl Into<PathBuf>) -> Self {
        let writer = Self::new();
        writer.set_output(path);
        writer
    }

    /// Destination file for the next `open()`
    pub fn set_output(&self, path: impl Into<PathBuf>) {
        *self.output.lock() = Some(path.into());
    }

    pub fn output(&self) -> Option<PathBuf> {
        self.output.lock().clone()
    }

    /// Create the container, open the encoder and write the header
    pub fn open(&self, template: EncodeTemplate) -> Result<(), WriterError> {
        let path = self.output().ok_or(WriterError::NoOutput)?;
        let mut guard = self.state.lock();
        if guard.is_some() {
            return Err(WriterError::AlreadyOpen);
        }
        av::init().map_err(WriterError::Init)?;

        *guard = Some(EncoderState::open(&path, template)?);
        self.stop.store(false, Ordering::SeqCst);
        self.frames_written.store(0, Ordering::Relaxed);
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Encode one frame. A null frame flushes the encoder instead.
    pub fn write(&self, frame: &DecodedFrame) -> Result<(), WriterError> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(WriterError::NotOpen)?;

        if frame.is_null() {
            return state.flush().map_err(WriterError::Encode);
        }
        state.encode_frame(frame).map_err(WriterError::Encode)?;
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flush, write the trailer and close the file.
    ///
    /// Returns `Ok(false)` when there was nothing open, so repeated calls
    /// (or a call before `open`) are harmless.
    pub fn close(&self) -> Result<bool, WriterError> {
        let mut guard = self.state.lock();
        let Some(mut state) = guard.take() else {
            return Ok(false);
        };
        self.opened.store(false, Ordering::SeqCst);
        self.stop.store(false, Ordering::SeqCst);

        let flushed = state.flush();
        let trailer = state.octx.write_trailer();
        tracing::info!(
            path = %state.path.display(),
            frames = self.frames_written.load(Ordering::Relaxed),
            packets = state.packets,
            "writer closed"
        );
        drop(state);
        drop(guard);

        flushed.map_err(WriterError::Encode)?;
        trailer.map_err(WriterError::Trailer)?;
        Ok(true)
    }

    /// Ask the thread feeding this writer to close it after the current frame
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "writer close on drop failed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
