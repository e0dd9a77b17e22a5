//! # Decode Engine
//!
//! Opens a [`MediaSource`], demuxes its best video stream, decodes (with
//! optional hardware acceleration) and rescales every picture into one
//! uniform packed layout.
//!
//! ## Pipeline
//!
//! ```text
//! ┌─────────┐ packet ┌─────────┐ frame ┌────────────┐  ┌────────────┐
//! │ demuxer │───────►│ decoder │──────►│ hw → host  │─►│ scaler     │─► DecodedFrame
//! └─────────┘        └─────────┘       │ (optional) │  │ dst fmt/sz │
//!      ▲ interrupt watchdog            └────────────┘  └────────────┘
//! ```
//!
//! `get_frame()` is pull-style and returns an owned frame per call.
//! `open()` either leaves a fully open stream or nothing at all: every
//! native resource is owned by [`OpenStream`] and released on drop.

use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use ffmpeg_next::util::frame;
use ffmpeg_next::{Packet, Rational, Rescale};

use crate::av;
use crate::config::{ConfigProvider, VideoParams};
use crate::frame::{DecodedFrame, PixelFormat};
use crate::hw_decode::{self, HwDevice};
use crate::interrupt::IoWatchdog;
use crate::media::{Compression, EncodeTemplate, MediaError, MediaSource};
use crate::pixel_buffer::PixelBuffer;
use crate::pixel_convert::{self, FrameConverter};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("native library init failed: {0}")]
    Init(#[source] ffmpeg::Error),
    #[error("failed to open input {location}: {source}")]
    OpenInput {
        location: String,
        source: ffmpeg::Error,
    },
    #[error("no video stream in {0}")]
    NoVideoStream(String),
    #[error("no decoder for codec {0:?}")]
    NoDecoder(codec::Id),
    #[error("failed to open decoder: {0}")]
    OpenDecoder(#[source] ffmpeg::Error),
    #[error("invalid video size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
}

/// Destination width: aligned down to a multiple of 4
pub fn aligned_width(width: u32) -> u32 {
    width >> 2 << 2
}

// ============================================================================
// Open Stream
// ============================================================================

/// Native state of one open input.
///
/// Field order is teardown order: the input closes first, then the codec
/// context, scaler and frames. The hardware device and the watchdog go
/// last because the codec context and the input hold raw pointers to them.
struct OpenStream {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    converter: FrameConverter,
    decoded: frame::Video,
    host: frame::Video,
    scratch: PixelBuffer,
    hw: Option<HwDevice>,
    watchdog: Arc<IoWatchdog>,

    stream_index: usize,
    time_base: Rational,
    codec_id: codec::Id,
    dst_format: PixelFormat,
    dst_width: u32,
    dst_height: u32,
    frame_interval_ms: f64,
    /// Demuxer reported end of input (or failed); decoder has been sent EOF
    read_ended: bool,
    frames: u64,
}

enum Read {
    Packet(Packet),
    Eof,
    Failed(ffmpeg::Error),
}

enum Receive {
    Frame,
    Pending,
    Drained,
}

impl OpenStream {
    fn read_packet(&mut self) -> Read {
        loop {
            self.watchdog.touch();
            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) if packet.stream() == self.stream_index => return Read::Packet(packet),
                Ok(()) => continue,
                Err(ffmpeg::Error::Eof) => return Read::Eof,
                Err(e) => return Read::Failed(e),
            }
        }
    }

    fn receive(&mut self) -> Receive {
        match self.decoder.receive_frame(&mut self.decoded) {
            Ok(()) => Receive::Frame,
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {
                Receive::Pending
            }
            Err(ffmpeg::Error::Eof) => Receive::Drained,
            Err(e) => {
                tracing::warn!(error = %e, "decode error");
                Receive::Pending
            }
        }
    }

    fn finish_input(&mut self) {
        self.read_ended = true;
        if let Err(e) = self.decoder.send_eof() {
            tracing::debug!(error = %e, "decoder flush");
        }
    }

    /// One pull: feed at most one packet, take at most one frame.
    /// `Ok(false)` means no frame this call.
    fn decode_one(&mut self) -> bool {
        // A packet can yield several frames; drain before feeding more
        if let Receive::Frame = self.receive() {
            return true;
        }

        if !self.read_ended {
            match self.read_packet() {
                Read::Packet(packet) => {
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        tracing::warn!(error = %e, "send packet failed");
                    }
                }
                Read::Eof => {
                    tracing::debug!(frames = self.frames, "end of input");
                    self.finish_input();
                }
                Read::Failed(e) => {
                    tracing::warn!(
                        error = %e,
                        stalled = self.watchdog.tripped(),
                        "read failed, draining decoder"
                    );
                    self.finish_input();
                }
            }
        }

        matches!(self.receive(), Receive::Frame)
    }

    /// Convert the last decoded picture into an owned frame
    fn emit(&mut self) -> Option<DecodedFrame> {
        let source = if hw_decode::is_hardware_frame(&self.decoded) {
            if let Err(e) = hw_decode::transfer_to_host(&self.decoded, &mut self.host) {
                tracing::warn!(error = %e, "hardware frame transfer failed");
                return None;
            }
            &self.host
        } else {
            &self.decoded
        };

        let timestamp_ms = match source.timestamp().or_else(|| source.pts()) {
            Some(ts) => ts.rescale(self.time_base, Rational(1, 1000)),
            None => (self.frames as f64 * self.frame_interval_ms) as i64,
        };
        let picture_type = ffmpeg::ffi::AVPictureType::from(source.kind()) as i32;

        let scaled = match self.converter.convert(source) {
            Ok(scaled) => scaled,
            Err(e) => {
                tracing::warn!(error = %e, "rescale failed");
                return None;
            }
        };
        let len = match pixel_convert::copy_planes_out(
            scaled,
            self.dst_format,
            self.dst_width,
            self.dst_height,
            self.scratch.as_mut_slice(),
        ) {
            Ok(len) => len,
            Err(e) => {
                tracing::warn!(error = %e, "plane copy failed");
                return None;
            }
        };

        self.frames += 1;
        Some(DecodedFrame {
            buffer: PixelBuffer::from_slice(&self.scratch.as_slice()[..len]),
            width: self.dst_width,
            height: self.dst_height,
            timestamp_ms,
            format: self.dst_format,
            picture_type,
        })
    }
}

// ============================================================================
// Decode Engine
// ============================================================================

pub struct DecodeEngine {
    config: Arc<dyn ConfigProvider>,
    media: MediaSource,
    stream: Option<OpenStream>,
    fps: f64,
    end: bool,
}

impl DecodeEngine {
    pub fn new(config: Arc<dyn ConfigProvider>) -> Self {
        Self {
            config,
            media: MediaSource::None,
            stream: None,
            fps: 0.0,
            end: false,
        }
    }

    /// Source for the next `open()`
    pub fn set_media(&mut self, media: MediaSource) {
        self.media = media;
    }

    pub fn media(&self) -> &MediaSource {
        &self.media
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the current source. On error nothing stays allocated.
    pub fn open(&mut self) -> Result<(), DecodeError> {
        self.close();
        self.end = false;

        av::init().map_err(DecodeError::Init)?;
        let params = VideoParams::from_config(self.config.as_ref());
        let transport = self.media.resolve_transport(&params)?;

        let watchdog = IoWatchdog::new(params.io_timeout);
        let input = av::open_input(&transport, &watchdog).map_err(|source| DecodeError::OpenInput {
            location: transport.location.clone(),
            source,
        })?;

        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| DecodeError::NoVideoStream(self.media.to_string()))?;
        let stream_index = stream.index();
        let time_base = stream.time_base();
        let rate = [stream.avg_frame_rate(), stream.rate()]
            .into_iter()
            .find(|r| r.numerator() > 0 && r.denominator() > 0);
        let parameters = stream.parameters();
        let codec_id = parameters.id();

        let codec = ffmpeg::decoder::find(codec_id).ok_or(DecodeError::NoDecoder(codec_id))?;
        let mut context =
            codec::context::Context::from_parameters(parameters).map_err(DecodeError::OpenDecoder)?;

        let hw = if params.enable_hw_decode {
            unsafe { HwDevice::attach(context.as_mut_ptr(), codec.as_ptr()) }
        } else {
            None
        };

        let mut options = ffmpeg::Dictionary::new();
        options.set("threads", "auto");
        let decoder = context
            .decoder()
            .open_as_with(codec, options)
            .and_then(|opened| opened.video())
            .map_err(DecodeError::OpenDecoder)?;

        let (width, height) = (decoder.width(), decoder.height());
        let dst_width = aligned_width(width);
        if dst_width == 0 || height == 0 {
            return Err(DecodeError::InvalidSize { width, height });
        }

        let fps = rate
            .map(f64::from)
            .unwrap_or(params.fallback_fps as f64);
        let dst_format = params.dst_pix_fmt;
        let scratch_len = PixelFormat::Iyuv
            .buffer_size(dst_width, height)
            .max(PixelFormat::Rgb.buffer_size(dst_width, height));

        tracing::info!(
            source = %self.media,
            codec = ?codec_id,
            width,
            height,
            dst_width,
            dst_format = dst_format.name(),
            fps,
            hw = hw.as_ref().map(|h| h.name()).as_deref().unwrap_or("none"),
            "stream opened"
        );

        self.fps = fps;
        self.stream = Some(OpenStream {
            input,
            decoder,
            converter: FrameConverter::new(pixel_convert::to_av_pixel(dst_format), dst_width, height),
            decoded: frame::Video::empty(),
            host: frame::Video::empty(),
            scratch: PixelBuffer::zeroed(scratch_len),
            hw,
            watchdog,
            stream_index,
            time_base,
            codec_id,
            dst_format,
            dst_width,
            dst_height: height,
            frame_interval_ms: 1000.0 / fps.max(1.0),
            read_ended: false,
            frames: 0,
        });
        Ok(())
    }

    /// Next decoded frame, or `None` when nothing is ready this call.
    ///
    /// `None` together with [`is_end`](Self::is_end) means the stream is over.
    pub fn get_frame(&mut self) -> Option<DecodedFrame> {
        let stream = self.stream.as_mut()?;

        if !stream.decode_one() {
            if stream.read_ended {
                if !self.end {
                    tracing::info!(frames = stream.frames, "end of stream");
                }
                self.end = true;
            }
            return None;
        }

        stream.emit()
    }

    /// Release every native resource. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            tracing::debug!(
                source = %self.media,
                frames = stream.frames,
                hw = stream.hw.is_some(),
                "stream closed"
            );
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn is_end(&self) -> bool {
        self.end
    }

    /// Destination frame size, while open
    pub fn frame_size(&self) -> Option<(u32, u32)> {
        self.stream.as_ref().map(|s| (s.dst_width, s.dst_height))
    }

    /// Encoder parameters matching the open stream, for a Writer
    pub fn encode_template(&self) -> Option<EncodeTemplate> {
        let stream = self.stream.as_ref()?;
        let compression = match stream.codec_id {
            codec::Id::HEVC => Compression::Hevc,
            codec::Id::MJPEG => Compression::Mjpeg,
            _ => Compression::H264,
        };
        Some(EncodeTemplate::new(
            compression,
            stream.dst_width,
            stream.dst_height & !1,
            self.fps.round() as u32,
        ))
    }
}

impl Drop for DecodeEngine {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn engine() -> DecodeEngine {
        DecodeEngine::new(Arc::new(Settings::new()))
    }

    #[test]
    fn test_width_alignment() {
        assert_eq!(aligned_width(1920), 1920);
        assert_eq!(aligned_width(1366), 1364);
        assert_eq!(aligned_width(3), 0);
    }

    #[test]
    fn test_get_frame_before_open() {
        let mut engine = engine();
        assert!(engine.get_frame().is_none());
        assert!(!engine.is_end());
        assert!(engine.encode_template().is_none());
    }

    #[test]
    fn test_open_without_source() {
        let mut engine = engine();
        assert!(matches!(
            engine.open(),
            Err(DecodeError::Media(MediaError::NoSource))
        ));
        assert!(!engine.is_open());
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine();
        engine.set_media(MediaSource::file(dir.path().join("missing.mp4")));

        assert!(matches!(engine.open(), Err(DecodeError::OpenInput { .. })));
        assert!(!engine.is_open());
        engine.close();
        engine.close();
        assert!(engine.get_frame().is_none());
    }
}
