//! # Vireo Core
//!
//! Video playback and recording engine: demux and decode any file,
//! network or capture source, pace frames into a bounded ring buffer for
//! display, and record the running stream to a file.

// ============================================================================
// Buffers & Frames
// ============================================================================
pub mod pixel_buffer;
pub mod frame;
pub mod frame_queue;

// ============================================================================
// Sources & Configuration
// ============================================================================
pub mod media;
pub mod config;

// ============================================================================
// Native Library Glue
// ============================================================================
pub mod av;
pub mod interrupt;
pub mod hw_decode;
pub mod pixel_convert;

// ============================================================================
// Decode / Encode
// ============================================================================
pub mod decode;
pub mod writer;

// ============================================================================
// Playback
// ============================================================================
pub mod sync;
pub mod player;
pub mod render;

// ============================================================================
// File Tools
// ============================================================================
pub mod remux;
pub mod transcode;

pub use config::{ConfigProvider, Settings, VideoParams};
pub use decode::{DecodeEngine, DecodeError};
pub use frame::{DecodedFrame, PixelFormat};
pub use frame_queue::FrameRingBuffer;
pub use media::{Compression, EncodeTemplate, MediaSource};
pub use player::{PlaybackState, Player, PlayerError, StreamEvent};
pub use render::{FramePump, VideoSink};
pub use writer::{Writer, WriterError};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = "Vireo";
