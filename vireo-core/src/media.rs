//! Media source descriptors and encode templates.
//!
//! A [`MediaSource`] is resolved once per open into a [`Transport`]: the
//! location string handed to the demuxer, an optional forced input format
//! (capture backends) and the demuxer options.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::VideoParams;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("no media source set")]
    NoSource,
    #[error("empty media location")]
    EmptyLocation,
    #[error("no capture backend on this platform")]
    NoCaptureBackend,
    #[error("unknown compression: {0}")]
    UnknownCompression(String),
}

// ============================================================================
// Media Source
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaSource {
    #[default]
    None,
    File(PathBuf),
    /// URL, e.g. `rtsp://host/stream`
    Network(String),
    /// Device name as the platform capture backend lists it
    Capture(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    None,
    File,
    Network,
    Capture,
}

/// Platform capture demuxer and the prefix its device names take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureBackend {
    pub format: &'static str,
    pub prefix: &'static str,
}

#[cfg(target_os = "windows")]
const CAPTURE_BACKEND: Option<CaptureBackend> = Some(CaptureBackend {
    format: "dshow",
    prefix: "video=",
});

#[cfg(target_os = "linux")]
const CAPTURE_BACKEND: Option<CaptureBackend> = Some(CaptureBackend {
    format: "video4linux2",
    prefix: "",
});

#[cfg(target_os = "macos")]
const CAPTURE_BACKEND: Option<CaptureBackend> = Some(CaptureBackend {
    format: "avfoundation",
    prefix: "",
});

#[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
const CAPTURE_BACKEND: Option<CaptureBackend> = None;

pub fn capture_backend() -> Option<CaptureBackend> {
    CAPTURE_BACKEND
}

/// Everything the demuxer needs to open a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transport {
    pub location: String,
    pub input_format: Option<&'static str>,
    pub options: Vec<(String, String)>,
}

impl Transport {
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Socket connect/read timeout for network sources, microseconds
const NETWORK_TIMEOUT_US: &str = "5000000";
/// Network receive buffer
const NETWORK_BUFFER_SIZE: &str = "2097152";
/// Demuxer max-delay, microseconds
const MAX_DELAY_US: &str = "3";

impl MediaSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn network(url: impl Into<String>) -> Self {
        Self::Network(url.into())
    }

    pub fn capture(device: impl Into<String>) -> Self {
        Self::Capture(device.into())
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            Self::None => MediaKind::None,
            Self::File(_) => MediaKind::File,
            Self::Network(_) => MediaKind::Network,
            Self::Capture(_) => MediaKind::Capture,
        }
    }

    pub fn location(&self) -> String {
        match self {
            Self::None => String::new(),
            Self::File(path) => path.to_string_lossy().into_owned(),
            Self::Network(url) => url.clone(),
            Self::Capture(device) => device.clone(),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Capture(_))
    }

    pub fn resolve_transport(&self, params: &VideoParams) -> Result<Transport, MediaError> {
        if matches!(self, Self::None) {
            return Err(MediaError::NoSource);
        }
        let location = self.location();
        if location.is_empty() {
            return Err(MediaError::EmptyLocation);
        }

        let mut options = vec![("max_delay".to_string(), MAX_DELAY_US.to_string())];

        let transport = match self {
            Self::Capture(_) => {
                let backend = capture_backend().ok_or(MediaError::NoCaptureBackend)?;
                Transport {
                    location: format!("{}{}", backend.prefix, location),
                    input_format: Some(backend.format),
                    options,
                }
            }
            Self::Network(_) => {
                options.push(("rtsp_transport".to_string(), params.rtsp_transport.clone()));
                options.push(("timeout".to_string(), NETWORK_TIMEOUT_US.to_string()));
                options.push(("buffer_size".to_string(), NETWORK_BUFFER_SIZE.to_string()));
                Transport {
                    location,
                    input_format: None,
                    options,
                }
            }
            _ => Transport {
                location,
                input_format: None,
                options,
            },
        };
        Ok(transport)
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "<none>"),
            Self::File(path) => write!(f, "file:{}", path.display()),
            Self::Network(url) => write!(f, "{url}"),
            Self::Capture(device) => write!(f, "capture:{device}"),
        }
    }
}

// ============================================================================
// Encode Template
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Compression {
    #[default]
    H264,
    Hevc,
    Mjpeg,
}

impl FromStr for Compression {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(Self::H264),
            "hevc" | "h265" => Ok(Self::Hevc),
            "mjpeg" | "mjpg" => Ok(Self::Mjpeg),
            _ => Err(MediaError::UnknownCompression(s.to_string())),
        }
    }
}

/// Encoder parameters for a Writer, usually taken from the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeTemplate {
    pub compression: Compression,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl EncodeTemplate {
    pub fn new(compression: Compression, width: u32, height: u32, fps: u32) -> Self {
        Self {
            compression,
            width,
            height,
            fps: fps.max(1),
        }
    }

    pub fn with_compression(self, compression: Compression) -> Self {
        Self {
            compression,
            ..self
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_transport_is_verbatim() {
        let t = MediaSource::file("/tmp/clip.mp4")
            .resolve_transport(&VideoParams::default())
            .unwrap();
        assert_eq!(t.location, "/tmp/clip.mp4");
        assert_eq!(t.input_format, None);
        assert_eq!(t.option("max_delay"), Some(MAX_DELAY_US));
        assert_eq!(t.option("rtsp_transport"), None);
    }

    #[test]
    fn test_network_transport_options() {
        let params = VideoParams {
            rtsp_transport: "udp".to_string(),
            ..Default::default()
        };
        let t = MediaSource::network("rtsp://10.0.0.2/live")
            .resolve_transport(&params)
            .unwrap();
        assert_eq!(t.location, "rtsp://10.0.0.2/live");
        assert_eq!(t.option("rtsp_transport"), Some("udp"));
        assert_eq!(t.option("timeout"), Some("5000000"));
        assert_eq!(t.option("buffer_size"), Some("2097152"));
    }

    #[test]
    fn test_capture_transport() {
        let source = MediaSource::capture("Integrated Camera");
        match capture_backend() {
            Some(backend) => {
                let t = source.resolve_transport(&VideoParams::default()).unwrap();
                assert_eq!(t.input_format, Some(backend.format));
                assert!(t.location.starts_with(backend.prefix));
                assert!(t.location.ends_with("Integrated Camera"));
            }
            None => assert_eq!(
                source.resolve_transport(&VideoParams::default()),
                Err(MediaError::NoCaptureBackend)
            ),
        }
        assert!(source.is_live());
    }

    #[test]
    fn test_unset_source() {
        let params = VideoParams::default();
        assert_eq!(
            MediaSource::None.resolve_transport(&params),
            Err(MediaError::NoSource)
        );
        assert_eq!(
            MediaSource::network("").resolve_transport(&params),
            Err(MediaError::EmptyLocation)
        );
    }

    #[test]
    fn test_compression_names() {
        assert_eq!("H265".parse::<Compression>(), Ok(Compression::Hevc));
        assert_eq!("mjpeg".parse::<Compression>(), Ok(Compression::Mjpeg));
        assert!("vp9".parse::<Compression>().is_err());
    }

    #[test]
    fn test_template_fps_floor() {
        let t = EncodeTemplate::new(Compression::H264, 640, 480, 0);
        assert_eq!(t.fps, 1);
        assert_eq!(t.with_compression(Compression::Mjpeg).width, 640);
    }
}
