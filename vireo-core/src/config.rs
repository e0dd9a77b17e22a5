//! Configuration Provider & Video Settings
//!
//! The pipeline never reads a global store. Callers construct a
//! [`ConfigProvider`] once and hand it to the player, decoder and writer.
//!
//! - [`ConfigProvider`]: `get(group, key)` plus typed lookups with defaults
//! - [`Settings`]: JSON file backed provider
//! - [`VideoParams`]: typed snapshot of the `video_param` group

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::PixelFormat;
use crate::frame_queue::DEFAULT_FRAME_CACHE;

/// Settings group read by the decode/record pipeline
pub const VIDEO_GROUP: &str = "video_param";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write settings {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed settings {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Read-only key/value lookup, grouped by section
pub trait ConfigProvider: Send + Sync {
    fn get(&self, group: &str, key: &str) -> Option<Value>;

    fn get_bool(&self, group: &str, key: &str, default: bool) -> bool {
        match self.get(group, key) {
            Some(Value::Bool(b)) => b,
            Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(default),
            Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => default,
            },
            _ => default,
        }
    }

    fn get_string(&self, group: &str, key: &str, default: &str) -> String {
        match self.get(group, key) {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => default.to_string(),
        }
    }

    fn get_i64(&self, group: &str, key: &str, default: i64) -> i64 {
        match self.get(group, key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }
}

// ============================================================================
// JSON Settings
// ============================================================================

/// `{ "group": { "key": value } }` persisted as pretty JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    groups: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing file yields empty settings.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn set(&mut self, group: &str, key: &str, value: impl Into<Value>) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// Builder form of [`Settings::set`]
    pub fn with(mut self, group: &str, key: &str, value: impl Into<Value>) -> Self {
        self.set(group, key, value);
        self
    }
}

impl ConfigProvider for Settings {
    fn get(&self, group: &str, key: &str) -> Option<Value> {
        self.groups.get(group)?.get(key).cloned()
    }
}

/// `<config dir>/vireo/settings.json`
pub fn default_settings_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("vireo");
    path.push("settings.json");
    path
}

// ============================================================================
// Video Parameters
// ============================================================================

/// Typed view of the `video_param` group, read once per open
#[derive(Debug, Clone, PartialEq)]
pub struct VideoParams {
    pub enable_hw_decode: bool,
    pub dst_pix_fmt: PixelFormat,
    pub rtsp_transport: String,
    /// Used when the stream does not report a frame rate
    pub fallback_fps: u32,
    pub io_timeout: Duration,
    pub frame_cache: usize,
    pub record_dir: Option<PathBuf>,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            enable_hw_decode: false,
            dst_pix_fmt: PixelFormat::Iyuv,
            rtsp_transport: "tcp".to_string(),
            fallback_fps: 25,
            io_timeout: Duration::from_secs(10),
            frame_cache: DEFAULT_FRAME_CACHE,
            record_dir: None,
        }
    }
}

impl VideoParams {
    pub fn from_config(config: &dyn ConfigProvider) -> Self {
        let defaults = Self::default();

        let fmt = config.get_string(VIDEO_GROUP, "dst_pix_fmt", "YUV");
        let dst_pix_fmt = PixelFormat::from_setting(&fmt).unwrap_or_else(|| {
            tracing::warn!(value = %fmt, "unknown dst_pix_fmt, using YUV");
            PixelFormat::Iyuv
        });

        let timeout_ms = config.get_i64(
            VIDEO_GROUP,
            "io_timeout_ms",
            defaults.io_timeout.as_millis() as i64,
        );
        let record_dir = config.get_string(VIDEO_GROUP, "record_dir", "");

        Self {
            enable_hw_decode: config.get_bool(VIDEO_GROUP, "enable_hw_decode", false),
            dst_pix_fmt,
            rtsp_transport: config.get_string(VIDEO_GROUP, "rtsp_transport", "tcp"),
            fallback_fps: config
                .get_i64(VIDEO_GROUP, "fps", defaults.fallback_fps as i64)
                .clamp(1, 240) as u32,
            io_timeout: Duration::from_millis(timeout_ms.max(100) as u64),
            frame_cache: config
                .get_i64(VIDEO_GROUP, "frame_cache", DEFAULT_FRAME_CACHE as i64)
                .max(1) as usize,
            record_dir: (!record_dir.is_empty()).then(|| PathBuf::from(record_dir)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
