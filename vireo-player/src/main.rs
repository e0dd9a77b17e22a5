//! # Vireo
//!
//! Headless front end over vireo-core: play (and optionally record) a
//! file, network stream or capture device, transcode or export streams,
//! list hardware decoders.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use vireo_core::config::default_settings_path;
use vireo_core::hw_decode;
use vireo_core::remux::{self, StreamKind};
use vireo_core::transcode;
use vireo_core::{
    Compression, DecodedFrame, FramePump, MediaSource, Player, Settings, StreamEvent, VideoSink,
};

/// Display refresh cadence for the headless sink
const REFRESH_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Parser, Debug)]
#[command(name = "vireo")]
#[command(about = "Video player, recorder and transcoder")]
#[command(version)]
struct Args {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a source, logging frames as they are displayed
    Play {
        /// File path, network URL or capture device name
        source: String,

        /// Treat SOURCE as a network URL
        #[arg(long, conflicts_with = "capture")]
        network: bool,

        /// Treat SOURCE as a capture device
        #[arg(long)]
        capture: bool,

        /// Record the stream to this file while playing
        #[arg(long)]
        record: Option<PathBuf>,

        /// Stop after this many displayed frames
        #[arg(long)]
        max_frames: Option<u64>,

        /// Settings file (defaults to the user config directory)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Re-encode a file
    Transcode {
        input: PathBuf,
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = CodecArg::H264)]
        codec: CodecArg,
    },
    /// Copy one stream into a new container without re-encoding
    Export {
        input: PathBuf,
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = StreamArg::Video)]
        stream: StreamArg,
    },
    /// List hardware decode device types
    Hwaccels,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CodecArg {
    H264,
    Hevc,
    Mjpeg,
}

impl From<CodecArg> for Compression {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::H264 => Compression::H264,
            CodecArg::Hevc => Compression::Hevc,
            CodecArg::Mjpeg => Compression::Mjpeg,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StreamArg {
    Video,
    Audio,
    Subtitle,
}

impl From<StreamArg> for StreamKind {
    fn from(arg: StreamArg) -> Self {
        match arg {
            StreamArg::Video => StreamKind::Video,
            StreamArg::Audio => StreamKind::Audio,
            StreamArg::Subtitle => StreamKind::Subtitle,
        }
    }
}

// ============================================================================
// Headless Sink
// ============================================================================

struct LogSink {
    frames: Arc<AtomicU64>,
}

impl VideoSink for LogSink {
    fn render(&mut self, frame: &DecodedFrame) {
        let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if n == 1 || n % 100 == 0 {
            tracing::info!(
                frame = n,
                width = frame.width,
                height = frame.height,
                ts_ms = frame.timestamp_ms,
                format = frame.format.name(),
                "displayed"
            );
        }
    }

    fn update(&mut self) {}
}

// ============================================================================
// Commands
// ============================================================================

fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
    let path = path.unwrap_or_else(default_settings_path);
    Settings::load(&path).with_context(|| format!("loading settings from {}", path.display()))
}

fn play(
    source: String,
    network: bool,
    capture: bool,
    record: Option<PathBuf>,
    max_frames: Option<u64>,
    config: Option<PathBuf>,
) -> Result<()> {
    let media = if network {
        MediaSource::network(source)
    } else if capture {
        MediaSource::capture(source)
    } else {
        MediaSource::file(source)
    };

    let settings = load_settings(config)?;
    let player = Player::new(Arc::new(settings));
    player.set_media(media.clone());

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    player.set_event_callback(move |event| {
        let _ = tx.lock().send(event);
    });

    let displayed = Arc::new(AtomicU64::new(0));
    let mut pump = FramePump::spawn(
        player.frame_queue(),
        Box::new(LogSink {
            frames: displayed.clone(),
        }),
        REFRESH_INTERVAL,
    )
    .context("starting display pump")?;

    tracing::info!(%media, "starting playback");
    player.start().context("starting player")?;

    let mut failure = None;
    loop {
        if let Some(max) = max_frames {
            if displayed.load(Ordering::Relaxed) >= max {
                tracing::info!(max, "frame limit reached");
                break;
            }
        }

        let event = match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => event,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };
        tracing::info!(?event, "event");

        match event {
            StreamEvent::OpenStreamSuccess => {
                tracing::info!(fps = player.fps(), "stream open");
                if let Some(path) = &record {
                    player.start_record(path.clone()).context("starting recording")?;
                }
            }
            StreamEvent::OpenStreamFail { message } => {
                failure = Some(message);
                break;
            }
            StreamEvent::StreamEnd | StreamEvent::StreamClose => break,
            _ => {}
        }
    }

    player.stop();
    // Let the display drain what was already decoded
    while !player.frame_queue().is_empty() && max_frames.map_or(true, |m| displayed.load(Ordering::Relaxed) < m) {
        std::thread::sleep(REFRESH_INTERVAL);
    }
    pump.stop();

    let stats = player.frame_queue().stats();
    tracing::info!(
        displayed = displayed.load(Ordering::Relaxed),
        pushed = stats.frames_pushed,
        dropped = stats.frames_dropped,
        "playback finished"
    );

    if let Some(message) = failure {
        bail!("failed to open {media}: {message}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        tracing_subscriber::EnvFilter::new("vireo=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vireo=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Vireo v{}", vireo_core::VERSION);

    match args.command {
        Command::Play {
            source,
            network,
            capture,
            record,
            max_frames,
            config,
        } => play(source, network, capture, record, max_frames, config),
        Command::Transcode { input, output, codec } => {
            let settings = load_settings(None)?;
            let frames = transcode::transcode_file(&input, &output, codec.into(), Arc::new(settings))
                .with_context(|| format!("transcoding {}", input.display()))?;
            println!("{frames} frames written to {}", output.display());
            Ok(())
        }
        Command::Export { input, output, stream } => {
            let packets = remux::export_stream(&input, &output, stream.into())
                .with_context(|| format!("exporting from {}", input.display()))?;
            println!("{packets} packets written to {}", output.display());
            Ok(())
        }
        Command::Hwaccels => {
            vireo_core::av::init().context("initialising media library")?;
            let names = hw_decode::device_type_names();
            if names.is_empty() {
                println!("no hardware device types available");
            }
            for name in names {
                println!("{name}");
            }
            Ok(())
        }
    }
}
