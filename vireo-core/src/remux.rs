//! Stream export: copy one elementary stream into a new container
//! without re-encoding.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::{format, media, Packet};

use crate::av;

#[derive(Debug, thiserror::Error)]
pub enum RemuxError {
    #[error("native library init failed: {0}")]
    Init(#[source] ffmpeg::Error),
    #[error("failed to open input {path}: {source}")]
    OpenInput { path: PathBuf, source: ffmpeg::Error },
    #[error("no {0} stream in input")]
    NoStream(StreamKind),
    #[error("failed to create output {path}: {source}")]
    CreateOutput { path: PathBuf, source: ffmpeg::Error },
    #[error("failed to write header: {0}")]
    Header(#[source] ffmpeg::Error),
    #[error("failed to write packet: {0}")]
    Write(#[source] ffmpeg::Error),
    #[error("failed to write trailer: {0}")]
    Trailer(#[source] ffmpeg::Error),
    #[error("unknown stream kind: {0}")]
    UnknownKind(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamKind {
    #[default]
    Video,
    Audio,
    Subtitle,
}

impl StreamKind {
    fn media_type(self) -> media::Type {
        match self {
            StreamKind::Video => media::Type::Video,
            StreamKind::Audio => media::Type::Audio,
            StreamKind::Subtitle => media::Type::Subtitle,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
            StreamKind::Subtitle => "subtitle",
        })
    }
}

impl FromStr for StreamKind {
    type Err = RemuxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "video" | "v" => Ok(Self::Video),
            "audio" | "a" => Ok(Self::Audio),
            "subtitle" | "sub" | "s" => Ok(Self::Subtitle),
            _ => Err(RemuxError::UnknownKind(s.to_string())),
        }
    }
}

/// Copy the best `kind` stream of `input` into `output`.
/// Returns the number of packets written.
pub fn export_stream(input: &Path, output: &Path, kind: StreamKind) -> Result<u64, RemuxError> {
    av::init().map_err(RemuxError::Init)?;

    let mut ictx = format::input(&input).map_err(|source| RemuxError::OpenInput {
        path: input.to_path_buf(),
        source,
    })?;
    let (in_index, in_time_base, parameters) = {
        let stream = ictx
            .streams()
            .best(kind.media_type())
            .ok_or(RemuxError::NoStream(kind))?;
        (stream.index(), stream.time_base(), stream.parameters())
    };

    let mut octx = format::output(&output).map_err(|source| RemuxError::CreateOutput {
        path: output.to_path_buf(),
        source,
    })?;
    {
        let mut ost = octx
            .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))
            .map_err(|source| RemuxError::CreateOutput {
                path: output.to_path_buf(),
                source,
            })?;
        ost.set_parameters(parameters);
        // Source container tags rarely fit the target container
        unsafe {
            (*ost.parameters().as_mut_ptr()).codec_tag = 0;
        }
    }
    octx.write_header().map_err(RemuxError::Header)?;
    let out_time_base = octx
        .stream(0)
        .map(|s| s.time_base())
        .unwrap_or(in_time_base);

    let mut packets = 0u64;
    loop {
        let mut packet = Packet::empty();
        match packet.read(&mut ictx) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => break,
            Err(e) => {
                tracing::warn!(error = %e, packets, "read failed, finishing export");
                break;
            }
        }
        if packet.stream() != in_index {
            continue;
        }
        packet.rescale_ts(in_time_base, out_time_base);
        packet.set_position(-1);
        packet.set_stream(0);
        packet.write_interleaved(&mut octx).map_err(RemuxError::Write)?;
        packets += 1;
    }

    octx.write_trailer().map_err(RemuxError::Trailer)?;
    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        %kind,
        packets,
        "stream exported"
    );
    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_kind_parse() {
        assert_eq!("video".parse::<StreamKind>().unwrap(), StreamKind::Video);
        assert_eq!("A".parse::<StreamKind>().unwrap(), StreamKind::Audio);
        assert_eq!("sub".parse::<StreamKind>().unwrap(), StreamKind::Subtitle);
        assert!(matches!("data".parse::<StreamKind>(), Err(RemuxError::UnknownKind(_))));
        assert_eq!(StreamKind::Subtitle.to_string(), "subtitle");
    }

    #[test]
    fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = export_stream(
            &dir.path().join("nope.mp4"),
            &dir.path().join("out.mp4"),
            StreamKind::Video,
        )
        .unwrap_err();
        assert!(matches!(err, RemuxError::OpenInput { .. }));
    }
}
