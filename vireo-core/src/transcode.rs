//! File conversion: decode every frame of a file and re-encode it with
//! another compression. Runs unpaced on the calling thread.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ConfigProvider;
use crate::decode::{DecodeEngine, DecodeError};
use crate::media::{Compression, MediaSource};
use crate::writer::{Writer, WriterError};

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Writer(#[from] WriterError),
    #[error("input {0} produced no stream parameters")]
    NoTemplate(PathBuf),
}

/// Convert `input` into `output` encoded as `compression`.
/// Returns the number of frames written.
pub fn transcode_file(
    input: &Path,
    output: &Path,
    compression: Compression,
    config: Arc<dyn ConfigProvider>,
) -> Result<u64, TranscodeError> {
    let mut engine = DecodeEngine::new(config);
    engine.set_media(MediaSource::file(input));
    engine.open()?;

    let template = engine
        .encode_template()
        .ok_or_else(|| TranscodeError::NoTemplate(input.to_path_buf()))?
        .with_compression(compression);

    let writer = Writer::with_output(output);
    writer.open(template)?;

    loop {
        match engine.get_frame() {
            Some(frame) => writer.write(&frame)?,
            None if engine.is_end() => break,
            None => {}
        }
    }
    engine.close();
    writer.close()?;

    let frames = writer.frames_written();
    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        ?compression,
        frames,
        "transcode finished"
    );
    Ok(frames)
}
