mod common;

use std::sync::Arc;

use ffmpeg_next as ffmpeg;

use common::{decode_all, synthetic_frame, write_clip};
use vireo_core::config::VIDEO_GROUP;
use vireo_core::remux::{self, RemuxError, StreamKind};
use vireo_core::transcode;
use vireo_core::{
    Compression, DecodeEngine, DecodeError, DecodedFrame, EncodeTemplate, MediaSource, PixelFormat,
    Settings, Writer,
};

/// Whether this FFmpeg build has an H.264 encoder
fn h264_available() -> bool {
    vireo_core::av::init().unwrap();
    ffmpeg::encoder::find(ffmpeg::codec::Id::H264).is_some()
}

#[test]
fn test_round_trip_frame_count_and_size() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.avi");
    write_clip(&path, 12, 64, 48, 25);

    let frames = decode_all(&path, Settings::new());
    assert_eq!(frames.len(), 12);
    for frame in &frames {
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(frame.format, PixelFormat::Iyuv);
        assert_eq!(frame.buffer.len(), PixelFormat::Iyuv.buffer_size(64, 48));
    }
    assert!(frames
        .windows(2)
        .all(|pair| pair[0].timestamp_ms <= pair[1].timestamp_ms));
    // Every MJPEG picture is intra coded
    let intra = ffmpeg::ffi::AVPictureType::AV_PICTURE_TYPE_I as i32;
    assert!(frames.iter().all(|f| f.picture_type == intra));
}

#[test]
fn test_decoded_width_aligned_to_four() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("odd.avi");
    write_clip(&path, 3, 66, 48, 25);

    let frames = decode_all(&path, Settings::new());
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].width, 64);
    assert_eq!(frames[0].height, 48);
}

#[test]
fn test_rgb_destination_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rgb.avi");
    write_clip(&path, 4, 64, 48, 25);

    let settings = Settings::new().with(VIDEO_GROUP, "dst_pix_fmt", "RGB");
    let frames = decode_all(&path, settings);
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[0].format, PixelFormat::Rgb);
    assert_eq!(frames[0].buffer.len(), 64 * 48 * 3);
}

#[test]
fn test_hw_decode_falls_back_to_software() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hw.avi");
    write_clip(&path, 5, 64, 48, 25);

    let settings = Settings::new().with(VIDEO_GROUP, "enable_hw_decode", true);
    let frames = decode_all(&path, settings);
    assert_eq!(frames.len(), 5);
}

#[test]
fn test_open_failure_leaves_nothing_open() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = DecodeEngine::new(Arc::new(Settings::new()));
    engine.set_media(MediaSource::file(dir.path().join("does-not-exist.avi")));

    assert!(matches!(engine.open(), Err(DecodeError::OpenInput { .. })));
    assert!(!engine.is_open());
    assert!(engine.frame_size().is_none());
    engine.close();
    assert!(engine.get_frame().is_none());
}

#[test]
fn test_encode_template_matches_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tpl.avi");
    write_clip(&path, 2, 64, 48, 25);

    let mut engine = DecodeEngine::new(Arc::new(Settings::new()));
    engine.set_media(MediaSource::file(&path));
    engine.open().unwrap();

    let template = engine.encode_template().unwrap();
    assert_eq!(template.compression, Compression::Mjpeg);
    assert_eq!((template.width, template.height), (64, 48));
    assert_eq!(template.fps, 25);
    assert!((engine.fps() - 25.0).abs() < 0.01);
}

#[test]
fn test_writer_converts_rgb_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("from_rgb.avi");

    let writer = Writer::with_output(&path);
    writer
        .open(vireo_core::EncodeTemplate::new(Compression::Mjpeg, 64, 48, 25))
        .unwrap();
    let mut rgb = vireo_core::DecodedFrame::new(32, 24, PixelFormat::Rgb);
    rgb.buffer.as_mut_slice().fill(200);
    for _ in 0..3 {
        writer.write(&rgb).unwrap();
    }
    // An Iyuv frame at the encoder size takes the direct path
    writer.write(&synthetic_frame(64, 48, 0)).unwrap();
    assert!(writer.close().unwrap());

    let frames = decode_all(&path, Settings::new());
    assert_eq!(frames.len(), 4);
    assert_eq!((frames[0].width, frames[0].height), (64, 48));
}

#[test]
fn test_transcode_counts_frames() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.avi");
    let output = dir.path().join("out.mkv");
    write_clip(&input, 8, 64, 48, 25);

    let frames =
        transcode::transcode_file(&input, &output, Compression::Mjpeg, Arc::new(Settings::new())).unwrap();
    assert_eq!(frames, 8);
    assert_eq!(decode_all(&output, Settings::new()).len(), 8);
}

#[test]
fn test_export_video_stream() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("src.avi");
    let output = dir.path().join("video.mkv");
    write_clip(&input, 6, 64, 48, 25);

    let packets = remux::export_stream(&input, &output, StreamKind::Video).unwrap();
    assert_eq!(packets, 6);
    assert_eq!(decode_all(&output, Settings::new()).len(), 6);
}

#[test]
fn test_export_missing_stream_kind() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("silent.avi");
    write_clip(&input, 2, 64, 48, 25);

    let err = remux::export_stream(&input, &dir.path().join("audio.mka"), StreamKind::Audio).unwrap_err();
    assert!(matches!(err, RemuxError::NoStream(StreamKind::Audio)));
}

#[test]
fn test_h264_close_flushes_delayed_frames() {
    if !h264_available() {
        eprintln!("no H.264 encoder in this FFmpeg build, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("delayed.mp4");

    let writer = Writer::with_output(&path);
    writer
        .open(EncodeTemplate::new(Compression::H264, 64, 48, 25))
        .unwrap();
    // Enough pictures to fill the encoder's lookahead
    for i in 0..40 {
        writer.write(&synthetic_frame(64, 48, i)).unwrap();
    }
    assert!(writer.close().unwrap());
    assert_eq!(writer.frames_written(), 40);

    let frames = decode_all(&path, Settings::new());
    assert_eq!(frames.len(), 40);
    assert_eq!((frames[0].width, frames[0].height), (64, 48));
}

#[test]
fn test_null_frame_flushes_before_close() {
    let dir = tempfile::tempdir().unwrap();
    let (path, template) = if h264_available() {
        (
            dir.path().join("flushed.mp4"),
            EncodeTemplate::new(Compression::H264, 64, 48, 25),
        )
    } else {
        (
            dir.path().join("flushed.avi"),
            EncodeTemplate::new(Compression::Mjpeg, 64, 48, 25),
        )
    };

    let writer = Writer::with_output(&path);
    writer.open(template).unwrap();
    for i in 0..10 {
        writer.write(&synthetic_frame(64, 48, i)).unwrap();
    }
    writer.write(&DecodedFrame::default()).unwrap();
    // A drained encoder takes no more pictures
    assert!(writer.write(&synthetic_frame(64, 48, 10)).is_err());
    assert!(writer.close().unwrap());
    assert_eq!(writer.frames_written(), 10);

    assert_eq!(decode_all(&path, Settings::new()).len(), 10);
}

#[test]
fn test_direct_writes_reuse_input_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("direct.avi");
    let writer = Writer::with_output(&path);
    writer
        .open(EncodeTemplate::new(Compression::Mjpeg, 64, 48, 25))
        .unwrap();
    for i in 0..30 {
        writer.write(&synthetic_frame(64, 48, i)).unwrap();
    }
    assert!(writer.close().unwrap());

    let frames = decode_all(&path, Settings::new());
    assert_eq!(frames.len(), 30);
    // Pictures differ, so no later write overwrote an earlier one in place
    let luma = 64 * 48;
    assert_ne!(
        frames[0].buffer.as_slice()[..luma],
        frames[29].buffer.as_slice()[..luma]
    );
}
