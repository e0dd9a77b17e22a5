// PIXEL CONVERT - Rescale & Reformat Between Native Frames and Packed Buffers
//
// Decoders hand back frames in whatever layout the codec produced, with
// padded strides. Consumers get one uniform layout: the configured
// destination format at the destination size, planes packed back to back
// with no row padding (see `PixelFormat::layout`).
//
// The scaler context is cached and only rebuilt when the source format or
// dimensions change mid-stream.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;
use ffmpeg_next::util::frame;

use crate::frame::PixelFormat;

// ============================================================================
// Format Mapping
// ============================================================================

pub fn to_av_pixel(format: PixelFormat) -> Pixel {
    match format {
        PixelFormat::Iyuv => Pixel::YUV420P,
        PixelFormat::Yuvj422p => Pixel::YUVJ422P,
        PixelFormat::Nv12 => Pixel::NV12,
        PixelFormat::Rgb => Pixel::RGB24,
    }
}

/// Native formats with a packed-buffer equivalent
pub fn from_av_pixel(pixel: Pixel) -> Option<PixelFormat> {
    match pixel {
        Pixel::YUV420P | Pixel::YUVJ420P => Some(PixelFormat::Iyuv),
        Pixel::YUVJ422P => Some(PixelFormat::Yuvj422p),
        Pixel::NV12 => Some(PixelFormat::Nv12),
        Pixel::RGB24 => Some(PixelFormat::Rgb),
        _ => None,
    }
}

// ============================================================================
// Plane Copies
// ============================================================================

/// Copy `frame` (already in `format`, `width` x `height`) into `dst` using
/// the packed layout. Returns bytes written.
pub fn copy_planes_out(
    frame: &frame::Video,
    format: PixelFormat,
    width: u32,
    height: u32,
    dst: &mut [u8],
) -> Result<usize, ffmpeg::Error> {
    let layout = format.layout(width, height);
    if dst.len() < layout.total || frame.planes() < layout.planes().len() {
        return Err(ffmpeg::Error::InvalidData);
    }

    for (index, plane) in layout.planes().iter().enumerate() {
        let src_stride = frame.stride(index);
        let data = frame.data(index);
        for row in 0..plane.rows {
            let src = data
                .get(row * src_stride..row * src_stride + plane.stride)
                .ok_or(ffmpeg::Error::InvalidData)?;
            let at = plane.offset + row * plane.stride;
            dst[at..at + plane.stride].copy_from_slice(src);
        }
    }
    Ok(layout.total)
}

/// Give `frame` buffers of its own when another reference (an encoder
/// holding the previous picture) still shares them. Frames without
/// buffers are left alone.
pub fn make_writable(frame: &mut frame::Video) -> Result<(), ffmpeg::Error> {
    unsafe {
        if (*frame.as_ptr()).buf[0].is_null() {
            return Ok(());
        }
        let ret = ffi::av_frame_make_writable(frame.as_mut_ptr());
        if ret < 0 {
            return Err(ffmpeg::Error::from(ret));
        }
    }
    Ok(())
}

/// Inverse of [`copy_planes_out`]: fill an allocated native frame from a packed buffer
pub fn copy_planes_in(
    src: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
    frame: &mut frame::Video,
) -> Result<(), ffmpeg::Error> {
    let layout = format.layout(width, height);
    if src.len() < layout.total || frame.planes() < layout.planes().len() {
        return Err(ffmpeg::Error::InvalidData);
    }
    make_writable(frame)?;

    for (index, plane) in layout.planes().iter().enumerate() {
        let dst_stride = frame.stride(index);
        let data = frame.data_mut(index);
        for row in 0..plane.rows {
            let at = plane.offset + row * plane.stride;
            let dst = data
                .get_mut(row * dst_stride..row * dst_stride + plane.stride)
                .ok_or(ffmpeg::Error::InvalidData)?;
            dst.copy_from_slice(&src[at..at + plane.stride]);
        }
    }
    Ok(())
}

// ============================================================================
// Cached Scaler
// ============================================================================

pub struct FrameConverter {
    scaler: Option<scaling::Context>,
    dst_format: Pixel,
    dst_width: u32,
    dst_height: u32,
    output: frame::Video,
}

impl FrameConverter {
    pub fn new(dst_format: Pixel, dst_width: u32, dst_height: u32) -> Self {
        Self {
            scaler: None,
            dst_format,
            dst_width,
            dst_height,
            output: frame::Video::empty(),
        }
    }

    pub fn dst_format(&self) -> Pixel {
        self.dst_format
    }

    pub fn dst_size(&self) -> (u32, u32) {
        (self.dst_width, self.dst_height)
    }

    fn ensure_scaler(&mut self, src: &frame::Video) -> Result<(), ffmpeg::Error> {
        let stale = match &self.scaler {
            Some(s) => {
                let input = s.input();
                input.format != src.format() || input.width != src.width() || input.height != src.height()
            }
            None => true,
        };

        if stale {
            tracing::debug!(
                src_format = ?src.format(),
                src_width = src.width(),
                src_height = src.height(),
                dst_format = ?self.dst_format,
                dst_width = self.dst_width,
                dst_height = self.dst_height,
                "building scaler"
            );
            self.scaler = Some(scaling::Context::get(
                src.format(),
                src.width(),
                src.height(),
                self.dst_format,
                self.dst_width,
                self.dst_height,
                scaling::Flags::FAST_BILINEAR,
            )?);
        }

        Ok(())
    }

    /// Rescale `src` into the converter's own output frame
    pub fn convert(&mut self, src: &frame::Video) -> Result<&mut frame::Video, ffmpeg::Error> {
        self.ensure_scaler(src)?;
        let scaler = self.scaler.as_mut().ok_or(ffmpeg::Error::Bug)?;
        make_writable(&mut self.output)?;
        scaler.run(src, &mut self.output)?;
        Ok(&mut self.output)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mapping() {
        assert_eq!(from_av_pixel(Pixel::YUVJ420P), Some(PixelFormat::Iyuv));
        assert_eq!(from_av_pixel(Pixel::NV12), Some(PixelFormat::Nv12));
        assert_eq!(from_av_pixel(Pixel::BGRA), None);
        for f in [PixelFormat::Iyuv, PixelFormat::Yuvj422p, PixelFormat::Nv12, PixelFormat::Rgb] {
            assert_eq!(from_av_pixel(to_av_pixel(f)), Some(f));
        }
    }

    #[test]
    fn test_plane_copy_strips_padding() {
        crate::av::init().unwrap();
        let mut native = frame::Video::new(Pixel::YUV420P, 6, 4);
        let packed: Vec<u8> = (0..PixelFormat::Iyuv.buffer_size(6, 4) as u32)
            .map(|v| v as u8)
            .collect();
        copy_planes_in(&packed, PixelFormat::Iyuv, 6, 4, &mut native).unwrap();

        let mut out = vec![0u8; packed.len()];
        let n = copy_planes_out(&native, PixelFormat::Iyuv, 6, 4, &mut out).unwrap();
        assert_eq!(n, packed.len());
        assert_eq!(out, packed);
    }

    #[test]
    fn test_copy_in_leaves_shared_reference_untouched() {
        crate::av::init().unwrap();
        let size = PixelFormat::Iyuv.buffer_size(8, 4);
        let mut native = frame::Video::new(Pixel::YUV420P, 8, 4);
        copy_planes_in(&vec![10u8; size], PixelFormat::Iyuv, 8, 4, &mut native).unwrap();

        // Second reference to the same buffers, as an encoder keeps one
        let mut held = frame::Video::empty();
        unsafe {
            assert!(ffi::av_frame_ref(held.as_mut_ptr(), native.as_ptr()) >= 0);
            assert_eq!(ffi::av_frame_is_writable(native.as_mut_ptr()), 0);
        }

        copy_planes_in(&vec![200u8; size], PixelFormat::Iyuv, 8, 4, &mut native).unwrap();
        unsafe {
            assert_ne!(ffi::av_frame_is_writable(native.as_mut_ptr()), 0);
        }

        let mut out = vec![0u8; size];
        copy_planes_out(&held, PixelFormat::Iyuv, 8, 4, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 10));
        copy_planes_out(&native, PixelFormat::Iyuv, 8, 4, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 200));
    }

    #[test]
    fn test_make_writable_skips_empty_frame() {
        let mut empty = frame::Video::empty();
        assert!(make_writable(&mut empty).is_ok());
    }

    #[test]
    fn test_converter_rescales() {
        crate::av::init().unwrap();
        let src = frame::Video::new(Pixel::YUV420P, 64, 48);
        let mut conv = FrameConverter::new(Pixel::RGB24, 32, 24);

        let out = conv.convert(&src).unwrap();
        assert_eq!(out.format(), Pixel::RGB24);
        assert_eq!((out.width(), out.height()), (32, 24));

        let mut packed = vec![0u8; PixelFormat::Rgb.buffer_size(32, 24)];
        let out = conv.convert(&src).unwrap();
        copy_planes_out(out, PixelFormat::Rgb, 32, 24, &mut packed).unwrap();
    }
}
