//! Decoded frame value type and the pixel layouts it can carry.

use serde::{Deserialize, Serialize};

use crate::pixel_buffer::PixelBuffer;

// ============================================================================
// Pixel Formats
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar 4:2:0, Y then U then V
    #[default]
    Iyuv,
    /// Planar 4:2:2, full range
    Yuvj422p,
    /// Y plane then interleaved UV
    Nv12,
    /// Packed 8-bit RGB
    Rgb,
}

impl PixelFormat {
    /// Parse the `dst_pix_fmt` setting ("YUV" or "RGB")
    pub fn from_setting(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "YUV" | "IYUV" | "YUV420P" => Some(Self::Iyuv),
            "RGB" | "RGB24" => Some(Self::Rgb),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Iyuv => "IYUV",
            Self::Yuvj422p => "YUVJ422P",
            Self::Nv12 => "NV12",
            Self::Rgb => "RGB",
        }
    }

    /// Byte layout of one `width` x `height` image, planes packed back to back
    pub fn layout(&self, width: u32, height: u32) -> PlaneLayout {
        let w = width as usize;
        let h = height as usize;
        let cw = w.div_ceil(2);
        let ch = h.div_ceil(2);

        match self {
            Self::Iyuv => PlaneLayout::from_planes(&[(w, h), (cw, ch), (cw, ch)]),
            Self::Yuvj422p => PlaneLayout::from_planes(&[(w, h), (cw, h), (cw, h)]),
            Self::Nv12 => PlaneLayout::from_planes(&[(w, h), (cw * 2, ch)]),
            Self::Rgb => PlaneLayout::from_planes(&[(w * 3, h)]),
        }
    }

    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        self.layout(width, height).total
    }
}

/// One plane inside a packed frame buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Plane {
    pub offset: usize,
    /// Bytes per row; rows are tightly packed
    pub stride: usize,
    pub rows: usize,
}

impl Plane {
    pub fn len(&self) -> usize {
        self.stride * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaneLayout {
    planes: [Plane; 3],
    count: usize,
    pub total: usize,
}

impl PlaneLayout {
    fn from_planes(dims: &[(usize, usize)]) -> Self {
        let mut layout = Self::default();
        for &(stride, rows) in dims.iter().take(3) {
            layout.planes[layout.count] = Plane {
                offset: layout.total,
                stride,
                rows,
            };
            layout.total += stride * rows;
            layout.count += 1;
        }
        layout
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes[..self.count]
    }
}

// ============================================================================
// Decoded Frame
// ============================================================================

/// One decoded, rescaled picture.
///
/// `Clone` is a deep copy of the pixel data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedFrame {
    pub buffer: PixelBuffer,
    pub width: u32,
    pub height: u32,
    /// Presentation time in milliseconds
    pub timestamp_ms: i64,
    pub format: PixelFormat,
    /// Native picture type (I/P/B...) as reported by the decoder
    pub picture_type: i32,
}

impl DecodedFrame {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            buffer: PixelBuffer::zeroed(format.buffer_size(width, height)),
            width,
            height,
            timestamp_ms: 0,
            format,
            picture_type: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.width == 0 || self.height == 0 || self.buffer.is_null()
    }

    pub fn layout(&self) -> PlaneLayout {
        self.format.layout(self.width, self.height)
    }

    /// Bytes of plane `index`, if the buffer is large enough to hold it
    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        let plane = self.layout().planes().get(index).copied()?;
        self.buffer
            .as_slice()
            .get(plane.offset..plane.offset + plane.len())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iyuv_layout() {
        let layout = PixelFormat::Iyuv.layout(64, 48);
        let planes = layout.planes();
        assert_eq!(planes.len(), 3);
        assert_eq!(planes[0].len(), 64 * 48);
        assert_eq!(planes[1].offset, 64 * 48);
        assert_eq!(planes[2].offset, 64 * 48 + 32 * 24);
        assert_eq!(layout.total, 64 * 48 * 3 / 2);
    }

    #[test]
    fn test_buffer_sizes() {
        assert_eq!(PixelFormat::Rgb.buffer_size(64, 48), 64 * 48 * 3);
        assert_eq!(PixelFormat::Nv12.buffer_size(64, 48), 64 * 48 * 3 / 2);
        assert_eq!(PixelFormat::Yuvj422p.buffer_size(64, 48), 64 * 48 * 2);
        // Odd heights round the chroma rows up
        assert_eq!(PixelFormat::Iyuv.buffer_size(4, 3), 12 + 2 * 2 * 2);
    }

    #[test]
    fn test_null_frame() {
        assert!(DecodedFrame::default().is_null());
        assert!(DecodedFrame::new(0, 48, PixelFormat::Iyuv).is_null());

        let mut frame = DecodedFrame::new(64, 48, PixelFormat::Iyuv);
        assert!(!frame.is_null());
        frame.buffer.cleanup();
        assert!(frame.is_null());
    }

    #[test]
    fn test_clone_is_deep() {
        let mut frame = DecodedFrame::new(8, 8, PixelFormat::Rgb);
        let copy = frame.clone();
        frame.buffer.as_mut_slice()[0] = 255;
        assert_eq!(copy.buffer.as_slice()[0], 0);
    }

    #[test]
    fn test_setting_names() {
        assert_eq!(PixelFormat::from_setting("yuv"), Some(PixelFormat::Iyuv));
        assert_eq!(PixelFormat::from_setting("RGB"), Some(PixelFormat::Rgb));
        assert_eq!(PixelFormat::from_setting("bgra"), None);
    }

    #[test]
    fn test_plane_access() {
        let frame = DecodedFrame::new(4, 4, PixelFormat::Iyuv);
        assert_eq!(frame.plane(0).map(|p| p.len()), Some(16));
        assert_eq!(frame.plane(2).map(|p| p.len()), Some(4));
        assert!(frame.plane(3).is_none());
    }
}
