// HW_DECODE - Opportunistic Hardware Decode
//
// Hardware acceleration rides on the native library's device contexts:
// • enumerate the device types this build supports
// • intersect them with the decoder's hardware configs
// • create the first device that works and attach it to the codec context
// • frames that come back device-resident are transferred to host memory
//
// Every failure here is a warning. The decoder keeps going in software.

use std::ffi::CStr;
use std::os::raw::{c_int, c_void};
use std::ptr;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;
use ffmpeg_next::util::frame;

/// libavcodec's AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX
const HW_CONFIG_METHOD_HW_DEVICE_CTX: c_int = 0x01;

// ============================================================================
// Device Enumeration
// ============================================================================

/// Hardware device types the linked native library supports
pub fn available_device_types() -> Vec<ffi::AVHWDeviceType> {
    let mut types = Vec::new();
    let mut current = ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE;
    loop {
        current = unsafe { ffi::av_hwdevice_iterate_types(current) };
        if current == ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
            break;
        }
        types.push(current);
    }
    types
}

pub fn device_type_name(device_type: ffi::AVHWDeviceType) -> String {
    unsafe {
        let name = ffi::av_hwdevice_get_type_name(device_type);
        if name.is_null() {
            return "unknown".to_string();
        }
        CStr::from_ptr(name).to_string_lossy().into_owned()
    }
}

pub fn device_type_names() -> Vec<String> {
    available_device_types()
        .into_iter()
        .map(device_type_name)
        .collect()
}

/// (device type, hardware pixel format) pairs a decoder can use via a device context
unsafe fn codec_hw_configs(codec: *const ffi::AVCodec) -> Vec<(ffi::AVHWDeviceType, ffi::AVPixelFormat)> {
    let mut configs = Vec::new();
    let mut index = 0;
    loop {
        let config = ffi::avcodec_get_hw_config(codec, index);
        if config.is_null() {
            break;
        }
        if (*config).methods & HW_CONFIG_METHOD_HW_DEVICE_CTX != 0 {
            configs.push(((*config).device_type, (*config).pix_fmt));
        }
        index += 1;
    }
    configs
}

// ============================================================================
// Attached Device
// ============================================================================

/// A hardware device attached to one codec context.
///
/// Must outlive the codec context it was attached to: the context's
/// format callback reads the boxed pixel format through `opaque`.
pub struct HwDevice {
    device_ref: *mut ffi::AVBufferRef,
    device_type: ffi::AVHWDeviceType,
    pix_fmt: Box<ffi::AVPixelFormat>,
}

impl HwDevice {
    /// Attach the first usable hardware device to `ctx`, which must not be
    /// opened yet. `None` means software decode.
    ///
    /// # Safety
    /// `ctx` and `codec` must be valid, and `ctx` must be dropped before
    /// the returned device.
    pub unsafe fn attach(ctx: *mut ffi::AVCodecContext, codec: *const ffi::AVCodec) -> Option<Self> {
        let available = available_device_types();
        if available.is_empty() {
            tracing::warn!("no hardware device types in this build, using software decode");
            return None;
        }

        let candidates: Vec<_> = codec_hw_configs(codec)
            .into_iter()
            .filter(|(device_type, _)| available.contains(device_type))
            .collect();
        if candidates.is_empty() {
            tracing::warn!("decoder has no usable hardware config, using software decode");
            return None;
        }

        for (device_type, pix_fmt) in candidates {
            let mut device_ref: *mut ffi::AVBufferRef = ptr::null_mut();
            let ret = ffi::av_hwdevice_ctx_create(
                &mut device_ref,
                device_type,
                ptr::null(),
                ptr::null_mut(),
                0,
            );
            if ret < 0 || device_ref.is_null() {
                tracing::warn!(
                    device = %device_type_name(device_type),
                    error = %ffmpeg::Error::from(ret),
                    "hardware device creation failed"
                );
                continue;
            }

            let device = Self {
                device_ref,
                device_type,
                pix_fmt: Box::new(pix_fmt),
            };
            (*ctx).hw_device_ctx = ffi::av_buffer_ref(device_ref);
            (*ctx).opaque = &*device.pix_fmt as *const ffi::AVPixelFormat as *mut c_void;
            (*ctx).get_format = Some(negotiate_format);

            tracing::info!(
                device = %device.name(),
                pix_fmt = ?ffmpeg::format::Pixel::from(pix_fmt),
                "hardware decode attached"
            );
            return Some(device);
        }

        tracing::warn!("no hardware device could be created, using software decode");
        None
    }

    pub fn name(&self) -> String {
        device_type_name(self.device_type)
    }

    pub fn pixel_format(&self) -> ffi::AVPixelFormat {
        *self.pix_fmt
    }
}

impl Drop for HwDevice {
    fn drop(&mut self) {
        unsafe { ffi::av_buffer_unref(&mut self.device_ref) };
    }
}

/// Format negotiation: take the attached hardware format when offered,
/// otherwise let the library pick a software one
unsafe extern "C" fn negotiate_format(
    ctx: *mut ffi::AVCodecContext,
    formats: *const ffi::AVPixelFormat,
) -> ffi::AVPixelFormat {
    let wanted = (*ctx).opaque as *const ffi::AVPixelFormat;
    if !wanted.is_null() {
        let mut p = formats;
        while *p != ffi::AVPixelFormat::AV_PIX_FMT_NONE {
            if *p == *wanted {
                return *p;
            }
            p = p.add(1);
        }
    }
    tracing::warn!("hardware pixel format not offered, falling back to software");
    ffi::avcodec_default_get_format(ctx, formats)
}

// ============================================================================
// Host Transfer
// ============================================================================

/// Device-resident frames carry no host pointer in their first plane
pub fn is_hardware_frame(frame: &frame::Video) -> bool {
    unsafe { (*frame.as_ptr()).data[0].is_null() }
}

/// Copy a device-resident frame into host memory, keeping its timestamps
pub fn transfer_to_host(src: &frame::Video, dst: &mut frame::Video) -> Result<(), ffmpeg::Error> {
    unsafe {
        ffi::av_frame_unref(dst.as_mut_ptr());
        let ret = ffi::av_hwframe_transfer_data(dst.as_mut_ptr(), src.as_ptr(), 0);
        if ret < 0 {
            return Err(ffmpeg::Error::from(ret));
        }
        let ret = ffi::av_frame_copy_props(dst.as_mut_ptr(), src.as_ptr());
        if ret < 0 {
            return Err(ffmpeg::Error::from(ret));
        }
    }
    Ok(())
}
