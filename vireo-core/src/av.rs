//! Native multimedia library glue: one-time init and raw input opening.

use std::ffi::CString;
use std::ptr;
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;
use once_cell::sync::OnceCell;

use crate::interrupt::IoWatchdog;
use crate::media::Transport;

/// Initialise the library and register capture devices. Runs once per process.
pub fn init() -> Result<(), ffmpeg::Error> {
    static INIT: OnceCell<Result<(), ffmpeg::Error>> = OnceCell::new();

    *INIT.get_or_init(|| {
        ffmpeg::init()?;
        ffmpeg::device::register_all();
        ffmpeg::log::set_level(ffmpeg::log::Level::Error);
        tracing::debug!("native media library initialised");
        Ok(())
    })
}

pub fn dictionary(options: &[(String, String)]) -> ffmpeg::Dictionary<'static> {
    let mut dict = ffmpeg::Dictionary::new();
    for (key, value) in options {
        dict.set(key, value);
    }
    dict
}

/// Open `transport` for demuxing with `watchdog` installed as the
/// interrupt callback before the open call, then probe stream info.
///
/// `watchdog` must outlive the returned input.
pub fn open_input(
    transport: &Transport,
    watchdog: &Arc<IoWatchdog>,
) -> Result<ffmpeg::format::context::Input, ffmpeg::Error> {
    let url = CString::new(transport.location.as_str()).map_err(|_| ffmpeg::Error::InvalidData)?;
    let format_name = transport
        .input_format
        .map(CString::new)
        .transpose()
        .map_err(|_| ffmpeg::Error::InvalidData)?;

    unsafe {
        let input_format = match &format_name {
            Some(name) => {
                let fmt = ffi::av_find_input_format(name.as_ptr());
                if fmt.is_null() {
                    return Err(ffmpeg::Error::DemuxerNotFound);
                }
                fmt
            }
            None => ptr::null(),
        };

        let mut ctx = ffi::avformat_alloc_context();
        if ctx.is_null() {
            return Err(ffmpeg::Error::Other {
                errno: ffmpeg::util::error::ENOMEM,
            });
        }
        (*ctx).interrupt_callback = watchdog.callback();

        watchdog.touch();
        let mut opts = dictionary(&transport.options).disown();
        // On failure the context is freed by the library
        let ret = ffi::avformat_open_input(&mut ctx, url.as_ptr(), input_format, &mut opts);
        drop(ffmpeg::Dictionary::own(opts));
        if ret < 0 {
            return Err(ffmpeg::Error::from(ret));
        }

        watchdog.touch();
        let ret = ffi::avformat_find_stream_info(ctx, ptr::null_mut());
        if ret < 0 {
            ffi::avformat_close_input(&mut ctx);
            return Err(ffmpeg::Error::from(ret));
        }

        Ok(ffmpeg::format::context::Input::wrap(ctx))
    }
}
