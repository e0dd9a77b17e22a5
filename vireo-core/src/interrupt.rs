//! I/O stall watchdog.
//!
//! Installed as the demuxer's interrupt callback before the input is
//! opened. Every packet read calls [`IoWatchdog::touch`]; if a blocking
//! read or the open itself makes no progress for longer than the timeout,
//! the callback asks the native library to abort the call, which then
//! surfaces as an ordinary read error.

use std::os::raw::{c_int, c_void};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ffmpeg_next::ffi;

pub struct IoWatchdog {
    epoch: Instant,
    last_activity_ms: AtomicU64,
    timeout: Duration,
    tripped: AtomicBool,
}

impl IoWatchdog {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            timeout,
            tripped: AtomicBool::new(false),
        })
    }

    /// Restart the stall clock
    pub fn touch(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_activity_ms.store(now, Ordering::Relaxed);
        self.tripped.store(false, Ordering::Relaxed);
    }

    pub fn idle(&self) -> Duration {
        let now = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        Duration::from_millis(now.saturating_sub(last))
    }

    pub fn is_stalled(&self) -> bool {
        self.idle() > self.timeout
    }

    /// Whether the watchdog has aborted a call since the last `touch`
    pub fn tripped(&self) -> bool {
        self.tripped.load(Ordering::Relaxed)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn poll(&self) -> bool {
        if !self.is_stalled() {
            return false;
        }
        if !self.tripped.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                timeout_ms = self.timeout.as_millis() as u64,
                "input stalled, aborting blocking I/O"
            );
        }
        true
    }

    /// Callback record for `AVFormatContext::interrupt_callback`.
    ///
    /// The returned struct borrows `self` through a raw pointer; the caller
    /// must keep this `Arc` alive until the format context is closed.
    pub(crate) fn callback(self: &Arc<Self>) -> ffi::AVIOInterruptCB {
        ffi::AVIOInterruptCB {
            callback: Some(interrupt_cb),
            opaque: Arc::as_ptr(self) as *mut c_void,
        }
    }
}

unsafe extern "C" fn interrupt_cb(opaque: *mut c_void) -> c_int {
    if opaque.is_null() {
        return 0;
    }
    let watchdog = &*(opaque as *const IoWatchdog);
    watchdog.poll() as c_int
}
