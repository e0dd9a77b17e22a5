//! Frame Pacing
//!
//! The worker delivers frames at a constant rate with a "sleep until"
//! deadline instead of a fixed sleep per frame, so per-frame decode cost
//! does not accumulate as drift:
//!
//! ```text
//!  anchor        d1           d2           d3
//!    │───interval──│───interval──│───interval──│
//!    ▲ decode ▓▓    ▓▓▓▓▓▓        ▓            (sleep fills the rest)
//! ```
//!
//! Any playback state change marks the anchor dirty; the next sleep
//! re-bases the deadline on "now" instead of replaying a stale backlog.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interval used when the frame rate is unknown
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(40);

// ============================================================================
// Clocks
// ============================================================================

pub trait Clock: Send {
    fn now(&self) -> Instant;
    fn sleep_until(&self, deadline: Instant);
}

/// Wall clock backed by `Instant` and `thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) {
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// Clock that only moves when told to. Sleeping jumps straight to the deadline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }

    fn sleep_until(&self, deadline: Instant) {
        let mut now = self.now.lock();
        if deadline > *now {
            *now = deadline;
        }
    }
}

// ============================================================================
// Pacer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepPolicy {
    /// Sleep a fixed interval after each frame
    Wait,
    /// Sleep until `anchor + n * interval`
    Until,
}

/// Cloneable handle that forces the pacer to re-anchor on its next sleep
#[derive(Debug, Clone, Default)]
pub struct AnchorReset(Arc<AtomicBool>);

impl AnchorReset {
    pub fn reset(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

pub struct Pacer<C: Clock = SystemClock> {
    clock: C,
    policy: SleepPolicy,
    interval: Duration,
    deadline: Option<Instant>,
    anchor: AnchorReset,
    frames: u64,
}

impl Pacer<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for Pacer<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Pacer<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            policy: SleepPolicy::Until,
            interval: DEFAULT_INTERVAL,
            deadline: None,
            anchor: AnchorReset::default(),
            frames: 0,
        }
    }

    pub fn set_policy(&mut self, policy: SleepPolicy, interval: Duration) {
        self.policy = policy;
        self.interval = interval;
        self.anchor.reset();
    }

    /// Interval for `fps`, falling back to [`DEFAULT_INTERVAL`]
    pub fn interval_for_fps(fps: f64) -> Duration {
        if fps.is_finite() && fps > 0.0 {
            Duration::from_secs_f64(1.0 / fps)
        } else {
            DEFAULT_INTERVAL
        }
    }

    pub fn policy(&self) -> SleepPolicy {
        self.policy
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn anchor_handle(&self) -> AnchorReset {
        self.anchor.clone()
    }

    pub fn mark_dirty(&self) {
        self.anchor.reset();
    }

    /// Frames paced so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Block until the next frame is due. Returns the deadline slept to.
    pub fn sleep(&mut self) -> Instant {
        self.frames += 1;
        let now = self.clock.now();

        match self.policy {
            SleepPolicy::Wait => {
                let deadline = now + self.interval;
                self.clock.sleep_until(deadline);
                deadline
            }
            SleepPolicy::Until => {
                let dirty = self.anchor.take();
                let base = match self.deadline {
                    Some(deadline) if !dirty => deadline,
                    _ => now,
                };
                let deadline = base + self.interval;
                self.deadline = Some(deadline);
                self.clock.sleep_until(deadline);
                deadline
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
