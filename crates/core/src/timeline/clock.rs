use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};

/// One committed frame slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTick {
    pub index: u64,
    /// Position on the stream timeline, in seconds.
    pub timestamp: f64,
    /// Seconds since the previous committed frame.
    pub dt: f64,
}

/// Decides when frames are due and what `dt` they advance the simulation by.
pub trait Clock {
    fn frame_duration(&self) -> f64;

    /// Whether the next frame is due now.
    fn should_produce_frame(&mut self) -> bool;

    /// Commits the next frame.
    fn advance(&mut self) -> FrameTick;

    /// Number of frame slots committed or skipped so far.
    fn frames_elapsed(&self) -> u64;
}

/// Audio-driven clock for offline export. Frame `n` sits at exactly
/// `n / fps` and always advances by `1 / fps`, independent of how long the
/// frame takes to produce.
#[derive(Debug, Clone)]
pub struct ExportClock {
    fps: u32,
    next: u64,
    total: Option<u64>,
}

impl ExportClock {
    pub fn new(fps: u32, total: Option<u64>) -> Self {
        Self {
            fps: fps.max(1),
            next: 0,
            total,
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }
}

impl Clock for ExportClock {
    fn frame_duration(&self) -> f64 {
        1.0 / self.fps as f64
    }

    fn should_produce_frame(&mut self) -> bool {
        self.total.map_or(true, |total| self.next < total)
    }

    fn advance(&mut self) -> FrameTick {
        let index = self.next;
        self.next += 1;
        FrameTick {
            index,
            timestamp: index as f64 / self.fps as f64,
            dt: self.frame_duration(),
        }
    }

    fn frames_elapsed(&self) -> u64 {
        self.next
    }
}

/// Monotonic time plus the ability to wait on it.
pub trait TimeSource: Send {
    fn elapsed(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time since construction.
#[derive(Debug, Clone, Copy)]
pub struct WallTime {
    origin: Instant,
}

impl WallTime {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WallTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallTime {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Simulated time that only moves when told to. Sleeping advances it
/// instantly. Clones share the same timeline.
#[derive(Debug, Clone, Default)]
pub struct ManualTime {
    now: Arc<Mutex<Duration>>,
}

impl ManualTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl TimeSource for ManualTime {
    fn elapsed(&self) -> Duration {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

const DEADLINE_SLACK: f64 = 1e-6;

/// Wall-clock driven clock for live playback. Deadlines sit on a fixed grid
/// of `1 / fps`; a frame that comes due late skips every slot it missed
/// instead of producing a burst of catch-up frames.
pub struct LiveClock {
    fps: u32,
    time: Box<dyn TimeSource>,
    origin: f64,
    next: u64,
    last_commit: Option<f64>,
    dropped: u64,
}

impl LiveClock {
    pub fn new(fps: u32, time: Box<dyn TimeSource>) -> Self {
        let origin = time.elapsed().as_secs_f64();
        Self {
            fps: fps.max(1),
            time,
            origin,
            next: 0,
            last_commit: None,
            dropped: 0,
        }
    }

    /// Frame slots skipped because a frame came due late.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn now(&self) -> f64 {
        self.time.elapsed().as_secs_f64() - self.origin
    }

    fn deadline(&self) -> f64 {
        self.next as f64 * self.frame_duration()
    }

    /// Sleeps until the next deadline, if it is still ahead.
    pub fn wait_for_deadline(&self) {
        let remaining = self.deadline() - self.now();
        if remaining > 0.0 {
            self.time.sleep(Duration::from_nanos((remaining * 1e9).ceil() as u64));
        }
    }

    /// Moves the deadline grid so the next frame is due now. Used after a
    /// pause so paused time is not reported as dropped frames.
    pub fn rebase(&mut self) {
        let now = self.time.elapsed().as_secs_f64();
        self.origin = now - self.deadline();
        self.last_commit = None;
    }
}

impl Clock for LiveClock {
    fn frame_duration(&self) -> f64 {
        1.0 / self.fps as f64
    }

    fn should_produce_frame(&mut self) -> bool {
        self.now() + DEADLINE_SLACK >= self.deadline()
    }

    fn advance(&mut self) -> FrameTick {
        let now = self.now();
        let period = self.frame_duration();
        let late = now - self.deadline();
        // Small epsilon so a deadline hit exactly does not read as a miss.
        let skipped = if late > 0.0 {
            (late / period + 1e-9).floor() as u64
        } else {
            0
        };

        self.dropped += skipped;
        let index = self.next + skipped;
        self.next = index + 1;

        let dt = self.last_commit.map_or(period, |last| (now - last).max(0.0));
        self.last_commit = Some(now);

        FrameTick {
            index,
            timestamp: now.max(0.0),
            dt,
        }
    }

    fn frames_elapsed(&self) -> u64 {
        self.next
    }
}

impl fmt::Debug for LiveClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveClock")
            .field("fps", &self.fps)
            .field("next", &self.next)
            .field("dropped", &self.dropped)
            .finish()
    }
}
