//! Where the tick loop gets `now` from. The engine never reads a clock, so
//! swapping the wall clock for a virtual one replays a day in minutes.

use std::sync::{Arc, Mutex};

use time::{Duration, OffsetDateTime};

pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> OffsetDateTime;

    /// Called once per tick after the engine has been polled.
    fn advance(&self, _step: Duration) {}

    /// Real time to wait between ticks that are `step` apart on this clock.
    fn period(&self, step: Duration) -> std::time::Duration;
}

fn to_std(seconds: f64) -> std::time::Duration {
    std::time::Duration::from_secs_f64(seconds.max(0.0)).max(std::time::Duration::from_millis(1))
}

/// Real system clock.
#[derive(Clone, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn period(&self, step: Duration) -> std::time::Duration {
        to_std(step.as_seconds_f64())
    }
}

/// Starts at a fixed instant and moves one step per tick, `speed` times
/// faster than real time.
#[derive(Clone)]
pub struct VirtualClock {
    current: Arc<Mutex<OffsetDateTime>>,
    speed: f64,
}

impl VirtualClock {
    pub fn new(start: OffsetDateTime, speed: f64) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
            speed,
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> OffsetDateTime {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn advance(&self, step: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current += step;
    }

    fn period(&self, step: Duration) -> std::time::Duration {
        to_std(step.as_seconds_f64() / self.speed)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
