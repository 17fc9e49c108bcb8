//! Time normalisation ("washing") and the evaluation context carried into
//! every time-dependent call.
//!
//! Nothing in the engine reads a real clock. Every instant arrives as an
//! explicit `now` and is washed to the configured granularity so that two
//! computations from equivalent inputs land in the same bucket.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, Time, UtcOffset};

/// Default granularity in seconds.
pub const DEFAULT_GRANULARITY: u32 = 60;

/// Valid granularity range in seconds.
const GRANULARITY_RANGE: std::ops::RangeInclusive<u32> = 1..=60;

// ---------------------------------------------------------------------------
// Granularity
// ---------------------------------------------------------------------------

/// The time bucket size all instants and durations are truncated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub struct Granularity(u32);

impl Granularity {
    /// Build a granularity, clamping into `1..=60` seconds.
    pub fn new(secs: u32) -> Self {
        Self(secs.clamp(*GRANULARITY_RANGE.start(), *GRANULARITY_RANGE.end()))
    }

    pub fn secs(self) -> i64 {
        self.0 as i64
    }

    /// One granularity unit as a duration.
    pub fn unit(self) -> Duration {
        Duration::seconds(self.secs())
    }

    /// Truncate an instant down to the granularity boundary.
    pub fn wash_dt(self, t: OffsetDateTime) -> OffsetDateTime {
        let rem = t.unix_timestamp().rem_euclid(self.secs());
        t - Duration::new(rem, t.nanosecond() as i32)
    }

    /// Truncate a duration toward zero to the granularity boundary.
    pub fn wash_td(self, d: Duration) -> Duration {
        let s = d.whole_seconds();
        Duration::seconds(s - s % self.secs())
    }

    /// Round a duration half-up to the granularity boundary. Only used when
    /// re-deriving a duration from percentage arithmetic.
    pub fn round_td(self, d: Duration) -> Duration {
        let ms = d.whole_milliseconds();
        let unit = self.secs() as i128 * 1000;
        let rounded = (ms + unit / 2).div_euclid(unit) * unit;
        Duration::milliseconds(rounded as i64)
    }

    /// Truncate a time of day to the granularity boundary.
    pub fn wash_t(self, t: Time) -> Time {
        let secs = t.second() as i64;
        let washed = (secs - secs % self.secs()) as u8;
        Time::from_hms(t.hour(), t.minute(), washed).unwrap_or(t)
    }
}

impl Default for Granularity {
    fn default() -> Self {
        Self(DEFAULT_GRANULARITY)
    }
}

impl From<u32> for Granularity {
    fn from(secs: u32) -> Self {
        Self::new(secs)
    }
}

impl From<Granularity> for u32 {
    fn from(g: Granularity) -> Self {
        g.0
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Site coordinates used by sun-relative schedules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Everything a time computation needs besides `now`: the granularity, the
/// local offset used for calendar arithmetic, and the site location.
///
/// Rebuilt on every coordinator load; never mutated behind the caller's back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Context {
    pub granularity: Granularity,
    pub offset: UtcOffset,
    pub location: Option<Location>,
}

impl Context {
    pub fn new(granularity: Granularity, offset: UtcOffset, location: Option<Location>) -> Self {
        Self {
            granularity,
            offset,
            location,
        }
    }

    /// Same context, different granularity. Used by child-scoped calls that
    /// wash with an override.
    pub fn with_granularity(self, granularity: Granularity) -> Self {
        Self {
            granularity,
            ..self
        }
    }

    pub fn wash_dt(&self, t: OffsetDateTime) -> OffsetDateTime {
        self.granularity.wash_dt(t)
    }

    pub fn wash_td(&self, d: Duration) -> Duration {
        self.granularity.wash_td(d)
    }

    pub fn unit(&self) -> Duration {
        self.granularity.unit()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Granularity::default(), UtcOffset::UTC, None)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, time};

    #[test]
    fn granularity_is_clamped() {
        assert_eq!(Granularity::new(0).secs(), 1);
        assert_eq!(Granularity::new(300).secs(), 60);
        assert_eq!(Granularity::new(10).secs(), 10);
    }

    #[test]
    fn wash_dt_truncates_never_rounds() {
        let g = Granularity::new(60);
        let t = datetime!(2024-06-01 06:04:59.900 UTC);
        assert_eq!(g.wash_dt(t), datetime!(2024-06-01 06:04:00 UTC));
    }

    #[test]
    fn wash_dt_keeps_offset() {
        let g = Granularity::new(60);
        let t = datetime!(2024-06-01 06:04:31 +10:00);
        let washed = g.wash_dt(t);
        assert_eq!(washed, datetime!(2024-06-01 06:04:00 +10:00));
        assert_eq!(washed.offset(), t.offset());
    }

    #[test]
    fn wash_dt_with_override_granularity() {
        let t = datetime!(2024-06-01 06:04:37 UTC);
        assert_eq!(Granularity::new(10).wash_dt(t), datetime!(2024-06-01 06:04:30 UTC));
        assert_eq!(Granularity::new(1).wash_dt(t), t);
    }

    #[test]
    fn wash_td_truncates() {
        let g = Granularity::new(60);
        assert_eq!(g.wash_td(Duration::seconds(119)), Duration::seconds(60));
        assert_eq!(g.wash_td(Duration::seconds(59)), Duration::ZERO);
    }

    #[test]
    fn round_td_rounds_half_up() {
        let g = Granularity::new(60);
        assert_eq!(g.round_td(Duration::seconds(89)), Duration::seconds(60));
        assert_eq!(g.round_td(Duration::seconds(90)), Duration::seconds(120));
        assert_eq!(g.round_td(Duration::seconds(29)), Duration::ZERO);
    }

    #[test]
    fn wash_t_truncates_seconds() {
        let g = Granularity::new(30);
        assert_eq!(g.wash_t(time!(06:00:45)), time!(06:00:30));
    }

    #[test]
    fn context_override_leaves_source_untouched() {
        let ctx = Context::default();
        let fine = ctx.with_granularity(Granularity::new(5));
        assert_eq!(ctx.granularity.secs(), 60);
        assert_eq!(fine.granularity.secs(), 5);
    }
}
