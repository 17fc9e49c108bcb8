//! Recurring schedule rules and the occurrence calculator.
//!
//! A `Schedule` is not a point in time. Given a lower bound and a horizon it
//! yields the next qualifying start instant, walking forward one local
//! calendar day at a time:
//!
//! ```text
//! date ─▶ weekday/month/day/range filters ─▶ resolve time (fixed | sun ± offset)
//!      ─▶ finish anchor? subtract duration ─▶ wash ─▶ < lower? next day
//!                                                  ─▶ > horizon? none
//! ```

use serde::{Deserialize, Serialize};
use time::{Date, Duration, Month, OffsetDateTime, Time, Weekday};

use crate::clock::Context;
use crate::sun::{sun_event, SunEvent};

// ---------------------------------------------------------------------------
// Rule components
// ---------------------------------------------------------------------------

/// Whether the configured time marks the start or the end of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    #[default]
    Start,
    Finish,
}

/// The time-of-day component of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSpec {
    /// Fixed local wall-clock time.
    Fixed(Time),
    /// A solar event shifted by a signed offset (negative = before).
    Sun { event: SunEvent, offset: Duration },
}

/// Day-of-month filter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DayFilter {
    #[default]
    Every,
    Odd,
    Even,
    Days(Vec<u8>),
}

impl DayFilter {
    pub fn matches(&self, day: u8) -> bool {
        match self {
            DayFilter::Every => true,
            DayFilter::Odd => day % 2 == 1,
            DayFilter::Even => day % 2 == 0,
            DayFilter::Days(days) => days.contains(&day),
        }
    }
}

/// A month/day pair, compared within a single year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthDay {
    pub month: Month,
    pub day: u8,
}

impl MonthDay {
    fn key(self) -> (u8, u8) {
        (self.month as u8, self.day)
    }
}

/// Annual, inclusive date window. `from` after `until` wraps the new year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateRange {
    pub from: Option<MonthDay>,
    pub until: Option<MonthDay>,
}

impl DateRange {
    pub fn contains(&self, date: Date) -> bool {
        let key = (date.month() as u8, date.day());
        match (self.from, self.until) {
            (None, None) => true,
            (Some(f), None) => key >= f.key(),
            (None, Some(u)) => key <= u.key(),
            (Some(f), Some(u)) if f.key() <= u.key() => f.key() <= key && key <= u.key(),
            (Some(f), Some(u)) => key >= f.key() || key <= u.key(),
        }
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub name: String,
    pub time: TimeSpec,
    pub anchor: Anchor,
    /// Nominal run time. Required for zone schedules, optional for sequence
    /// schedules (falls back to the sequence total time).
    pub duration: Option<Duration>,
    /// Empty means every weekday.
    pub weekdays: Vec<Weekday>,
    /// Empty means every month.
    pub months: Vec<Month>,
    pub days: DayFilter,
    pub range: DateRange,
    pub enabled: bool,
}

impl Schedule {
    /// A daily schedule starting at a fixed local time.
    pub fn daily(name: impl Into<String>, at: Time, duration: Option<Duration>) -> Self {
        Self {
            name: name.into(),
            time: TimeSpec::Fixed(at),
            anchor: Anchor::Start,
            duration,
            weekdays: Vec::new(),
            months: Vec::new(),
            days: DayFilter::Every,
            range: DateRange::default(),
            enabled: true,
        }
    }

    pub fn with_time(mut self, time: TimeSpec) -> Self {
        self.time = time;
        self
    }

    pub fn with_anchor(mut self, anchor: Anchor) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn with_weekdays(mut self, weekdays: Vec<Weekday>) -> Self {
        self.weekdays = weekdays;
        self
    }

    pub fn with_months(mut self, months: Vec<Month>) -> Self {
        self.months = months;
        self
    }

    pub fn with_days(mut self, days: DayFilter) -> Self {
        self.days = days;
        self
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    /// Whether `date` passes every calendar filter.
    pub fn matches_date(&self, date: Date) -> bool {
        (self.weekdays.is_empty() || self.weekdays.contains(&date.weekday()))
            && (self.months.is_empty() || self.months.contains(&date.month()))
            && self.days.matches(date.day())
            && self.range.contains(date)
    }

    /// Resolve the configured time on a local date. `None` when a sun event
    /// does not occur that day or no site location is configured.
    fn resolve(&self, ctx: &Context, date: Date) -> Option<OffsetDateTime> {
        match self.time {
            TimeSpec::Fixed(t) => Some(date.with_time(t).assume_offset(ctx.offset)),
            TimeSpec::Sun { event, offset } => {
                let location = ctx.location?;
                sun_event(event, date, location).map(|t| (t + offset).to_offset(ctx.offset))
            }
        }
    }

    /// Next qualifying start in `[lower, horizon]`, or `None` when the walk
    /// leaves the horizon without finding one.
    pub fn get_next_run(
        &self,
        ctx: &Context,
        lower: OffsetDateTime,
        horizon: OffsetDateTime,
        adjusted: Duration,
    ) -> Option<OffsetDateTime> {
        let local = lower.to_offset(ctx.offset);
        // A finish-anchored run can start the day before its resolved time.
        let mut date = local.date().previous_day().unwrap_or(local.date());
        let last = horizon.to_offset(ctx.offset).date().next_day()?;

        while date <= last {
            if self.matches_date(date) {
                if let Some(resolved) = self.resolve(ctx, date) {
                    let start = match self.anchor {
                        Anchor::Start => resolved,
                        Anchor::Finish => resolved - adjusted,
                    };
                    let start = ctx.wash_dt(start);
                    if start > horizon {
                        return None;
                    }
                    if start >= lower {
                        return Some(start);
                    }
                }
            }
            date = date.next_day()?;
        }
        None
    }

    /// Human-readable description of the time component.
    pub fn describe_time(&self) -> String {
        match self.time {
            TimeSpec::Fixed(t) => format!("{:02}:{:02}", t.hour(), t.minute()),
            TimeSpec::Sun { event, offset } => {
                let name = format!("{event:?}").to_lowercase();
                match offset.whole_minutes() {
                    0 => name,
                    m if m < 0 => format!("{name} - {}m", -m),
                    m => format!("{name} + {m}m"),
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Granularity, Location};
    use time::macros::{date, datetime, offset, time};

    fn ctx() -> Context {
        Context::default()
    }

    fn ten_min() -> Duration {
        Duration::minutes(10)
    }

    // -- Fixed time --------------------------------------------------------

    #[test]
    fn next_run_same_day() {
        let s = Schedule::daily("am", time!(06:00), Some(ten_min()));
        let lower = datetime!(2024-06-01 05:00 UTC);
        let horizon = lower + Duration::days(3);
        assert_eq!(
            s.get_next_run(&ctx(), lower, horizon, ten_min()),
            Some(datetime!(2024-06-01 06:00 UTC))
        );
    }

    #[test]
    fn next_run_rolls_to_next_day_when_passed() {
        let s = Schedule::daily("am", time!(06:00), Some(ten_min()));
        let lower = datetime!(2024-06-01 06:01 UTC);
        let horizon = lower + Duration::days(3);
        assert_eq!(
            s.get_next_run(&ctx(), lower, horizon, ten_min()),
            Some(datetime!(2024-06-02 06:00 UTC))
        );
    }

    #[test]
    fn lower_bound_is_inclusive() {
        let s = Schedule::daily("am", time!(06:00), Some(ten_min()));
        let lower = datetime!(2024-06-01 06:00 UTC);
        assert_eq!(
            s.get_next_run(&ctx(), lower, lower + Duration::days(1), ten_min()),
            Some(lower)
        );
    }

    #[test]
    fn beyond_horizon_is_none() {
        let s = Schedule::daily("am", time!(06:00), Some(ten_min()));
        let lower = datetime!(2024-06-01 07:00 UTC);
        let horizon = datetime!(2024-06-02 05:59 UTC);
        assert_eq!(s.get_next_run(&ctx(), lower, horizon, ten_min()), None);
    }

    #[test]
    fn local_offset_is_applied() {
        let ctx = Context::new(Granularity::default(), offset!(+10), None);
        let s = Schedule::daily("am", time!(06:00), Some(ten_min()));
        let lower = datetime!(2024-06-01 00:00 UTC);
        let next = s
            .get_next_run(&ctx, lower, lower + Duration::days(2), ten_min())
            .unwrap();
        // 06:00 +10:00 on 2 June is 20:00 UTC on 1 June.
        assert_eq!(next, datetime!(2024-06-01 20:00 UTC));
    }

    // -- Anchor ------------------------------------------------------------

    #[test]
    fn finish_anchor_subtracts_adjusted_duration() {
        let s = Schedule::daily("am", time!(06:00), Some(ten_min())).with_anchor(Anchor::Finish);
        let lower = datetime!(2024-06-01 05:00 UTC);
        let next = s.get_next_run(&ctx(), lower, lower + Duration::days(1), Duration::minutes(25));
        assert_eq!(next, Some(datetime!(2024-06-01 05:35 UTC)));
    }

    #[test]
    fn finish_anchor_can_start_previous_day() {
        let s = Schedule::daily("midnight", time!(00:30), Some(ten_min()))
            .with_anchor(Anchor::Finish);
        let lower = datetime!(2024-06-01 23:00 UTC);
        let next = s.get_next_run(&ctx(), lower, lower + Duration::days(1), Duration::hours(1));
        assert_eq!(next, Some(datetime!(2024-06-01 23:30 UTC)));
    }

    // -- Filters -----------------------------------------------------------

    #[test]
    fn weekday_filter_skips_days() {
        // 2024-06-01 is a Saturday.
        let s = Schedule::daily("mon", time!(06:00), Some(ten_min()))
            .with_weekdays(vec![Weekday::Monday]);
        let lower = datetime!(2024-06-01 00:00 UTC);
        let next = s.get_next_run(&ctx(), lower, lower + Duration::days(7), ten_min());
        assert_eq!(next, Some(datetime!(2024-06-03 06:00 UTC)));
    }

    #[test]
    fn odd_and_even_days() {
        let odd = Schedule::daily("odd", time!(06:00), None).with_days(DayFilter::Odd);
        let even = Schedule::daily("even", time!(06:00), None).with_days(DayFilter::Even);
        let lower = datetime!(2024-06-02 00:00 UTC);
        let horizon = lower + Duration::days(3);
        assert_eq!(
            odd.get_next_run(&ctx(), lower, horizon, ten_min()),
            Some(datetime!(2024-06-03 06:00 UTC))
        );
        assert_eq!(
            even.get_next_run(&ctx(), lower, horizon, ten_min()),
            Some(datetime!(2024-06-02 06:00 UTC))
        );
    }

    #[test]
    fn explicit_day_list() {
        let s = Schedule::daily("15th", time!(06:00), None).with_days(DayFilter::Days(vec![15]));
        let lower = datetime!(2024-06-01 00:00 UTC);
        assert_eq!(
            s.get_next_run(&ctx(), lower, lower + Duration::days(20), ten_min()),
            Some(datetime!(2024-06-15 06:00 UTC))
        );
        assert_eq!(
            s.get_next_run(&ctx(), lower, lower + Duration::days(3), ten_min()),
            None
        );
    }

    #[test]
    fn month_filter() {
        let s = Schedule::daily("jul", time!(06:00), None).with_months(vec![Month::July]);
        let lower = datetime!(2024-06-29 00:00 UTC);
        assert_eq!(
            s.get_next_run(&ctx(), lower, lower + Duration::days(5), ten_min()),
            Some(datetime!(2024-07-01 06:00 UTC))
        );
    }

    #[test]
    fn date_range_wraps_new_year() {
        let range = DateRange {
            from: Some(MonthDay {
                month: Month::November,
                day: 1,
            }),
            until: Some(MonthDay {
                month: Month::March,
                day: 31,
            }),
        };
        assert!(range.contains(date!(2024-12-25)));
        assert!(range.contains(date!(2024-01-10)));
        assert!(range.contains(date!(2024-03-31)));
        assert!(!range.contains(date!(2024-06-01)));
    }

    #[test]
    fn date_range_plain() {
        let range = DateRange {
            from: Some(MonthDay {
                month: Month::June,
                day: 10,
            }),
            until: Some(MonthDay {
                month: Month::June,
                day: 20,
            }),
        };
        assert!(!range.contains(date!(2024-06-09)));
        assert!(range.contains(date!(2024-06-10)));
        assert!(range.contains(date!(2024-06-20)));
        assert!(!range.contains(date!(2024-06-21)));
    }

    // -- Sun ---------------------------------------------------------------

    #[test]
    fn sun_schedule_without_location_never_resolves() {
        let s = Schedule::daily("rise", time!(00:00), None).with_time(TimeSpec::Sun {
            event: SunEvent::Sunrise,
            offset: Duration::ZERO,
        });
        let lower = datetime!(2024-06-01 00:00 UTC);
        assert_eq!(
            s.get_next_run(&ctx(), lower, lower + Duration::days(3), ten_min()),
            None
        );
    }

    #[test]
    fn sun_schedule_applies_offset() {
        let loc = Location {
            latitude: 0.0,
            longitude: 0.0,
        };
        let ctx = Context::new(Granularity::default(), offset!(UTC), Some(loc));
        let plain = Schedule::daily("rise", time!(00:00), None).with_time(TimeSpec::Sun {
            event: SunEvent::Sunrise,
            offset: Duration::ZERO,
        });
        let later = plain.clone().with_time(TimeSpec::Sun {
            event: SunEvent::Sunrise,
            offset: Duration::minutes(30),
        });
        let lower = datetime!(2024-03-20 00:00 UTC);
        let horizon = lower + Duration::days(1);
        let a = plain.get_next_run(&ctx, lower, horizon, ten_min()).unwrap();
        let b = later.get_next_run(&ctx, lower, horizon, ten_min()).unwrap();
        assert_eq!(b - a, Duration::minutes(30));
    }

    #[test]
    fn polar_sunrise_skipped_until_horizon() {
        let loc = Location {
            latitude: 78.2,
            longitude: 15.6,
        };
        let ctx = Context::new(Granularity::default(), offset!(UTC), Some(loc));
        let s = Schedule::daily("rise", time!(00:00), None).with_time(TimeSpec::Sun {
            event: SunEvent::Sunrise,
            offset: Duration::ZERO,
        });
        let lower = datetime!(2024-06-15 00:00 UTC);
        assert_eq!(
            s.get_next_run(&ctx, lower, lower + Duration::days(5), ten_min()),
            None
        );
    }

    #[test]
    fn result_is_washed() {
        let ctx = Context::default();
        let s = Schedule::daily("odd", time!(06:00:45), None);
        let lower = datetime!(2024-06-01 00:00 UTC);
        assert_eq!(
            s.get_next_run(&ctx, lower, lower + Duration::days(1), ten_min()),
            Some(datetime!(2024-06-01 06:00 UTC))
        );
    }

    #[test]
    fn describe_time_formats() {
        let s = Schedule::daily("x", time!(06:05), None);
        assert_eq!(s.describe_time(), "06:05");
        let s = s.with_time(TimeSpec::Sun {
            event: SunEvent::Sunset,
            offset: Duration::minutes(-15),
        });
        assert_eq!(s.describe_time(), "sunset - 15m");
    }
}
