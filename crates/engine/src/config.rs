//! Configuration tree and its conversion into engine types.
//!
//! The tree is plain serde data; the host chooses the file format. Value
//! syntax:
//!
//! | Value            | Form                                  |
//! |------------------|---------------------------------------|
//! | duration         | `"H:MM"` or `"H:MM:SS"` (hours unbounded) |
//! | time of day      | `"HH:MM"` or `"HH:MM:SS"`             |
//! | sun time         | `{ sun = "sunset", before = "0:15" }` |
//! | utc offset       | `"+10:00"`                            |
//! | weekday / month  | `["mon", "thu"]` / `["jun", "jul"]`   |
//! | day of month     | `"odd"`, `"even"` or `[1, 15]`        |
//! | annual bound     | `"MM-DD"`                             |
//!
//! Shape problems (duplicate ids, orphaned references, missing durations)
//! are returned as `ConfigIssue`s alongside a best-effort build.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use time::{Duration, Month, Time, UtcOffset, Weekday};

use crate::clock::{Context, Granularity, Location};
use crate::controller::Controller;
use crate::error::{ConfigIssue, ParseError};
use crate::queue::ScheduleQueue;
use crate::schedule::{Anchor, DateRange, DayFilter, MonthDay, Schedule, TimeSpec};
use crate::sequence::{Sequence, SequenceZone};
use crate::sun::SunEvent;
use crate::zone::Zone;

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// A duration written as `H:MM[:SS]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Span(pub Duration);

impl FromStr for Span {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError::Duration(s.to_string());
        let parts: Vec<&str> = s.trim().split(':').collect();
        let (h, m, sec) = match parts.as_slice() {
            [h, m] => (*h, *m, "0"),
            [h, m, sec] => (*h, *m, *sec),
            _ => return Err(err()),
        };
        let h: i64 = h.parse().map_err(|_| err())?;
        let m: i64 = m.parse().map_err(|_| err())?;
        let sec: i64 = sec.parse().map_err(|_| err())?;
        if h < 0 || !(0..60).contains(&m) || !(0..60).contains(&sec) {
            return Err(err());
        }
        Ok(Span(Duration::seconds(h * 3600 + m * 60 + sec)))
    }
}

impl TryFrom<String> for Span {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Span> for String {
    fn from(s: Span) -> Self {
        s.to_string()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.whole_seconds();
        let sign = if secs < 0 { "-" } else { "" };
        let secs = secs.abs();
        write!(f, "{sign}{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// A local time of day written as `HH:MM[:SS]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct ClockTime(pub Time);

impl FromStr for ClockTime {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError::Time(s.to_string());
        let parts: Vec<u8> = s
            .trim()
            .split(':')
            .map(|p| p.parse::<u8>())
            .collect::<Result<_, _>>()
            .map_err(|_| err())?;
        let (h, m, sec) = match parts.as_slice() {
            [h, m] => (*h, *m, 0),
            [h, m, sec] => (*h, *m, *sec),
            _ => return Err(err()),
        };
        Time::from_hms(h, m, sec).map(ClockTime).map_err(|_| err())
    }
}

impl TryFrom<String> for ClockTime {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A fixed UTC offset written as `+HH:MM`, `-HH:MM` or `Z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Offset(pub UtcOffset);

impl Default for Offset {
    fn default() -> Self {
        Offset(UtcOffset::UTC)
    }
}

impl FromStr for Offset {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError::Offset(s.to_string());
        let s = s.trim();
        if s == "Z" || s == "z" {
            return Ok(Offset(UtcOffset::UTC));
        }
        let (sign, rest) = if let Some(rest) = s.strip_prefix('+') {
            (1i8, rest)
        } else if let Some(rest) = s.strip_prefix('-') {
            (-1i8, rest)
        } else {
            return Err(err());
        };
        let (h, m) = match rest.split_once(':') {
            Some((h, m)) => (h, m),
            None => (rest, "0"),
        };
        let h: i8 = h.parse().map_err(|_| err())?;
        let m: i8 = m.parse().map_err(|_| err())?;
        UtcOffset::from_hms(sign * h, sign * m, 0)
            .map(Offset)
            .map_err(|_| err())
    }
}

impl TryFrom<String> for Offset {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

pub fn parse_weekday(s: &str) -> Result<Weekday, ParseError> {
    Ok(match s.trim().to_ascii_lowercase().as_str() {
        "mon" | "monday" => Weekday::Monday,
        "tue" | "tuesday" => Weekday::Tuesday,
        "wed" | "wednesday" => Weekday::Wednesday,
        "thu" | "thursday" => Weekday::Thursday,
        "fri" | "friday" => Weekday::Friday,
        "sat" | "saturday" => Weekday::Saturday,
        "sun" | "sunday" => Weekday::Sunday,
        _ => return Err(ParseError::Weekday(s.to_string())),
    })
}

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

pub fn parse_month(s: &str) -> Result<Month, ParseError> {
    let lower = s.trim().to_ascii_lowercase();
    let index = MONTHS
        .iter()
        .position(|m| lower.starts_with(m) && lower.len() >= 3)
        .ok_or_else(|| ParseError::Month(s.to_string()))?;
    Month::try_from(index as u8 + 1).map_err(|_| ParseError::Month(s.to_string()))
}

pub fn parse_month_day(s: &str) -> Result<MonthDay, ParseError> {
    let err = || ParseError::MonthDay(s.to_string());
    let (m, d) = s.trim().split_once('-').ok_or_else(err)?;
    let month = Month::try_from(m.parse::<u8>().map_err(|_| err())?).map_err(|_| err())?;
    let day: u8 = d.parse().map_err(|_| err())?;
    // Leap year so that 02-29 is accepted.
    if day == 0 || day > time::util::days_in_year_month(2024, month) {
        return Err(err());
    }
    Ok(MonthDay { month, day })
}

fn weekdays<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Weekday>, D::Error> {
    Vec::<String>::deserialize(d)?
        .iter()
        .map(|s| parse_weekday(s).map_err(serde::de::Error::custom))
        .collect()
}

fn months<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Month>, D::Error> {
    Vec::<String>::deserialize(d)?
        .iter()
        .map(|s| parse_month(s).map_err(serde::de::Error::custom))
        .collect()
}

fn month_day<'de, D: Deserializer<'de>>(d: D) -> Result<Option<MonthDay>, D::Error> {
    let s = String::deserialize(d)?;
    parse_month_day(&s).map(Some).map_err(serde::de::Error::custom)
}

fn yes() -> bool {
    true
}

fn one() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub granularity: Option<u32>,
    #[serde(default)]
    pub utc_offset: Offset,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "yes")]
    pub enabled: bool,
    #[serde(default)]
    pub preamble: Option<Span>,
    #[serde(default)]
    pub postamble: Option<Span>,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub sequences: Vec<SequenceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "yes")]
    pub enabled: bool,
    #[serde(default)]
    pub minimum: Option<Span>,
    #[serde(default)]
    pub maximum: Option<Span>,
    #[serde(default)]
    pub future_span: Option<Span>,
    /// Default manual run time.
    #[serde(default)]
    pub duration: Option<Span>,
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimeConfig {
    Fixed(ClockTime),
    Sun {
        sun: SunEvent,
        #[serde(default)]
        before: Option<Span>,
        #[serde(default)]
        after: Option<Span>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayParity {
    Odd,
    Even,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DayConfig {
    Parity(DayParity),
    Days(Vec<u8>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub time: TimeConfig,
    #[serde(default)]
    pub anchor: Anchor,
    #[serde(default)]
    pub duration: Option<Span>,
    #[serde(default, deserialize_with = "weekdays")]
    pub weekday: Vec<Weekday>,
    #[serde(default, deserialize_with = "months")]
    pub month: Vec<Month>,
    #[serde(default)]
    pub day: Option<DayConfig>,
    #[serde(default, deserialize_with = "month_day")]
    pub from: Option<MonthDay>,
    #[serde(default, deserialize_with = "month_day")]
    pub until: Option<MonthDay>,
    #[serde(default = "yes")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SequenceConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "yes")]
    pub enabled: bool,
    #[serde(default)]
    pub delay: Option<Span>,
    #[serde(default)]
    pub duration: Option<Span>,
    #[serde(default = "one")]
    pub repeat: u32,
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
    #[serde(default)]
    pub zones: Vec<SequenceZoneConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SequenceZoneConfig {
    pub zone_id: Vec<String>,
    #[serde(default)]
    pub delay: Option<Span>,
    #[serde(default)]
    pub duration: Option<Span>,
    #[serde(default = "one")]
    pub repeat: u32,
    #[serde(default = "yes")]
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// `id` if given, else the 1-based position.
fn id_or_position(id: &Option<String>, index: usize) -> String {
    id.clone().unwrap_or_else(|| (index + 1).to_string())
}

impl CoordinatorConfig {
    pub fn context(&self) -> Context {
        let location = match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Location {
                latitude,
                longitude,
            }),
            _ => None,
        };
        Context::new(
            self.granularity.map(Granularity::new).unwrap_or_default(),
            self.utc_offset.0,
            location,
        )
    }

    /// Build the controller tree. Issues are collected, never fatal.
    pub fn build(&self) -> (Context, Vec<Controller>, Vec<ConfigIssue>) {
        let ctx = self.context();
        let mut issues = Vec::new();
        let mut seen = HashSet::new();
        let mut controllers = Vec::with_capacity(self.controllers.len());
        for (i, c) in self.controllers.iter().enumerate() {
            let controller = c.build(i, &ctx, &mut issues);
            if !seen.insert(controller.id.clone()) {
                issues.push(ConfigIssue::DuplicateController(controller.id.clone()));
            }
            controllers.push(controller);
        }
        (ctx, controllers, issues)
    }
}

impl ControllerConfig {
    fn build(&self, index: usize, ctx: &Context, issues: &mut Vec<ConfigIssue>) -> Controller {
        let id = id_or_position(&self.id, index);

        let mut seen = HashSet::new();
        let zones: Vec<Zone> = self
            .zones
            .iter()
            .enumerate()
            .map(|(i, z)| z.build(&id, i, ctx, issues))
            .collect();
        for zone in &zones {
            if !seen.insert(zone.id.clone()) {
                issues.push(ConfigIssue::DuplicateZone {
                    controller: id.clone(),
                    zone: zone.id.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        let sequences: Vec<Sequence> = self
            .sequences
            .iter()
            .enumerate()
            .map(|(i, s)| s.build(&id, i, &zones, ctx, issues))
            .collect();
        for sequence in &sequences {
            if !seen.insert(sequence.id.clone()) {
                issues.push(ConfigIssue::DuplicateSequence {
                    controller: id.clone(),
                    sequence: sequence.id.clone(),
                });
            }
        }

        let mut controller = Controller::new(id.clone(), zones, sequences);
        controller.name = self.name.clone().unwrap_or(id);
        controller.enabled = self.enabled;
        controller.preamble = self.preamble.map(|s| ctx.wash_td(s.0)).unwrap_or(Duration::ZERO);
        controller.postamble = self.postamble.map(|s| ctx.wash_td(s.0)).unwrap_or(Duration::ZERO);
        controller
    }
}

impl ZoneConfig {
    fn build(&self, controller: &str, index: usize, ctx: &Context, issues: &mut Vec<ConfigIssue>) -> Zone {
        let id = id_or_position(&self.id, index);
        let queue = ScheduleQueue::new(
            self.minimum.map(|s| ctx.wash_td(s.0)),
            self.maximum.map(|s| ctx.wash_td(s.0)),
            self.future_span.map(|s| s.0),
        );
        let schedules = self
            .schedules
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                let schedule = s.build(i, ctx, issues);
                if schedule.duration.is_none() {
                    issues.push(ConfigIssue::MissingDuration {
                        controller: controller.to_string(),
                        zone: id.clone(),
                        schedule: schedule.name.clone(),
                    });
                    return None;
                }
                Some(schedule)
            })
            .collect();

        let mut zone = Zone::new(id.clone(), queue).with_schedules(schedules);
        zone.name = self.name.clone().unwrap_or(id);
        zone.enabled = self.enabled;
        zone.duration = self.duration.map(|s| ctx.wash_td(s.0));
        zone
    }
}

impl ScheduleConfig {
    fn build(&self, index: usize, ctx: &Context, issues: &mut Vec<ConfigIssue>) -> Schedule {
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("Schedule {}", index + 1));
        let time = match &self.time {
            TimeConfig::Fixed(t) => TimeSpec::Fixed(ctx.granularity.wash_t(t.0)),
            TimeConfig::Sun { sun, before, after } => {
                if ctx.location.is_none() {
                    issues.push(ConfigIssue::NoLocation {
                        schedule: name.clone(),
                    });
                }
                let offset = after.map(|s| s.0).unwrap_or(Duration::ZERO)
                    - before.map(|s| s.0).unwrap_or(Duration::ZERO);
                TimeSpec::Sun {
                    event: *sun,
                    offset,
                }
            }
        };
        let days = match &self.day {
            None => DayFilter::Every,
            Some(DayConfig::Parity(DayParity::Odd)) => DayFilter::Odd,
            Some(DayConfig::Parity(DayParity::Even)) => DayFilter::Even,
            Some(DayConfig::Days(days)) => DayFilter::Days(days.clone()),
        };
        Schedule {
            name,
            time,
            anchor: self.anchor,
            duration: self.duration.map(|s| ctx.wash_td(s.0)),
            weekdays: self.weekday.clone(),
            months: self.month.clone(),
            days,
            range: DateRange {
                from: self.from,
                until: self.until,
            },
            enabled: self.enabled,
        }
    }
}

impl SequenceConfig {
    fn build(
        &self,
        controller: &str,
        index: usize,
        zones: &[Zone],
        ctx: &Context,
        issues: &mut Vec<ConfigIssue>,
    ) -> Sequence {
        let id = id_or_position(&self.id, index);
        if self.zones.is_empty() {
            issues.push(ConfigIssue::EmptySequence {
                controller: controller.to_string(),
                sequence: id.clone(),
            });
        }
        let steps = self
            .zones
            .iter()
            .map(|step| {
                let mut resolved = Vec::new();
                for zone_id in &step.zone_id {
                    match zones.iter().position(|z| &z.id == zone_id) {
                        Some(i) => resolved.push(i),
                        None => issues.push(ConfigIssue::OrphanZone {
                            controller: controller.to_string(),
                            sequence: id.clone(),
                            zone: zone_id.clone(),
                        }),
                    }
                }
                SequenceZone {
                    zone_ids: step.zone_id.clone(),
                    zones: resolved,
                    delay: step.delay.map(|s| ctx.wash_td(s.0)),
                    duration: step.duration.map(|s| ctx.wash_td(s.0)),
                    repeat: step.repeat,
                    enabled: step.enabled,
                }
            })
            .collect();
        let schedules = self
            .schedules
            .iter()
            .enumerate()
            .map(|(i, s)| s.build(i, ctx, issues))
            .collect();

        let mut sequence = Sequence::new(id.clone(), steps);
        sequence.name = self.name.clone().unwrap_or(id);
        sequence.enabled = self.enabled;
        sequence.delay = self.delay.map(|s| ctx.wash_td(s.0));
        sequence.duration = self.duration.map(|s| ctx.wash_td(s.0));
        sequence.repeat = self.repeat;
        sequence.schedules = schedules;
        sequence
    }
}

// ===========================================================================
// Tests
// ===========================================================================
