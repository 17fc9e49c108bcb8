//! Solar event times for a calendar date and site location, computed with
//! the `sunrise` crate. An event the sun never reaches that day (polar day
//! or night) comes back as `None`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sunrise::{Coordinates, DawnType, SolarDay, SolarEvent};
use time::{Date, Duration, OffsetDateTime};

use crate::clock::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SunEvent {
    /// Civil dawn.
    Dawn,
    Sunrise,
    /// Midpoint of sunrise and sunset.
    Noon,
    Sunset,
    /// Civil dusk.
    Dusk,
}

/// Absolute instant of `event` on `date` at `location`.
pub fn sun_event(event: SunEvent, date: Date, location: Location) -> Option<OffsetDateTime> {
    let coordinates = Coordinates::new(location.latitude, location.longitude)?;
    let day = NaiveDate::from_ymd_opt(
        date.year(),
        u32::from(u8::from(date.month())),
        u32::from(date.day()),
    )?;
    let solar = SolarDay::new(coordinates, day);
    let at = |e: SolarEvent| near(date, solar.event_time(e).timestamp());

    match event {
        SunEvent::Dawn => at(SolarEvent::Dawn(DawnType::Civil)),
        SunEvent::Sunrise => at(SolarEvent::Sunrise),
        SunEvent::Sunset => at(SolarEvent::Sunset),
        SunEvent::Dusk => at(SolarEvent::Dusk(DawnType::Civil)),
        SunEvent::Noon => {
            let rise = at(SolarEvent::Sunrise)?;
            let set = at(SolarEvent::Sunset)?;
            Some(rise + (set - rise) / 2)
        }
    }
}

/// When the sun never crosses the elevation the hour angle is undefined and
/// the instant lands nowhere near `date`. Real events fall within a day and
/// a half of UTC midday on any longitude.
fn near(date: Date, unix: i64) -> Option<OffsetDateTime> {
    let t = OffsetDateTime::from_unix_timestamp(unix).ok()?;
    let midday = date.midnight().assume_utc() + Duration::hours(12);
    ((t - midday).abs() <= Duration::hours(36)).then_some(t)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    const EQUATOR: Location = Location {
        latitude: 0.0,
        longitude: 0.0,
    };

    const LONDON: Location = Location {
        latitude: 51.5074,
        longitude: -0.1278,
    };

    const SVALBARD: Location = Location {
        latitude: 78.2,
        longitude: 15.6,
    };

    fn within(actual: OffsetDateTime, expected: OffsetDateTime, minutes: i64) {
        assert!(
            (actual - expected).abs() <= Duration::minutes(minutes),
            "got {actual}, expected {expected}"
        );
    }

    #[test]
    fn equinox_sunrise_at_equator_is_near_six() {
        let rise = sun_event(SunEvent::Sunrise, date!(2024-03-20), EQUATOR).unwrap();
        within(rise, datetime!(2024-03-20 06:05 UTC), 10);
    }

    #[test]
    fn london_midsummer_matches_almanac() {
        // Published: sunrise 04:43 BST, sunset 21:21 BST.
        let d = date!(2024-06-21);
        let rise = sun_event(SunEvent::Sunrise, d, LONDON).unwrap();
        let set = sun_event(SunEvent::Sunset, d, LONDON).unwrap();
        within(rise, datetime!(2024-06-21 03:43 UTC), 3);
        within(set, datetime!(2024-06-21 20:21 UTC), 3);
    }

    #[test]
    fn events_are_ordered_through_the_day() {
        let d = date!(2024-06-01);
        let sydney = Location {
            latitude: -33.87,
            longitude: 151.21,
        };
        let dawn = sun_event(SunEvent::Dawn, d, sydney).unwrap();
        let rise = sun_event(SunEvent::Sunrise, d, sydney).unwrap();
        let noon = sun_event(SunEvent::Noon, d, sydney).unwrap();
        let set = sun_event(SunEvent::Sunset, d, sydney).unwrap();
        let dusk = sun_event(SunEvent::Dusk, d, sydney).unwrap();
        assert!(dawn < rise && rise < noon && noon < set && set < dusk);
    }

    #[test]
    fn polar_day_has_no_sunrise() {
        assert!(sun_event(SunEvent::Sunrise, date!(2024-06-21), SVALBARD).is_none());
        assert!(sun_event(SunEvent::Sunset, date!(2024-06-21), SVALBARD).is_none());
        assert!(sun_event(SunEvent::Noon, date!(2024-06-21), SVALBARD).is_none());
    }

    #[test]
    fn polar_night_has_no_sunrise() {
        assert!(sun_event(SunEvent::Sunrise, date!(2024-12-21), SVALBARD).is_none());
        assert!(sun_event(SunEvent::Dawn, date!(2024-12-21), SVALBARD).is_none());
    }
}
