use thiserror::Error;

/// Why a service call was ignored. Returned to the caller; the tick loop
/// logs it and carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("unknown controller {0}")]
    UnknownController(String),

    #[error("unknown zone {zone} on controller {controller}")]
    UnknownZone { controller: String, zone: String },

    #[error("unknown sequence {sequence} on controller {controller}")]
    UnknownSequence { controller: String, sequence: String },

    #[error("{command} is not supported for a {target}")]
    Unsupported {
        command: &'static str,
        target: &'static str,
    },

    #[error("no run time given and zone {zone} has no default duration")]
    NoDuration { zone: String },

    #[error("{kind} {id} is disabled")]
    Disabled { kind: &'static str, id: String },
}

/// A configuration shape problem found at load. Load continues with the
/// offending item dropped or kept as noted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigIssue {
    #[error("duplicate controller id {0}")]
    DuplicateController(String),

    #[error("controller {controller}: duplicate zone id {zone}")]
    DuplicateZone { controller: String, zone: String },

    #[error("controller {controller}: duplicate sequence id {sequence}")]
    DuplicateSequence { controller: String, sequence: String },

    #[error("controller {controller}: sequence {sequence} refers to unknown zone {zone}, ignored")]
    OrphanZone {
        controller: String,
        sequence: String,
        zone: String,
    },

    #[error("controller {controller}: zone {zone} schedule {schedule} has no duration, dropped")]
    MissingDuration {
        controller: String,
        zone: String,
        schedule: String,
    },

    #[error("controller {controller}: sequence {sequence} has no steps")]
    EmptySequence { controller: String, sequence: String },

    #[error("schedule {schedule} uses a sun event but no latitude/longitude is configured")]
    NoLocation { schedule: String },
}

/// A configuration value that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid duration {0:?}, expected H:MM or H:MM:SS")]
    Duration(String),

    #[error("invalid time of day {0:?}, expected HH:MM or HH:MM:SS")]
    Time(String),

    #[error("invalid utc offset {0:?}, expected +HH:MM")]
    Offset(String),

    #[error("invalid weekday {0:?}")]
    Weekday(String),

    #[error("invalid month {0:?}")]
    Month(String),

    #[error("invalid date {0:?}, expected MM-DD")]
    MonthDay(String),
}
