//! Engine outputs: on/off edges for the host to drive switches with, and
//! structured events for the event log and the test harness.

use serde::Serialize;
use time::OffsetDateTime;

use crate::queue::QueueStatus;
use crate::run::format_hms;

/// An on/off edge for a controller master switch (`zone` is `None`) or a
/// zone switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub controller: String,
    pub zone: Option<String>,
    pub on: bool,
}

impl Transition {
    /// Switch name: `<controller>` for a master, `<controller>/<zone>` for a
    /// zone.
    pub fn switch(&self) -> String {
        switch_name(&self.controller, self.zone.as_deref())
    }
}

pub fn switch_name(controller: &str, zone: Option<&str>) -> String {
    match zone {
        Some(zone) => format!("{controller}/{zone}"),
        None => controller.to_string(),
    }
}

/// A run starting or finishing on a zone or a controller master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub controller: String,
    pub zone: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
    pub duration: String,
    pub schedule: Option<String>,
    pub sequence: Option<String>,
    pub manual: bool,
}

impl RunEvent {
    /// Same underlying run, ignoring when the event was raised.
    pub fn same_run(&self, other: &RunEvent) -> bool {
        self.start == other.start
            && self.end == other.end
            && self.schedule == other.schedule
            && self.sequence == other.sequence
            && self.manual == other.manual
    }

    pub fn at(&self, at: OffsetDateTime) -> RunEvent {
        RunEvent { at, ..self.clone() }
    }

    /// The same run re-timed to `[start, end)`.
    pub fn spanning(&self, start: OffsetDateTime, end: OffsetDateTime) -> RunEvent {
        RunEvent {
            start,
            end,
            duration: Self::duration_of(start, end),
            ..self.clone()
        }
    }

    pub fn duration_of(start: OffsetDateTime, end: OffsetDateTime) -> String {
        format_hms(end - start)
    }
}

/// Compare the run now in progress with the one last reported and return
/// the `(finished, started)` events the difference implies.
pub fn track(
    active: &mut Option<RunEvent>,
    current: Option<RunEvent>,
    at: OffsetDateTime,
) -> (Option<RunEvent>, Option<RunEvent>) {
    let same = match (active.as_ref(), current.as_ref()) {
        (Some(a), Some(c)) => a.same_run(c),
        (None, None) => true,
        _ => false,
    };
    if same {
        return (None, None);
    }
    let finished = active.take().map(|e| e.at(at));
    *active = current.clone();
    (finished, current)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub controller: String,
    pub sequence: String,
    pub schedule: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub controller: String,
    pub zone: Option<String>,
    pub status: QueueStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunStart(RunEvent),
    RunFinish(RunEvent),
    ControllerStart(RunEvent),
    ControllerFinish(RunEvent),
    SequenceStart(SequenceEvent),
    SequenceFinish(SequenceEvent),
    QueueChanged(QueueEvent),
}

impl Event {
    pub fn at(&self) -> OffsetDateTime {
        match self {
            Event::RunStart(e)
            | Event::RunFinish(e)
            | Event::ControllerStart(e)
            | Event::ControllerFinish(e) => e.at,
            Event::SequenceStart(e) | Event::SequenceFinish(e) => e.at,
            Event::QueueChanged(e) => e.at,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::RunStart(_) => "run_start",
            Event::RunFinish(_) => "run_finish",
            Event::ControllerStart(_) => "controller_start",
            Event::ControllerFinish(_) => "controller_finish",
            Event::SequenceStart(_) => "sequence_start",
            Event::SequenceFinish(_) => "sequence_finish",
            Event::QueueChanged(_) => "queue_changed",
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
