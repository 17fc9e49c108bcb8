//! A concrete watering interval `[start, start + duration)` for one zone.

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::sequence::SequenceRunId;

/// What produced a run. Queue algorithms switch on this tag explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// Requested through a manual-run service call.
    Manual,
    /// Generated by the zone's own schedule at this index.
    Scheduled { schedule: usize },
    /// One step of a sequence activation. `schedule` is the sequence
    /// schedule index, `None` for a manually started sequence.
    Sequence {
        run: SequenceRunId,
        step: usize,
        schedule: Option<usize>,
    },
}

impl RunKind {
    /// Manual runs have no driving schedule, sequence or not.
    pub fn is_manual(&self) -> bool {
        matches!(
            self,
            RunKind::Manual | RunKind::Sequence { schedule: None, .. }
        )
    }

    pub fn sequence_run(&self) -> Option<SequenceRunId> {
        match self {
            RunKind::Sequence { run, .. } => Some(*run),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    start: OffsetDateTime,
    duration: Duration,
    end: OffsetDateTime,
    zone: usize,
    kind: RunKind,
    remaining: Duration,
    percent_complete: u8,
}

impl Run {
    pub fn new(start: OffsetDateTime, duration: Duration, zone: usize, kind: RunKind) -> Self {
        Self {
            start,
            duration,
            end: start + duration,
            zone,
            kind,
            remaining: duration,
            percent_complete: 0,
        }
    }

    pub fn start(&self) -> OffsetDateTime {
        self.start
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn end(&self) -> OffsetDateTime {
        self.end
    }

    /// Owning zone index within the controller.
    pub fn zone(&self) -> usize {
        self.zone
    }

    pub fn kind(&self) -> RunKind {
        self.kind
    }

    pub fn is_manual(&self) -> bool {
        self.kind.is_manual()
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    pub fn percent_complete(&self) -> u8 {
        self.percent_complete
    }

    pub fn is_running(&self, t: OffsetDateTime) -> bool {
        self.start <= t && t < self.end
    }

    pub fn is_expired(&self, t: OffsetDateTime) -> bool {
        self.end <= t
    }

    /// Queue ordering key. Manual runs sort as if they started at the
    /// beginning of time.
    pub fn sort_key(&self) -> Option<OffsetDateTime> {
        if self.is_manual() {
            None
        } else {
            Some(self.start)
        }
    }

    /// Refresh remaining time and percent complete. Returns whether either
    /// value moved.
    pub fn update_time_remaining(&mut self, t: OffsetDateTime) -> bool {
        let (remaining, percent) = if self.is_running(t) {
            let elapsed = (t - self.start).whole_seconds();
            let total = self.duration.whole_seconds().max(1);
            (self.end - t, (elapsed * 100 / total).clamp(0, 100) as u8)
        } else if self.is_expired(t) {
            (Duration::ZERO, 100)
        } else {
            (self.duration, 0)
        };
        let changed = remaining != self.remaining || percent != self.percent_complete;
        self.remaining = remaining;
        self.percent_complete = percent;
        changed
    }

    /// Controller-level copy: start earlier by `preamble`, finish later by
    /// `postamble`.
    pub fn widened(&self, preamble: Duration, postamble: Duration) -> Run {
        Run::new(
            self.start - preamble,
            self.duration + preamble + postamble,
            self.zone,
            self.kind,
        )
    }

    pub fn snapshot(&self, schedule: Option<String>, sequence: Option<String>) -> RunSnapshot {
        RunSnapshot {
            zone: self.zone,
            start: self.start,
            end: self.end,
            duration: format_hms(self.duration),
            time_remaining: format_hms(self.remaining),
            percent_complete: self.percent_complete,
            manual: self.is_manual(),
            schedule,
            sequence,
        }
    }
}

/// Serialisable view of a run for host-side display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub zone: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
    pub duration: String,
    pub time_remaining: String,
    pub percent_complete: u8,
    pub manual: bool,
    pub schedule: Option<String>,
    pub sequence: Option<String>,
}

/// `HH:MM:SS`, negative durations clamp to zero.
pub fn format_hms(d: Duration) -> String {
    let secs = d.whole_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

// ===========================================================================
// Tests
// ===========================================================================
