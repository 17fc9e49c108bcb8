//! A physical watering zone: its schedules, adjustment and run queue.

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::adjustment::{Adjustment, AdjustmentRequest};
use crate::clock::Context;
use crate::event::{track, RunEvent};
use crate::queue::{QueueStatus, ScheduleQueue};
use crate::run::{Run, RunSnapshot};
use crate::schedule::Schedule;
use crate::sequence::SequenceRuns;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneStatus {
    Initialising,
    On,
    Off,
    Disabled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub schedules: Vec<Schedule>,
    /// Default manual run time.
    pub duration: Option<Duration>,
    pub adjustment: Adjustment,
    queue: ScheduleQueue,
    clear_request: bool,
    initialised: bool,
    is_on: bool,
    /// Run currently reported as started, for the matching finish event.
    active: Option<RunEvent>,
}

impl Zone {
    pub fn new(id: impl Into<String>, queue: ScheduleQueue) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            enabled: true,
            schedules: Vec::new(),
            duration: None,
            adjustment: Adjustment::default(),
            queue,
            clear_request: false,
            initialised: false,
            is_on: false,
            active: None,
        }
    }

    pub fn with_schedules(mut self, schedules: Vec<Schedule>) -> Self {
        self.schedules = schedules;
        self
    }

    pub fn queue(&self) -> &ScheduleQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut ScheduleQueue {
        &mut self.queue
    }

    pub fn current_run(&self) -> Option<&Run> {
        self.queue.queue().current_run()
    }

    pub fn next_run(&self) -> Option<&Run> {
        self.queue.queue().next_run()
    }

    /// Whether the zone switch should be open.
    pub fn is_on(&self) -> bool {
        self.current_run().is_some()
    }

    /// Last on-state reported through `check_run`.
    pub fn reported_on(&self) -> bool {
        self.is_on
    }

    pub fn status(&self, controller_enabled: bool) -> ZoneStatus {
        if !self.initialised {
            ZoneStatus::Initialising
        } else if !self.enabled || !controller_enabled {
            ZoneStatus::Disabled
        } else if self.is_on() {
            ZoneStatus::On
        } else {
            ZoneStatus::Off
        }
    }

    // -- Muster ------------------------------------------------------------

    pub fn request_clear(&mut self) {
        self.clear_request = true;
    }

    pub fn take_clear_request(&mut self) -> bool {
        std::mem::take(&mut self.clear_request)
    }

    /// Drop queued work that has not started.
    pub fn clear(&mut self, t: OffsetDateTime, sequence_runs: &SequenceRuns) -> QueueStatus {
        if self.queue.queue_mut().clear(t, sequence_runs) {
            QueueStatus::CLEARED
        } else {
            QueueStatus::NONE
        }
    }

    pub fn clear_all(&mut self) -> QueueStatus {
        if self.queue.queue_mut().clear_all() {
            QueueStatus::CLEARED
        } else {
            QueueStatus::NONE
        }
    }

    /// Fill the horizon from every enabled schedule.
    pub fn muster_schedules(&mut self, ctx: &Context, t: OffsetDateTime, index: usize) -> QueueStatus {
        let mut status = QueueStatus::NONE;
        for (i, schedule) in self.schedules.iter().enumerate() {
            if !schedule.enabled {
                continue;
            }
            if self
                .queue
                .merge_fill(ctx, t, index, i, schedule, &self.adjustment)
            {
                status |= QueueStatus::EXTENDED;
            }
        }
        status
    }

    pub fn update_queue(&mut self, t: OffsetDateTime, sequence_runs: &mut SequenceRuns) -> QueueStatus {
        self.initialised = true;
        self.queue.update_queue(t, sequence_runs)
    }

    /// Record the reported on-state. Returns the finish and start events the
    /// change implies: `(finished, started)`.
    pub fn report(&mut self, on: bool, current: Option<RunEvent>, at: OffsetDateTime) -> (Option<RunEvent>, Option<RunEvent>) {
        self.is_on = on;
        track(&mut self.active, current, at)
    }

    // -- Service -----------------------------------------------------------

    /// Returns whether the flag changed.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        if self.enabled == enabled {
            return false;
        }
        self.enabled = enabled;
        self.request_clear();
        true
    }

    pub fn adjust(&mut self, request: &AdjustmentRequest) -> bool {
        let changed = self.adjustment.load(request);
        if changed {
            self.request_clear();
        }
        changed
    }

    pub fn cancel(&mut self) {
        self.queue.queue_mut().cancel();
    }

    /// Queue a manual run one granularity unit from `t`.
    pub fn manual_run(&mut self, ctx: &Context, t: OffsetDateTime, duration: Duration, index: usize) {
        let start = ctx.wash_dt(t) + ctx.unit();
        self.queue.add_manual(ctx, start, ctx.wash_td(duration), index);
    }

    // -- Snapshot ----------------------------------------------------------

    pub fn snapshot(
        &self,
        index: usize,
        controller_enabled: bool,
        describe: impl Fn(&Run) -> RunSnapshot,
    ) -> ZoneSnapshot {
        ZoneSnapshot {
            index,
            id: self.id.clone(),
            name: self.name.clone(),
            enabled: self.enabled,
            status: self.status(controller_enabled),
            on: self.is_on(),
            adjustment: self.adjustment.to_string(),
            current_run: self.current_run().map(&describe),
            next_run: self.next_run().map(&describe),
            runs: self.queue.queue().runs().iter().map(&describe).collect(),
            schedules: self
                .schedules
                .iter()
                .map(|s| ScheduleSnapshot {
                    name: s.name.clone(),
                    time: s.describe_time(),
                    enabled: s.enabled,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleSnapshot {
    pub name: String,
    pub time: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneSnapshot {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub status: ZoneStatus,
    pub on: bool,
    pub adjustment: String,
    pub current_run: Option<RunSnapshot>,
    pub next_run: Option<RunSnapshot>,
    pub runs: Vec<RunSnapshot>,
    pub schedules: Vec<ScheduleSnapshot>,
}

// ===========================================================================
// Tests
// ===========================================================================
