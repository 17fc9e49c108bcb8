//! A controller: a master valve feeding a set of zones, plus the sequences
//! that choreograph them. Hosts the per-tick `muster` pass.
//!
//! ## Muster
//!
//! ```text
//! dirty/force ─▶ clear_all every zone queue
//! clear request on any zone ─▶ clear(t) every zone queue
//! enabled ─▶ muster_sequence per (sequence, schedule) until nothing new
//!         ─▶ muster_schedules per enabled zone
//! update_queue per zone
//! any zone flag ─▶ rebuild ZoneQueue (full on cleared/canceled)
//! update_queue ZoneQueue
//! ```
//!
//! A clear request on one zone clears the whole controller so that sequence
//! activations spanning several zones are regenerated whole.

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::adjustment::AdjustmentRequest;
use crate::clock::Context;
use crate::event::{Event, QueueEvent, RunEvent, SequenceEvent, Transition};
use crate::queue::{QueueStatus, ZoneQueue};
use crate::run::{Run, RunKind, RunSnapshot};
use crate::sequence::{Sequence, SequenceRun, SequenceRuns};
use crate::zone::{Zone, ZoneSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerStatus {
    Initialising,
    On,
    Off,
    /// A sequence is under way but no zone is open.
    Paused,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceStatus {
    On,
    Off,
    Paused,
    Disabled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Controller {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub preamble: Duration,
    pub postamble: Duration,
    pub zones: Vec<Zone>,
    pub sequences: Vec<Sequence>,
    queue: ZoneQueue,
    sequence_runs: SequenceRuns,
    dirty: bool,
    rebuild: bool,
    initialised: bool,
    is_on: bool,
    active: Option<RunEvent>,
}

impl Controller {
    pub fn new(id: impl Into<String>, zones: Vec<Zone>, sequences: Vec<Sequence>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            enabled: true,
            preamble: Duration::ZERO,
            postamble: Duration::ZERO,
            zones,
            sequences,
            queue: ZoneQueue::new(),
            sequence_runs: SequenceRuns::default(),
            dirty: true,
            rebuild: false,
            initialised: false,
            is_on: false,
            active: None,
        }
    }

    pub fn queue(&self) -> &ZoneQueue {
        &self.queue
    }

    pub fn sequence_runs(&self) -> &SequenceRuns {
        &self.sequence_runs
    }

    pub fn zone_index(&self, id: &str) -> Option<usize> {
        self.zones.iter().position(|z| z.id == id)
    }

    pub fn sequence_index(&self, id: &str) -> Option<usize> {
        self.sequences.iter().position(|s| s.id == id)
    }

    /// Whether the master switch should be open.
    pub fn is_on(&self) -> bool {
        self.queue.queue().current_run().is_some()
    }

    pub fn status(&self) -> ControllerStatus {
        if !self.initialised {
            ControllerStatus::Initialising
        } else if !self.enabled {
            ControllerStatus::Disabled
        } else if self.is_on() {
            ControllerStatus::On
        } else if self.sequence_runs.any_running() {
            ControllerStatus::Paused
        } else {
            ControllerStatus::Off
        }
    }

    pub fn sequence_status(&self, index: usize) -> SequenceStatus {
        let enabled = self.sequences.get(index).is_some_and(|s| s.enabled);
        if !self.enabled || !enabled {
            return SequenceStatus::Disabled;
        }
        if !self.sequence_runs.is_sequence_running(index) {
            return SequenceStatus::Off;
        }
        let open = self.zones.iter().filter_map(Zone::current_run).any(|r| {
            r.kind()
                .sequence_run()
                .and_then(|id| self.sequence_runs.get(id))
                .is_some_and(|sr| sr.sequence == index)
        });
        if open {
            SequenceStatus::On
        } else {
            SequenceStatus::Paused
        }
    }

    fn zone_enabled(&self) -> Vec<bool> {
        self.zones.iter().map(|z| z.enabled).collect()
    }

    // -----------------------------------------------------------------------
    // Muster
    // -----------------------------------------------------------------------

    pub fn muster(
        &mut self,
        ctx: &Context,
        t: OffsetDateTime,
        force: bool,
        events: &mut Vec<Event>,
    ) -> QueueStatus {
        let mut zone_status = vec![QueueStatus::NONE; self.zones.len()];

        if self.dirty || force {
            for (i, zone) in self.zones.iter_mut().enumerate() {
                zone_status[i] |= zone.clear_all();
                zone.take_clear_request();
            }
            self.sequence_runs.clear();
            self.rebuild = true;
            self.dirty = false;
        }

        let clear = self
            .zones
            .iter_mut()
            .fold(false, |acc, z| z.take_clear_request() | acc);
        if clear {
            for (i, zone) in self.zones.iter_mut().enumerate() {
                zone_status[i] |= zone.clear(t, &self.sequence_runs);
            }
            self.purge_sequence_runs(t, events);
        }

        let mut status = QueueStatus::NONE;
        if self.enabled {
            for s in 0..self.sequences.len() {
                if !self.sequences[s].enabled {
                    continue;
                }
                for sch in 0..self.sequences[s].schedules.len() {
                    if !self.sequences[s].schedules[sch].enabled {
                        continue;
                    }
                    loop {
                        let extended = self.muster_sequence(ctx, t, s, Some(sch), None);
                        if !extended.contains(QueueStatus::EXTENDED) {
                            break;
                        }
                        status |= extended;
                    }
                }
            }
            for (i, zone) in self.zones.iter_mut().enumerate() {
                if zone.enabled {
                    zone_status[i] |= zone.muster_schedules(ctx, t, i);
                }
            }
        }

        for (i, zone) in self.zones.iter_mut().enumerate() {
            zone_status[i] |= zone.update_queue(t, &mut self.sequence_runs);
        }
        self.purge_sequence_runs(t, events);
        self.announce_sequence_runs(t, events);

        for (zone, zs) in self.zones.iter().zip(&zone_status) {
            if !zs.is_empty() {
                events.push(Event::QueueChanged(QueueEvent {
                    at: t,
                    controller: self.id.clone(),
                    zone: Some(zone.id.clone()),
                    status: *zs,
                }));
            }
            status |= *zs;
        }

        let full = std::mem::take(&mut self.rebuild)
            || status.intersects(QueueStatus::CLEARED | QueueStatus::CANCELED);
        let mut master = QueueStatus::NONE;
        if full || !status.is_empty() {
            let runs = self.zones.iter().flat_map(|z| z.queue().queue().runs());
            master |= self
                .queue
                .rebuild_schedule(runs, t, self.preamble, self.postamble, full);
        }
        master |= self.queue.update_queue(t, &mut self.sequence_runs);
        if !master.is_empty() {
            events.push(Event::QueueChanged(QueueEvent {
                at: t,
                controller: self.id.clone(),
                zone: None,
                status: master,
            }));
        }
        self.initialised = true;

        status |= master;
        if !status.is_empty() {
            debug!(controller = %self.id, %status, "muster");
        }
        status
    }

    /// Enqueue one activation of sequence `index`. With `schedule` the
    /// activation is the next occurrence after the previous one from the
    /// same schedule; without it the activation starts one granularity unit
    /// from `t`. Returns `EXTENDED` when an activation was created.
    pub fn muster_sequence(
        &mut self,
        ctx: &Context,
        t: OffsetDateTime,
        index: usize,
        schedule: Option<usize>,
        requested: Option<Duration>,
    ) -> QueueStatus {
        let enabled = self.zone_enabled();
        let zone_enabled = |z: usize| enabled.get(z).copied().unwrap_or(false);
        let Some(sequence) = self.sequences.get(index) else {
            return QueueStatus::NONE;
        };
        let first_zone = sequence
            .steps
            .iter()
            .filter(|s| s.is_active(&zone_enabled))
            .flat_map(|s| s.zones.iter().copied())
            .find(|&z| zone_enabled(z));
        let Some(first_zone) = first_zone else {
            return QueueStatus::NONE;
        };

        let driving = schedule.and_then(|i| sequence.schedules.get(i));
        let total = sequence.activation_time(requested, driving, ctx.granularity, &zone_enabled);
        let multiplier = sequence.duration_multiplier(total, &zone_enabled);

        let start = match driving {
            Some(sched) => {
                let lower = self
                    .sequence_runs
                    .last_for(index, schedule)
                    .map(|r| r.end.max(r.start + ctx.unit()))
                    .unwrap_or(t)
                    .max(t);
                let horizon = t + self.zones[first_zone].queue().future_span();
                match sched.get_next_run(ctx, lower, horizon, total) {
                    Some(start) => start,
                    None => return QueueStatus::NONE,
                }
            }
            None => ctx.wash_dt(t) + ctx.unit(),
        };

        // (zone, step, start, duration)
        let mut plan: Vec<(usize, usize, OffsetDateTime, Duration)> = Vec::new();
        let mut anchor = start;
        for _ in 0..sequence.repeat {
            for (step_index, step) in sequence.steps.iter().enumerate() {
                if !step.is_active(&zone_enabled) {
                    continue;
                }
                let duration = sequence.scaled_duration(step, multiplier);
                let delay = sequence.step_delay(step);
                let mut longest = Duration::ZERO;
                for &z in step.zones.iter().filter(|&&z| zone_enabled(z)) {
                    let clamped = self.zones[z].queue().clamp(duration);
                    let mut elapsed = Duration::ZERO;
                    for _ in 0..step.repeat {
                        plan.push((z, step_index, anchor + elapsed, clamped));
                        elapsed += clamped + delay;
                    }
                    longest = longest.max(elapsed);
                }
                anchor += longest;
            }
        }
        if plan.is_empty() {
            return QueueStatus::NONE;
        }

        let end = plan
            .iter()
            .map(|&(_, _, s, d)| s + d)
            .max()
            .unwrap_or(start);
        debug!(
            controller = %self.id,
            sequence = %sequence.id,
            start = %start,
            end = %end,
            multiplier,
            "sequence activation"
        );

        let id = self.sequence_runs.create(index, schedule, start);
        self.sequence_runs.set_end(id, end);
        for (z, step, s, d) in plan {
            let kind = RunKind::Sequence {
                run: id,
                step,
                schedule,
            };
            self.zones[z].queue_mut().add(s, d, z, kind);
        }
        QueueStatus::EXTENDED
    }

    /// Drop activations with no runs left in any zone queue.
    fn purge_sequence_runs(&mut self, t: OffsetDateTime, events: &mut Vec<Event>) {
        let zones = &self.zones;
        let dropped = self.sequence_runs.retain(|id| {
            zones
                .iter()
                .any(|z| z.queue().queue().contains_sequence_run(id))
        });
        for run in dropped.into_iter().filter(|r| r.announced) {
            events.push(Event::SequenceFinish(self.sequence_event(t, &run)));
        }
    }

    fn announce_sequence_runs(&mut self, t: OffsetDateTime, events: &mut Vec<Event>) {
        for run in self.sequence_runs.take_unannounced() {
            events.push(Event::SequenceStart(self.sequence_event(t, &run)));
        }
    }

    fn sequence_event(&self, at: OffsetDateTime, run: &SequenceRun) -> SequenceEvent {
        let sequence = self.sequences.get(run.sequence);
        SequenceEvent {
            at,
            controller: self.id.clone(),
            sequence: sequence.map(|s| s.id.clone()).unwrap_or_default(),
            schedule: run
                .schedule
                .and_then(|i| sequence.and_then(|s| s.schedules.get(i)))
                .map(|s| s.name.clone()),
            start: run.start,
            end: run.end,
        }
    }

    // -----------------------------------------------------------------------
    // On/off edges
    // -----------------------------------------------------------------------

    /// Compare desired on-states with those last reported and emit the
    /// edges and run events.
    pub fn check_run(&mut self, t: OffsetDateTime, transitions: &mut Vec<Transition>, events: &mut Vec<Event>) {
        for i in 0..self.zones.len() {
            let on = self.zones[i].is_on();
            let current = self.zones[i]
                .current_run()
                .map(|r| self.run_event(t, Some(i), r));
            if on != self.zones[i].reported_on() {
                transitions.push(Transition {
                    at: t,
                    controller: self.id.clone(),
                    zone: Some(self.zones[i].id.clone()),
                    on,
                });
            }
            let (finished, started) = self.zones[i].report(on, current, t);
            events.extend(finished.map(Event::RunFinish));
            events.extend(started.map(Event::RunStart));
        }

        // The master event spans the whole on-period, however many zone
        // runs it covers.
        let on = self.is_on();
        if on == self.is_on {
            return;
        }
        transitions.push(Transition {
            at: t,
            controller: self.id.clone(),
            zone: None,
            on,
        });
        self.is_on = on;
        if on {
            let started = self
                .queue
                .queue()
                .current_run()
                .map(|r| self.run_event(t, None, r))
                .map(|e| e.spanning(t, e.end));
            self.active.clone_from(&started);
            events.extend(started.map(Event::ControllerStart));
        } else if let Some(active) = self.active.take() {
            events.push(Event::ControllerFinish(active.spanning(active.start, t).at(t)));
        }
    }

    fn run_event(&self, at: OffsetDateTime, zone: Option<usize>, run: &Run) -> RunEvent {
        let (schedule, sequence) = self.describe(run);
        RunEvent {
            at,
            controller: self.id.clone(),
            zone: zone.and_then(|i| self.zones.get(i)).map(|z| z.id.clone()),
            start: run.start(),
            end: run.end(),
            duration: RunEvent::duration_of(run.start(), run.end()),
            schedule,
            sequence,
            manual: run.is_manual(),
        }
    }

    /// Names of the schedule and sequence that produced `run`.
    pub fn describe(&self, run: &Run) -> (Option<String>, Option<String>) {
        match run.kind() {
            RunKind::Manual => (None, None),
            RunKind::Scheduled { schedule } => (
                self.zones
                    .get(run.zone())
                    .and_then(|z| z.schedules.get(schedule))
                    .map(|s| s.name.clone()),
                None,
            ),
            RunKind::Sequence { run: id, schedule, .. } => {
                let sequence = self
                    .sequence_runs
                    .get(id)
                    .and_then(|r| self.sequences.get(r.sequence));
                (
                    schedule
                        .and_then(|i| sequence.and_then(|s| s.schedules.get(i)))
                        .map(|s| s.name.clone()),
                    sequence.map(|s| s.name.clone()),
                )
            }
        }
    }

    // -----------------------------------------------------------------------
    // Service
    // -----------------------------------------------------------------------

    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        if self.enabled == enabled {
            return false;
        }
        self.enabled = enabled;
        self.request_clear();
        true
    }

    pub fn set_zone_enabled(&mut self, zone: usize, enabled: bool) -> bool {
        self.zones
            .get_mut(zone)
            .is_some_and(|z| z.set_enabled(enabled))
    }

    pub fn set_sequence_enabled(&mut self, sequence: usize, enabled: bool) -> bool {
        let Some(s) = self.sequences.get_mut(sequence) else {
            return false;
        };
        if s.enabled == enabled {
            return false;
        }
        s.enabled = enabled;
        self.request_clear();
        true
    }

    fn request_clear(&mut self) {
        for zone in &mut self.zones {
            zone.request_clear();
        }
    }

    /// Adjust every zone. Returns whether any changed.
    pub fn adjust_zones(&mut self, request: &AdjustmentRequest) -> bool {
        self.zones
            .iter_mut()
            .fold(false, |acc, z| z.adjust(request) | acc)
    }

    pub fn adjust_zone(&mut self, zone: usize, request: &AdjustmentRequest) -> bool {
        self.zones.get_mut(zone).is_some_and(|z| z.adjust(request))
    }

    pub fn adjust_sequence(&mut self, sequence: usize, request: &AdjustmentRequest) -> bool {
        let changed = self
            .sequences
            .get_mut(sequence)
            .is_some_and(|s| s.adjustment.load(request));
        if changed {
            self.request_clear();
        }
        changed
    }

    pub fn cancel(&mut self) {
        for zone in &mut self.zones {
            zone.cancel();
        }
    }

    pub fn cancel_zone(&mut self, zone: usize) {
        if let Some(z) = self.zones.get_mut(zone) {
            z.cancel();
        }
    }

    /// Abort the activations of `sequence` that are under way. Returns
    /// whether anything was removed.
    pub fn cancel_sequence(&mut self, sequence: usize) -> bool {
        let running: Vec<_> = self
            .sequence_runs
            .iter()
            .filter(|r| r.sequence == sequence && r.running)
            .map(|r| r.id)
            .collect();
        let mut removed = false;
        for zone in &mut self.zones {
            removed |= zone.queue_mut().queue_mut().remove_where(|r| {
                r.kind()
                    .sequence_run()
                    .is_some_and(|id| running.contains(&id))
            });
        }
        if removed {
            self.rebuild = true;
        }
        removed
    }

    pub fn manual_run_zone(&mut self, ctx: &Context, t: OffsetDateTime, zone: usize, duration: Duration) {
        if let Some(z) = self.zones.get_mut(zone) {
            z.manual_run(ctx, t, duration, zone);
            self.rebuild = true;
        }
    }

    /// Start sequence `index` now. `total` stretches or shrinks the step
    /// durations to fit; `None` runs the natural total.
    pub fn manual_run_sequence(
        &mut self,
        ctx: &Context,
        t: OffsetDateTime,
        index: usize,
        total: Option<Duration>,
    ) -> bool {
        let extended = self
            .muster_sequence(ctx, t, index, None, total.map(|d| ctx.wash_td(d)))
            .contains(QueueStatus::EXTENDED);
        if extended {
            self.rebuild = true;
        }
        extended
    }

    /// Structural change: everything is recomputed on the next muster.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    fn run_snapshot(&self, run: &Run) -> RunSnapshot {
        let (schedule, sequence) = self.describe(run);
        run.snapshot(schedule, sequence)
    }

    pub fn snapshot(&self, index: usize) -> ControllerSnapshot {
        let enabled_zones = self.zone_enabled();
        let zone_enabled = |z: usize| enabled_zones.get(z).copied().unwrap_or(false);
        ControllerSnapshot {
            index,
            id: self.id.clone(),
            name: self.name.clone(),
            enabled: self.enabled,
            status: self.status(),
            on: self.is_on(),
            current_run: self.queue.queue().current_run().map(|r| self.run_snapshot(r)),
            next_run: self.queue.queue().next_run().map(|r| self.run_snapshot(r)),
            zones: self
                .zones
                .iter()
                .enumerate()
                .map(|(i, z)| z.snapshot(i, self.enabled, |r| self.run_snapshot(r)))
                .collect(),
            sequences: self
                .sequences
                .iter()
                .enumerate()
                .map(|(i, s)| SequenceSnapshot {
                    index: i,
                    id: s.id.clone(),
                    name: s.name.clone(),
                    enabled: s.enabled,
                    status: self.sequence_status(i),
                    adjustment: s.adjustment.to_string(),
                    total_time: crate::run::format_hms(s.total_time(&zone_enabled)),
                    steps: s.steps.iter().map(|st| st.zone_ids.clone()).collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceSnapshot {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub status: SequenceStatus,
    pub adjustment: String,
    pub total_time: String,
    pub steps: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub status: ControllerStatus,
    pub on: bool,
    pub current_run: Option<RunSnapshot>,
    pub next_run: Option<RunSnapshot>,
    pub zones: Vec<ZoneSnapshot>,
    pub sequences: Vec<SequenceSnapshot>,
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ScheduleQueue;
    use crate::schedule::Schedule;
    use crate::sequence::SequenceZone;
    use time::macros::{datetime, time};

    fn secs(s: i64) -> Duration {
        Duration::seconds(s)
    }

    fn zone(id: &str) -> Zone {
        Zone::new(id, ScheduleQueue::default())
    }

    /// Zones "1", "2", "3"; a sequence of 360 s on zone 1 then 720 s on
    /// zones 2 and 3.
    fn choreographed() -> Controller {
        let seq = Sequence::new(
            "s1",
            vec![
                SequenceZone::new(vec![0], Some(secs(360))),
                SequenceZone::new(vec![1, 2], Some(secs(720))),
            ],
        );
        Controller::new("c1", vec![zone("1"), zone("2"), zone("3")], vec![seq])
    }

    fn spans(c: &Controller, z: usize) -> Vec<(OffsetDateTime, OffsetDateTime)> {
        c.zones[z]
            .queue()
            .queue()
            .runs()
            .iter()
            .map(|r| (r.start(), r.end()))
            .collect()
    }

    #[test]
    fn manual_sequence_chains_steps() {
        let ctx = Context::default();
        let mut c = choreographed();
        let mut events = Vec::new();
        let t = datetime!(2024-06-01 06:04 UTC);
        c.muster(&ctx, t, false, &mut events);
        assert!(c.manual_run_sequence(&ctx, t, 0, None));

        assert_eq!(
            spans(&c, 0),
            vec![(datetime!(2024-06-01 06:05 UTC), datetime!(2024-06-01 06:11 UTC))]
        );
        for z in [1, 2] {
            assert_eq!(
                spans(&c, z),
                vec![(datetime!(2024-06-01 06:11 UTC), datetime!(2024-06-01 06:23 UTC))]
            );
        }
    }

    #[test]
    fn step_delay_and_repeat_chain_back_to_back() {
        let ctx = Context::default();
        let seq = Sequence::new(
            "s",
            vec![
                SequenceZone::new(vec![0], Some(secs(120)))
                    .with_delay(secs(60))
                    .with_repeat(2),
                SequenceZone::new(vec![1], Some(secs(60))),
            ],
        );
        let mut c = Controller::new("c", vec![zone("1"), zone("2")], vec![seq]);
        let t = datetime!(2024-06-01 06:00 UTC);
        c.muster(&ctx, t, false, &mut Vec::new());
        c.manual_run_sequence(&ctx, t, 0, None);

        assert_eq!(
            spans(&c, 0),
            vec![
                (datetime!(2024-06-01 06:01 UTC), datetime!(2024-06-01 06:03 UTC)),
                (datetime!(2024-06-01 06:04 UTC), datetime!(2024-06-01 06:06 UTC)),
            ]
        );
        // Second step starts after the trailing delay of the first.
        assert_eq!(
            spans(&c, 1),
            vec![(datetime!(2024-06-01 06:07 UTC), datetime!(2024-06-01 06:08 UTC))]
        );
    }

    #[test]
    fn requested_total_scales_steps() {
        let ctx = Context::default();
        let mut c = choreographed();
        let t = datetime!(2024-06-01 06:04 UTC);
        c.muster(&ctx, t, false, &mut Vec::new());
        // Natural total is 18 min; ask for 9.
        c.manual_run_sequence(&ctx, t, 0, Some(Duration::minutes(9)));
        assert_eq!(c.zones[0].queue().queue().runs()[0].duration(), secs(180));
        assert_eq!(c.zones[1].queue().queue().runs()[0].duration(), secs(360));
    }

    #[test]
    fn disabled_zone_is_skipped_and_does_not_hold_the_step() {
        let ctx = Context::default();
        let mut c = choreographed();
        c.zones[0].enabled = false;
        let t = datetime!(2024-06-01 06:04 UTC);
        c.muster(&ctx, t, false, &mut Vec::new());
        c.manual_run_sequence(&ctx, t, 0, None);
        assert!(spans(&c, 0).is_empty());
        assert_eq!(spans(&c, 1)[0].0, datetime!(2024-06-01 06:05 UTC));
    }

    #[test]
    fn scheduled_sequence_fills_horizon_idempotently() {
        let ctx = Context::default();
        let mut c = choreographed();
        c.sequences[0].schedules = vec![Schedule::daily("am", time!(06:05), None)];
        let t = datetime!(2024-06-01 05:00 UTC);
        c.muster(&ctx, t, false, &mut Vec::new());
        assert_eq!(c.sequence_runs().len(), 3);
        assert_eq!(spans(&c, 0)[0].0, datetime!(2024-06-01 06:05 UTC));
        assert_eq!(spans(&c, 2)[2].0, datetime!(2024-06-03 06:11 UTC));

        let before = c.clone();
        let status = c.muster(&ctx, t, false, &mut Vec::new());
        assert!(!status.contains(QueueStatus::EXTENDED));
        assert_eq!(c, before);
    }

    #[test]
    fn sequence_adjustment_scales_run_time() {
        let ctx = Context::default();
        let mut c = choreographed();
        c.sequences[0].schedules = vec![Schedule::daily("am", time!(06:05), None)];
        let t = datetime!(2024-06-01 05:00 UTC);
        c.muster(&ctx, t, false, &mut Vec::new());

        let req = AdjustmentRequest {
            percentage: Some(50.0),
            ..Default::default()
        };
        assert!(c.adjust_sequence(0, &req));
        c.muster(&ctx, t, false, &mut Vec::new());
        assert_eq!(c.zones[0].queue().queue().runs()[0].duration(), secs(180));
        assert_eq!(
            spans(&c, 1)[0],
            (datetime!(2024-06-01 06:08 UTC), datetime!(2024-06-01 06:14 UTC))
        );
        assert_eq!(c.sequence_runs().len(), 3);
    }

    #[test]
    fn paused_between_steps() {
        let ctx = Context::default();
        let seq = Sequence::new(
            "s",
            vec![
                SequenceZone::new(vec![0], Some(secs(120))).with_delay(secs(120)),
                SequenceZone::new(vec![1], Some(secs(120))),
            ],
        );
        let mut c = Controller::new("c", vec![zone("1"), zone("2")], vec![seq]);
        let t0 = datetime!(2024-06-01 06:00 UTC);
        let mut events = Vec::new();
        c.muster(&ctx, t0, false, &mut events);
        c.manual_run_sequence(&ctx, t0, 0, None);

        c.muster(&ctx, datetime!(2024-06-01 06:01 UTC), false, &mut events);
        assert_eq!(c.status(), ControllerStatus::On);
        assert_eq!(c.sequence_status(0), SequenceStatus::On);
        assert!(events.iter().any(|e| matches!(e, Event::SequenceStart(_))));

        c.muster(&ctx, datetime!(2024-06-01 06:04 UTC), false, &mut events);
        assert_eq!(c.status(), ControllerStatus::Paused);
        assert_eq!(c.sequence_status(0), SequenceStatus::Paused);

        c.muster(&ctx, datetime!(2024-06-01 06:05 UTC), false, &mut events);
        assert_eq!(c.status(), ControllerStatus::On);

        c.muster(&ctx, datetime!(2024-06-01 06:07 UTC), false, &mut events);
        assert_eq!(c.status(), ControllerStatus::Off);
        assert!(c.sequence_runs().is_empty());
        assert!(events.iter().any(|e| matches!(e, Event::SequenceFinish(_))));
    }

    #[test]
    fn preamble_and_postamble_widen_master() {
        let ctx = Context::default();
        let mut z = zone("1");
        z.schedules = vec![Schedule::daily("am", time!(06:00), Some(Duration::minutes(10)))];
        let mut c = Controller::new("c", vec![z], vec![]);
        c.preamble = Duration::minutes(1);
        c.postamble = Duration::minutes(2);
        let mut transitions = Vec::new();
        let mut events = Vec::new();

        c.muster(&ctx, datetime!(2024-06-01 05:59 UTC), false, &mut events);
        c.check_run(datetime!(2024-06-01 05:59 UTC), &mut transitions, &mut events);
        assert!(c.is_on());
        assert!(!c.zones[0].is_on());
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].zone, None);

        c.muster(&ctx, datetime!(2024-06-01 06:11 UTC), false, &mut events);
        assert!(c.is_on());
        assert!(!c.zones[0].is_on());

        c.muster(&ctx, datetime!(2024-06-01 06:12 UTC), false, &mut events);
        assert!(!c.is_on());
    }

    fn tick(c: &mut Controller, t: OffsetDateTime, transitions: &mut Vec<Transition>, events: &mut Vec<Event>) {
        c.muster(&Context::default(), t, false, events);
        c.check_run(t, transitions, events);
    }

    fn minutes(from: OffsetDateTime, to: OffsetDateTime) -> impl Iterator<Item = OffsetDateTime> {
        (0..=(to - from).whole_minutes()).map(move |m| from + Duration::minutes(m))
    }

    fn master_edges(transitions: &[Transition]) -> Vec<(OffsetDateTime, bool)> {
        transitions
            .iter()
            .filter(|t| t.zone.is_none())
            .map(|t| (t.at, t.on))
            .collect()
    }

    #[test]
    fn master_events_span_whole_sequence() {
        let ctx = Context::default();
        let mut c = choreographed();
        let mut transitions = Vec::new();
        let mut events = Vec::new();
        let t = datetime!(2024-06-01 06:04 UTC);
        tick(&mut c, t, &mut transitions, &mut events);
        c.manual_run_sequence(&ctx, t, 0, None);
        for now in minutes(t, datetime!(2024-06-01 06:30 UTC)) {
            tick(&mut c, now, &mut transitions, &mut events);
        }

        assert_eq!(
            master_edges(&transitions),
            vec![
                (datetime!(2024-06-01 06:05 UTC), true),
                (datetime!(2024-06-01 06:23 UTC), false),
            ]
        );
        let starts: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::ControllerStart(r) => Some(r),
                _ => None,
            })
            .collect();
        let finishes: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::ControllerFinish(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!((starts.len(), finishes.len()), (1, 1));
        assert_eq!(starts[0].start, datetime!(2024-06-01 06:05 UTC));
        assert_eq!(finishes[0].start, datetime!(2024-06-01 06:05 UTC));
        assert_eq!(finishes[0].end, datetime!(2024-06-01 06:23 UTC));
        assert_eq!(finishes[0].duration, "00:18:00");
        // Zone runs still report per step.
        let zone_starts = events.iter().filter(|e| matches!(e, Event::RunStart(_))).count();
        assert_eq!(zone_starts, 3);
    }

    #[test]
    fn manual_run_during_postamble_keeps_master_open() {
        let ctx = Context::default();
        let mut z = zone("1");
        z.schedules = vec![Schedule::daily("am", time!(06:00), Some(Duration::minutes(10)))];
        let mut c = Controller::new("c", vec![z, zone("2")], vec![]);
        c.postamble = Duration::minutes(2);
        let mut transitions = Vec::new();
        let mut events = Vec::new();

        for now in minutes(datetime!(2024-06-01 05:59 UTC), datetime!(2024-06-01 06:10 UTC)) {
            tick(&mut c, now, &mut transitions, &mut events);
        }
        let t = datetime!(2024-06-01 06:11 UTC);
        c.manual_run_zone(&ctx, t, 1, Duration::minutes(5));
        for now in minutes(t, datetime!(2024-06-01 06:25 UTC)) {
            tick(&mut c, now, &mut transitions, &mut events);
        }

        assert_eq!(
            master_edges(&transitions),
            vec![
                (datetime!(2024-06-01 06:00 UTC), true),
                (datetime!(2024-06-01 06:19 UTC), false),
            ]
        );
    }

    #[test]
    fn disable_clears_pending_but_not_running() {
        let ctx = Context::default();
        let mut z = zone("1");
        z.schedules = vec![Schedule::daily("am", time!(06:00), Some(Duration::minutes(10)))];
        let mut c = Controller::new("c", vec![z], vec![]);
        c.muster(&ctx, datetime!(2024-06-01 05:00 UTC), false, &mut Vec::new());
        let t = datetime!(2024-06-01 06:05 UTC);
        c.muster(&ctx, t, false, &mut Vec::new());
        // Today's run plus three more days of look-ahead.
        assert_eq!(c.zones[0].queue().queue().len(), 4);

        assert!(c.set_enabled(false));
        c.muster(&ctx, t, false, &mut Vec::new());
        assert_eq!(c.zones[0].queue().queue().len(), 1);
        assert!(c.zones[0].is_on());
        assert_eq!(c.status(), ControllerStatus::Disabled);

        assert!(c.set_enabled(true));
        c.muster(&ctx, t, false, &mut Vec::new());
        assert_eq!(c.zones[0].queue().queue().len(), 4);
    }

    #[test]
    fn cancel_sequence_removes_active_activation() {
        let ctx = Context::default();
        let mut c = choreographed();
        let t = datetime!(2024-06-01 06:04 UTC);
        c.muster(&ctx, t, false, &mut Vec::new());
        c.manual_run_sequence(&ctx, t, 0, None);
        let mut events = Vec::new();
        c.muster(&ctx, datetime!(2024-06-01 06:06 UTC), false, &mut events);
        assert!(c.is_on());

        assert!(c.cancel_sequence(0));
        c.muster(&ctx, datetime!(2024-06-01 06:06 UTC), false, &mut events);
        assert!(!c.is_on());
        assert!(c.sequence_runs().is_empty());
        assert!(events.iter().any(|e| matches!(e, Event::SequenceFinish(_))));
    }

    #[test]
    fn describe_names_schedule_and_sequence() {
        let ctx = Context::default();
        let mut c = choreographed();
        c.sequences[0].name = "Morning".into();
        c.sequences[0].schedules = vec![Schedule::daily("am", time!(06:05), None)];
        c.muster(&ctx, datetime!(2024-06-01 05:00 UTC), false, &mut Vec::new());
        let run = &c.zones[0].queue().queue().runs()[0];
        assert_eq!(
            c.describe(run),
            (Some("am".to_string()), Some("Morning".to_string()))
        );
    }
}
