//! Ordered run containers: the generic `RunQueue`, the per-zone
//! `ScheduleQueue`, and the per-controller `ZoneQueue`.
//!
//! ## Ordering
//!
//! Runs sort by start time, except manual runs which always sort to the
//! head as if they started at the beginning of time. The sort is stable so
//! the insertion order of several manual runs (for example consecutive steps
//! of a manually started sequence) is preserved.
//!
//! ## Reconciliation
//!
//! `update_queue(t)` is the per-tick pass: sort, honour a pending cancel,
//! drop expired runs, recompute `current_run`/`next_run`. It reports what it
//! did through `QueueStatus` so callers can decide whether the controller
//! level aggregate needs rebuilding.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Serialize, Serializer};
use time::{Duration, OffsetDateTime};

use crate::adjustment::Adjustment;
use crate::clock::Context;
use crate::run::{Run, RunKind};
use crate::schedule::Schedule;
use crate::sequence::SequenceRuns;

/// Default look-ahead for schedule expansion.
pub const DEFAULT_FUTURE_SPAN: Duration = Duration::days(3);

/// Shortest look-ahead accepted from configuration.
pub const MIN_FUTURE_SPAN: Duration = Duration::hours(12);

// ---------------------------------------------------------------------------
// QueueStatus
// ---------------------------------------------------------------------------

/// Bit set describing what a queue operation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStatus(u8);

impl QueueStatus {
    pub const NONE: Self = Self(0);
    pub const CLEARED: Self = Self(1);
    pub const EXTENDED: Self = Self(1 << 1);
    pub const REDUCED: Self = Self(1 << 2);
    pub const SORTED: Self = Self(1 << 3);
    pub const UPDATED: Self = Self(1 << 4);
    pub const CANCELED: Self = Self(1 << 5);
    pub const CHANGED: Self = Self(1 << 6);

    const NAMES: [(QueueStatus, &'static str); 7] = [
        (Self::CLEARED, "cleared"),
        (Self::EXTENDED, "extended"),
        (Self::REDUCED, "reduced"),
        (Self::SORTED, "sorted"),
        (Self::UPDATED, "updated"),
        (Self::CANCELED, "canceled"),
        (Self::CHANGED, "changed"),
    ];

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for QueueStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for QueueStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join("|"))
    }
}

impl Serialize for QueueStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

// ---------------------------------------------------------------------------
// RunQueue
// ---------------------------------------------------------------------------

/// Identity of a run across queue mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunKey {
    start: OffsetDateTime,
    duration: Duration,
    zone: usize,
    kind: RunKind,
}

impl RunKey {
    fn of(run: &Run) -> Self {
        Self {
            start: run.start(),
            duration: run.duration(),
            zone: run.zone(),
            kind: run.kind(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunQueue {
    runs: Vec<Run>,
    current: Option<RunKey>,
    next: Option<RunKey>,
    sorted: bool,
    cancel_request: bool,
}

impl RunQueue {
    pub fn new() -> Self {
        Self {
            sorted: true,
            ..Default::default()
        }
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn current_run(&self) -> Option<&Run> {
        self.find_key(self.current)
    }

    pub fn next_run(&self) -> Option<&Run> {
        self.find_key(self.next)
    }

    fn find_key(&self, key: Option<RunKey>) -> Option<&Run> {
        let key = key?;
        self.runs.iter().find(|r| RunKey::of(r) == key)
    }

    /// Append a run. Ordering is restored by the next `sort`.
    pub fn add(&mut self, run: Run) {
        self.runs.push(run);
        self.sorted = false;
    }

    /// Replace the running run and any queued manual run with a new manual
    /// run of at least one granularity unit.
    pub fn add_manual(&mut self, ctx: &Context, start: OffsetDateTime, duration: Duration, zone: usize) {
        if let Some(current) = self.current {
            self.runs.retain(|r| RunKey::of(r) != current);
        }
        self.runs.retain(|r| r.kind() != RunKind::Manual);
        self.add(Run::new(start, duration.max(ctx.unit()), zone, RunKind::Manual));
    }

    /// Ask the next `update_queue` to drop the current run, or the next run
    /// when nothing is running and it is manual.
    pub fn cancel(&mut self) {
        self.cancel_request = true;
    }

    pub fn cancel_pending(&self) -> bool {
        self.cancel_request
    }

    /// Drop everything. Used on structural reload.
    pub fn clear_all(&mut self) -> bool {
        let removed = !self.runs.is_empty();
        self.runs.clear();
        self.sorted = true;
        removed
    }

    /// Drop everything that is not running at `t`, not manual, and not part
    /// of a sequence activation already under way.
    pub fn clear(&mut self, t: OffsetDateTime, sequence_runs: &SequenceRuns) -> bool {
        let before = self.runs.len();
        self.runs.retain(|r| {
            r.is_running(t)
                || r.is_manual()
                || r
                    .kind()
                    .sequence_run()
                    .is_some_and(|id| sequence_runs.is_running(id))
        });
        self.runs.len() != before
    }

    pub fn remove_where(&mut self, pred: impl Fn(&Run) -> bool) -> bool {
        let before = self.runs.len();
        self.runs.retain(|r| !pred(r));
        self.runs.len() != before
    }

    pub fn remove_expired(&mut self, t: OffsetDateTime) -> bool {
        let before = self.runs.len();
        self.runs.retain(|r| !r.is_expired(t));
        self.runs.len() != before
    }

    /// Stable sort with manual runs first. Returns whether anything moved.
    pub fn sort(&mut self) -> bool {
        if self.sorted {
            return false;
        }
        self.sorted = true;
        let in_order = self
            .runs
            .windows(2)
            .all(|w| w[0].sort_key() <= w[1].sort_key());
        if in_order {
            return false;
        }
        self.runs.sort_by_key(Run::sort_key);
        true
    }

    /// Last queued run matching `pred`, in queue order.
    pub fn find_last(&self, pred: impl Fn(&Run) -> bool) -> Option<&Run> {
        self.runs.iter().rev().find(|r| pred(r))
    }

    pub fn contains_sequence_run(&self, id: crate::sequence::SequenceRunId) -> bool {
        self.runs.iter().any(|r| r.kind().sequence_run() == Some(id))
    }

    /// Per-tick reconciliation.
    pub fn update_queue(&mut self, t: OffsetDateTime, sequence_runs: &mut SequenceRuns) -> QueueStatus {
        let mut status = QueueStatus::NONE;

        if self.sort() {
            status |= QueueStatus::SORTED;
        }

        if self.cancel_request {
            self.cancel_request = false;
            let target = self.runs.iter().position(|r| r.is_running(t)).or_else(|| {
                self.runs
                    .first()
                    .filter(|r| r.is_manual())
                    .map(|_| 0)
            });
            if let Some(i) = target {
                self.runs.remove(i);
                status |= QueueStatus::CANCELED;
            }
        }

        if self.remove_expired(t) {
            status |= QueueStatus::REDUCED;
        }

        let current = self.runs.iter().position(|r| r.is_running(t));
        let next = match current {
            Some(i) if i + 1 < self.runs.len() => Some(i + 1),
            Some(_) => None,
            None if !self.runs.is_empty() => Some(0),
            None => None,
        };

        for run in self.runs.iter_mut() {
            run.update_time_remaining(t);
            if run.is_running(t) {
                if let Some(id) = run.kind().sequence_run() {
                    if sequence_runs.mark_running(id) {
                        status |= QueueStatus::CHANGED;
                    }
                }
            }
        }

        let current = current.map(|i| RunKey::of(&self.runs[i]));
        let next = next.map(|i| RunKey::of(&self.runs[i]));
        if current != self.current || next != self.next {
            status |= QueueStatus::UPDATED;
        }
        self.current = current;
        self.next = next;

        status
    }
}

// ---------------------------------------------------------------------------
// ScheduleQueue
// ---------------------------------------------------------------------------

/// Per-zone queue: clamps durations and expands schedules up to the future
/// span.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleQueue {
    queue: RunQueue,
    minimum: Option<Duration>,
    maximum: Option<Duration>,
    future_span: Duration,
}

impl Default for ScheduleQueue {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}

impl ScheduleQueue {
    pub fn new(
        minimum: Option<Duration>,
        maximum: Option<Duration>,
        future_span: Option<Duration>,
    ) -> Self {
        Self {
            queue: RunQueue::new(),
            minimum,
            maximum,
            future_span: future_span
                .unwrap_or(DEFAULT_FUTURE_SPAN)
                .max(MIN_FUTURE_SPAN),
        }
    }

    pub fn queue(&self) -> &RunQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut RunQueue {
        &mut self.queue
    }

    pub fn future_span(&self) -> Duration {
        self.future_span
    }

    pub fn clamp(&self, duration: Duration) -> Duration {
        let mut d = duration;
        if let Some(minimum) = self.minimum {
            d = d.max(minimum);
        }
        if let Some(maximum) = self.maximum {
            d = d.min(maximum);
        }
        d
    }

    /// Add a run with its duration clamped to the zone limits. Returns the
    /// duration actually enqueued.
    pub fn add(&mut self, start: OffsetDateTime, duration: Duration, zone: usize, kind: RunKind) -> Duration {
        let duration = self.clamp(duration);
        self.queue.add(Run::new(start, duration, zone, kind));
        duration
    }

    pub fn add_manual(&mut self, ctx: &Context, start: OffsetDateTime, duration: Duration, zone: usize) {
        self.queue.add_manual(ctx, start, duration, zone);
    }

    /// Enqueue the next occurrence of one zone schedule, if any falls
    /// before the horizon.
    pub fn merge_one(
        &mut self,
        ctx: &Context,
        t: OffsetDateTime,
        zone: usize,
        index: usize,
        schedule: &Schedule,
        adjustment: &Adjustment,
    ) -> bool {
        let Some(nominal) = schedule.duration else {
            return false;
        };
        let kind = RunKind::Scheduled { schedule: index };
        let duration = self.clamp(adjustment.adjust(nominal, ctx.granularity));
        let lower = match self.queue.find_last(|r| r.kind() == kind) {
            Some(last) => last.end().max(last.start() + ctx.unit()),
            None => t,
        };
        match schedule.get_next_run(ctx, lower, t + self.future_span, duration) {
            Some(start) => {
                self.add(start, duration, zone, kind);
                true
            }
            None => false,
        }
    }

    /// Repeat `merge_one` until the horizon is full.
    pub fn merge_fill(
        &mut self,
        ctx: &Context,
        t: OffsetDateTime,
        zone: usize,
        index: usize,
        schedule: &Schedule,
        adjustment: &Adjustment,
    ) -> bool {
        let mut extended = false;
        while self.merge_one(ctx, t, zone, index, schedule, adjustment) {
            extended = true;
        }
        extended
    }

    pub fn update_queue(&mut self, t: OffsetDateTime, sequence_runs: &mut SequenceRuns) -> QueueStatus {
        self.queue.update_queue(t, sequence_runs)
    }
}

// ---------------------------------------------------------------------------
// ZoneQueue
// ---------------------------------------------------------------------------

/// Per-controller aggregate of every zone's runs, widened by the
/// controller preamble/postamble. Drives the master on-state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneQueue {
    queue: RunQueue,
}

impl ZoneQueue {
    pub fn new() -> Self {
        Self {
            queue: RunQueue::new(),
        }
    }

    pub fn queue(&self) -> &RunQueue {
        &self.queue
    }

    pub fn clear_all(&mut self) -> bool {
        self.queue.clear_all()
    }

    /// Merge `runs` into the aggregate, skipping any already present with
    /// the same start, zone and origin. With `all` the aggregate is emptied
    /// first, except for runs whose zone has closed but whose postamble is
    /// still under way at `t`: the zone queue no longer holds them.
    pub fn rebuild_schedule<'a>(
        &mut self,
        runs: impl IntoIterator<Item = &'a Run>,
        t: OffsetDateTime,
        preamble: Duration,
        postamble: Duration,
        all: bool,
    ) -> QueueStatus {
        let mut status = QueueStatus::NONE;
        if all
            && self
                .queue
                .remove_where(|r| !(r.end() - postamble <= t && t < r.end()))
        {
            status |= QueueStatus::CLEARED;
        }
        for run in runs {
            let widened = run.widened(preamble, postamble);
            let exists = self.queue.runs().iter().any(|r| {
                r.start() == widened.start()
                    && r.zone() == widened.zone()
                    && r.kind() == widened.kind()
            });
            if !exists {
                self.queue.add(widened);
                status |= QueueStatus::EXTENDED;
            }
        }
        status
    }

    pub fn update_queue(&mut self, t: OffsetDateTime, sequence_runs: &mut SequenceRuns) -> QueueStatus {
        self.queue.update_queue(t, sequence_runs)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
