//! Sequences: ordered, repeatable choreography of zone groups, and the
//! bookkeeping that ties every run of one activation together.

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::adjustment::Adjustment;
use crate::clock::Granularity;
use crate::schedule::Schedule;

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// One step of a sequence: a stack of zones opened in parallel.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceZone {
    /// Zone ids as configured, kept for display.
    pub zone_ids: Vec<String>,
    /// Resolved zone indices within the owning controller.
    pub zones: Vec<usize>,
    pub delay: Option<Duration>,
    pub duration: Option<Duration>,
    pub repeat: u32,
    pub enabled: bool,
}

impl SequenceZone {
    pub fn new(zones: Vec<usize>, duration: Option<Duration>) -> Self {
        Self {
            zone_ids: zones.iter().map(|z| (z + 1).to_string()).collect(),
            zones,
            delay: None,
            duration,
            repeat: 1,
            enabled: true,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat;
        self
    }

    /// A step takes part in timing only when it is enabled and at least one
    /// of its zones is.
    pub fn is_active(&self, zone_enabled: &dyn Fn(usize) -> bool) -> bool {
        self.enabled && self.zones.iter().any(|&z| zone_enabled(z))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    /// Default step delay.
    pub delay: Option<Duration>,
    /// Default step duration.
    pub duration: Option<Duration>,
    pub repeat: u32,
    pub schedules: Vec<Schedule>,
    pub steps: Vec<SequenceZone>,
    pub adjustment: Adjustment,
}

impl Sequence {
    pub fn new(id: impl Into<String>, steps: Vec<SequenceZone>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            enabled: true,
            delay: None,
            duration: None,
            repeat: 1,
            schedules: Vec::new(),
            steps,
            adjustment: Adjustment::default(),
        }
    }

    pub fn step_delay(&self, step: &SequenceZone) -> Duration {
        step.delay.or(self.delay).unwrap_or(Duration::ZERO)
    }

    pub fn step_duration(&self, step: &SequenceZone) -> Duration {
        step.duration.or(self.duration).unwrap_or(Duration::ZERO)
    }

    fn active_steps<'a>(
        &'a self,
        zone_enabled: &'a dyn Fn(usize) -> bool,
    ) -> impl Iterator<Item = &'a SequenceZone> + 'a {
        self.steps.iter().filter(move |s| s.is_active(zone_enabled))
    }

    /// `R * sum(duration_i * repeat_i)` over active steps.
    pub fn total_duration(&self, zone_enabled: &dyn Fn(usize) -> bool) -> Duration {
        let per_pass: Duration = self
            .active_steps(zone_enabled)
            .map(|s| self.step_duration(s) * s.repeat)
            .sum();
        per_pass * self.repeat
    }

    /// `R * sum(delay_i * repeat_i) - delay_last` over active steps. There is
    /// no delay after the final unit of work.
    pub fn total_delay(&self, zone_enabled: &dyn Fn(usize) -> bool) -> Duration {
        let per_pass: Duration = self
            .active_steps(zone_enabled)
            .map(|s| self.step_delay(s) * s.repeat)
            .sum();
        let last = self
            .active_steps(zone_enabled)
            .last()
            .map(|s| self.step_delay(s))
            .unwrap_or(Duration::ZERO);
        (per_pass * self.repeat - last).max(Duration::ZERO)
    }

    pub fn total_time(&self, zone_enabled: &dyn Fn(usize) -> bool) -> Duration {
        self.total_duration(zone_enabled) + self.total_delay(zone_enabled)
    }

    /// Resolve the activation length: the requested total if given, else the
    /// schedule duration, else the natural total. A scheduled activation
    /// then passes its run time (total less delays) through the sequence
    /// adjustment.
    pub fn activation_time(
        &self,
        requested: Option<Duration>,
        schedule: Option<&Schedule>,
        granularity: Granularity,
        zone_enabled: &dyn Fn(usize) -> bool,
    ) -> Duration {
        let total = requested
            .or_else(|| schedule.and_then(|s| s.duration))
            .unwrap_or_else(|| self.total_time(zone_enabled));
        if schedule.is_none() || self.adjustment.is_none() {
            return total;
        }
        let delay = self.total_delay(zone_enabled);
        let run_time = (total - delay).max(Duration::ZERO);
        (self.adjustment.adjust(run_time, granularity) + delay).max(delay)
    }

    /// Scale factor that stretches the natural step durations to fill
    /// `total` once the fixed delays are taken out.
    pub fn duration_multiplier(&self, total: Duration, zone_enabled: &dyn Fn(usize) -> bool) -> f64 {
        let base = self.total_duration(zone_enabled);
        if base.is_zero() {
            return 1.0;
        }
        let run_time = (total - self.total_delay(zone_enabled)).max(Duration::ZERO);
        run_time.as_seconds_f64() / base.as_seconds_f64()
    }

    /// Step duration after scaling, in whole seconds.
    pub fn scaled_duration(&self, step: &SequenceZone, multiplier: f64) -> Duration {
        let secs = self.step_duration(step).as_seconds_f64() * multiplier;
        Duration::seconds(secs.round() as i64)
    }
}

// ---------------------------------------------------------------------------
// Activation bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SequenceRunId(pub u64);

/// One activation of a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceRun {
    pub id: SequenceRunId,
    pub sequence: usize,
    /// Driving sequence schedule, `None` for a manual activation.
    pub schedule: Option<usize>,
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
    /// Set the instant any step starts; keeps the runs of this activation
    /// from being cleared while it is under way.
    pub running: bool,
    /// A start event has been emitted.
    pub announced: bool,
}

/// Registry of live activations for one controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequenceRuns {
    runs: Vec<SequenceRun>,
    next_id: u64,
}

impl SequenceRuns {
    pub fn create(&mut self, sequence: usize, schedule: Option<usize>, start: OffsetDateTime) -> SequenceRunId {
        self.next_id += 1;
        let id = SequenceRunId(self.next_id);
        self.runs.push(SequenceRun {
            id,
            sequence,
            schedule,
            start,
            end: start,
            running: false,
            announced: false,
        });
        id
    }

    pub fn get(&self, id: SequenceRunId) -> Option<&SequenceRun> {
        self.runs.iter().find(|r| r.id == id)
    }

    fn get_mut(&mut self, id: SequenceRunId) -> Option<&mut SequenceRun> {
        self.runs.iter_mut().find(|r| r.id == id)
    }

    pub fn set_end(&mut self, id: SequenceRunId, end: OffsetDateTime) {
        if let Some(run) = self.get_mut(id) {
            run.end = end;
        }
    }

    pub fn is_running(&self, id: SequenceRunId) -> bool {
        self.get(id).is_some_and(|r| r.running)
    }

    /// Flag an activation as under way. Returns whether it was not already.
    pub fn mark_running(&mut self, id: SequenceRunId) -> bool {
        match self.get_mut(id) {
            Some(run) if !run.running => {
                run.running = true;
                true
            }
            _ => false,
        }
    }

    /// Latest activation of `sequence` driven by `schedule`.
    pub fn last_for(&self, sequence: usize, schedule: Option<usize>) -> Option<&SequenceRun> {
        self.runs
            .iter()
            .filter(|r| r.sequence == sequence && r.schedule == schedule)
            .max_by_key(|r| r.start)
    }

    pub fn any_running(&self) -> bool {
        self.runs.iter().any(|r| r.running)
    }

    pub fn is_sequence_running(&self, sequence: usize) -> bool {
        self.runs.iter().any(|r| r.sequence == sequence && r.running)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SequenceRun> {
        self.runs.iter()
    }

    /// Running activations that have not been announced yet. Marks them
    /// announced.
    pub fn take_unannounced(&mut self) -> Vec<SequenceRun> {
        let mut out = Vec::new();
        for run in self.runs.iter_mut().filter(|r| r.running && !r.announced) {
            run.announced = true;
            out.push(run.clone());
        }
        out
    }

    /// Drop activations for which `keep` is false and return them.
    pub fn retain(&mut self, keep: impl Fn(SequenceRunId) -> bool) -> Vec<SequenceRun> {
        let (kept, dropped) = std::mem::take(&mut self.runs)
            .into_iter()
            .partition(|r| keep(r.id));
        self.runs = kept;
        dropped
    }

    pub fn clear(&mut self) {
        self.runs.clear();
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
