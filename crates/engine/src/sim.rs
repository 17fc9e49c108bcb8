//! Deterministic replay on a virtual clock.
//!
//! A `TestCase` names a start and end instant and the on/off edges expected
//! in between. `Simulation` drives a fresh `Coordinator` one granularity
//! step at a time over that window and compares what it saw.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::config::CoordinatorConfig;
use crate::coordinator::{Coordinator, PollOutcome};
use crate::event::{Event, Transition};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expected {
    #[serde(with = "time::serde::rfc3339")]
    pub t: OffsetDateTime,
    pub controller: String,
    #[serde(default)]
    pub zone: Option<String>,
    pub on: bool,
}

impl From<&Transition> for Expected {
    fn from(tr: &Transition) -> Self {
        Self {
            t: tr.at,
            controller: tr.controller.clone(),
            zone: tr.zone.clone(),
            on: tr.on,
        }
    }
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let switch = crate::event::switch_name(&self.controller, self.zone.as_deref());
        write!(f, "{} {} {}", self.t, switch, if self.on { "on" } else { "off" })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
    #[serde(default)]
    pub results: Vec<Expected>,
}

/// Position-wise disagreement between expected and observed edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub index: usize,
    pub expected: Option<Expected>,
    pub actual: Option<Expected>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestReport {
    pub name: String,
    pub ticks: usize,
    pub actual: Vec<Expected>,
    pub mismatches: Vec<Mismatch>,
}

impl TestReport {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed() { "passed" } else { "FAILED" };
        write!(
            f,
            "{}: {verdict} ({} edges, {} ticks)",
            self.name,
            self.actual.len(),
            self.ticks
        )?;
        for m in &self.mismatches {
            let show = |e: &Option<Expected>| e.as_ref().map_or("-".to_string(), |e| e.to_string());
            write!(f, "\n  #{}: expected {}, got {}", m.index, show(&m.expected), show(&m.actual))?;
        }
        Ok(())
    }
}

fn compare(expected: &[Expected], actual: &[Expected]) -> Vec<Mismatch> {
    (0..expected.len().max(actual.len()))
        .filter_map(|i| {
            let (e, a) = (expected.get(i), actual.get(i));
            (e != a).then(|| Mismatch {
                index: i,
                expected: e.cloned(),
                actual: a.cloned(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

pub struct Simulation {
    coordinator: Coordinator,
    now: OffsetDateTime,
    ticks: usize,
    transitions: Vec<Transition>,
    events: Vec<Event>,
}

impl Simulation {
    pub fn new(coordinator: Coordinator, start: OffsetDateTime) -> Self {
        Self {
            coordinator,
            now: start,
            ticks: 0,
            transitions: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut Coordinator {
        &mut self.coordinator
    }

    pub fn now(&self) -> OffsetDateTime {
        self.now
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Poll at the current instant, then advance by one granularity step.
    pub fn step(&mut self) -> PollOutcome {
        let out = self.coordinator.poll(self.now, false);
        self.transitions.extend(out.transitions.iter().cloned());
        self.events.extend(out.events.iter().cloned());
        self.now += self.coordinator.tick_interval();
        self.ticks += 1;
        out
    }

    /// Step until the clock passes `end` (inclusive).
    pub fn run_until(&mut self, end: OffsetDateTime) {
        while self.now <= end {
            self.step();
        }
    }

    /// Replay `case` against a freshly loaded coordinator.
    pub fn run_case(config: &CoordinatorConfig, case: &TestCase) -> TestReport {
        let mut sim = Simulation::new(Coordinator::load(config), case.start);
        sim.run_until(case.end);
        let actual: Vec<Expected> = sim.transitions.iter().map(Expected::from).collect();
        let report = TestReport {
            name: case.name.clone(),
            ticks: sim.ticks,
            mismatches: compare(&case.results, &actual),
            actual,
        };
        if report.passed() {
            info!(test = %report.name, ticks = report.ticks, "test passed");
        } else {
            warn!(test = %report.name, mismatches = report.mismatches.len(), "test failed");
        }
        report
    }
}

// ===========================================================================
// Tests
// ===========================================================================
