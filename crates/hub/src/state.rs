use irrigation_engine::coordinator::CoordinatorSnapshot;
use irrigation_engine::event::{Event, Transition};
use irrigation_engine::service::{Command, Outcome};
use irrigation_engine::ServiceError;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub switches: BTreeMap<String, SwitchState>,
    pub events: VecDeque<SystemEvent>,
    pub snapshot: Option<CoordinatorSnapshot>,
    /// Service calls waiting for the next tick.
    pub pending: Vec<Command>,
}

#[derive(Clone, Serialize)]
pub struct SwitchState {
    pub on: bool,
    pub gpio_pin: Option<u8>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_changed: Option<OffsetDateTime>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Valve,
    Run,
    Sequence,
    Queue,
    Service,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub pending: usize,
    pub switches: BTreeMap<String, SwitchState>,
    pub irrigation: Option<CoordinatorSnapshot>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    /// `switches` lists every engine switch; `pins` the wired subset.
    pub fn new(switches: &[String], pins: &[(String, u8)]) -> Self {
        let switches = switches
            .iter()
            .map(|name| {
                let gpio_pin = pins.iter().find(|(s, _)| s == name).map(|(_, p)| *p);
                (
                    name.clone(),
                    SwitchState {
                        on: false,
                        gpio_pin,
                        last_changed: None,
                    },
                )
            })
            .collect();

        Self {
            started_at: Instant::now(),
            switches,
            events: VecDeque::with_capacity(MAX_EVENTS),
            snapshot: None,
            pending: Vec::new(),
        }
    }

    /// Record a switch edge reported by the engine.
    pub fn record_transition(&mut self, t: &Transition) {
        let name = t.switch();
        let switch = self.switches.entry(name.clone()).or_insert(SwitchState {
            on: false,
            gpio_pin: None,
            last_changed: None,
        });
        switch.on = t.on;
        switch.last_changed = Some(t.at);

        let state_str = if t.on { "ON" } else { "OFF" };
        self.push_event(t.at, EventKind::Valve, format!("{name} set {state_str}"));
    }

    /// Record a structured engine event.
    pub fn record_event(&mut self, e: &Event) {
        let (kind, detail) = match e {
            Event::RunStart(r) | Event::RunFinish(r) | Event::ControllerStart(r) | Event::ControllerFinish(r) => {
                let switch = irrigation_engine::event::switch_name(&r.controller, r.zone.as_deref());
                let origin = match (&r.sequence, &r.schedule) {
                    (Some(seq), _) => format!(" sequence={seq}"),
                    (None, Some(sch)) => format!(" schedule={sch}"),
                    (None, None) if r.manual => " manual".to_string(),
                    _ => String::new(),
                };
                (
                    EventKind::Run,
                    format!("{} {switch} duration={}{origin}", e.kind(), r.duration),
                )
            }
            Event::SequenceStart(s) | Event::SequenceFinish(s) => (
                EventKind::Sequence,
                format!("{} {}/{}", e.kind(), s.controller, s.sequence),
            ),
            Event::QueueChanged(q) => {
                let switch = irrigation_engine::event::switch_name(&q.controller, q.zone.as_deref());
                (EventKind::Queue, format!("{switch} {}", q.status))
            }
        };
        self.push_event(e.at(), kind, detail);
    }

    pub fn record_service(&mut self, ts: OffsetDateTime, command: &str, result: &Result<Outcome, ServiceError>) {
        match result {
            Ok(outcome) => {
                let outcome = match outcome {
                    Outcome::Applied => "applied",
                    Outcome::Unchanged => "unchanged",
                };
                self.push_event(ts, EventKind::Service, format!("{command}: {outcome}"));
            }
            Err(e) => self.push_event(ts, EventKind::Error, format!("{command}: {e}")),
        }
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(OffsetDateTime::now_utc(), EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(OffsetDateTime::now_utc(), EventKind::System, detail);
    }

    /// Queue a service call for the scheduler.
    pub fn submit(&mut self, command: Command) {
        self.pending.push(command);
    }

    pub fn take_pending(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.pending)
    }

    pub fn publish(&mut self, snapshot: CoordinatorSnapshot) {
        self.snapshot = Some(snapshot);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            pending: self.pending.len(),
            switches: self.switches.clone(),
            irrigation: self.snapshot.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, ts: OffsetDateTime, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent { ts, kind, detail });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
