//! The tick loop: feeds queued service calls and the clock into the engine,
//! drives the valves from the edges it reports, and publishes the result to
//! the shared state the web API reads.
//!
//! ```text
//! ticker ─▶ take pending commands ─▶ Coordinator::poll(now)
//!                                      │
//!            valves.apply(edge)     ◀──┤ transitions
//!            shared.record_*()      ◀──┤ events, service results
//!            shared.publish()       ◀──┘ snapshot
//! clock.advance(step)
//! ```

use std::future::Future;

use irrigation_engine::Coordinator;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::state::SharedState;
use crate::valve::ValveBoard;

pub(crate) struct Scheduler<C: Clock> {
    coordinator: Coordinator,
    clock: C,
    valves: ValveBoard,
    shared: SharedState,
}

impl<C: Clock> Scheduler<C> {
    pub(crate) fn new(coordinator: Coordinator, clock: C, valves: ValveBoard, shared: SharedState) -> Self {
        Self {
            coordinator,
            clock,
            valves,
            shared,
        }
    }

    /// Run one tick against the clock's current instant.
    pub(crate) async fn tick(&mut self) {
        let pending = self.shared.write().await.take_pending();
        let names: Vec<&'static str> = pending.iter().map(|c| c.name()).collect();
        for command in pending {
            self.coordinator.submit(command);
        }

        let now = self.clock.now();
        let out = self.coordinator.poll(now, false);

        for t in &out.transitions {
            self.valves.apply(t);
            info!(switch = %t.switch(), on = t.on, at = %t.at, "switch");
        }

        {
            let mut st = self.shared.write().await;
            for (name, result) in names.iter().zip(&out.services) {
                st.record_service(now, name, result);
            }
            for t in &out.transitions {
                st.record_transition(t);
            }
            for e in &out.events {
                st.record_event(e);
            }
            st.publish(self.coordinator.snapshot());
        }

        self.clock.advance(self.coordinator.tick_interval());
    }

    /// Tick until `shutdown` resolves, then close every valve.
    pub(crate) async fn run(mut self, shutdown: impl Future<Output = ()>) {
        let step = self.coordinator.tick_interval();
        let period = self.clock.period(step);
        let mut ticker = tokio::time::interval(period);
        tokio::pin!(shutdown);

        info!(
            step_secs = step.whole_seconds(),
            period_ms = period.as_millis() as u64,
            controllers = self.coordinator.controllers().len(),
            "scheduler started"
        );
        self.shared
            .write()
            .await
            .record_system(format!("scheduler started (step {}s)", step.whole_seconds()));

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = &mut shutdown => break,
            }
        }

        warn!("scheduler stopping, closing all valves");
        self.valves.all_off();
        self.shared
            .write()
            .await
            .record_system("scheduler stopped".to_string());
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::state::{EventKind, SystemState};
    use irrigation_engine::config::CoordinatorConfig;
    use irrigation_engine::service::{Command, Target};
    use std::sync::Arc;
    use time::macros::datetime;
    use time::OffsetDateTime;
    use tokio::sync::RwLock;

    const GARDEN: &str = r#"
[[controllers]]
id = "garden"
[[controllers.zones]]
id = "lawn"
duration = "0:05"
[[controllers.zones.schedules]]
time = "06:00"
duration = "0:10"
"#;

    fn scheduler(start: OffsetDateTime) -> Scheduler<VirtualClock> {
        let cfg: CoordinatorConfig = toml::from_str(GARDEN).unwrap();
        let switches = vec!["garden".to_string(), "garden/lawn".to_string()];
        let pins = vec![("garden/lawn".to_string(), 27)];
        let shared = Arc::new(RwLock::new(SystemState::new(&switches, &pins)));
        let valves = ValveBoard::new(&pins, true).unwrap();
        Scheduler::new(
            Coordinator::load(&cfg),
            VirtualClock::new(start, 60.0),
            valves,
            shared,
        )
    }

    #[tokio::test]
    async fn scheduled_run_opens_and_closes_valves() {
        let mut s = scheduler(datetime!(2024-06-01 05:59 UTC));
        s.tick().await;
        assert_eq!(s.valves.is_on("garden/lawn"), Some(false));

        s.tick().await;
        assert_eq!(s.valves.is_on("garden/lawn"), Some(true));
        {
            let st = s.shared.read().await;
            assert!(st.switches["garden/lawn"].on);
            assert!(st.switches["garden"].on);
            assert!(st.snapshot.is_some());
        }

        for _ in 0..10 {
            s.tick().await;
        }
        assert_eq!(s.valves.is_on("garden/lawn"), Some(false));
        let st = s.shared.read().await;
        assert!(!st.switches["garden"].on);
        assert!(st.events.iter().any(|e| e.detail.starts_with("run_finish garden/lawn")));
    }

    #[tokio::test]
    async fn pending_service_call_is_applied_next_tick() {
        let mut s = scheduler(datetime!(2024-06-01 04:00 UTC));
        s.tick().await;
        s.shared.write().await.submit(Command::ManualRun {
            target: Target::Zone {
                controller: "garden".into(),
                zone: "lawn".into(),
            },
            time: None,
        });
        s.tick().await;
        {
            let st = s.shared.read().await;
            assert!(st.pending.is_empty());
            assert!(st
                .events
                .iter()
                .any(|e| e.kind == EventKind::Service && e.detail == "manual_run: applied"));
        }
        // Starts one step after the call was applied.
        s.tick().await;
        assert_eq!(s.valves.is_on("garden/lawn"), Some(true));
    }

    #[tokio::test]
    async fn unknown_target_is_logged_not_fatal() {
        let mut s = scheduler(datetime!(2024-06-01 04:00 UTC));
        s.shared.write().await.submit(Command::Enable {
            target: Target::Controller {
                controller: "orchard".into(),
            },
        });
        s.tick().await;
        let st = s.shared.read().await;
        assert!(st.events.iter().any(|e| e.kind == EventKind::Error));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_and_closes_valves() {
        let s = scheduler(datetime!(2024-06-01 06:00 UTC));
        let shared = Arc::clone(&s.shared);
        s.run(async {}).await;
        let st = shared.read().await;
        assert!(st.events.iter().any(|e| e.detail == "scheduler stopped"));
    }
}
