//! Top of the hierarchy: owns the controllers and the evaluation context,
//! drains queued service calls and drives `muster`/`check_run` per tick.

use std::collections::VecDeque;

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use crate::clock::Context;
use crate::config::CoordinatorConfig;
use crate::controller::{Controller, ControllerSnapshot};
use crate::error::ServiceError;
use crate::event::{Event, Transition};
use crate::queue::QueueStatus;
use crate::service::{Command, Outcome, Target};

/// What one `poll` produced.
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// Washed tick the poll ran at.
    pub tick: Option<OffsetDateTime>,
    pub status: QueueStatus,
    pub transitions: Vec<Transition>,
    pub events: Vec<Event>,
    /// One entry per queued command drained this poll, in order.
    pub services: Vec<Result<Outcome, ServiceError>>,
}

#[derive(Debug, Clone)]
pub struct Coordinator {
    ctx: Context,
    controllers: Vec<Controller>,
    last_muster: Option<OffsetDateTime>,
    commands: VecDeque<Command>,
    update_requested: bool,
    initialised: bool,
}

impl Coordinator {
    pub fn new(ctx: Context, controllers: Vec<Controller>) -> Self {
        Self {
            ctx,
            controllers,
            last_muster: None,
            commands: VecDeque::new(),
            update_requested: false,
            initialised: false,
        }
    }

    /// Build from configuration. Shape issues are logged and skipped.
    pub fn load(config: &CoordinatorConfig) -> Self {
        let (ctx, controllers, issues) = config.build();
        for issue in &issues {
            warn!(%issue, "configuration issue");
        }
        info!(
            controllers = controllers.len(),
            zones = controllers.iter().map(|c| c.zones.len()).sum::<usize>(),
            sequences = controllers.iter().map(|c| c.sequences.len()).sum::<usize>(),
            granularity = ctx.granularity.secs(),
            "coordinator loaded"
        );
        Self::new(ctx, controllers)
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    pub fn controller(&self, index: usize) -> Option<&Controller> {
        self.controllers.get(index)
    }

    pub fn last_muster(&self) -> Option<OffsetDateTime> {
        self.last_muster
    }

    /// How often the host should call `poll`.
    pub fn tick_interval(&self) -> Duration {
        self.ctx.unit()
    }

    // -----------------------------------------------------------------------
    // Service
    // -----------------------------------------------------------------------

    /// Queue a command for the top of the next `poll`.
    pub fn submit(&mut self, command: Command) {
        self.commands.push_back(command);
    }

    pub fn pending(&self) -> usize {
        self.commands.len()
    }

    fn resolve(&self, target: &Target) -> Result<usize, ServiceError> {
        let controller = target.controller();
        controller
            .resolve(self.controllers.iter().map(|c| c.id.as_str()))
            .ok_or_else(|| ServiceError::UnknownController(controller.to_string()))
    }

    /// Apply a command now. The effect on queues shows at the next `poll`.
    pub fn execute(&mut self, command: &Command, now: OffsetDateTime) -> Result<Outcome, ServiceError> {
        let ctx = self.ctx;
        let t = ctx.wash_dt(now);
        let target = command.target();
        let c = self.resolve(target)?;
        let controller = &mut self.controllers[c];

        let zone = match target {
            Target::Zone { zone, .. } => Some(
                zone.resolve(controller.zones.iter().map(|z| z.id.as_str()))
                    .ok_or_else(|| ServiceError::UnknownZone {
                        controller: controller.id.clone(),
                        zone: zone.to_string(),
                    })?,
            ),
            _ => None,
        };
        let sequence = match target {
            Target::Sequence { sequence, .. } => Some(
                sequence
                    .resolve(controller.sequences.iter().map(|s| s.id.as_str()))
                    .ok_or_else(|| ServiceError::UnknownSequence {
                        controller: controller.id.clone(),
                        sequence: sequence.to_string(),
                    })?,
            ),
            _ => None,
        };

        // Manual runs honour the enabled flags all the way up.
        if matches!(command, Command::ManualRun { .. }) {
            let disabled = if !controller.enabled {
                Some(("controller", &controller.id))
            } else if let Some(z) = zone.filter(|&z| !controller.zones[z].enabled) {
                Some(("zone", &controller.zones[z].id))
            } else {
                sequence
                    .filter(|&s| !controller.sequences[s].enabled)
                    .map(|s| ("sequence", &controller.sequences[s].id))
            };
            if let Some((kind, id)) = disabled {
                return Err(ServiceError::Disabled { kind, id: id.clone() });
            }
        }

        let changed = match (command, zone, sequence) {
            (Command::Enable { .. } | Command::Disable { .. } | Command::Toggle { .. }, z, s) => {
                let current = match (z, s) {
                    (Some(z), _) => controller.zones[z].enabled,
                    (_, Some(s)) => controller.sequences[s].enabled,
                    _ => controller.enabled,
                };
                let wanted = match command {
                    Command::Enable { .. } => true,
                    Command::Disable { .. } => false,
                    _ => !current,
                };
                match (z, s) {
                    (Some(z), _) => controller.set_zone_enabled(z, wanted),
                    (_, Some(s)) => controller.set_sequence_enabled(s, wanted),
                    _ => controller.set_enabled(wanted),
                }
            }
            (Command::Cancel { .. }, Some(z), _) => {
                controller.cancel_zone(z);
                true
            }
            (Command::Cancel { .. }, _, Some(s)) => controller.cancel_sequence(s),
            (Command::Cancel { .. }, None, None) => {
                controller.cancel();
                true
            }
            (Command::AdjustTime { adjustment, .. }, Some(z), _) => controller.adjust_zone(z, adjustment),
            (Command::AdjustTime { adjustment, .. }, _, Some(s)) => controller.adjust_sequence(s, adjustment),
            (Command::AdjustTime { adjustment, .. }, None, None) => controller.adjust_zones(adjustment),
            (Command::ManualRun { time, .. }, Some(z), _) => {
                let duration = time
                    .as_ref()
                    .map(|s| s.0)
                    .or(controller.zones[z].duration)
                    .ok_or_else(|| ServiceError::NoDuration {
                        zone: controller.zones[z].id.clone(),
                    })?;
                controller.manual_run_zone(&ctx, t, z, duration);
                true
            }
            (Command::ManualRun { time, .. }, _, Some(s)) => {
                controller.manual_run_sequence(&ctx, t, s, time.as_ref().map(|s| s.0))
            }
            (Command::ManualRun { .. }, None, None) => {
                return Err(ServiceError::Unsupported {
                    command: command.name(),
                    target: target.kind(),
                })
            }
        };

        info!(
            command = command.name(),
            controller = %controller.id,
            kind = target.kind(),
            changed,
            "service call"
        );
        if changed {
            self.update_requested = true;
        }
        Ok(Outcome::from(changed))
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Recompute every queue at `t`.
    pub fn muster(&mut self, t: OffsetDateTime, force: bool, events: &mut Vec<Event>) -> QueueStatus {
        let ctx = self.ctx;
        let mut status = QueueStatus::NONE;
        for controller in &mut self.controllers {
            status |= controller.muster(&ctx, t, force, events);
        }
        self.last_muster = Some(t);
        self.update_requested = false;
        status
    }

    /// Emit on/off edges for everything whose desired state moved.
    pub fn check_run(&mut self, t: OffsetDateTime, transitions: &mut Vec<Transition>, events: &mut Vec<Event>) {
        for controller in &mut self.controllers {
            controller.check_run(t, transitions, events);
        }
        self.initialised = true;
    }

    /// One tick. Drains queued commands, then musters when the washed tick
    /// moved, a command asked for it, or `force` is set.
    pub fn poll(&mut self, now: OffsetDateTime, force: bool) -> PollOutcome {
        let t = self.ctx.wash_dt(now);
        let mut outcome = PollOutcome {
            tick: Some(t),
            ..Default::default()
        };

        while let Some(command) = self.commands.pop_front() {
            let result = self.execute(&command, t);
            if let Err(e) = &result {
                warn!(command = command.name(), error = %e, "service call ignored");
            }
            outcome.services.push(result);
        }

        if self.last_muster != Some(t) || self.update_requested || force {
            outcome.status = self.muster(t, force, &mut outcome.events);
            if !outcome.status.is_empty() || force || !self.initialised {
                self.check_run(t, &mut outcome.transitions, &mut outcome.events);
            }
        }
        if !outcome.transitions.is_empty() {
            debug!(tick = %t, transitions = outcome.transitions.len(), "poll");
        }
        outcome
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            granularity: self.ctx.granularity.secs(),
            utc_offset: self.ctx.offset.to_string(),
            last_tick: self.last_muster,
            pending: self.commands.len(),
            controllers: self
                .controllers
                .iter()
                .enumerate()
                .map(|(i, c)| c.snapshot(i))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorSnapshot {
    pub granularity: i64,
    pub utc_offset: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_tick: Option<OffsetDateTime>,
    pub pending: usize,
    pub controllers: Vec<ControllerSnapshot>,
}

// ===========================================================================
// Tests
// ===========================================================================
