//! `irrigation-engine`: a deterministic, tick-driven scheduler for
//! controllers, zones and sequences.
//!
//! The crate does no I/O and never reads a clock. The host calls
//! [`Coordinator::poll`] with the current instant and applies the returned
//! on/off [`Transition`]s to its switches.
//!
//! | Module          | Contents                                              |
//! |-----------------|-------------------------------------------------------|
//! | [`clock`]       | `Granularity`, `Context`, washing                     |
//! | [`sun`]         | Sunrise/sunset and friends                            |
//! | [`schedule`]    | Recurrence rules, `get_next_run`                      |
//! | [`run`]         | `Run`, `RunKind`                                      |
//! | [`queue`]       | `RunQueue`, `ScheduleQueue`, `ZoneQueue`              |
//! | [`adjustment`]  | Run time adjustment                                   |
//! | [`sequence`]    | Sequences and their activations                       |
//! | [`zone`]        | `Zone`                                                |
//! | [`controller`]  | `Controller`, muster                                  |
//! | [`coordinator`] | `Coordinator`, poll, command queue                    |
//! | [`service`]     | `Command`, `Target`                                   |
//! | [`event`]       | `Event`, `Transition`                                 |
//! | [`config`]      | Deserialisable configuration tree                     |
//! | [`error`]       | `ServiceError`, `ConfigIssue`                         |
//! | [`sim`]         | Virtual-clock replay of expected edges                |

pub mod adjustment;
pub mod clock;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod queue;
pub mod run;
pub mod schedule;
pub mod sequence;
pub mod service;
pub mod sim;
pub mod sun;
pub mod zone;

// ── Re-exports ────────────────────────────────────────────────────────────────

pub use clock::{Context, Granularity, Location};
pub use config::CoordinatorConfig;
pub use controller::{Controller, ControllerStatus};
pub use coordinator::{Coordinator, CoordinatorSnapshot, PollOutcome};
pub use error::{ConfigIssue, ServiceError};
pub use event::{Event, Transition};
pub use service::{Command, Outcome, Ref, Target};
pub use sim::{Simulation, TestCase, TestReport};
pub use zone::{Zone, ZoneStatus};
