//! Service calls: the only write surface into enabled flags, adjustments
//! and queues.
//!
//! JSON form, as accepted by the hub:
//!
//! ```json
//! { "command": "manual_run", "target": { "controller": 0, "zone": "1" }, "time": "0:10" }
//! { "command": "adjust_time", "target": { "controller": "garden", "sequence": 0 },
//!   "adjustment": { "percentage": 50 } }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::adjustment::AdjustmentRequest;
use crate::config::Span;

/// Address an item by position or by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ref {
    Index(usize),
    Id(String),
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ref::Index(i) => write!(f, "#{i}"),
            Ref::Id(id) => f.write_str(id),
        }
    }
}

impl From<usize> for Ref {
    fn from(i: usize) -> Self {
        Ref::Index(i)
    }
}

impl From<&str> for Ref {
    fn from(id: &str) -> Self {
        Ref::Id(id.to_string())
    }
}

impl Ref {
    /// Resolve against a list of ids.
    pub fn resolve<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Option<usize> {
        let mut ids = ids.into_iter();
        match self {
            Ref::Index(i) => ids.nth(*i).map(|_| *i),
            Ref::Id(id) => ids.position(|candidate| candidate == id),
        }
    }
}

// Zone and Sequence come first so that the controller-only form does not
// swallow them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    Zone { controller: Ref, zone: Ref },
    Sequence { controller: Ref, sequence: Ref },
    Controller { controller: Ref },
}

impl Target {
    pub fn controller(&self) -> &Ref {
        match self {
            Target::Zone { controller, .. }
            | Target::Sequence { controller, .. }
            | Target::Controller { controller } => controller,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Target::Zone { .. } => "zone",
            Target::Sequence { .. } => "sequence",
            Target::Controller { .. } => "controller",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Enable {
        target: Target,
    },
    Disable {
        target: Target,
    },
    Toggle {
        target: Target,
    },
    Cancel {
        target: Target,
    },
    AdjustTime {
        target: Target,
        #[serde(default)]
        adjustment: AdjustmentRequest,
    },
    ManualRun {
        target: Target,
        /// Run time; a sequence scales its steps to fit.
        #[serde(default)]
        time: Option<Span>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Enable { .. } => "enable",
            Command::Disable { .. } => "disable",
            Command::Toggle { .. } => "toggle",
            Command::Cancel { .. } => "cancel",
            Command::AdjustTime { .. } => "adjust_time",
            Command::ManualRun { .. } => "manual_run",
        }
    }

    pub fn target(&self) -> &Target {
        match self {
            Command::Enable { target }
            | Command::Disable { target }
            | Command::Toggle { target }
            | Command::Cancel { target }
            | Command::AdjustTime { target, .. }
            | Command::ManualRun { target, .. } => target,
        }
    }
}

/// Result of a service call that was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    /// Accepted but nothing changed.
    Unchanged,
}

impl From<bool> for Outcome {
    fn from(changed: bool) -> Self {
        if changed {
            Outcome::Applied
        } else {
            Outcome::Unchanged
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn manual_run_from_json() {
        let cmd: Command = serde_json::from_str(
            r#"{"command": "manual_run", "target": {"controller": 0, "zone": "1"}, "time": "0:10"}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::ManualRun {
                target: Target::Zone {
                    controller: Ref::Index(0),
                    zone: Ref::Id("1".into()),
                },
                time: Some(Span(Duration::minutes(10))),
            }
        );
        assert_eq!(cmd.name(), "manual_run");
        assert_eq!(cmd.target().kind(), "zone");
    }

    #[test]
    fn target_forms() {
        let t: Target = serde_json::from_str(r#"{"controller": "garden"}"#).unwrap();
        assert_eq!(t, Target::Controller { controller: "garden".into() });
        let t: Target = serde_json::from_str(r#"{"controller": 1, "sequence": 0}"#).unwrap();
        assert_eq!(
            t,
            Target::Sequence {
                controller: 1.into(),
                sequence: 0.into()
            }
        );
    }

    #[test]
    fn adjust_time_from_json() {
        let cmd: Command = serde_json::from_str(
            r#"{"command": "adjust_time", "target": {"controller": 0}, "adjustment": {"percentage": 50}}"#,
        )
        .unwrap();
        match cmd {
            Command::AdjustTime { adjustment, .. } => assert_eq!(adjustment.percentage, Some(50.0)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ref_resolves_by_index_or_id() {
        let ids = ["a", "b", "c"];
        assert_eq!(Ref::Index(2).resolve(ids), Some(2));
        assert_eq!(Ref::Index(3).resolve(ids), None);
        assert_eq!(Ref::from("b").resolve(ids), Some(1));
        assert_eq!(Ref::from("z").resolve(ids), None);
        assert_eq!(Ref::Index(0).to_string(), "#0");
    }
}
