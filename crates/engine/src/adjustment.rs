//! Run-time adjustment applied to nominal schedule durations.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::Duration;

use crate::clock::Granularity;
use crate::config::Span;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum AdjustMethod {
    #[default]
    None,
    /// Replace the nominal duration outright.
    Actual(Duration),
    /// Scale by a percentage of the nominal duration.
    Percentage(f64),
    Increase(Duration),
    Decrease(Duration),
}

/// A stateful duration transform: method first, then `minimum`, then
/// `maximum`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Adjustment {
    method: AdjustMethod,
    minimum: Option<Duration>,
    maximum: Option<Duration>,
}

impl Adjustment {
    pub fn new(method: AdjustMethod, minimum: Option<Duration>, maximum: Option<Duration>) -> Self {
        Self {
            method,
            minimum,
            maximum,
        }
    }

    pub fn method(&self) -> AdjustMethod {
        self.method
    }

    pub fn is_none(&self) -> bool {
        self.method == AdjustMethod::None && self.minimum.is_none() && self.maximum.is_none()
    }

    pub fn adjust(&self, raw: Duration, granularity: Granularity) -> Duration {
        let mut d = match self.method {
            AdjustMethod::None => raw,
            AdjustMethod::Actual(value) => value,
            AdjustMethod::Percentage(pct) => granularity.round_td(raw * (pct / 100.0)),
            AdjustMethod::Increase(value) => raw + value,
            AdjustMethod::Decrease(value) => (raw - value).max(Duration::ZERO),
        };
        if let Some(minimum) = self.minimum {
            d = d.max(minimum.max(granularity.unit()));
        }
        if let Some(maximum) = self.maximum {
            d = d.min(maximum);
        }
        d
    }

    /// Replace this adjustment with the one described by `request`. Returns
    /// whether anything changed so callers can skip a queue clear.
    pub fn load(&mut self, request: &AdjustmentRequest) -> bool {
        let next = request.to_adjustment();
        let changed = next != *self;
        *self = next;
        changed
    }

    /// Back to no adjustment. Returns whether anything changed.
    pub fn reset(&mut self) -> bool {
        let changed = !self.is_none();
        *self = Self::default();
        changed
    }
}

impl fmt::Display for Adjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.method {
            AdjustMethod::None => Ok(()),
            AdjustMethod::Actual(d) => write!(f, "={}", Span(d)),
            AdjustMethod::Percentage(p) => write!(f, "%{p}"),
            AdjustMethod::Increase(d) => write!(f, "+{}", Span(d)),
            AdjustMethod::Decrease(d) => write!(f, "-{}", Span(d)),
        }
    }
}

// ---------------------------------------------------------------------------
// Service payload
// ---------------------------------------------------------------------------

/// Body of an `adjust_time` service call. At most one method key is
/// honoured, in the order actual, percentage, increase, decrease; `reset`
/// wins over all of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    #[serde(default)]
    pub reset: bool,
    #[serde(default)]
    pub actual: Option<Span>,
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub increase: Option<Span>,
    #[serde(default)]
    pub decrease: Option<Span>,
    #[serde(default)]
    pub minimum: Option<Span>,
    #[serde(default)]
    pub maximum: Option<Span>,
}

impl AdjustmentRequest {
    pub fn to_adjustment(&self) -> Adjustment {
        if self.reset {
            return Adjustment::default();
        }
        let method = if let Some(d) = self.actual {
            AdjustMethod::Actual(d.0)
        } else if let Some(p) = self.percentage {
            AdjustMethod::Percentage(p.max(0.0))
        } else if let Some(d) = self.increase {
            AdjustMethod::Increase(d.0)
        } else if let Some(d) = self.decrease {
            AdjustMethod::Decrease(d.0)
        } else {
            AdjustMethod::None
        };
        Adjustment::new(
            method,
            self.minimum.map(|s| s.0),
            self.maximum.map(|s| s.0),
        )
    }
}

// ===========================================================================
// Tests
// ===========================================================================
