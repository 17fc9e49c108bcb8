//! TOML config file loading and validation: hub settings, the irrigation
//! tree handed to the engine, and self-test cases.

use anyhow::{bail, Context, Result};
use irrigation_engine::config::CoordinatorConfig;
use irrigation_engine::event::switch_name;
use irrigation_engine::sim::TestCase;
use serde::Deserialize;
use std::collections::HashSet;
use time::OffsetDateTime;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hub: HubSection,
    #[serde(default)]
    pub irrigation: CoordinatorConfig,
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

#[derive(Debug, Deserialize)]
pub struct HubSection {
    /// Many common relay boards are active-low.
    #[serde(default = "default_active_low")]
    pub relay_active_low: bool,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub valves: Vec<ValveEntry>,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            relay_active_low: default_active_low(),
            clock: ClockConfig::default(),
            valves: Vec::new(),
        }
    }
}

fn default_active_low() -> bool {
    true
}

fn default_speed() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ClockConfig {
    #[default]
    Wall,
    /// Starts at `start` and runs `speed` times faster than real time.
    Virtual {
        #[serde(with = "time::serde::rfc3339")]
        start: OffsetDateTime,
        #[serde(default = "default_speed")]
        speed: f64,
    },
}

/// A relay output. `switch` is `<controller>` for a master valve or
/// `<controller>/<zone>` for a zone valve.
#[derive(Debug, Clone, Deserialize)]
pub struct ValveEntry {
    pub switch: String,
    pub gpio_pin: i64,
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Every switch the irrigation tree can drive, masters first.
    pub fn switches(&self) -> Vec<String> {
        let (_, controllers, _) = self.irrigation.build();
        let mut out = Vec::new();
        for c in &controllers {
            out.push(switch_name(&c.id, None));
            out.extend(c.zones.iter().map(|z| switch_name(&c.id, Some(&z.id))));
        }
        out
    }

    /// Valve wiring as `(switch, pin)` pairs.
    pub fn valve_pins(&self) -> Vec<(String, u8)> {
        self.hub
            .valves
            .iter()
            .filter_map(|v| u8::try_from(v.gpio_pin).ok().map(|p| (v.switch.clone(), p)))
            .collect()
    }

    /// Validate hub entries. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one). Shape problems in the
    /// irrigation tree are only logged: the engine loads around them.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_clock(&mut errors);
        self.validate_valves(&mut errors);
        self.validate_tests(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_clock(&self, errors: &mut Vec<String>) {
        if let ClockConfig::Virtual { speed, .. } = self.hub.clock {
            if !speed.is_finite() || speed <= 0.0 {
                errors.push(format!("hub.clock: speed must be positive, got {speed}"));
            }
        }
        if let Some(g) = self.irrigation.granularity {
            if !(1..=60).contains(&g) {
                errors.push(format!(
                    "irrigation: granularity {g} out of range [1, 60] seconds"
                ));
            }
        }
    }

    fn validate_valves(&self, errors: &mut Vec<String>) {
        let known: HashSet<String> = self.switches().into_iter().collect();
        let mut seen_switches: HashSet<&str> = HashSet::new();
        let mut seen_pins: HashSet<i64> = HashSet::new();

        for (i, v) in self.hub.valves.iter().enumerate() {
            let ctx = || {
                if v.switch.is_empty() {
                    format!("hub.valves[{i}]")
                } else {
                    format!("valve '{}'", v.switch)
                }
            };

            // ── Identity ────────────────────────────────────────
            if v.switch.trim().is_empty() {
                errors.push(format!("{}: switch is empty", ctx()));
            } else if !seen_switches.insert(&v.switch) {
                errors.push(format!("{}: duplicate switch", ctx()));
            } else if !known.contains(&v.switch) {
                errors.push(format!(
                    "{}: switch does not match any controller or zone",
                    ctx()
                ));
            }

            // ── GPIO pin whitelist ──────────────────────────────
            if !VALID_GPIO_PINS.contains(&v.gpio_pin) {
                errors.push(format!(
                    "{}: gpio_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                    ctx(),
                    v.gpio_pin
                ));
            } else if !seen_pins.insert(v.gpio_pin) {
                errors.push(format!(
                    "{}: gpio_pin {} is already used by another valve",
                    ctx(),
                    v.gpio_pin
                ));
            }
        }
    }

    fn validate_tests(&self, errors: &mut Vec<String>) {
        let mut seen_names: HashSet<&str> = HashSet::new();
        for (i, t) in self.tests.iter().enumerate() {
            if t.name.trim().is_empty() {
                errors.push(format!("tests[{i}]: name is empty"));
            } else if !seen_names.insert(&t.name) {
                errors.push(format!("test '{}': duplicate name", t.name));
            }
            if t.end < t.start {
                errors.push(format!(
                    "test '{}': end ({}) is before start ({})",
                    t.name, t.end, t.start
                ));
            }
        }
    }

    /// Log engine shape issues. Returns how many there were.
    pub fn report_issues(&self) -> usize {
        let (_, _, issues) = self.irrigation.build();
        for issue in &issues {
            warn!(%issue, "irrigation config issue");
        }
        issues.len()
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;

    info!(
        controllers = config.irrigation.controllers.len(),
        valves = config.hub.valves.len(),
        tests = config.tests.len(),
        issues = config.report_issues(),
        "config loaded"
    );
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
