//! Relay outputs for master and zone switches, driven straight from the
//! engine's on/off edges. Switch names follow [`Transition::switch`]:
//! `<controller>` for a master valve, `<controller>/<zone>` for a zone.
//!
//! The `gpio` feature selects the rppal driver; without it relays only log.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use irrigation_engine::Transition;
use tracing::{debug, info};

use driver::{Driver, Relay};

// ---------------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
mod driver {
    use anyhow::{Context, Result};
    use rppal::gpio::{Gpio, OutputPin};

    pub(super) struct Driver {
        gpio: Gpio,
        active_low: bool,
    }

    pub(super) struct Relay {
        pin: OutputPin,
        active_low: bool,
    }

    impl Driver {
        pub(super) fn open(active_low: bool) -> Result<Self> {
            let gpio = Gpio::new().context("failed to open GPIO")?;
            Ok(Self { gpio, active_low })
        }

        pub(super) fn claim(&self, pin: u8) -> Result<Relay> {
            let pin = self
                .gpio
                .get(pin)
                .with_context(|| format!("failed to claim gpio {pin}"))?
                .into_output();
            Ok(Relay {
                pin,
                active_low: self.active_low,
            })
        }
    }

    impl Relay {
        pub(super) fn write(&mut self, on: bool) {
            // active-low: LOW energises the coil
            if on != self.active_low {
                self.pin.set_high();
            } else {
                self.pin.set_low();
            }
        }
    }
}

#[cfg(not(feature = "gpio"))]
mod driver {
    use anyhow::Result;
    use tracing::debug;

    pub(super) struct Driver;

    pub(super) struct Relay {
        pin: u8,
    }

    impl Driver {
        pub(super) fn open(_active_low: bool) -> Result<Self> {
            Ok(Driver)
        }

        pub(super) fn claim(&self, pin: u8) -> Result<Relay> {
            Ok(Relay { pin })
        }
    }

    impl Relay {
        pub(super) fn write(&mut self, on: bool) {
            debug!(gpio = self.pin, on, "[mock-gpio] relay write");
        }
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

struct Valve {
    relay: Relay,
    gpio: u8,
    on: bool,
}

pub(crate) struct ValveBoard {
    valves: BTreeMap<String, Valve>,
}

impl ValveBoard {
    /// Claim every wired pin and drive it off.
    pub(crate) fn new(wiring: &[(String, u8)], active_low: bool) -> Result<Self> {
        let driver = Driver::open(active_low)?;
        let mut valves = BTreeMap::new();
        for (switch, gpio) in wiring {
            let mut relay = driver
                .claim(*gpio)
                .with_context(|| format!("valve {switch}"))?;
            relay.write(false);
            valves.insert(
                switch.clone(),
                Valve {
                    relay,
                    gpio: *gpio,
                    on: false,
                },
            );
        }
        info!(
            valves = valves.len(),
            active_low,
            mock = cfg!(not(feature = "gpio")),
            "valve board ready"
        );
        Ok(Self { valves })
    }

    /// Drive the valve an edge names. Returns whether a relay was written;
    /// unwired switches and repeats of the current state are skipped.
    pub(crate) fn apply(&mut self, edge: &Transition) -> bool {
        let switch = edge.switch();
        let Some(valve) = self.valves.get_mut(&switch) else {
            debug!(switch = %switch, on = edge.on, "no valve wired");
            return false;
        };
        if valve.on == edge.on {
            return false;
        }
        valve.relay.write(edge.on);
        valve.on = edge.on;
        info!(switch = %switch, gpio = valve.gpio, on = edge.on, "valve set");
        true
    }

    pub(crate) fn is_on(&self, switch: &str) -> Option<bool> {
        self.valves.get(switch).map(|v| v.on)
    }

    /// Write every relay off, whatever state it was last left in.
    pub(crate) fn all_off(&mut self) {
        for (switch, valve) in &mut self.valves {
            valve.relay.write(false);
            if std::mem::replace(&mut valve.on, false) {
                info!(switch = %switch, gpio = valve.gpio, "valve closed");
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn board() -> ValveBoard {
        let wiring = vec![("garden".to_string(), 17), ("garden/lawn".to_string(), 27)];
        ValveBoard::new(&wiring, true).unwrap()
    }

    fn edge(zone: Option<&str>, on: bool) -> Transition {
        Transition {
            at: datetime!(2024-06-01 06:00 UTC),
            controller: "garden".into(),
            zone: zone.map(String::from),
            on,
        }
    }

    #[test]
    fn new_board_starts_closed() {
        let b = board();
        assert_eq!(b.is_on("garden"), Some(false));
        assert_eq!(b.is_on("garden/lawn"), Some(false));
        assert_eq!(b.is_on("garden/beds"), None);
    }

    #[test]
    fn edges_drive_named_valves() {
        let mut b = board();
        assert!(b.apply(&edge(None, true)));
        assert!(b.apply(&edge(Some("lawn"), true)));
        assert_eq!(b.is_on("garden"), Some(true));
        assert_eq!(b.is_on("garden/lawn"), Some(true));

        assert!(b.apply(&edge(Some("lawn"), false)));
        assert_eq!(b.is_on("garden/lawn"), Some(false));
        assert_eq!(b.is_on("garden"), Some(true));
    }

    #[test]
    fn repeated_edge_is_not_rewritten() {
        let mut b = board();
        assert!(b.apply(&edge(Some("lawn"), true)));
        assert!(!b.apply(&edge(Some("lawn"), true)));
    }

    #[test]
    fn unwired_switch_is_skipped() {
        let mut b = board();
        assert!(!b.apply(&edge(Some("beds"), true)));
        assert_eq!(b.is_on("garden/beds"), None);
    }

    #[test]
    fn all_off_closes_everything() {
        let mut b = board();
        b.apply(&edge(None, true));
        b.apply(&edge(Some("lawn"), true));
        b.all_off();
        assert_eq!(b.is_on("garden"), Some(false));
        assert_eq!(b.is_on("garden/lawn"), Some(false));
    }
}
