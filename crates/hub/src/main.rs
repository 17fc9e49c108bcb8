mod clock;
mod config;
mod scheduler;
mod state;
mod valve;
mod web;

use anyhow::{bail, Result};
use irrigation_engine::sim::Simulation;
use irrigation_engine::Coordinator;
use std::{env, sync::Arc};
use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use clock::{VirtualClock, WallClock};
use config::{ClockConfig, Config};
use scheduler::Scheduler;
use state::SystemState;
use valve::ValveBoard;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    if env_flag("RUN_TESTS").unwrap_or(false) {
        return run_self_tests(&cfg);
    }

    // ── Valve board ─────────────────────────────────────────────────
    // Many common relay boards are active-low. If yours is active-high, set false.
    let active_low = env_flag("RELAY_ACTIVE_LOW").unwrap_or(cfg.hub.relay_active_low);
    let pins = cfg.valve_pins();
    let valves = ValveBoard::new(&pins, active_low)?;

    // ── Shared state (ephemeral, for the web API) ───────────────────
    let shared = Arc::new(RwLock::new(SystemState::new(&cfg.switches(), &pins)));
    shared.write().await.record_system("hub started".to_string());

    // ── Web server ──────────────────────────────────────────────────
    let web_state = Arc::clone(&shared);
    tokio::spawn(async move {
        if let Err(e) = web::serve(Arc::clone(&web_state)).await {
            error!(error = %format!("{e:#}"), "web server stopped");
            web_state.write().await.record_error(format!("web server stopped: {e:#}"));
        }
    });

    // ── Scheduler ───────────────────────────────────────────────────
    let coordinator = Coordinator::load(&cfg.irrigation);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
    };
    match cfg.hub.clock {
        ClockConfig::Wall => {
            Scheduler::new(coordinator, WallClock, valves, shared)
                .run(shutdown)
                .await
        }
        ClockConfig::Virtual { start, speed } => {
            info!(%start, speed, "using virtual clock");
            Scheduler::new(coordinator, VirtualClock::new(start, speed), valves, shared)
                .run(shutdown)
                .await
        }
    }
    Ok(())
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Replay every `[[tests]]` case on a virtual clock. Fails if any case
/// saw different edges than it expected.
fn run_self_tests(cfg: &Config) -> Result<()> {
    let mut failed = 0;
    for case in &cfg.tests {
        let report = Simulation::run_case(&cfg.irrigation, case);
        if report.passed() {
            info!("{report}");
        } else {
            error!("{report}");
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} of {} self-tests failed", cfg.tests.len());
    }
    info!(tests = cfg.tests.len(), "all self-tests passed");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
