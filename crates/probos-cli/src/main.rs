//! `probos` – demo entry point for the probing rig stack.
//!
//! Loads a rig configuration (TOML, `--config`, default `probos.toml`),
//! builds a fully simulated rig from it, homes the probes, starts the
//! task processor and schedules a demonstration move.  Ctrl-C cancels the
//! running task and shuts the rig down.

mod config;

use std::collections::HashMap;
use std::sync::Arc;

use probos_bus::{EventBus, Topic};
use probos_geometry::Vec3;
use probos_hal::Probe;
use probos_hal::sim::{SimCamera, SimPowerController, SimProbe, SimSignalRouter, SimUartAdapter};
use probos_motion::ProbeRig;
use probos_tasks::{InMemoryTaskStore, MoveProbesTask, TaskProcessor, TaskStore};
use probos_types::{ProbeType, RigConfig, RigError};
use tracing::{error, info, warn};

fn main() {
    // ── Structured logging ──────────────────────────────────────────────
    // RUST_LOG selects the filter (default "info"); PROBOS_LOG_FORMAT=json
    // switches to newline-delimited JSON for log aggregators.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("PROBOS_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "could not start the async runtime");
            std::process::exit(1);
        }
    };
    if let Err(err) = runtime.block_on(run()) {
        error!(error = %err, "probos exited with an error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), RigError> {
    // ── Configuration ───────────────────────────────────────────────────
    let config_path = config::config_path_from_args(std::env::args().skip(1));
    let rig_config = match config::load(&config_path) {
        Ok(Some(rig_config)) => {
            info!(path = %config_path.display(), "rig config loaded");
            rig_config
        }
        Ok(None) => {
            info!(
                path = %config_path.display(),
                "no config file found, writing the built-in simulated rig config"
            );
            let rig_config = RigConfig::simulated();
            if let Err(err) = config::save(&rig_config, &config_path) {
                warn!(error = %err, "could not write the default config");
            }
            rig_config
        }
        Err(err) => {
            warn!(error = %err, "config rejected, using the built-in simulated rig");
            RigConfig::simulated()
        }
    };

    // ── Rig assembly ────────────────────────────────────────────────────
    let bus = EventBus::default();
    let probes: Vec<Arc<dyn Probe>> = rig_config
        .probes
        .iter()
        .cloned()
        .map(|probe_config| Arc::new(SimProbe::new(probe_config, bus.clone())) as Arc<dyn Probe>)
        .collect();
    let rig = Arc::new(
        ProbeRig::new(&rig_config.name, probes, bus.clone())?
            .with_cameras(vec![Arc::new(SimCamera::new("overview camera"))])
            .with_signal_router(Arc::new(SimSignalRouter::new()))
            .with_power_controller(Arc::new(SimPowerController::new()))
            .with_uart_adapter(Arc::new(SimUartAdapter::new())),
    );
    rig.start().await?;
    rig.home().await?;

    // ── Task processor ──────────────────────────────────────────────────
    let store = Arc::new(InMemoryTaskStore::new());
    let processor = Arc::new(TaskProcessor::new(
        Arc::clone(&rig),
        store as Arc<dyn TaskStore>,
    ));
    processor.house_keeping().await?;
    let scheduler = tokio::spawn(Arc::clone(&processor).run_scheduler());

    // Mirror task lifecycle events into the log.
    let mut task_events = bus.subscribe(Topic::Tasks);
    let event_log = tokio::spawn(async move {
        while let Some(event) = task_events.recv().await {
            info!(source = %event.source, payload = ?event.payload, "task event");
        }
    });

    // ── Demo move ───────────────────────────────────────────────────────
    let destinations: HashMap<ProbeType, Vec3> = [
        (ProbeType::P1, Vec3::new(-12.0, 8.0, -2.0)),
        (ProbeType::P2, Vec3::new(14.0, -5.0, -2.0)),
    ]
    .into();
    let task = processor
        .schedule_task(Box::new(MoveProbesTask::new(
            destinations,
            3000.0,
            2000.0,
            true,
        )))
        .await?;
    info!(task = %task, "demo move scheduled, press ctrl-c to stop");

    // ── Shutdown ────────────────────────────────────────────────────────
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("ctrl-c received, shutting down"),
        Err(err) => warn!(error = %err, "could not wait for ctrl-c, shutting down"),
    }
    processor.cancel();
    scheduler.abort();
    event_log.abort();
    rig.stop().await?;
    Ok(())
}
