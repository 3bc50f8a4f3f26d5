mod config;
mod dispatch;
mod event;
mod fleet;
mod paths;
mod pressure;
mod process;
mod queue;
mod registry;
mod signals;
mod stats;
mod status;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::dispatch::Dispatcher;
use crate::event::DaemonEvent;
use crate::fleet::FleetController;
use crate::pressure::LowMemDevice;
use crate::process::{ProcessControl, SystemControl};
use crate::registry::Registry;

#[tokio::main]
async fn main() -> Result<()> {
    // The daemon takes no arguments at all; everything lives in the config file.
    if std::env::args().len() != 1 {
        eprintln!(
            "usage: lowmemd  (no arguments; configuration is read from {})",
            paths::config_file_path().display()
        );
        std::process::exit(2);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Data directory & configuration ────────────────────────────────────────
    let data_dir = paths::data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    let config_path = paths::config_file_path();
    let config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        warn!("config error (using defaults): {e:#}");
        config::Config::default()
    });

    let signal_config = config.signals;
    let map = signals::SignalMap::from_config(&signal_config)?;
    let pressure_device = config.global.pressure_device.clone();
    let quiescent = Arc::new(AtomicU64::new(config.global.effective_quiescent_secs()));

    // ── Initial status ────────────────────────────────────────────────────────
    let status_path = paths::status_file_path();
    let mut current_status = status::DaemonStatus::new();
    status::write_status(&status_path, &current_status);

    // ── Core state, owned by this task ────────────────────────────────────────
    let control: Arc<dyn ProcessControl> = Arc::new(SystemControl);
    let mut registry = Registry::new();
    let mut dispatcher = Dispatcher::new(
        Arc::clone(&control),
        map.notify_signal(),
        config.global.effective_max_stagger_ms(),
        config.global.dispatch_stagger,
    );
    let mut fleet = FleetController::new(
        Arc::clone(&control),
        config.global.effective_max_stagger_ms(),
    );

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(64);

    // ── Kernel pressure channel ───────────────────────────────────────────────
    // Fatal if unavailable: the daemon has no purpose without it.
    let device = LowMemDevice::open(Path::new(&pressure_device))?;
    {
        let tx = event_tx.clone();
        let quiescent = Arc::clone(&quiescent);
        std::thread::Builder::new()
            .name("pressure-wait".into())
            .spawn(move || pressure::run(device, tx, quiescent))
            .context("Failed to spawn pressure watcher thread")?;
    }

    // ── Registration listener ─────────────────────────────────────────────────
    let signal_handle = signals::start(map, event_tx.clone())?;

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(config_path, event_tx.clone()));
    tokio::spawn(stats::run());

    // Graceful shutdown on SIGINT or SIGTERM.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(t) => t,
                Err(e) => {
                    warn!("failed to install SIGTERM handler: {e}");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
            let _ = tx.send(DaemonEvent::Shutdown).await;
        });
    }

    info!(
        "lowmemd v{} started, watching {}",
        env!("CARGO_PKG_VERSION"),
        pressure_device
    );

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        match evt {
            DaemonEvent::Registration(req) => {
                let change = registry.apply(req);
                info!("pid {}: {:?} ({})", req.pid, change, req.condition);

                // Opportunistic liveness pass, bounded by registry size.
                let swept = registry.sweep_dead(control.as_ref());
                if swept > 0 {
                    info!("liveness sweep removed {swept} dead entries");
                }

                current_status.tracked = registry.len();
                status::write_status(&status_path, &current_status);
            }

            DaemonEvent::Pressure(flags) => {
                current_status.state = status::DaemonState::Dispatching;
                current_status.tracked = registry.len();
                current_status.last_event = Some(flags.to_string());
                status::write_status(&status_path, &current_status);

                let summary = dispatcher.dispatch(&mut registry, flags).await;
                info!(
                    "dispatch pass: {} notified, {} evicted",
                    summary.notified, summary.evicted
                );

                if flags.triggers_fleet_cycle() {
                    current_status.state = status::DaemonState::Throttling;
                    status::write_status(&status_path, &current_status);
                    let cycle = fleet.run_cycle(&registry).await;
                    info!(
                        "fleet cycle: {} suspended, {} resumed",
                        cycle.suspended, cycle.resumed
                    );
                }

                current_status.state = status::DaemonState::Idle;
                current_status.tracked = registry.len();
                current_status.last_dispatch = Some(chrono::Local::now().to_rfc3339());
                status::write_status(&status_path, &current_status);
            }

            DaemonEvent::ConfigReloaded(new_config) => {
                info!("config reloaded");
                dispatcher.set_stagger(
                    new_config.global.dispatch_stagger,
                    new_config.global.effective_max_stagger_ms(),
                );
                fleet.set_max_stagger_ms(new_config.global.effective_max_stagger_ms());
                quiescent.store(
                    new_config.global.effective_quiescent_secs(),
                    Ordering::Relaxed,
                );
                if new_config.global.pressure_device != pressure_device {
                    warn!("pressure_device changed; restart required to take effect");
                }
                if new_config.signals != signal_config {
                    warn!("signal numbers changed; restart required to take effect");
                }
            }

            DaemonEvent::ChannelFailed(msg) => {
                error!("pressure channel failed: {msg}");
                current_status.state = status::DaemonState::Idle;
                current_status.tracked = registry.len();
                current_status.error = Some(msg);
                status::write_status(&status_path, &current_status);
                break;
            }

            DaemonEvent::Shutdown => {
                info!("shutting down");
                current_status.state = status::DaemonState::Idle;
                current_status.tracked = registry.len();
                status::write_status(&status_path, &current_status);
                break;
            }
        }
    }

    // Drop the receiver before joining the drain thread: a send parked on a
    // full channel then fails fast instead of blocking the join forever.
    drop(event_rx);
    signal_handle.stop();
    Ok(())
}
