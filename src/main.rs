//! # EV Systems Coordinator Entry Point
//!
//! Starts the five subsystem controllers, serves peer requests over TCP (JSON lines) until
//! Ctrl-C, then shuts the controllers down in startup order.
//!
//! ## Configuration (environment)
//! - `EV_SYSTEMS_LISTEN`      listen address (default 127.0.0.1:4000)
//! - `EV_SYSTEMS_REFRESH_US`  refresh period in µs (default 16667, ~60 Hz)
//! - `EV_SYSTEMS_FIXTURES`    fixture directory (default data/fixtures)
//! - `EV_SYSTEMS_DATA_DIR`    output directory (default data/logs; empty disables)
//! - `EV_SYSTEMS_REQUEST_LOG` `0` disables the request audit log
//!
//! ## Outputs
//! - `data/logs/requests.csv`        one row per answered request.
//! - `data/logs/metrics_summary.csv` request/failure counts, latency, refresh misses.

use std::{
    process,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use log::{error, info, warn};

use ev_systems::{Coordinator, CoordinatorConfig, CoordinatorError, NetworkChannel, TcpChannel};

fn main() {
    env_logger::init();
    info!("=== EV SYSTEMS START ===");

    if let Err(e) = run() {
        error!("[Main] {}", e);
        process::exit(1);
    }

    info!("=== EV SYSTEMS FINISHED ===");
}

fn run() -> Result<(), CoordinatorError> {
    let config = CoordinatorConfig::from_env()?;
    info!("[Main] {:?}", config);

    let channel = Arc::new(TcpChannel::bind(config.listen_addr)?);
    println!("Listening for peers on {}", channel.local_addr());

    let mut coordinator =
        Coordinator::with_vehicle(config, channel.clone() as Arc<dyn NetworkChannel>)?;
    coordinator.start()?;

    spawn_signal_handler(coordinator.shutdown_handle());

    let served = match coordinator.run() {
        Ok(n) => n,
        Err(e) => {
            error!("[Main] dispatcher stopped: {}", e);
            0
        }
    };
    info!("[Main] dispatcher served {} request(s)", served);

    let result = coordinator.shutdown();
    channel.shutdown();
    result
}

/// Clears `running` on Ctrl-C. The signal is awaited on a small single-threaded tokio
/// runtime on its own thread; everything else stays on plain threads.
fn spawn_signal_handler(running: Arc<AtomicBool>) {
    let spawned = thread::Builder::new()
        .name("signal".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("[Main] cannot build signal runtime: {}", e);
                    return;
                }
            };
            match rt.block_on(tokio::signal::ctrl_c()) {
                Ok(()) => info!("[Main] Ctrl-C received, stopping"),
                Err(e) => error!("[Main] signal wait failed: {}", e),
            }
            running.store(false, Ordering::Release);
        });

    if let Err(e) = spawned {
        warn!("[Main] no Ctrl-C handler ({}); stop with SIGTERM", e);
    }
}
