mod cli;
mod config;
mod controller;
mod device;
mod polling;
mod sample_buffer;
mod shutdown;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use config::{APP_VERSION, Config};
use controller::DuckingController;
use log::{debug, error, info, warn};
use polling::PollingLoop;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(cli.config.as_deref());
    cli.apply(&mut config);
    config.sanitize();

    info!("Starting EarGuard {APP_VERSION}...");
    info!(
        "Settings: Threshold: {:.2}, Volume division: 1/{}, Restore delay: {}s, Sample window: {}, Verbose: {}",
        config.threshold,
        config.division_factor,
        config.restore_delay,
        config.sample_window,
        config.verbose
    );

    match run(config) {
        Ok(()) => {
            info!("Clean shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> Result<()> {
    // === Device ===
    let device = device::open_default().context("failed to acquire the default audio device")?;

    // === Shutdown ===
    let (stop_tx, stop_rx) = crossbeam::channel::bounded(1);
    let listener = shutdown::spawn_signal_listener(stop_tx)?;

    // === Polling ===
    let verbose = config.verbose;
    let controller = DuckingController::new(config);
    let mut polling = PollingLoop::new(controller, device, stop_rx).verbose(verbose);
    polling.run();

    debug!("Waiting for signal listener to finish...");
    if listener.join().is_err() {
        warn!("Signal listener thread panicked");
    }

    Ok(())
}
