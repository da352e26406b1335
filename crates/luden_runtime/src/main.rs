//! Luden Runtime
//!
//! Loads the game modules named in the project config, lets one of them
//! supply the runtime application and drives the frame loop until the
//! application stops, the frame limit is hit or Ctrl-C.
//!
//! Run with: cargo run -p luden_runtime -- path/to/luden.toml
//!       or: LUDEN_CONFIG=path/to/luden.toml cargo run --bin luden

mod config;
mod runtime;
mod scene;

use config::RuntimeConfig;
use runtime::Runtime;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // First non-flag argument is the config path
    let cli = std::env::args_os()
        .skip(1)
        .find(|arg| !arg.to_string_lossy().starts_with("--"))
        .map(PathBuf::from);

    let config = match RuntimeConfig::load(cli) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::from(2);
        }
    };
    config.print_summary();

    let mut runtime = match Runtime::new(config) {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let running = runtime.stop_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, shutting down...");
        running.store(false, Ordering::SeqCst);
    }) {
        log::warn!("Failed to set Ctrl+C handler: {}", e);
    }

    let unavailable: Vec<&str> = runtime
        .host()
        .slots()
        .iter()
        .filter(|slot| !slot.is_available())
        .map(|slot| slot.name())
        .collect();
    if !unavailable.is_empty() {
        log::warn!("Running without modules: {}", unavailable.join(", "));
    }
    log::info!(
        "{} component types, {} scripts, {} entities",
        runtime.registry().len(),
        runtime.host().scripts().len(),
        runtime.entities().len()
    );

    let reason = runtime.run();
    log::info!("Exiting after {} frames ({:?})", runtime.frame(), reason);
    ExitCode::SUCCESS
}
