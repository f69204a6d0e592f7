//! Headless runner: capture, analyse at the display rate, log a summary.
//!
//! Usage: `rta [CONFIG.toml]`

use rta::config::{load_config, Config};
use rta::state::AppState;
use std::path::PathBuf;
use std::time::{Duration, Instant};

const SUMMARY_INTERVAL: Duration = Duration::from_secs(1);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => {
            let config = load_config(&path)?;
            log::info!("Loaded config from {}", path.display());
            config
        }
        None => Config::default(),
    };

    let mut state = AppState::from_capture(&config)?;
    let period = Duration::from_secs_f64(1.0 / state.display.refresh_hz);
    let mut last_summary = Instant::now();

    loop {
        let started = Instant::now();
        let frame = state.tick();

        if last_summary.elapsed() >= SUMMARY_INTERVAL {
            log::info!("{}", frame.summarize(state.log_bins()));
            last_summary = Instant::now();
        }

        if let Some(rest) = period.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }
}
