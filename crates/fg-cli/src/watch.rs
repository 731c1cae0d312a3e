//! Live mode: events as JSON lines on stdin, timers on the wall clock.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, MissedTickBehavior};

use fg_core::allowance::SWEEP_INTERVAL_MS;
use fg_core::types::{Clock, SystemClock};
use fg_core::Engine;

use crate::config::JsonFileSource;
use crate::session::{Event, Session};

/// Audibility poll period of the background worker.
const AUDIO_POLL_MS: u64 = 1_000;

pub struct WatchOptions {
    pub source: JsonFileSource,
    pub engine: Engine,
}

pub fn run_watch(opts: WatchOptions) -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    runtime.block_on(watch_async(opts))
}

async fn watch_async(opts: WatchOptions) -> Result<(), String> {
    let WatchOptions { source, engine } = opts;
    let clock = SystemClock;
    let mut session = Session::new(engine);

    let mut sweep = interval(Duration::from_millis(SWEEP_INTERVAL_MS));
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut audio = interval(Duration::from_millis(AUDIO_POLL_MS));
    audio.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    log::info!("Watching stdin with config '{}'", source.path().display());

    loop {
        let (event, now) = tokio::select! {
            _ = sweep.tick() => (Event::Sweep, clock.now()),
            _ = audio.tick() => (Event::AudioPoll, clock.now()),
            line = lines.next_line() => {
                let line = line.map_err(|e| format!("Failed to read stdin: {}", e))?;
                let Some(line) = line else {
                    log::info!("stdin closed, stopping");
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Event>(&line) {
                    Ok(event) => (event, clock.now()),
                    Err(e) => {
                        eprintln!("Invalid event: {}", e);
                        continue;
                    }
                }
            }
        };

        for line in session.apply(event, now, &source) {
            println!("[{}] {}", now, line);
        }
    }
}
