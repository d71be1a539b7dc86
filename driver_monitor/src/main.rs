use std::{path::PathBuf, time::Duration};

use anyhow::Context as _;
use driver_monitor::{
    clock::{Clock as _, MonotonicClock},
    commands::handle_line,
    config::{create_default_config, init_config},
    console::StdoutConsole,
    controllers::create_axes,
    halt::ProcessHalt,
    logging,
    monitor::{DriverMonitor, PollScheduler},
    print_timer::PrintTimer,
    watchdog::Watchdog,
};
use tokio::{
    io::{AsyncBufReadExt as _, BufReader},
    time::MissedTickBehavior,
};
use tracing::info;

fn should_create_config() -> bool {
    std::env::var("CREATE_CONFIG")
        .map(|val| val == "1" || val.to_lowercase() == "true")
        .unwrap_or(false)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    logging::init();

    if should_create_config() {
        create_default_config(None::<PathBuf>)?;
    }

    let (_config_manager, config) = init_config().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Run with CREATE_CONFIG=1 to create a default configuration file.");
        e
    })?;

    let clock = MonotonicClock::new();
    let axes = create_axes(&config);
    info!("Monitoring {} of {} configured drivers", axes.len(), config.axes.len());

    let scheduler = PollScheduler::new(config.poll_interval_ms, clock.millis());
    let mut monitor = DriverMonitor::new(axes, config.monitor_settings(), scheduler, ProcessHalt);
    let mut timer = PrintTimer::new();
    let mut console = StdoutConsole;

    let watchdog = (config.watchdog_timeout_ms > 0)
        .then(|| Watchdog::start(Duration::from_millis(config.watchdog_timeout_ms)));

    let mut tick = tokio::time::interval(Duration::from_millis(config.tick_ms));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut console_open = true;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Some(watchdog) = &watchdog {
                    watchdog.feed();
                }
                let now = clock.millis();
                monitor.tick(now, timer.duration(now), &mut console)?;
            }
            line = lines.next_line(), if console_open => {
                match line.context("Failed to read console input")? {
                    Some(line) => {
                        let now = clock.millis();
                        handle_line(&line, &mut monitor, &mut timer, now, &mut console)?;
                    }
                    None => {
                        info!("Console input closed, monitoring continues");
                        console_open = false;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
