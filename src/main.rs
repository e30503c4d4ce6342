// POWERTIDE v0.3.2 -- UTILIZATION-DRIVEN POWER-MODE DAEMON
// SAMPLES CPU/SYSTEM/GRAPHICS LOAD AND SWITCHES POWER POSTURE
//
// DECISIONS HAPPEN IN THE LIBRARY ENGINE (ONE CALL PER TICK)
// THIS BINARY HANDLES: CONFIGURATION, THE TICK LOOP, REPORTING

mod cli;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use powertide::basis::{BasisPoints, Reading};
use powertide::engine::UtilEngine;
use powertide::event::EventLog;
use powertide::platform::{PowerControl, UtilConfig};
use powertide::state::{util_init, StateSpec, DEFAULT_POLL_RATE_MS};
use powertide::sysfs::SysfsPlatform;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

const SLEEP_SLICE_MS: u64 = 100;

#[derive(Parser)]
#[command(name = "powertide")]
#[command(about = "POWERTIDE -- UTILIZATION-DRIVEN POWER-MODE DAEMON")]
struct Cli {
    // ENTER LOW-POWER MODE AT OR BELOW THIS SYSTEM BUSY PERCENTAGE
    #[arg(long, default_value_t = 10)]
    entry_threshold: u32,

    // LEAVE LOW-POWER MODE ABOVE THIS BUSIEST-CPU PERCENTAGE
    #[arg(long, default_value_t = 95)]
    exit_threshold: u32,

    // FIXED POLL INTERVAL OUTSIDE LOW-POWER MODE (0 = 1000MS)
    #[arg(long, default_value_t = 0)]
    entry_interval_ms: u32,

    // FIXED POLL INTERVAL INSIDE LOW-POWER MODE (0 = SCALE WITH CPU LOAD)
    #[arg(long, default_value_t = 0)]
    exit_interval_ms: u32,

    // MINIMUM DWELL BEFORE ENTERING LOW-POWER MODE (0 = NO HYSTERESIS)
    #[arg(long, default_value_t = 0)]
    entry_hyst_ms: u64,

    // MINIMUM DWELL BEFORE LEAVING LOW-POWER MODE (0 = NO HYSTERESIS)
    #[arg(long, default_value_t = 0)]
    exit_hyst_ms: u64,

    // DISABLE THRESHOLD-DRIVEN MONITORING
    #[arg(long)]
    no_util_monitor: bool,

    // RE-POLL GRAPHICS LOAD ON WORKLOAD-TYPE HINTS
    #[arg(long)]
    wlt_hint_poll: bool,

    // FIXED WORKLOAD-TYPE HINT (HINT-DRIVEN MATCHING)
    #[arg(long)]
    wlt: Option<u32>,

    // POLICY STATE, IN PRIORITY ORDER: name:key=value,... (REPEATABLE)
    #[arg(long = "state", value_parser = StateSpec::parse)]
    states: Vec<StateSpec>,

    // STOP AFTER N TICKS
    #[arg(long)]
    ticks: Option<u64>,

    // LOG EVERY WRITE INSTEAD OF PERFORMING IT
    #[arg(long)]
    dry_run: bool,

    // PRINT VERBOSE OUTPUT
    #[arg(long)]
    verbose: bool,

    // DUMP FULL TICK HISTORY ON EXIT
    #[arg(long)]
    dump_log: bool,

    // PRINT SYS/CPU/GFX BUSY ONCE PER SECOND AND EXIT ON CTRL+C
    #[arg(long)]
    probe: bool,

    // REPORT DATA SOURCE AVAILABILITY AND EXIT
    #[arg(long)]
    check: bool,
}

// SLEEP IN SHORT SLICES SO CTRL+C IS NOTICED PROMPTLY
fn sleep_ms(ms: u32) {
    let mut left = ms as u64;
    while left > 0 && !SHUTDOWN.load(Ordering::Relaxed) {
        let step = left.min(SLEEP_SLICE_MS);
        std::thread::sleep(Duration::from_millis(step));
        left -= step;
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)?;

    if cli.check {
        return cli::check::run_check();
    }
    if cli.probe {
        return cli::probe::run_probe();
    }

    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    let mut platform = SysfsPlatform::new(cli.dry_run)?;
    let nr_cpus = platform.online().iter().last().map_or(1, |c| c + 1);

    let config = UtilConfig {
        util_monitor: !cli.no_util_monitor,
        wlt_hint_poll: cli.wlt_hint_poll,
        entry_threshold: BasisPoints::from_percent(cli.entry_threshold),
        exit_threshold: BasisPoints::from_percent(cli.exit_threshold),
        entry_interval_ms: cli.entry_interval_ms,
        exit_interval_ms: cli.exit_interval_ms,
        entry_hyst_ms: cli.entry_hyst_ms,
        exit_hyst_ms: cli.exit_hyst_ms,
    };
    let table = util_init(cli.states.clone());

    println!("POWERTIDE v0.3.2");
    println!("CPUS:            {} online ({})", platform.online().len(), platform.online());
    println!("UTIL MONITOR:    {}", config.util_monitor);
    println!("THRESHOLDS:      entry {}% / exit {}%", config.entry_threshold, config.exit_threshold);
    println!("HYSTERESIS:      entry {} ms / exit {} ms", config.entry_hyst_ms, config.exit_hyst_ms);
    println!("POLICY STATES:   {} ({} valid, multi-state {})",
             table.states.len(), table.valid_count(), table.multi_state);
    if let Some(wlt) = cli.wlt {
        println!("WLT HINT:        {} (poll {})", wlt, config.wlt_hint_poll);
    }
    println!("DRY RUN:         {}", cli.dry_run);
    println!();

    let mut engine = UtilEngine::new(config, table, nr_cpus);
    let mut log = EventLog::new();

    println!("POWERTIDE IS ACTIVE (CTRL+C TO EXIT)");

    let mut ticks = 0u64;
    while !SHUTDOWN.load(Ordering::Relaxed) {
        let interval = engine.periodic_util_update(cli.wlt, &mut platform);
        let sample = *engine.last_sample();
        log.snapshot(sample.sys, sample.cpu, sample.gfx, interval,
                     engine.mode(platform.in_lpm()));

        ticks += 1;
        if cli.ticks.is_some_and(|n| ticks >= n) {
            break;
        }

        // NO RE-POLL REQUESTED: FALL BACK TO THE DEFAULT RATE
        sleep_ms(interval.unwrap_or(DEFAULT_POLL_RATE_MS));
    }

    println!("POWERTIDE IS SHUTTING DOWN");
    let last = engine.last_sample();
    println!("LAST SAMPLE:     sys {} cpu {} gfx {}",
             Reading(last.sys), Reading(last.cpu), Reading(last.gfx));

    if cli.dump_log {
        log.dump();
    }
    log.summary();

    println!("POWERTIDE OUT.");
    Ok(())
}
