//! # Random Record Frame CLI (`frame`)
//!
//! Runs the display duty cycle on a host without a panel: the report is
//! printed to stdout as a framed text panel and the schedule state is kept in
//! a JSON file between invocations.
//!
//! ## Usage
//!
//! ```bash
//! frame --config ./config/frame.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `frame run` | Run one wake: fetch, sample, render, schedule the next wake |
//! | `frame watch` | Keep running wakes, sleeping in-process between them |
//! | `frame sample` | Print one random report without touching schedule state |
//! | `frame state show` | Print the persisted schedule state |
//! | `frame state reset` | Discard the persisted schedule state |
//! | `frame state exit` | Leave the app; the next draw is a full refresh |
//!
//! ## Examples
//!
//! ```bash
//! # One cycle, as a cron job or systemd timer would run it
//! frame run --config ./config/frame.toml
//!
//! # Three cycles in a row, sleeping the scheduled delay in between
//! frame watch --cycles 3
//!
//! # Reproducible pick for debugging
//! frame sample --seed 42
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use record_frame::config::{self, Config};
use record_frame::console::ConsoleDevice;
use record_frame::cycle::{scheduler_from_config, wake_once, CycleOutcome, DutyCycleApp, RecordApp};
use record_frame::sampler::{EntropySource, RandomSource};
use record_frame::schedule::ScheduleState;

/// Random Record Frame: show one random record from a remote collection per
/// wake.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "frame",
    about = "Random Record Frame: fetch a remote collection, show one random record, sleep",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/frame.toml")]
    config: PathBuf,

    /// Log filter used when `RUST_LOG` is not set (e.g. `debug`,
    /// `record_frame=trace`).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one duty cycle.
    ///
    /// Loads the schedule state, fetches and samples one record, renders it
    /// to stdout, schedules the next wake and saves the state. Exits with
    /// status 1 if the cycle aborts.
    Run,

    /// Run duty cycles repeatedly.
    ///
    /// Sleeps the scheduled delay between cycles. Stops after `--cycles`
    /// cycles, or when a cycle aborts and the failure policy defers the next
    /// wake.
    Watch {
        /// Number of cycles to run (default: unlimited).
        #[arg(long)]
        cycles: Option<u32>,
    },

    /// Print one random report without touching schedule state.
    Sample {
        /// Seed the random source for a reproducible pick.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Inspect or modify the persisted schedule state.
    State {
        #[command(subcommand)]
        action: StateAction,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// Print the persisted state as JSON.
    Show,
    /// Replace the persisted state with a fresh one.
    Reset,
    /// Leave the app: the next draw will be a full refresh.
    Exit,
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn random_source(seed: Option<u64>) -> Box<dyn RandomSource> {
    match seed {
        Some(seed) => Box::new(EntropySource::seeded(seed)),
        None => Box::new(EntropySource::new()),
    }
}

fn build_app(cfg: &Config, seed: Option<u64>) -> Result<RecordApp<Config>> {
    let scheduler = scheduler_from_config(cfg)?;
    Ok(RecordApp::new(scheduler, cfg.clone(), random_source(seed)))
}

fn report_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Completed {
            refresh,
            wake_after_secs,
            ..
        } => {
            println!("refresh: {}", refresh);
            println!("next wake: {}s", wake_after_secs);
        }
        CycleOutcome::Aborted {
            phase,
            retry_after_secs,
            ..
        } => {
            eprintln!("cycle aborted while {}", phase);
            match retry_after_secs {
                Some(secs) => eprintln!("retry scheduled in {}s", secs),
                None => eprintln!("next wake deferred"),
            }
        }
    }
}

fn run_once(cfg: &Config) -> Result<()> {
    let mut app = build_app(cfg, None)?;
    let mut device = ConsoleDevice::stdout();
    let outcome = wake_once(&mut app, &mut device, &cfg.schedule.state_path)?;
    report_outcome(&outcome);
    if !outcome.is_completed() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_watch(cfg: &Config, cycles: Option<u32>) -> Result<()> {
    let mut app = build_app(cfg, None)?;
    let mut device = ConsoleDevice::stdout();
    let mut completed = 0u32;

    loop {
        let outcome = wake_once(&mut app, &mut device, &cfg.schedule.state_path)?;
        report_outcome(&outcome);
        completed += 1;

        let delay = match outcome {
            CycleOutcome::Completed {
                wake_after_secs, ..
            } => wake_after_secs,
            CycleOutcome::Aborted {
                retry_after_secs: Some(secs),
                ..
            } => secs,
            CycleOutcome::Aborted { error, .. } => {
                bail!("cycle aborted and the next wake is deferred: {}", error)
            }
        };

        if cycles.is_some_and(|n| completed >= n) {
            break;
        }
        tracing::info!(delay_secs = delay, "sleeping until next wake");
        std::thread::sleep(Duration::from_secs(delay));
    }
    Ok(())
}

fn run_sample(cfg: &Config, seed: Option<u64>) -> Result<()> {
    let scheduler = scheduler_from_config(cfg)?;
    let mut rng = random_source(seed);
    let report = scheduler.preview(cfg, rng.as_mut())?;
    println!("created: {}", report.created);
    println!();
    print!("{}", report.body);
    if !report.body.ends_with('\n') {
        println!();
    }
    Ok(())
}

fn run_state(cfg: &Config, action: StateAction) -> Result<()> {
    let path = &cfg.schedule.state_path;
    match action {
        StateAction::Show => {
            let state = ScheduleState::load(path);
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        StateAction::Reset => {
            ScheduleState::default().save(path)?;
            println!("Schedule state reset.");
        }
        StateAction::Exit => {
            let mut app = build_app(cfg, None)?;
            let mut state = ScheduleState::load(path);
            app.on_exit(&mut state);
            state.save(path)?;
            println!("Full refresh pending.");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Run => run_once(&cfg)?,
        Commands::Watch { cycles } => run_watch(&cfg, cycles)?,
        Commands::Sample { seed } => run_sample(&cfg, seed)?,
        Commands::State { action } => run_state(&cfg, action)?,
    }

    Ok(())
}
