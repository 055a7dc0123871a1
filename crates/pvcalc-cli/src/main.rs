//! pvcalc CLI - drive the PV bridge from a terminal

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pvcalc::{
    execute_task, is_valid_pv, listener_fn, PvDataWorker, ResultEvent, ResultListener, SoftIoc,
    WorkerConfig,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pvcalc")]
#[command(
    author,
    version,
    about = "Subscribe process variables and publish them as spreadsheet results"
)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether names are acceptable PV names
    Check {
        /// PV names to check
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Monitor PVs served by a built-in loopback source and print every update
    Monitor(MonitorArgs),
}

#[derive(Args)]
struct MonitorArgs {
    /// PV names to subscribe
    #[arg(required = true)]
    names: Vec<String>,

    /// Deadband applied to every PV
    #[arg(short, long, default_value = "0.0")]
    mdel: f64,

    /// How long to monitor, in seconds
    #[arg(short, long, default_value = "5")]
    duration: u64,

    /// Interval between published samples, in milliseconds
    #[arg(short, long, default_value = "200")]
    period: u64,

    /// Worker thread name
    #[arg(long)]
    name: Option<String>,

    /// Liveness log interval, in seconds
    #[arg(long, default_value = "10")]
    heartbeat: u64,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Check { names } => check_names(&names),
        Commands::Monitor(args) => monitor(&args),
    }
}

fn check_names(names: &[String]) -> Result<()> {
    let mut invalid = 0;
    for name in names {
        if is_valid_pv(name) {
            println!("{name}: valid");
        } else {
            println!("{name:?}: invalid");
            invalid += 1;
        }
    }

    if invalid > 0 {
        bail!("{invalid} of {} names are invalid", names.len());
    }
    Ok(())
}

fn monitor(args: &MonitorArgs) -> Result<()> {
    let ioc = SoftIoc::new();
    let config = WorkerConfig {
        name: args.name.clone(),
        heartbeat_interval: Duration::from_secs(args.heartbeat),
    };
    let mut worker = PvDataWorker::spawn(Arc::new(ioc.clone()), config)
        .context("Failed to start PV worker")?;
    tracing::info!("{worker}");

    let printer = event_printer(args.json);
    for name in &args.names {
        worker
            .add_pv(name, args.mdel)
            .with_context(|| format!("Failed to subscribe '{name}'"))?;
        // Invalid names are skipped by the worker and have no result cell.
        if let Some(cell) = worker.get_result(name) {
            cell.add_result_listener(Arc::clone(&printer));
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    let period = Duration::from_millis(args.period.max(1));
    for (i, name) in worker.list().into_iter().map(|(n, _)| n).enumerate() {
        let ioc = ioc.clone();
        let running = Arc::clone(&running);
        let phase = i as f64;
        execute_task(move || feed_waveform(&ioc, &name, phase, period, &running))
            .context("Failed to start sample feeder")?;
    }

    thread::sleep(Duration::from_secs(args.duration));
    running.store(false, Ordering::SeqCst);

    worker.show_all_pvs();
    for name in &args.names {
        worker
            .del_pv(name)
            .with_context(|| format!("Failed to remove '{name}'"))?;
    }
    worker.stop().context("Failed to stop PV worker")?;
    tracing::info!("{worker}");
    Ok(())
}

/// Listener that prints each event on stdout.
fn event_printer(json: bool) -> Arc<dyn ResultListener> {
    listener_fn(move |event: &ResultEvent| {
        if json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!("Failed to encode event for {}: {e}", event.source),
            }
        } else {
            println!("[{}] {event}", event.timestamp.format("%H:%M:%S%.3f"));
        }
    })
}

/// Publish a slow sine wave on `name` until `running` is cleared.
fn feed_waveform(ioc: &SoftIoc, name: &str, phase: f64, period: Duration, running: &AtomicBool) {
    let start = Instant::now();
    while running.load(Ordering::SeqCst) {
        let t = start.elapsed().as_secs_f64();
        let sample = ((t * 0.5 + phase).sin() * 10_000.0).round() / 1_000.0;
        ioc.put(name, sample);
        thread::sleep(period);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_names() {
        assert!(check_names(&["PHY:TEST".to_string()]).is_ok());
        assert!(check_names(&["PHY:TEST".to_string(), "bad name!".to_string()]).is_err());
    }

    #[test]
    fn test_parse_monitor_args() {
        let cli = Cli::try_parse_from([
            "pvcalc", "monitor", "PHY:A", "PHY:B", "--mdel", "0.5", "--duration", "2", "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Monitor(args) => {
                assert_eq!(args.names, vec!["PHY:A", "PHY:B"]);
                assert_eq!(args.mdel, 0.5);
                assert_eq!(args.duration, 2);
                assert_eq!(args.period, 200);
                assert!(args.json);
            }
            Commands::Check { .. } => panic!("expected monitor"),
        }
    }

    #[test]
    fn test_short_monitor_session() {
        let args = MonitorArgs {
            names: vec!["PHY:A".to_string(), "bad name!".to_string()],
            mdel: 0.0,
            duration: 0,
            period: 5,
            name: Some("cli-test".to_string()),
            heartbeat: 1,
            json: true,
        };
        monitor(&args).unwrap();
    }
}
