//! scandir: scheduled directory sweeps with result logging.
//!
//! Thin binary entry point. All logic lives in the `scandir-core` crate.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use scandir_core::{ConfigStore, Event, SessionController, SessionState};

#[derive(Parser, Debug)]
#[command(name = "scandir", version, about = "Scheduled directory scanner")]
struct Cli {
    /// JSON session configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Seconds to wait before the first sweep
    #[arg(long, default_value_t = 0)]
    delay_secs: u64,

    /// Seconds between the end of one sweep and the start of the next (0 = single sweep)
    #[arg(long, default_value_t = 0)]
    interval_secs: u64,

    /// Run a single sweep even if an interval is given
    #[arg(long)]
    once: bool,

    /// Write a default configuration to --config and exit
    #[arg(long)]
    init: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = ConfigStore::new(&cli.config);

    if cli.init {
        store
            .save()
            .with_context(|| format!("writing {}", cli.config.display()))?;
        println!("Wrote default configuration to {}", cli.config.display());
        return Ok(());
    }

    let session = SessionController::new()?;
    let events = session.events().subscribe();
    session
        .apply_configuration(false, &store)
        .with_context(|| format!("applying {}", cli.config.display()))?;

    let interval = if cli.once {
        Duration::ZERO
    } else {
        Duration::from_secs(cli.interval_secs)
    };
    session.schedule(Duration::from_secs(cli.delay_secs), interval)?;
    tracing::info!("scandir running with {} worker(s)", session.workers().len());

    for event in events.receiver.iter() {
        match event {
            Event::FileMatched { worker, path } => println!("{worker}\t{}", path.display()),
            Event::SessionStateChanged { new, .. } => {
                if matches!(new, SessionState::Completed | SessionState::Stopped) {
                    break;
                }
            }
            Event::MemoryLogFull { capacity } => {
                tracing::warn!("Memory log reached {capacity} records, evicting oldest")
            }
            _ => {}
        }
    }

    for worker in session.workers() {
        tracing::info!("{}", worker.current_scan_info());
    }
    if let Some(err) = session.last_error() {
        tracing::error!("Last sweep failed: {err}");
    }
    session.close()?;
    Ok(())
}
