//! Underworld Host
//!
//! Runs one match described by a JSON file, with the bundled tally game as
//! the engine.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use underworld::{
    VERSION,
    config::HostConfig,
    game::{MatchDescription, TallyEngine},
    network::{ShutdownHandle, TurnCoordinator},
    plugin::{self, MatchPlugin},
};

/// Exit status after an operator interrupt.
const INTERRUPTED: i32 = 130;

/// How long session threads get to exit once the match is over.
const JOIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "underworld-host")]
#[command(about = "Turn-based match host for stream-connected players")]
#[command(version)]
struct Cli {
    /// Match description file
    #[arg(short, long)]
    game: PathBuf,

    /// Where to save match results
    #[arg(short, long)]
    results: Option<PathBuf>,

    /// Plugin wrapped around the match
    #[arg(short, long)]
    plugin: Option<String>,

    /// Argument string handed to the plugin
    #[arg(long, default_value = "")]
    plugin_args: String,

    /// Turn duration in milliseconds
    #[arg(long)]
    turn_ms: Option<u64>,

    /// Maximum bytes in one input line
    #[arg(long)]
    max_line_len: Option<usize>,

    /// Maximum input bytes per turn
    #[arg(long)]
    max_recv_size: Option<usize>,

    /// Maximum input lines per turn
    #[arg(long)]
    max_recv_lines: Option<usize>,

    /// Log filter, e.g. "info" or "underworld=debug"
    #[arg(long)]
    log: Option<String>,
}

impl Cli {
    /// Environment configuration with command-line overrides on top.
    fn host_config(&self) -> Result<HostConfig> {
        let mut config = HostConfig::from_env()?;
        if let Some(ms) = self.turn_ms {
            config.limits.turn_duration = Duration::from_millis(ms);
        }
        if let Some(len) = self.max_line_len {
            config.limits.max_line_len = len;
        }
        if let Some(size) = self.max_recv_size {
            config.limits.max_pending_bytes = size;
        }
        if let Some(lines) = self.max_recv_lines {
            config.limits.max_lines_per_turn = lines;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match &cli.log {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Underworld Host v{}", VERSION);

    let config = cli.host_config()?;
    let description = MatchDescription::load(&cli.game)?;
    info!("Players: {}", description.players.len());
    info!("Turn duration: {} ms", config.limits.turn_duration.as_millis());

    let mut hooks = cli
        .plugin
        .as_deref()
        .map(|name| plugin::by_name(name, &cli.plugin_args))
        .transpose()?;

    let mut coordinator = TurnCoordinator::connect(&description.players, config)?;
    watch_interrupt(coordinator.shutdown_handle());

    let mut engine = TallyEngine::from_description(&description);
    let results = cli.results.as_deref();
    let hook: Option<&mut dyn MatchPlugin> = match hooks.as_mut() {
        Some(boxed) => Some(&mut **boxed),
        None => None,
    };
    let summary = plugin::run_with_plugin(hook, || {
        coordinator.run(&mut engine, results)
    })?;

    for player in &summary.players {
        match player.kick_reason {
            Some(reason) => info!("Player {}: {} ({})", player.index, player.state, reason),
            None => info!("Player {}: {}", player.index, player.state),
        }
    }
    let abandoned = coordinator.join_within(JOIN_GRACE);
    if abandoned > 0 {
        warn!("Left {} player threads blocked on input", abandoned);
    }
    Ok(())
}

/// Tear every player down and exit on Ctrl+C.
fn watch_interrupt(shutdown: ShutdownHandle) {
    let spawned = thread::Builder::new().name("interrupt".to_string()).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Interrupt handling disabled: {}", e);
                return;
            }
        };
        if let Err(e) = runtime.block_on(tokio::signal::ctrl_c()) {
            warn!("Interrupt handling disabled: {}", e);
            return;
        }
        shutdown.abort();
        error!("Game stopped!");
        std::process::exit(INTERRUPTED);
    });
    if let Err(e) = spawned {
        warn!("Interrupt handling disabled: {}", e);
    }
}
