//! headcast daemon: runs a head broadcaster fed by a synthetic chain.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use headcast_broadcaster::{
    init_logging, BroadcasterConfig, ChannelFeed, DeliveryMode, FeedSender, HeadBroadcaster,
    LogFormat, LogSubscriber, Service, ShutdownController,
};
use headcast_types::{BlockHash, Head, Timestamp};
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "headcast-daemon", about = "Chain head broadcaster daemon")]
struct Cli {
    /// Path to a TOML configuration file. File settings are the base;
    /// CLI flags and env vars override them.
    #[arg(long, env = "HEADCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Service name reported in health output.
    #[arg(long, env = "HEADCAST_NAME")]
    name: Option<String>,

    /// Log level filter, e.g. "info" or "debug,headcast_broadcaster=trace".
    #[arg(long, env = "HEADCAST_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format: "human" or "json".
    #[arg(long, env = "HEADCAST_LOG_FORMAT")]
    log_format: Option<String>,

    /// How heads are handed to subscribers.
    #[arg(long, value_enum, env = "HEADCAST_DELIVERY_MODE")]
    delivery_mode: Option<ModeArg>,

    /// Subcommand.
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ModeArg {
    Queued,
    Synchronous,
}

impl From<ModeArg> for DeliveryMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Queued => DeliveryMode::Queued,
            ModeArg::Synchronous => DeliveryMode::Synchronous,
        }
    }
}

#[derive(clap::Subcommand)]
enum Command {
    /// Broadcast a synthetic chain until interrupted.
    Run {
        /// Time between generated heads.
        #[arg(long, default_value_t = 1000, env = "HEADCAST_INTERVAL_MS")]
        interval_ms: u64,

        /// Number of the first generated head.
        #[arg(long, default_value_t = 1)]
        start_number: u64,

        /// Stop generating after this many heads.
        #[arg(long)]
        count: Option<u64>,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, load_error) = match &cli.config {
        Some(path) => match BroadcasterConfig::from_toml_file(path) {
            Ok(cfg) => (cfg, None),
            Err(e) => (
                BroadcasterConfig::default(),
                Some(format!("{}: {e}", path.display())),
            ),
        },
        None => (BroadcasterConfig::default(), None),
    };
    if let Some(name) = cli.name {
        config.name = name;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    if let Some(mode) = cli.delivery_mode {
        config.delivery_mode = mode.into();
    }

    let format: LogFormat = config.log_format.parse()?;
    init_logging(format, &config.log_level);
    match (&cli.config, load_error) {
        (_, Some(e)) => tracing::warn!("Failed to load config file {e}, using defaults"),
        (Some(path), None) => tracing::info!("Loaded config from {}", path.display()),
        (None, None) => {}
    }
    config.validate()?;

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Run {
            interval_ms,
            start_number,
            count,
        } => run(config, Duration::from_millis(interval_ms.max(1)), start_number, count).await,
    }
}

async fn run(
    config: BroadcasterConfig,
    interval: Duration,
    start_number: u64,
    count: Option<u64>,
) -> anyhow::Result<()> {
    let shutdown = ShutdownController::new();
    let (feed, sender) = ChannelFeed::new("synthetic-chain", config.feed_capacity);
    let broadcaster = HeadBroadcaster::with_feed(config, Arc::new(feed));

    broadcaster.subscribe(Arc::new(LogSubscriber));
    broadcaster.start(shutdown.subscribe()).await?;

    let generator = tokio::spawn(generate_heads(
        sender,
        interval,
        start_number,
        count,
        shutdown.subscribe(),
    ));

    let reason = shutdown.wait_for_signal().await;
    tracing::info!(reason = ?reason, "stopping broadcaster");

    if let Err(e) = broadcaster.close().await {
        tracing::warn!(error = %e, "broadcaster closed with error");
    }
    generator.abort();

    for (component, status) in broadcaster.health_report() {
        match status {
            Ok(()) => tracing::info!(component = %component, "healthy"),
            Err(e) => tracing::info!(component = %component, status = %e, "not healthy"),
        }
    }
    match broadcaster.metrics().encode_text() {
        Ok(text) => tracing::debug!(metrics = %text, "final metrics"),
        Err(e) => tracing::warn!(error = %e, "failed to encode metrics"),
    }

    tracing::info!("headcast daemon exited cleanly");
    Ok(())
}

/// Deterministic hash for a synthetic block number.
fn synthetic_hash(number: u64) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&number.to_be_bytes());
    bytes[8..16].copy_from_slice(&number.wrapping_mul(0x9e37_79b9_7f4a_7c15).to_le_bytes());
    bytes[31] = 0x01;
    BlockHash::new(bytes)
}

/// Push one linked head per tick until `count` is reached, the feed closes,
/// or shutdown is signalled.
async fn generate_heads(
    sender: FeedSender,
    interval: Duration,
    start_number: u64,
    count: Option<u64>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    let last = count.map(|c| start_number.saturating_add(c));
    let mut number = start_number;

    while last.map_or(true, |last| number < last) {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {}
        }

        let parent = match number {
            0 => BlockHash::ZERO,
            n => synthetic_hash(n - 1),
        };
        let head = Head::new(number, synthetic_hash(number), parent, Timestamp::now());
        if sender.send(head).await.is_err() {
            tracing::debug!("head feed closed, generator stopping");
            break;
        }
        number += 1;
    }
    tracing::info!(next = number, "synthetic chain generator finished");
}
