//! clawnet-node — the ClawNet full-node binary.
//!
//! Startup sequence:
//!   1. Open (or initialise) the data directory and keystore
//!   2. Run schema migrations on the events database
//!   3. Rebuild wallet state from the log
//!   4. Start the P2P stack (GossipSub + Kademlia + relay/DCUtR/AutoNAT)
//!   5. Launch the sync timers and snapshot scheduler
//!
//! Exit codes: 0 clean stop, 1 startup failure, 2 invalid flags.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use clawnet_core::error::ClawError;
use clawnet_node::{parse_sybil_policy, FileConfig, Node, NodeConfig};

#[derive(Parser, Debug)]
#[command(
    name = "clawnet-node",
    version,
    about = "ClawNet node — gossip substrate for the autonomous-agent economy"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the node daemon.
    Daemon(DaemonArgs),
}

#[derive(Args, Debug)]
struct DaemonArgs {
    /// Directory for keys, events, snapshots, logs, and config.yaml.
    #[arg(long, default_value = "~/.clawnet")]
    data_dir: PathBuf,

    /// P2P listen multiaddress (repeatable).
    #[arg(long)]
    listen: Vec<String>,

    /// Bootstrap peer multiaddress (repeatable).
    #[arg(long)]
    bootstrap: Vec<String>,

    /// Periodic range-sync interval in milliseconds.
    #[arg(long, default_value_t = clawnet_core::constants::DEFAULT_RANGE_INTERVAL_MS)]
    range_interval_ms: u64,

    /// Periodic snapshot-sync interval in milliseconds.
    #[arg(long, default_value_t = clawnet_core::constants::DEFAULT_SNAPSHOT_INTERVAL_MS)]
    snapshot_interval_ms: u64,

    /// Skip the range sync normally issued right after startup.
    #[arg(long)]
    no_range_on_start: bool,

    /// Skip the snapshot sync normally issued right after startup.
    #[arg(long)]
    no_snapshot_on_start: bool,

    /// Sybil policy for sync requests.
    #[arg(long, value_parser = ["none", "allowlist", "pow", "stake"])]
    sybil_policy: Option<String>,

    /// Peer ids allowed under the allowlist policy (comma-separated).
    #[arg(long, value_delimiter = ',')]
    allowlist: Vec<String>,

    /// PoW ticket time-to-live in milliseconds.
    #[arg(long)]
    pow_ttl_ms: Option<u64>,

    /// Stake proof time-to-live in milliseconds.
    #[arg(long)]
    stake_ttl_ms: Option<u64>,

    /// Minimum accepted PoW ticket difficulty (leading zero bits).
    #[arg(long)]
    min_pow_difficulty: Option<u8>,

    /// Distinct signatures required before adopting a foreign snapshot.
    #[arg(long)]
    min_snapshot_signatures: Option<usize>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match cli.command {
        Command::Daemon(args) => {
            if let Err(e) = run_daemon(args).await {
                let code = e
                    .downcast_ref::<ClawError>()
                    .map(ClawError::code)
                    .unwrap_or("Startup");
                eprintln!("[clawtoken] {code}: {e:#}");
                std::process::exit(1);
            }
        }
    }
}

async fn run_daemon(args: DaemonArgs) -> anyhow::Result<()> {
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(data_dir.join("logs"))?;
    let _log_guard = init_logging(&data_dir);

    // config.yaml supplies defaults; flags win.
    let file = FileConfig::load(&data_dir)?;

    let policy_name = args
        .sybil_policy
        .or(file.sybil_policy)
        .unwrap_or_else(|| "none".into());
    let allowlist = if args.allowlist.is_empty() { file.allowlist } else { args.allowlist };
    let sybil = parse_sybil_policy(
        &policy_name,
        allowlist,
        args.min_pow_difficulty.or(file.min_pow_difficulty),
        args.pow_ttl_ms.or(file.pow_ttl_ms),
        args.stake_ttl_ms.or(file.stake_ttl_ms),
    )?;

    let mut config = NodeConfig::new(&data_dir);
    if !args.listen.is_empty() {
        config.listen_addrs = args.listen;
    } else if !file.listen.is_empty() {
        config.listen_addrs = file.listen;
    }
    config.bootstrap_peers =
        if args.bootstrap.is_empty() { file.bootstrap } else { args.bootstrap };
    config.sybil = sybil;
    config.range_interval_ms = args.range_interval_ms;
    config.snapshot_interval_ms = args.snapshot_interval_ms;
    config.range_on_start = !args.no_range_on_start;
    config.snapshot_on_start = !args.no_snapshot_on_start;
    if let Some(min) = args.min_snapshot_signatures.or(file.min_snapshot_signatures) {
        config.min_snapshot_signatures = min;
    }
    config.key_passphrase = std::env::var("CLAWNET_KEY_PASSPHRASE").unwrap_or_default();

    let node = Node::start(config).await?;
    info!(addr = %node.listen_addr(), did = %node.did(), "daemon running");

    tokio::signal::ctrl_c().await?;
    node.stop().await?;
    Ok(())
}

/// stdout + `<dataDir>/logs/node.log`, both behind `RUST_LOG`.
fn init_logging(data_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    let file = tracing_appender::rolling::never(data_dir.join("logs"), "node.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,clawnet=debug".parse().expect("static filter parses"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();
    guard
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
