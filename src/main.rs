//! WolfKV - Replicated Key-Value Node Core
//!
//! Command-line tool for inspecting and driving a single WolfKV node.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfkv::cluster::{HashRing, NodeSelector, StaticHealth};
use wolfkv::config::WolfKvConfig;
use wolfkv::kv::{Engine, MemStore};
use wolfkv::wal::FileWal;

/// WolfKV - Replicated Key-Value Node Core
#[derive(Parser)]
#[command(name = "wolfkv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfkv.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to `[logging]`
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log format (pretty, json); defaults to `[logging]`
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfkv.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "node-1")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,

    /// Show where a key lives on the ring
    Route {
        key: String,
    },

    /// Replay the WAL and report the recovered state
    Replay,

    /// Write a value
    Put {
        key: String,
        value: String,
    },

    /// Read a value
    Get {
        key: String,
    },

    /// Delete a key
    Delete {
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // the config may not exist yet (`init`), so fall back to defaults
    let logging = WolfKvConfig::from_file(&cli.config)
        .map(|config| config.logging)
        .unwrap_or_default();
    init_logging(
        cli.log_level.as_deref().unwrap_or(&logging.level),
        cli.log_format.as_deref().unwrap_or(&logging.format),
    );

    match cli.command {
        Commands::Init { output, node_id } => run_init(&output, &node_id),
        Commands::Validate => run_validate(&cli.config),
        Commands::Info => run_info(&cli.config),
        Commands::Route { key } => run_route(&cli.config, &key),
        Commands::Replay => run_replay(&cli.config).await,
        Commands::Put { key, value } => run_put(&cli.config, &key, value).await,
        Commands::Get { key } => run_get(&cli.config, &key).await,
        Commands::Delete { key } => run_delete(&cli.config, &key).await,
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<WolfKvConfig> {
    WolfKvConfig::from_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Open the node's WAL-backed engine. Replication is not wired here; the
/// CLI only ever acts on the local node.
async fn open_engine(config: &WolfKvConfig) -> anyhow::Result<Engine> {
    let wal_dir = config.wal_dir();
    let wal = FileWal::open(wal_dir.clone(), &config.wal)
        .with_context(|| format!("failed to open WAL at {}", wal_dir.display()))?;

    let engine = Engine::open(
        config.engine_config(),
        Arc::new(MemStore::new()),
        Arc::new(wal),
        None,
    )
    .await
    .context("failed to recover engine from WAL")?;
    Ok(engine)
}

/// Initialize a new configuration file
fn run_init(output: &Path, node_id: &str) -> anyhow::Result<()> {
    let config_content = format!(
        r#"# WolfKV Configuration
# Generated configuration file

[node]
id = "{node_id}"
data_dir = "/var/lib/wolfkv/{node_id}"

[wal]
compression = true
segment_size_mb = 64

[engine]
sync_writes = true
enable_replication = true

[cluster]
replication_factor = 3
read_consistency = "primary"
write_consistency = "replicate"
heartbeat_timeout_ms = 1500

[[cluster.members]]
id = "{node_id}"
weight = 64

# [[cluster.members]]
# id = "node-2"
# weight = 64

[replication]
queue_capacity = 10000
max_attempts = 3
retry_backoff_ms = 100

[logging]
level = "info"
format = "pretty"
"#
    );

    std::fs::write(output, config_content)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Configuration written to {}", output.display());
    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: &Path) -> anyhow::Result<()> {
    match WolfKvConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Members: {}", config.ring_members().len());
            println!("  Replication Factor: {}", config.cluster.replication_factor);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e.into())
        }
    }
}

/// Show node information
fn run_info(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    println!("WolfKV Node Information");
    println!("=======================");
    println!();
    println!("Node ID:          {}", config.node.id);
    println!("Data Directory:   {}", config.node.data_dir.display());
    println!("WAL Directory:    {}", config.wal_dir().display());
    println!();
    println!("WAL Configuration:");
    println!("  Compression:    {}", config.wal.compression);
    println!("  Segment Size:   {} MB", config.wal.segment_size_mb);
    println!("  Sync Writes:    {}", config.engine.sync_writes);
    println!();
    println!("Cluster Configuration:");
    println!("  Replication:    {}", config.cluster.replication_factor);
    println!("  Reads:          {:?}", config.cluster.read_consistency);
    println!("  Writes:         {:?}", config.cluster.write_consistency);
    println!("  Heartbeat:      {} ms", config.cluster.heartbeat_timeout_ms);
    println!("  Members:");
    for member in config.ring_members() {
        println!("    {:<16} weight {}", member.id, member.weight);
    }

    Ok(())
}

/// Print the routing decision for a key, every member assumed healthy
fn run_route(config_path: &Path, key: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let ring = HashRing::with_nodes(
        config
            .ring_members()
            .into_iter()
            .map(|member| (member.id, member.weight)),
    );
    let selector = NodeSelector::new(
        Arc::new(ring),
        config.node_id(),
        Arc::new(StaticHealth::all_healthy()),
        config.selector_config(),
    );

    let route = selector.route(key);
    println!("{}", serde_json::to_string_pretty(&route)?);
    Ok(())
}

/// Replay the WAL and report what it rebuilt
async fn run_replay(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let engine = open_engine(&config).await?;

    println!("Node:             {}", engine.node_id());
    println!("Live Keys:        {}", engine.len().await);
    println!("Sequence:         {}", engine.current_seq());

    engine.close().await?;
    Ok(())
}

async fn run_put(config_path: &Path, key: &str, value: String) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let engine = open_engine(&config).await?;

    let version = engine.put(key, value).await?;
    println!("OK {}", version);

    engine.close().await?;
    Ok(())
}

async fn run_get(config_path: &Path, key: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let engine = open_engine(&config).await?;

    let value = engine.fetch(key).await?;
    println!("{}", String::from_utf8_lossy(&value));

    engine.close().await?;
    Ok(())
}

async fn run_delete(config_path: &Path, key: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let engine = open_engine(&config).await?;

    let version = engine.delete(key).await?;
    println!("OK {}", version);

    engine.close().await?;
    Ok(())
}
