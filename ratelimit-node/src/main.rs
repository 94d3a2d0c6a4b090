//! Standalone rate-limiter node: CLI, config loading, transport bootstrap,
//! and the global update loop, wired together as a long-running process.

mod bootstrap;

use anyhow::{Context, Result};
use bootstrap::{BootstrapConfig, Bootstrapper, SeedAddr};
use clap::Parser;
use ratelimit_core::dht::LocalDht;
use ratelimit_core::options::{ListenOptions, RateLimiterOptions, SeedOptions};
use ratelimit_core::RateLimiter;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "ratelimit-node",
    author,
    version,
    about = "Standalone distributed rate-limiter node",
    long_about = None
)]
struct Args {
    /// Configuration file path; created with defaults if missing.
    #[arg(short, long, default_value = "ratelimit-node.toml")]
    config: PathBuf,

    /// Override the listen port from the config file.
    #[arg(short, long)]
    listen_port: Option<u16>,

    /// Enable the operator health/stats HTTP endpoint.
    #[arg(long)]
    metrics: bool,

    /// Address for the operator health/stats endpoint.
    #[arg(long, default_value = "127.0.0.1:9600")]
    metrics_addr: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct Config {
    listen_address: String,
    listen_port: u16,
    seeds: Vec<ConfigSeed>,
    interval_ms: u64,
    min_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigSeed {
    address: String,
    port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: "localhost".to_string(),
            listen_port: 3050,
            seeds: Vec::new(),
            interval_ms: 10_000,
            min_value: 0.1,
        }
    }
}

async fn load_or_create_config(path: &PathBuf) -> Result<Config> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .context("failed to read config file")?;
        toml::from_str(&content).context("failed to parse config")
    } else {
        let config = Config::default();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context("failed to create config directory")?;
        }
        let content = toml::to_string_pretty(&config).context("failed to serialize config")?;
        tokio::fs::write(path, content)
            .await
            .context("failed to write default config")?;
        Ok(config)
    }
}

async fn start_metrics_endpoint(addr: SocketAddr, stats: Arc<ratelimit_core::controller::Stats>) {
    use warp::Filter;

    let health = warp::path("health").and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({
            "status": "healthy",
            "service": "ratelimit-node",
        }))
    });

    let status = warp::path("stats")
        .and(warp::get())
        .and(warp::any().map(move || stats.clone()))
        .map(|stats: Arc<ratelimit_core::controller::Stats>| {
            warp::reply::json(&serde_json::json!({
                "ticks": stats.ticks.load(std::sync::atomic::Ordering::Relaxed),
                "err_count": stats.err_count.load(std::sync::atomic::Ordering::Relaxed),
            }))
        });

    info!(%addr, "starting operator metrics endpoint");
    warp::serve(health.or(status)).run(addr).await;
}

async fn run_node(args: Args) -> Result<()> {
    let mut config = load_or_create_config(&args.config).await?;
    if let Some(port) = args.listen_port {
        config.listen_port = port;
    }

    let bootstrap_config = BootstrapConfig {
        listen_address: config.listen_address.clone(),
        listen_port: config.listen_port,
        seeds: config
            .seeds
            .iter()
            .map(|s| SeedAddr {
                address: s.address.clone(),
                port: s.port,
            })
            .collect(),
        interval_ms: config.interval_ms,
    };
    let transport = Bootstrapper::start(bootstrap_config).await?;
    let stats = transport.stats().await;
    info!(?stats, "transport bootstrap complete");

    // The concrete Kademlia wire protocol is out of scope for this
    // implementation (see the DHT capability trait); this node runs against
    // the in-process storage-only DHT, same as the library's own tests.
    // A production deployment plugs a real `Dht` implementation in here.
    let options = RateLimiterOptions {
        listen: ListenOptions {
            address: config.listen_address.clone(),
            port: config.listen_port,
        },
        seeds: config
            .seeds
            .iter()
            .map(|s| SeedOptions {
                address: s.address.clone(),
                port: s.port,
            })
            .collect(),
        interval_ms: config.interval_ms,
        min_value: config.min_value,
    };
    let dht = Arc::new(LocalDht::new(
        config.interval_ms,
        config.min_value,
        Arc::new(ratelimit_core::clock::SystemClock),
    ));
    let limiter = RateLimiter::new(options, dht)?;
    let limiter = limiter.setup().await;
    let limiter_stats = limiter.stats();

    let metrics_task = if args.metrics {
        Some(tokio::spawn(start_metrics_endpoint(
            args.metrics_addr,
            limiter_stats,
        )))
    } else {
        None
    };

    info!("node running; press ctrl-c to stop");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        _ = async {
            if let Some(task) = metrics_task {
                let _ = task.await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {}
    }

    drop(limiter);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if let Err(e) = run_node(args).await {
        error!("node failed: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
