//! TCP server binary for the algo manager.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use algo_core::{Adapters, AlgoManager};
use algo_server::algos::builtin_registry;
use algo_server::config::ServerConfig;
use algo_server::server;
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "algo-server", about = "Host trading algos behind a line protocol")]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    bind: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    max_clients: Option<usize>,

    /// Worker lanes.
    #[arg(short, long)]
    threads: Option<usize>,

    /// Event log file (JSON lines).
    #[arg(long)]
    store: Option<PathBuf>,

    /// Debug logging unless RUST_LOG says otherwise.
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(bind) = &self.bind {
            config.bind_addr = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max_clients) = self.max_clients {
            config.max_clients = max_clients;
        }
        if let Some(threads) = self.threads {
            config.manager.threads = threads;
        }
        if let Some(store) = &self.store {
            config.manager.store_path = Some(store.clone());
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = ServerConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    info!(
        addr = %config.socket_addr_string(),
        max_clients = config.max_clients,
        threads = config.manager.threads,
        store = ?config.manager.store_path,
        "starting algo-server"
    );

    let log = config.manager.open_log().context("opening event log")?;
    let manager = AlgoManager::start(
        config.manager.clone(),
        builtin_registry(),
        log,
        Adapters::default(),
    )?;
    let restored = manager.load_store(0, None).context("restoring from event log")?;
    info!(records = restored, algos = manager.algo_count(), "event log replayed");
    let manager = Arc::new(manager);

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async {
        tokio::select! {
            res = server::run(&config, Arc::clone(&manager)) => res,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                Ok(())
            }
        }
    });
    runtime.shutdown_timeout(Duration::from_secs(5));

    manager.shutdown();
    if let Err(e) = &result {
        error!(error = %e, "server stopped");
    }
    result
}
