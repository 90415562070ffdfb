//! `memex` binary entrypoint.
//!
//! Loads configuration, resolves the project scope from the working
//! directory, opens the store and serves the proxy until Ctrl-C or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use memex_config::load_config;
use memex_core::resolve_scope;
use memex_proxy::ProxyServer;
use memex_store::Store;
use memex_telemetry::init_subscriber;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "memex", version, about = "Scope-isolated caching proxy for AI provider APIs")]
struct Cli {
    /// Config file (default: first memex.{yml,yaml,toml} found in the working directory)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Store directory, overrides `store.path`
    #[arg(long, value_name = "DIR", conflicts_with = "no_store")]
    store: Option<PathBuf>,

    /// Run as a plain forwarding proxy without a store
    #[arg(long)]
    no_store: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to read working directory")?;

    let mut config = load_config(&cwd, cli.config.as_deref(), |key| std::env::var(key).ok())?;
    if let Some(path) = cli.store {
        config.store.path = path;
    }

    init_subscriber(&config.proxy.log, config.proxy.debug)?;

    let scope = match resolve_scope(&cwd) {
        Ok(scope) => {
            info!(scope = %scope, "scope resolved");
            Some(scope)
        }
        Err(e) => {
            warn!(error = %e, "failed to resolve scope, running without one");
            None
        }
    };

    let store = if cli.no_store {
        None
    } else {
        let store = Store::open(&config.store.path)
            .with_context(|| format!("failed to open store at {}", config.store.path.display()))?;
        Some(Arc::new(store))
    };

    let mut server = ProxyServer::new(&config.proxy, scope)?;
    if let Some(store) = &store {
        server = server.with_store(store.clone(), config.store.audit);
    }

    let addr = config.proxy.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, audit = store.is_some() && config.store.audit, "memex proxy listening");

    let grace = config.proxy.shutdown_grace;
    server
        .serve(listener, shutdown_signal(), grace)
        .await
        .context("proxy server failed")?;

    if let Some(store) = store {
        close_store(store, grace).await?;
    }
    info!("memex stopped");
    Ok(())
}

/// Wait for in-flight audit writes to release the store, then close it.
async fn close_store(mut store: Arc<Store>, wait: Duration) -> Result<()> {
    let deadline = Instant::now() + wait;
    loop {
        match Arc::try_unwrap(store) {
            Ok(store) => return store.close().context("failed to close store"),
            Err(shared) if Instant::now() < deadline => {
                store = shared;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(_) => {
                warn!("store still in use after grace period, skipping close");
                return Ok(());
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
