//! simplelb - A minimal round-robin Layer 7 load balancer
//!
//! Usage:
//!     simplelb --backends http://localhost:3031,http://localhost:3032 --port 3030
//!     simplelb --config <path>
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use simplelb::config::{load_config, Config, DEFAULT_PORT};
use simplelb::dispatch::{DispatchPolicy, Dispatcher};
use simplelb::frontend::FrontendListener;
use simplelb::health::HealthChecker;
use simplelb::util::{init_logging, ShutdownSignal};
use simplelb::ServerPool;

/// A minimal round-robin Layer 7 load balancer.
#[derive(Parser, Debug)]
#[command(name = "simplelb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, value_name = "FILE", required_unless_present = "backends")]
    config: Option<PathBuf>,

    /// Load balanced backends, use commas to separate
    #[arg(short, long, value_name = "URLS", conflicts_with = "config")]
    backends: Option<String>,

    /// Port to serve on (with --backends)
    #[arg(short, long, default_value_t = DEFAULT_PORT, conflicts_with = "config")]
    port: u16,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match (&cli.config, &cli.backends) {
        (Some(path), _) => load_config(path).with_context(|| {
            format!("failed to load configuration from '{}'", path.display())
        })?,
        (None, Some(list)) => Config::from_backend_list(list, cli.port)
            .context("invalid --backends list")?,
        (None, None) => anyhow::bail!("please provide one or more backends to load balance"),
    };

    // CLI overrides config
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);

    init_logging(log_level, &config.global.log_format).context("failed to initialize logging")?;

    if cli.validate {
        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!("  Listen: {}", config.listen);
        println!("  Backends: {}", config.backends.len());
        for backend in &config.backends {
            println!("    - {}", backend.url);
        }
        return Ok(());
    }

    info!(
        listen = %config.listen,
        backends = config.backends.len(),
        health_check = ?config.health_check.check_type,
        "simplelb starting"
    );

    for backend in &config.backends {
        info!(url = %backend.url, "configured backend");
    }

    run(config)
}

/// Run the load balancer with the given configuration.
fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(run_async(config))
}

/// Async entry point for the load balancer.
async fn run_async(config: Config) -> Result<()> {
    let shutdown = ShutdownSignal::new();

    let pool = Arc::new(
        ServerPool::from_config(&config.backends, config.dispatch.connect_timeout)
            .context("failed to build server pool")?,
    );
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&pool),
        DispatchPolicy::from(&config.dispatch),
    ));

    let listener = FrontendListener::bind(config.listen, dispatcher)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;

    let checker = HealthChecker::new(Arc::clone(&pool), config.health_check.clone());

    let handles = vec![
        tokio::spawn(listener.run(shutdown.subscribe())),
        tokio::spawn(checker.run(shutdown.subscribe())),
    ];

    info!("simplelb is running");
    info!("press Ctrl+C to stop");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }

    shutdown.shutdown();

    for handle in handles {
        let _ = handle.await;
    }

    info!("simplelb shut down complete");
    Ok(())
}
