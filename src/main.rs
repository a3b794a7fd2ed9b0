//! bgproxy - a blue/green failover reverse proxy
//!
//! Usage:
//!     bgproxy --config <path>
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use bgproxy::alert;
use bgproxy::backend::FailoverRouter;
use bgproxy::config::{load_config, Config};
use bgproxy::frontend::FrontendListener;
use bgproxy::metrics::{MetricsCollector, MetricsServer};
use bgproxy::util::{init_logging, ShutdownSignal};

/// Blue/green reverse proxy with automatic failover.
#[derive(Parser, Debug)]
#[command(name = "bgproxy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| {
        format!(
            "failed to load configuration from '{}'",
            cli.config.display()
        )
    })?;

    // CLI overrides config
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);

    init_logging(log_level, config.global.log_format).context("failed to initialize logging")?;

    if cli.validate {
        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!("  Listen: {}", config.proxy.listen);
        println!("  Pool: {}", config.pool.len());
        for backend in &config.pool {
            println!("    - {} ({}) -> {}", backend.name, backend.role, backend.address);
        }
        return Ok(());
    }

    info!(
        config_path = %cli.config.display(),
        listen = %config.proxy.listen,
        backends = config.pool.len(),
        failure_threshold = config.failover.failure_threshold,
        cooldown_ms = config.failover.cooldown.as_millis() as u64,
        "bgproxy starting"
    );

    for backend in &config.pool {
        info!(
            name = %backend.name,
            address = %backend.address,
            role = %backend.role,
            "configured backend"
        );
    }

    run(config)
}

/// Run the proxy with the given configuration.
fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(run_async(config))
}

async fn run_async(config: Config) -> Result<()> {
    let shutdown = ShutdownSignal::new();
    let metrics = MetricsCollector::new();
    let router = Arc::new(FailoverRouter::from_config(&config, metrics.clone()));

    let mut handles = Vec::new();

    if config.global.metrics.enabled {
        let metrics_config = &config.global.metrics;
        let server = MetricsServer::bind(
            metrics_config.address,
            metrics_config.path.clone(),
            metrics.clone(),
        )
        .await
        .with_context(|| format!("failed to bind metrics server on {}", metrics_config.address))?
        .with_hook(router.clone());

        handles.push(tokio::spawn(server.run(shutdown.subscribe())));
    }

    let default_pool = router.pool().primary().map(|b| b.name()).unwrap_or_default();
    let alerts = match alert::spawn_from_config(&config.alerts, default_pool, shutdown.subscribe())
        .context("failed to start alert watcher")?
    {
        Some((handle, task)) => {
            handles.push(task);
            Some(handle)
        }
        None => None,
    };

    let listener = FrontendListener::bind(config.proxy.clone(), Arc::clone(&router), metrics, alerts)
        .await
        .with_context(|| format!("failed to bind proxy listener on {}", config.proxy.listen))?;
    handles.push(tokio::spawn(listener.run(shutdown.subscribe())));

    info!("bgproxy is running");
    info!("press Ctrl+C to stop");

    shutdown.shutdown_on_ctrl_c().await;

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!(error = %e, "task failed during shutdown");
        }
    }

    info!("bgproxy shut down complete");
    Ok(())
}
