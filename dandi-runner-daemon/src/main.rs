//! DANDI script job runner daemon.
//!
//! Connects the webhook bus connector, subscribes the dispatcher to the
//! job channel, and runs until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dandi_runner::bus::{BusConnector, WebhookBusConfig, WebhookBusConnector};
use dandi_runner::dandi::DandiInterface;
use dandi_runner::{
    JobDispatcher, ResponsePublisher, RetryPolicy, RunnerConfig, SandboxExecutor,
};

#[derive(Parser, Debug)]
#[command(name = "dandi-runnerd")]
#[command(about = "DANDI script job runner")]
struct Args {
    /// Path to runner configuration file (TOML format)
    #[arg(long, env = "DANDI_RUNNER_CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// Bind address for the inbound webhook listener
    #[arg(long, env = "DANDI_RUNNER_BIND_ADDR")]
    bind_addr: Option<String>,

    /// Bus relay endpoint for outbound publishes
    #[arg(long, env = "DANDI_RUNNER_RELAY_URL")]
    relay_url: Option<String>,

    /// Shared secret for the inbound webhook
    #[arg(long, env = "DANDI_RUNNER_BUS_SECRET")]
    shared_secret: Option<String>,

    #[arg(long, env = "DANDI_RUNNER_JOB_CHANNEL")]
    job_channel: Option<String>,

    #[arg(long, env = "DANDI_RUNNER_RESPONSE_CHANNEL")]
    response_channel: Option<String>,

    /// Root of the local dataset snapshot tree
    #[arg(long, env = "DANDI_RUNNER_SNAPSHOT_DIR")]
    snapshot_dir: Option<PathBuf>,

    #[arg(long, env = "DANDI_RUNNER_CACHE_DIR")]
    cache_dir: Option<PathBuf>,
}

fn load_config(args: &Args) -> anyhow::Result<RunnerConfig> {
    let mut config = match &args.config_path {
        Some(path) => RunnerConfig::from_file(path)?,
        None => RunnerConfig::default(),
    };
    if let Some(bind_addr) = &args.bind_addr {
        config.bus.bind_addr = bind_addr.clone();
    }
    if let Some(relay_url) = &args.relay_url {
        config.bus.relay_url = Some(relay_url.clone());
    }
    if let Some(secret) = &args.shared_secret {
        config.bus.shared_secret = secret.clone();
    }
    if let Some(job_channel) = &args.job_channel {
        config.bus.job_channel = job_channel.clone();
    }
    if let Some(response_channel) = &args.response_channel {
        config.bus.response_channel = response_channel.clone();
    }
    if let Some(snapshot_dir) = &args.snapshot_dir {
        config.data.snapshot_dir = snapshot_dir.clone();
    }
    if let Some(cache_dir) = &args.cache_dir {
        config.data.cache_dir = cache_dir.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    info!("Initializing job runner...");
    let connector: Arc<dyn BusConnector> = Arc::new(WebhookBusConnector::new(WebhookBusConfig {
        bind_addr: config.bus.bind_addr.clone(),
        shared_secret: config.bus.shared_secret.clone(),
        relay_url: config.bus.relay_url.clone(),
    }));
    let handle = connector.connect().await?;

    let publisher = Arc::new(ResponsePublisher::new(
        connector.clone(),
        handle.clone(),
        config.bus.response_channel.clone(),
        RetryPolicy::from(&config.retry),
    ));
    let interface = Arc::new(DandiInterface::from_config(&config));
    let executor = Arc::new(SandboxExecutor::new(interface));
    let dispatcher = JobDispatcher::new(executor, publisher, &config.limits);
    dispatcher
        .start(&connector, &handle, &config.bus.job_channel)
        .await?;

    info!(
        "Job runner started. Listening on channel: {}",
        config.bus.job_channel
    );

    shutdown_signal().await?;
    info!("Shutting down...");
    connector.disconnect(&handle).await?;
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
