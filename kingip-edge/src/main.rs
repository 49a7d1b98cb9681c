mod config;
mod handler;
mod pool;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kingip_core::quic;

use crate::config::EdgeConfig;
use crate::handler::EdgeDialHandler;
use crate::pool::ConnPool;

#[derive(Parser, Debug)]
#[command(name = "kingip-edge")]
struct Cli {
    #[arg(long, default_value = "edge.yaml")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = EdgeConfig::from_yaml_file(&cli.config)?;
    kingip_core::logging::init(&config.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("kingip-edge")
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: EdgeConfig) -> anyhow::Result<()> {
    let pool = ConnPool::new(config.max_per_host, Duration::from_secs(config.idle_timeout_secs));
    let eviction_pool = pool.clone();
    let eviction_task = tokio::spawn(async move { eviction_pool.run_idle_eviction().await });

    let handler = Arc::new(EdgeDialHandler { pool });

    let mut dial_tasks: Vec<tokio::task::JoinHandle<anyhow::Result<()>>> = Vec::new();
    for relay_addr in &config.relays {
        let endpoint = quic::client_endpoint()?;
        let dialer =
            quic::Dialer::new(endpoint, *relay_addr, "localhost", config.regions.clone(), handler.clone());
        dial_tasks.push(tokio::spawn(async move { dialer.dial().await.map_err(anyhow::Error::from) }));
    }

    // Any relay dial's reverse-substream accept loop returning is fatal
    // (§6 exit codes).
    let result = if dial_tasks.is_empty() {
        wait_for_shutdown().await;
        Ok(())
    } else {
        let abort_handles: Vec<_> = dial_tasks.iter().map(|task| task.abort_handle()).collect();
        let result = tokio::select! {
            (outcome, _idx, _rest) = futures::future::select_all(dial_tasks) => {
                match outcome {
                    Ok(Ok(())) => Err(anyhow::anyhow!("a relay dial loop exited unexpectedly")),
                    Ok(Err(err)) => Err(anyhow::anyhow!("a relay dial loop failed: {err}")),
                    Err(join_err) => Err(anyhow::anyhow!("a relay dial loop task panicked: {join_err}")),
                }
            }
            _ = wait_for_shutdown() => Ok(()),
        };
        for handle in abort_handles {
            handle.abort();
        }
        result
    };

    eviction_task.abort();
    result
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
            _ = sigquit.recv() => tracing::info!("received SIGQUIT, shutting down fast"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
