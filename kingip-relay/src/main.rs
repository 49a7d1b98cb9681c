mod config;
mod forward;
mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kingip_core::quic;
use kingip_core::registry::RegionRegistry;
use kingip_core::upstream::UpstreamTable;

use crate::config::RelayConfig;
use crate::forward::RelayForwarder;
use crate::handlers::EdgeRegistrar;

#[derive(Parser, Debug)]
#[command(name = "kingip-relay")]
struct Cli {
    #[arg(long, default_value = "relay.yaml")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = RelayConfig::from_yaml_file(&cli.config)?;
    kingip_core::logging::init(&config.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("kingip-relay")
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let edge_table = Arc::new(UpstreamTable::new());
    let edge_region_registry = Arc::new(RegionRegistry::new());

    let registrar = Arc::new(EdgeRegistrar {
        edge_table: edge_table.clone(),
        region_registry: edge_region_registry.clone(),
    });
    let edge_endpoint = quic::server_endpoint(config.listen_addr)?;
    let listener = quic::Listener::new(edge_endpoint, registrar);
    let listener_task: tokio::task::JoinHandle<anyhow::Result<()>> =
        tokio::spawn(async move { listener.run().await.map_err(anyhow::Error::from) });

    let forwarder = Arc::new(RelayForwarder { edge_table, edge_region_registry });
    let regions = config.region_map();

    let mut accept_loops = vec![listener_task];
    for gateway_addr in &config.gateways {
        let endpoint = quic::client_endpoint()?;
        let dialer = quic::Dialer::new(endpoint, *gateway_addr, "localhost", regions.clone(), forwarder.clone());
        accept_loops.push(tokio::spawn(async move { dialer.dial().await.map_err(anyhow::Error::from) }));
    }

    // Any accept loop (the edge listener, or a gateway dial's own reverse
    // substream accept loop) returning is fatal (§6 exit codes).
    let abort_handles: Vec<_> = accept_loops.iter().map(|task| task.abort_handle()).collect();
    let result = tokio::select! {
        (outcome, _idx, _rest) = futures::future::select_all(accept_loops) => {
            match outcome {
                Ok(Ok(())) => Err(anyhow::anyhow!("an accept loop exited unexpectedly")),
                Ok(Err(err)) => Err(anyhow::anyhow!("an accept loop failed: {err}")),
                Err(join_err) => Err(anyhow::anyhow!("an accept loop task panicked: {join_err}")),
            }
        }
        _ = wait_for_shutdown() => Ok(()),
    };

    for handle in abort_handles {
        handle.abort();
    }
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
