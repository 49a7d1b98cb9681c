use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kingip_core::quic;
use kingip_core::registry::RegionRegistry;
use kingip_core::upstream::UpstreamTable;

use kingip_gateway::config::{self, GatewayConfig};
use kingip_gateway::handlers::RelayRegistrar;
use kingip_gateway::proxy::ProxyFrontend;
use kingip_gateway::session::GatewaySessionCore;

#[derive(Parser, Debug)]
#[command(name = "kingip-gateway")]
struct Cli {
    #[arg(long, default_value = "gateway.yaml")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = GatewayConfig::from_yaml_file(&cli.config)?;
    kingip_core::logging::init(&config.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("kingip-gateway")
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let relay_table = Arc::new(UpstreamTable::new());
    let region_registry = Arc::new(RegionRegistry::new());
    let user_store: Arc<dyn kingip_core::store::UserStore> = Arc::new(config.build_user_store());
    let session_store: Arc<dyn kingip_core::store::SessionStore> = Arc::new(config::build_session_store());
    let bandwidth_store: Arc<dyn kingip_core::store::BandwidthStore> =
        Arc::new(config::build_bandwidth_store());

    let session_core = Arc::new(GatewaySessionCore {
        relay_table: relay_table.clone(),
        region_registry: region_registry.clone(),
        session_store,
        bandwidth_store,
    });

    let registrar = Arc::new(RelayRegistrar { relay_table: relay_table.clone(), region_registry });
    let relay_endpoint = quic::server_endpoint(config.relay_listen_addr)?;
    let listener = quic::Listener::new(relay_endpoint, registrar);

    let listener_task: tokio::task::JoinHandle<anyhow::Result<()>> =
        tokio::spawn(async move { listener.run().await.map_err(anyhow::Error::from) });

    let mut accept_loops = vec![listener_task];
    for proxy_config in &config.proxies {
        let frontend = Arc::new(ProxyFrontend {
            region: proxy_config.region.clone(),
            user_store: user_store.clone(),
            session_core: session_core.clone(),
        });
        let listen_addr = proxy_config.listen_addr;
        accept_loops.push(tokio::spawn(async move { frontend.run(listen_addr).await }));
    }

    // Any accept loop (relay listener or proxy frontend) returning is fatal
    // (§6 exit codes): the process exits non-zero rather than idling with a
    // dead listener.
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
