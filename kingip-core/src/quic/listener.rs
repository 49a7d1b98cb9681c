//! Upstream accept side (§4.D): for every accepted connection, register it,
//! open a ping stream, accept the hello stream, then run the liveness loop
//! until the peer disconnects or stops answering.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CoreError, CoreResult};
use crate::proto::{new_msg_ping, new_msg_relay_config, MessageType};
use crate::transport::Transport;
use crate::upstream::UpstreamConn;

const PING_INTERVAL: Duration = Duration::from_secs(1);
const PING_DEADLINE: Duration = Duration::from_secs(5);

#[async_trait]
pub trait ListenerHandler: Send + Sync + 'static {
    /// Mint an id for the freshly accepted connection and register it in
    /// the node's upstream table.
    async fn register(&self, conn: quinn::Connection) -> CoreResult<Arc<UpstreamConn>>;

    /// Apply the decoded `RELAY_HELLO` region map for `id` (e.g. insert it
    /// into the region registry under each advertised region).
    async fn regions(&self, id: u64, regions: HashMap<String, String>) -> CoreResult<()>;

    /// Called exactly once when the connection is torn down, so the caller
    /// can purge `id` from every region it was registered under.
    async fn closed(&self, id: u64);
}

pub struct Listener<H: ListenerHandler> {
    endpoint: quinn::Endpoint,
    handler: Arc<H>,
}

impl<H: ListenerHandler> Listener<H> {
    pub fn new(endpoint: quinn::Endpoint, handler: Arc<H>) -> Self {
        Listener { endpoint, handler }
    }

    /// Runs the accept loop forever. Returns only if the endpoint itself is
    /// closed (graceful shutdown) or fails to accept.
    pub async fn run(&self) -> CoreResult<()> {
        while let Some(incoming) = self.endpoint.accept().await {
            let handler = self.handler.clone();
            tokio::spawn(async move {
                let conn = match incoming.await {
                    Ok(conn) => conn,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to establish incoming connection");
                        return;
                    }
                };
                if let Err(err) = handle_connection(conn, handler).await {
                    tracing::warn!(error = %err, "listener connection ended with an error");
                }
            });
        }
        Ok(())
    }
}

async fn handle_connection<H: ListenerHandler>(conn: quinn::Connection, handler: Arc<H>) -> CoreResult<()> {
    let upstream = handler.register(conn.clone()).await?;
    let id = upstream.id;
    tracing::info!(conn_id = id, "accepted upstream connection");

    let result = run_hello_and_liveness(&conn, &upstream, handler.as_ref()).await;
    handler.closed(id).await;
    tracing::info!(conn_id = id, "upstream connection closed");
    result
}

async fn run_hello_and_liveness<H: ListenerHandler>(
    conn: &quinn::Connection,
    upstream: &UpstreamConn,
    handler: &H,
) -> CoreResult<()> {
    // The listener opens the ping stream; the dialer must accept it.
    let (ping_send, ping_recv) = conn.open_bi().await?;
    let ping_transport = Transport::new(ping_send, ping_recv);

    // Accept the dialer-initiated hello stream.
    let (hello_send, hello_recv) = conn.accept_bi().await?;
    let hello_transport = Transport::new(hello_send, hello_recv);

    let hello_msg = hello_transport.sync().await?;
    if hello_msg.mtype != MessageType::RelayHello {
        return Err(CoreError::ProtocolMalformed);
    }
    let regions = hello_msg.unmarshal_map()?;
    handler.regions(upstream.id, regions.clone()).await?;
    *upstream.regions.lock() = regions.keys().cloned().collect();

    hello_transport.write(&new_msg_relay_config(upstream.id.to_string())).await?;
    hello_transport.close().await?;

    liveness_loop(&ping_transport, upstream.id).await
}

async fn liveness_loop(transport: &Transport, id: u64) -> CoreResult<()> {
    loop {
        transport.write(&new_msg_ping(id.to_string())).await?;
        let reply = tokio::time::timeout(PING_DEADLINE, transport.sync())
            .await
            .map_err(|_| CoreError::LivenessTimeout)??;
        if reply.mtype != MessageType::Ping {
            return Err(CoreError::ProtocolMalformed);
        }
        tokio::time::sleep(PING_INTERVAL).await;
    }
}
