//! Downstream connect side (§4.E): dial the upstream, exchange hello, answer
//! liveness pings, and dispatch reverse substreams opened by the upstream.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CoreError, CoreResult};
use crate::proto::{new_msg_relay_hello, MessageType};
use crate::transport::Transport;

const PING_DEADLINE: Duration = Duration::from_secs(5);

#[async_trait]
pub trait DialerHandler: Send + Sync + 'static {
    /// Handle one reverse substream opened by the upstream (Relay: relay to
    /// an Edge; Edge: dial the destination). Failures are logged, not fatal
    /// to the connection.
    async fn handle_stream(&self, transport: Transport) -> CoreResult<()>;
}

pub struct Dialer<H: DialerHandler> {
    endpoint: quinn::Endpoint,
    addr: SocketAddr,
    server_name: String,
    regions: HashMap<String, String>,
    handler: Arc<H>,
}

impl<H: DialerHandler> Dialer<H> {
    pub fn new(
        endpoint: quinn::Endpoint,
        addr: SocketAddr,
        server_name: impl Into<String>,
        regions: HashMap<String, String>,
        handler: Arc<H>,
    ) -> Self {
        Dialer { endpoint, addr, server_name: server_name.into(), regions, handler }
    }

    /// Connects, registers, and then runs the reverse-substream accept loop
    /// until the connection drops.
    pub async fn dial(&self) -> CoreResult<()> {
        let conn = self.endpoint.connect(self.addr, &self.server_name)?.await?;
        tracing::info!(addr = %self.addr, "dialed upstream");

        let assigned_id = self.hello(&conn).await?;
        tracing::info!(assigned_id, "received assigned id from upstream");

        let ping_transport = self.accept_ping_stream(&conn).await?;
        let pong_handle = tokio::spawn(pong_loop(ping_transport));

        let result = self.accept_loop(&conn).await;
        pong_handle.abort();
        result
    }

    async fn hello(&self, conn: &quinn::Connection) -> CoreResult<u64> {
        let (send, recv) = conn.open_bi().await?;
        let transport = Transport::new(send, recv);

        let region_refs: HashMap<&str, &str> =
            self.regions.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        transport.write(&new_msg_relay_hello(&region_refs)).await?;

        let config_msg = transport.sync().await?;
        if config_msg.mtype != MessageType::RelayConfig {
            return Err(CoreError::ProtocolMalformed);
        }
        let id: u64 = config_msg.body.parse().map_err(|_| CoreError::ProtocolMalformed)?;
        transport.close().await?;
        Ok(id)
    }

    async fn accept_ping_stream(&self, conn: &quinn::Connection) -> CoreResult<Transport> {
        let (send, recv) = conn.accept_bi().await?;
        Ok(Transport::new(send, recv))
    }

    async fn accept_loop(&self, conn: &quinn::Connection) -> CoreResult<()> {
        loop {
            match conn.accept_bi().await {
                Ok((send, recv)) => {
                    let transport = Transport::new(send, recv);
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handler.handle_stream(transport).await {
                            tracing::warn!(error = %err, "reverse substream handler failed");
                        }
                    });
                }
                Err(err) => {
                    tracing::warn!(error = %err, "upstream connection ended, stopping accept loop");
                    return Err(CoreError::from(err));
                }
            }
        }
    }
}

async fn pong_loop(transport: Transport) {
    loop {
        match tokio::time::timeout(PING_DEADLINE, transport.sync()).await {
            Ok(Ok(msg)) if msg.mtype == MessageType::Ping => {
                if transport.write(&msg).await.is_err() {
                    return;
                }
            }
            _ => return,
        }
    }
}
