//! Edge dial handler: decodes the `GATEWAY_PROXY` forwarded by the Relay,
//! gets a pooled connection to the destination, and splices the Relay
//! substream against the raw destination TCP connection. Grounded in
//! `svc/edge/edge.go`'s `RelayHandle`/`transferData`.

use async_trait::async_trait;
use kingip_core::error::{CoreError, CoreResult};
use kingip_core::proto::{new_msg_success, MessageType};
use kingip_core::quic::DialerHandler;
use kingip_core::splice::{splice, SpliceOutcome};
use kingip_core::transport::Transport;

use crate::pool::ConnPool;

pub struct EdgeDialHandler {
    pub pool: ConnPool,
}

#[async_trait]
impl DialerHandler for EdgeDialHandler {
    async fn handle_stream(&self, relay_stream: Transport) -> CoreResult<()> {
        let request = relay_stream.sync().await?;
        if request.mtype != MessageType::GatewayProxy {
            return Err(CoreError::ProtocolMalformed);
        }
        let fields = request.unmarshal_map()?;
        let destination = fields.get("destination").cloned().unwrap_or_default();

        let dest_conn = match self.pool.get_with_retry(&destination).await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(%destination, error = %err, "edge pool could not provide a connection");
                return Err(err);
            }
        };

        relay_stream.write(&new_msg_success()).await?;
        let (relay_send, relay_recv) = relay_stream.abandon().await?;
        let (dest_read, dest_write) = tokio::io::split(dest_conn);

        match splice(relay_recv, relay_send, dest_read, dest_write, None).await {
            SpliceOutcome::Completed { a_to_b, b_to_a } => {
                tracing::debug!(a_to_b, b_to_a, %destination, "edge splice finished");
            }
            SpliceOutcome::TimedOut => unreachable!("edge splice has no duration cap"),
        }
        Ok(())
    }
}
