//! Relay forwarding core (§4.G): handles one reverse substream opened by a
//! Gateway, forwarding it to an Edge chosen by region and splicing the two
//! QUIC streams together. No TCP is involved at this hop.

use std::sync::Arc;

use async_trait::async_trait;
use kingip_core::error::{CoreError, CoreResult};
use kingip_core::proto::{new_msg_gateway_proxy, new_msg_success, MessageType};
use kingip_core::quic::DialerHandler;
use kingip_core::registry::RegionRegistry;
use kingip_core::splice::{splice, SpliceOutcome};
use kingip_core::transport::Transport;
use kingip_core::upstream::UpstreamTable;

pub struct RelayForwarder {
    pub edge_table: Arc<UpstreamTable>,
    pub edge_region_registry: Arc<RegionRegistry>,
}

#[async_trait]
impl DialerHandler for RelayForwarder {
    async fn handle_stream(&self, gateway_stream: Transport) -> CoreResult<()> {
        let request = gateway_stream.sync().await?;
        if request.mtype != MessageType::GatewayProxy {
            return Err(CoreError::ProtocolMalformed);
        }
        let fields = request.unmarshal_map()?;
        let destination = fields.get("destination").cloned().unwrap_or_default();
        let region = fields.get("region").cloned().unwrap_or_default();

        gateway_stream.write(&new_msg_success()).await?;
        let (gateway_send, gateway_recv) = gateway_stream.abandon().await?;

        let edge_id = match self.edge_region_registry.pick(&region) {
            Ok(id) => id,
            Err(_) => {
                tracing::warn!(%region, "no edge available for region, dropping gateway stream");
                return Err(CoreError::SessionNoRelayInRegion);
            }
        };

        let edge = self.edge_table.get(edge_id).ok_or(CoreError::RegistryNoEntry)?;
        let edge_stream = edge.open_substream().await.map_err(|_| {
            edge.fire_stop();
            CoreError::SessionRelayOpenFailed
        })?;

        edge_stream.write(&new_msg_gateway_proxy(&destination, &region)).await?;
        let reply = edge_stream.sync().await?;
        if reply.mtype != MessageType::Success {
            return Err(CoreError::SessionProxyInitFailed);
        }
        let (edge_send, edge_recv) = edge_stream.abandon().await?;

        match splice(gateway_recv, gateway_send, edge_recv, edge_send, None).await {
            SpliceOutcome::Completed { a_to_b, b_to_a } => {
                tracing::debug!(a_to_b, b_to_a, %destination, "relay splice finished");
            }
            SpliceOutcome::TimedOut => unreachable!("relay splice has no duration cap"),
        }
        Ok(())
    }
}
