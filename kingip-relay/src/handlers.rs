use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kingip_core::error::CoreResult;
use kingip_core::quic::ListenerHandler;
use kingip_core::registry::RegionRegistry;
use kingip_core::upstream::{UpstreamConn, UpstreamTable};

/// Registers each incoming Edge connection and feeds its `RELAY_HELLO`
/// region map into this Relay's edge region registry.
pub struct EdgeRegistrar {
    pub edge_table: Arc<UpstreamTable>,
    pub region_registry: Arc<RegionRegistry>,
}

#[async_trait]
impl ListenerHandler for EdgeRegistrar {
    async fn register(&self, conn: quinn::Connection) -> CoreResult<Arc<UpstreamConn>> {
        self.edge_table.register(conn)
    }

    async fn regions(&self, id: u64, regions: HashMap<String, String>) -> CoreResult<()> {
        for region in regions.keys() {
            self.region_registry.add(region, id);
        }
        Ok(())
    }

    async fn closed(&self, id: u64) {
        if let Some(upstream) = self.edge_table.remove(id) {
            upstream.fire_stop();
            let regions = upstream.regions.lock().clone();
            self.region_registry.remove_from_all(&regions, id);
        }
    }
}
