use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kingip_core::error::CoreResult;
use kingip_core::quic::ListenerHandler;
use kingip_core::registry::RegionRegistry;
use kingip_core::upstream::{UpstreamConn, UpstreamTable};

/// Registers each incoming Relay connection and feeds its `RELAY_HELLO`
/// region map into the region registry.
pub struct RelayRegistrar {
    pub relay_table: Arc<UpstreamTable>,
    pub region_registry: Arc<RegionRegistry>,
}

#[async_trait]
impl ListenerHandler for RelayRegistrar {
    async fn register(&self, conn: quinn::Connection) -> CoreResult<Arc<UpstreamConn>> {
        self.relay_table.register(conn)
    }

    async fn regions(&self, id: u64, regions: HashMap<String, String>) -> CoreResult<()> {
        for region in regions.keys() {
            self.region_registry.add(region, id);
        }
        Ok(())
    }

    async fn closed(&self, id: u64) {
        if let Some(upstream) = self.relay_table.remove(id) {
            upstream.fire_stop();
            let regions = upstream.regions.lock().clone();
            self.region_registry.remove_from_all(&regions, id);
        }
    }
}
