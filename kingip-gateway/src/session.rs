//! Gateway session core (§4.F): authentication has already happened by the
//! time `handle_session` is called (the proxy frontend did it); this is the
//! region pick → relay open → proxy-init → quota check → splice → bandwidth
//! accounting pipeline.

use std::sync::Arc;
use std::time::Duration;

use kingip_core::error::{CoreError, CoreResult};
use kingip_core::proto::{new_msg_gateway_proxy, MessageType};
use kingip_core::registry::RegionRegistry;
use kingip_core::splice::{splice, SpliceOutcome};
use kingip_core::store::{BandwidthStore, SessionStore, User};
use kingip_core::transport::Transport;
use kingip_core::upstream::UpstreamTable;
use tokio::io::{AsyncRead, AsyncWrite};

pub struct GatewaySessionCore {
    pub relay_table: Arc<UpstreamTable>,
    pub region_registry: Arc<RegionRegistry>,
    pub session_store: Arc<dyn SessionStore>,
    pub bandwidth_store: Arc<dyn BandwidthStore>,
}

impl GatewaySessionCore {
    /// Phase 1 of a session: pick a relay for `region`, open a substream to
    /// it, and complete the `GATEWAY_PROXY` handshake. Split out from
    /// `handle_session` so the proxy frontend can distinguish
    /// `SessionNoRelayInRegion`/`SessionRelayOpenFailed` (502) from
    /// `SessionProxyInitFailed` (503) *before* committing to a response on
    /// the user's connection (§6 status-code mapping).
    pub async fn establish(&self, destination: &str, region: &str) -> CoreResult<Transport> {
        let relay_id = self
            .region_registry
            .pick(region)
            .map_err(|_| CoreError::SessionNoRelayInRegion)?;

        let relay = self.relay_table.get(relay_id).ok_or(CoreError::SessionNoRelayInRegion)?;

        let relay_stream = match relay.open_substream().await {
            Ok(stream) => stream,
            Err(_) => {
                relay.fire_stop();
                return Err(CoreError::SessionRelayOpenFailed);
            }
        };

        relay_stream.write(&new_msg_gateway_proxy(destination, region)).await?;
        let reply = relay_stream.sync().await?;
        if reply.mtype != MessageType::Success {
            return Err(CoreError::SessionProxyInitFailed);
        }

        Ok(relay_stream)
    }

    /// Phase 2 of a session: the session-count and bandwidth quota gate,
    /// then the splice itself, against an already-established relay stream.
    /// By the time this runs the caller has already committed to the
    /// tunnel (written `200 Connection Established`, or begun forwarding a
    /// plain-HTTP request), so a quota rejection here is a silent close of
    /// `user_conn`, not a status line (§7 — some `session.*` errors map to
    /// "silent TCP close" rather than a status code).
    pub async fn run_session<S>(
        &self,
        user: &User,
        relay_stream: Transport,
        user_conn: S,
    ) -> CoreResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let new_count = self.session_store.add(user.id);
        if new_count > user.max_sessions {
            self.session_store.remove(user.id);
            return Err(CoreError::SessionTooMany);
        }

        if self.bandwidth_store.used_mb(user.id) / 1024.0 >= user.max_bandwidth_gb {
            self.session_store.remove(user.id);
            return Err(CoreError::SessionBandwidthExceeded);
        }

        let (relay_send, relay_recv) = relay_stream.abandon().await?;
        let (user_read, user_write) = tokio::io::split(user_conn);

        let outcome = splice(
            user_read,
            user_write,
            relay_recv,
            relay_send,
            Some(user.max_session_duration.max(Duration::from_secs(1))),
        )
        .await;

        match outcome {
            SpliceOutcome::Completed { a_to_b, b_to_a } => {
                let mb = (a_to_b + b_to_a) as f64 / (1024.0 * 1024.0);
                self.bandwidth_store.add_mb(user.id, mb);
            }
            SpliceOutcome::TimedOut => {
                tracing::warn!(user_id = user.id, "session duration cap elapsed, bandwidth not recorded");
            }
        }

        self.session_store.remove(user.id);
        Ok(())
    }

    /// Convenience wrapper combining both phases, for callers that don't
    /// need to distinguish an establish-phase failure from a quota-phase
    /// one (the proxy frontend calls `establish`/`run_session` separately
    /// instead, so it can map establish failures to 502/503 before writing
    /// anything to the user).
    pub async fn handle_session<S>(
        &self,
        user: &User,
        destination: &str,
        region: &str,
        user_conn: S,
    ) -> CoreResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let relay_stream = self.establish(destination, region).await?;
        self.run_session(user, relay_stream, user_conn).await
    }
}
