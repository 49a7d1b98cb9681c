//! Scenario tests (spec §8, scenarios 4 and 5): a relay stream that
//! completes the `GATEWAY_PROXY` handshake successfully still gets gated by
//! the session-count and bandwidth quotas before any byte is spliced.

use std::sync::Arc;
use std::time::Duration;

use kingip_core::error::CoreError;
use kingip_core::proto::MessageType;
use kingip_core::quic;
use kingip_core::registry::RegionRegistry;
use kingip_core::store::{BandwidthStore, InMemoryBandwidthStore, InMemorySessionStore, User};
use kingip_core::transport::Transport;
use kingip_core::upstream::UpstreamTable;

use kingip_gateway::session::GatewaySessionCore;

/// Connects a client endpoint to a fresh loopback server endpoint, accepts
/// the connection on the server side, and registers it in `relay_table`/
/// `region_registry` under `region`. Also spawns a stub relay loop that
/// answers every `GATEWAY_PROXY` substream with `SUCCESS` and then goes
/// quiet, so callers only exercise the Gateway's own quota gating.
async fn register_stub_relay(
    relay_table: &Arc<UpstreamTable>,
    region_registry: &Arc<RegionRegistry>,
    region: &str,
) {
    let server_endpoint = quic::server_endpoint("127.0.0.1:0".parse().unwrap()).unwrap();
    let listen_addr = server_endpoint.local_addr().unwrap();
    let client_endpoint = quic::client_endpoint().unwrap();

    let accept = tokio::spawn(async move {
        let incoming = server_endpoint.accept().await.unwrap();
        incoming.await.unwrap()
    });
    let conn_client = client_endpoint.connect(listen_addr, "localhost").unwrap().await.unwrap();
    let conn_server = accept.await.unwrap();

    tokio::spawn(async move {
        loop {
            let (send, recv) = match conn_client.accept_bi().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let transport = Transport::new(send, recv);
            tokio::spawn(async move {
                if let Ok(msg) = transport.sync().await {
                    if msg.mtype == MessageType::GatewayProxy {
                        let _ = transport.write(&kingip_core::proto::new_msg_success()).await;
                    }
                }
            });
        }
    });

    let upstream = relay_table.register(conn_server).unwrap();
    region_registry.add(region, upstream.id);
}

/// Scenario 4: with `max_sessions=2`, three concurrent sessions for the
/// same user against a stub Relay see exactly one rejected with
/// `session.too_many`; the other two complete without error.
#[tokio::test]
async fn session_cap_rejects_exactly_one_of_three_concurrent_sessions() {
    let relay_table = Arc::new(UpstreamTable::new());
    let region_registry = Arc::new(RegionRegistry::new());
    register_stub_relay(&relay_table, &region_registry, "red").await;

    let core = Arc::new(GatewaySessionCore {
        relay_table,
        region_registry,
        session_store: Arc::new(InMemorySessionStore::new()),
        bandwidth_store: Arc::new(InMemoryBandwidthStore::new()),
    });
    let user = Arc::new(User::new("alice", 1, 2, f64::MAX, Duration::from_millis(200)));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let core = core.clone();
        let user = user.clone();
        let (client, _server) = tokio::io::duplex(64);
        handles.push(tokio::spawn(async move {
            core.handle_session(&user, "example.com:443", "red", client).await
        }));
    }

    let mut ok = 0;
    let mut too_many = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => ok += 1,
            Err(CoreError::SessionTooMany) => too_many += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(ok, 2);
    assert_eq!(too_many, 1);
}

/// Scenario 5: with `max_bandwidth_gb=0`, a session is rejected right after
/// proxy-init succeeds, and the user's connection is dropped without ever
/// being spliced (no bytes exchanged).
#[tokio::test]
async fn bandwidth_cap_of_zero_rejects_after_proxy_init() {
    let relay_table = Arc::new(UpstreamTable::new());
    let region_registry = Arc::new(RegionRegistry::new());
    register_stub_relay(&relay_table, &region_registry, "red").await;

    let core = GatewaySessionCore {
        relay_table,
        region_registry,
        session_store: Arc::new(InMemorySessionStore::new()),
        bandwidth_store: Arc::new(InMemoryBandwidthStore::new()),
    };
    let user = User::new("bob", 2, 10, 0.0, Duration::from_secs(60));

    let (client, server) = tokio::io::duplex(64);
    let err = core.handle_session(&user, "example.com:443", "red", client).await.unwrap_err();
    assert!(matches!(err, CoreError::SessionBandwidthExceeded));

    // The user side was dropped without ever being read from or written to.
    drop(server);
}
