//! Scenario tests (spec §8): hello handshake and ping-timeout teardown,
//! exercised end to end over a loopback QUIC endpoint pair.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use kingip_core::error::{CoreError, CoreResult};
use kingip_core::proto::new_msg_relay_hello;
use kingip_core::quic::{self, Dialer, DialerHandler, Listener, ListenerHandler};
use kingip_core::transport::Transport;
use kingip_core::upstream::{UpstreamConn, UpstreamTable};

struct RecordingHandler {
    table: Arc<UpstreamTable>,
    registered_regions: Mutex<HashMap<u64, Vec<String>>>,
    closed_id: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl ListenerHandler for RecordingHandler {
    async fn register(&self, conn: quinn::Connection) -> CoreResult<Arc<UpstreamConn>> {
        self.table.register(conn)
    }

    async fn regions(&self, id: u64, regions: HashMap<String, String>) -> CoreResult<()> {
        self.registered_regions.lock().insert(id, regions.into_keys().collect());
        Ok(())
    }

    async fn closed(&self, id: u64) {
        self.closed_id.store(id, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.table.remove(id);
    }
}

struct NoopDialHandler;

#[async_trait]
impl DialerHandler for NoopDialHandler {
    async fn handle_stream(&self, _transport: Transport) -> CoreResult<()> {
        Ok(())
    }
}

fn region_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[tokio::test]
async fn hello_handshake_assigns_id_and_registers_regions() {
    let server_endpoint = quic::server_endpoint("127.0.0.1:0".parse().unwrap()).unwrap();
    let listen_addr: SocketAddr = server_endpoint.local_addr().unwrap();

    let table = Arc::new(UpstreamTable::new());
    let handler = Arc::new(RecordingHandler {
        table: table.clone(),
        registered_regions: Mutex::new(HashMap::new()),
        closed_id: Arc::new(AtomicU64::new(0)),
        closed: Arc::new(AtomicBool::new(false)),
    });

    let listener = Listener::new(server_endpoint, handler.clone());
    let listener_task = tokio::spawn(async move { listener.run().await });

    let client_endpoint = quic::client_endpoint().unwrap();
    let dialer = Dialer::new(
        client_endpoint,
        listen_addr,
        "localhost",
        region_map(&[("red", "edge-1")]),
        Arc::new(NoopDialHandler),
    );
    let dial_task = tokio::spawn(async move { dialer.dial().await });

    // Give the handshake time to complete, then confirm state was recorded.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let regions = handler.registered_regions.lock();
    assert_eq!(regions.len(), 1);
    let (id, names) = regions.iter().next().unwrap();
    assert_ne!(*id, 0);
    assert_eq!(names, &vec!["red".to_string()]);
    assert!(table.get(*id).is_some());
    drop(regions);

    listener_task.abort();
    dial_task.abort();
}

#[tokio::test]
async fn ping_timeout_tears_down_connection() {
    let server_endpoint = quic::server_endpoint("127.0.0.1:0".parse().unwrap()).unwrap();
    let listen_addr: SocketAddr = server_endpoint.local_addr().unwrap();

    let table = Arc::new(UpstreamTable::new());
    let closed_id = Arc::new(AtomicU64::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    let handler = Arc::new(RecordingHandler {
        table: table.clone(),
        registered_regions: Mutex::new(HashMap::new()),
        closed_id: closed_id.clone(),
        closed: closed.clone(),
    });

    let listener = Listener::new(server_endpoint, handler);
    let listener_task = tokio::spawn(async move { listener.run().await });

    // A bare-minimum client that completes the hello handshake but never
    // opens or answers the ping stream `Dialer::dial` would normally spawn
    // a `pong_loop` for, so the listener's liveness probe has nobody to
    // answer it and must time out.
    let client_endpoint = quic::client_endpoint().unwrap();
    let conn = client_endpoint.connect(listen_addr, "localhost").unwrap().await.unwrap();
    let (hello_send, hello_recv) = conn.open_bi().await.unwrap();
    let hello_transport = Transport::new(hello_send, hello_recv);
    let regions = region_map(&[("red", "edge-1")]);
    let region_refs: HashMap<&str, &str> =
        regions.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    hello_transport.write(&new_msg_relay_hello(&region_refs)).await.unwrap();
    let _config = hello_transport.sync().await.unwrap();
    hello_transport.close().await.unwrap();

    // Hold the connection open without ever accepting the ping stream, so
    // the liveness loop's write succeeds but its reply-read times out.
    assert!(!closed.load(Ordering::SeqCst));

    // `liveness.timeout` fires PING_DEADLINE (5s) after the first ping is
    // sent with no reply; allow comfortable margin.
    tokio::time::sleep(Duration::from_secs(7)).await;

    assert!(closed.load(Ordering::SeqCst));
    assert_ne!(closed_id.load(Ordering::SeqCst), 0);
    assert!(table.get(closed_id.load(Ordering::SeqCst)).is_none());

    listener_task.abort();
    drop(conn);
}
