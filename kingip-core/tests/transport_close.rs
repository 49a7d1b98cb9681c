//! `Transport::close` idempotence (§4.B), over a real loopback QUIC stream
//! pair rather than a stand-in.

use std::net::SocketAddr;

use kingip_core::quic;
use kingip_core::transport::Transport;

#[tokio::test]
async fn close_is_idempotent_over_a_real_stream() {
    let server_endpoint = quic::server_endpoint("127.0.0.1:0".parse().unwrap()).unwrap();
    let listen_addr: SocketAddr = server_endpoint.local_addr().unwrap();

    let accept_task = tokio::spawn(async move {
        let incoming = server_endpoint.accept().await.expect("incoming connection");
        let conn = incoming.await.expect("handshake");
        conn.accept_bi().await.expect("accepted bi stream")
    });

    let client_endpoint = quic::client_endpoint().unwrap();
    let conn = client_endpoint.connect(listen_addr, "localhost").unwrap().await.unwrap();
    let (send, recv) = conn.open_bi().await.unwrap();

    let (server_send, server_recv) = accept_task.await.unwrap();
    let server_transport = Transport::new(server_send, server_recv);
    let _client_transport = Transport::new(send, recv);

    assert!(!server_transport.is_closed());
    server_transport.close().await.expect("first close succeeds");
    assert!(server_transport.is_closed());
    server_transport.close().await.expect("second close is a no-op, not an error");
    assert!(server_transport.is_closed());
}
