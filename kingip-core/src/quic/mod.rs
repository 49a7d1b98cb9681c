pub mod dialer;
pub mod listener;
pub mod tls;

pub use dialer::{Dialer, DialerHandler};
pub use listener::{Listener, ListenerHandler};

use std::net::SocketAddr;

use crate::error::CoreResult;

/// Builds a server-side QUIC endpoint bound to `addr`, ready for `Listener`.
pub fn server_endpoint(addr: SocketAddr) -> CoreResult<quinn::Endpoint> {
    let config = tls::server_config()?;
    Ok(quinn::Endpoint::server(config, addr)?)
}

/// Builds a client-side QUIC endpoint for outbound dials, ready for `Dialer`.
pub fn client_endpoint() -> CoreResult<quinn::Endpoint> {
    let bind_addr: SocketAddr = "0.0.0.0:0".parse().expect("static bind address");
    let mut endpoint = quinn::Endpoint::client(bind_addr)?;
    endpoint.set_default_client_config(tls::client_config()?);
    Ok(endpoint)
}
