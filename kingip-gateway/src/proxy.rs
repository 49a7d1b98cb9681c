//! Proxy frontend adapter (§4.I): a thin HTTP/1.1 CONNECT/plain-proxy parser
//! in front of the session core. Parsing uses `httparse`; this module does
//! not implement a general HTTP engine, only the handful of operations the
//! spec names.

use std::net::SocketAddr;
use std::sync::Arc;

use base64::Engine;
use kingip_core::error::CoreError;
use kingip_core::splice::splice;
use kingip_core::store::UserStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::session::GatewaySessionCore;

const MAX_HEADER_BYTES: usize = 16 * 1024;
const MAX_HEADERS: usize = 64;

pub struct ProxyFrontend {
    pub region: String,
    pub user_store: Arc<dyn UserStore>,
    pub session_core: Arc<GatewaySessionCore>,
}

impl ProxyFrontend {
    pub async fn run(self: Arc<Self>, listen_addr: SocketAddr) -> anyhow::Result<()> {
        let listener = TcpListener::bind(listen_addr).await?;
        tracing::info!(%listen_addr, region = %self.region, "proxy frontend listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let frontend = self.clone();
            tokio::spawn(async move {
                if let Err(err) = frontend.handle_connection(stream).await {
                    tracing::warn!(%peer, error = %err, "proxy connection ended with an error");
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> anyhow::Result<()> {
        let (head, consumed) = read_request_head(&mut stream).await?;

        let auth_header = head
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("Proxy-Authorization"))
            .map(|h| h.value.clone());

        let Some((name, password)) = auth_header.and_then(|v| parse_basic_auth(&v)) else {
            write_status(&mut stream, 401, "Unauthorized").await?;
            return Ok(());
        };

        let Some(user) = self.user_store.lookup(&name, &password) else {
            write_status(&mut stream, 401, "Unauthorized").await?;
            return Ok(());
        };

        if head.method.eq_ignore_ascii_case("CONNECT") {
            self.handle_connect(stream, &head.target, &user).await
        } else {
            self.handle_plain(stream, head, consumed, &user).await
        }
    }

    async fn handle_connect(
        &self,
        mut stream: TcpStream,
        target: &str,
        user: &kingip_core::store::User,
    ) -> anyhow::Result<()> {
        let relay_stream = match self.session_core.establish(target, &self.region).await {
            Ok(relay_stream) => relay_stream,
            Err(CoreError::SessionNoRelayInRegion) | Err(CoreError::SessionRelayOpenFailed) => {
                write_status(&mut stream, 502, "Bad Gateway").await?;
                return Ok(());
            }
            Err(CoreError::SessionProxyInitFailed) => {
                write_status(&mut stream, 503, "Service Unavailable").await?;
                return Ok(());
            }
            Err(err) => {
                tracing::warn!(error = %err, "CONNECT establish failed");
                write_status(&mut stream, 502, "Bad Gateway").await?;
                return Ok(());
            }
        };

        stream.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").await?;
        match self.session_core.run_session(user, relay_stream, stream).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::info!(error = %err, "CONNECT session ended");
                Ok(())
            }
        }
    }

    async fn handle_plain(
        &self,
        mut client: TcpStream,
        head: RequestHead,
        leftover: Vec<u8>,
        user: &kingip_core::store::User,
    ) -> anyhow::Result<()> {
        let destination = match host_from_head(&head) {
            Some(d) => d,
            None => {
                write_status(&mut client, 400, "Bad Request").await?;
                return Ok(());
            }
        };

        let relay_stream = match self.session_core.establish(&destination, &self.region).await {
            Ok(relay_stream) => relay_stream,
            Err(CoreError::SessionNoRelayInRegion) | Err(CoreError::SessionRelayOpenFailed) => {
                write_status(&mut client, 502, "Bad Gateway").await?;
                return Ok(());
            }
            Err(CoreError::SessionProxyInitFailed) => {
                write_status(&mut client, 503, "Service Unavailable").await?;
                return Ok(());
            }
            Err(err) => {
                tracing::warn!(error = %err, "plain-HTTP establish failed");
                write_status(&mut client, 502, "Bad Gateway").await?;
                return Ok(());
            }
        };

        let (mut pipe_client, pipe_server) = tokio::io::duplex(64 * 1024);

        let session_core = Arc::clone(&self.session_core);
        let user_owned = user.clone();
        let session_task = tokio::spawn(async move {
            session_core.run_session(&user_owned, relay_stream, pipe_server).await
        });

        let request_bytes = rebuild_request(&head);
        pipe_client.write_all(&request_bytes).await?;
        // Forward any already-buffered body bytes, then the rest of the body,
        // while copying the destination's response back to the caller.
        pipe_client.write_all(&leftover).await?;

        let (client_read, client_write) = tokio::io::split(client);
        let (pipe_read, pipe_write) = tokio::io::split(pipe_client);
        splice(client_read, client_write, pipe_read, pipe_write, None).await;

        let _ = session_task.await;
        Ok(())
    }
}

struct RequestHead {
    method: String,
    target: String,
    headers: Vec<RawHeader>,
}

#[derive(Clone)]
struct RawHeader {
    name: String,
    value: String,
}

async fn read_request_head(stream: &mut TcpStream) -> anyhow::Result<(RequestHead, Vec<u8>)> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            anyhow::bail!("connection closed before request head completed");
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_HEADER_BYTES {
            anyhow::bail!("request head too large");
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf)? {
            httparse::Status::Complete(consumed) => {
                let head = RequestHead {
                    method: req.method.unwrap_or("").to_string(),
                    target: req.path.unwrap_or("").to_string(),
                    headers: req
                        .headers
                        .iter()
                        .map(|h| RawHeader {
                            name: h.name.to_string(),
                            value: String::from_utf8_lossy(h.value).to_string(),
                        })
                        .collect(),
                };
                let remainder = buf[consumed..].to_vec();
                return Ok((head, remainder));
            }
            httparse::Status::Partial => continue,
        }
    }
}

fn parse_basic_auth(header_value: &str) -> Option<(String, String)> {
    let b64 = header_value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(b64.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (name, password) = decoded.split_once(':')?;
    Some((name.to_string(), password.to_string()))
}

fn host_from_head(head: &RequestHead) -> Option<String> {
    if let Some(header) = head.headers.iter().find(|h| h.name.eq_ignore_ascii_case("Host")) {
        return Some(header.value.clone());
    }
    // Absolute-form request targets (`GET http://host/path HTTP/1.1`) carry
    // the host in the target itself.
    let without_scheme = head.target.split("://").nth(1)?;
    without_scheme.split('/').next().map(|s| s.to_string())
}

fn rebuild_request(head: &RequestHead) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(head.method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(head.target.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");
    for header in &head.headers {
        if header.name.eq_ignore_ascii_case("Proxy-Authorization")
            || header.name.eq_ignore_ascii_case("Proxy-Connection")
        {
            continue;
        }
        out.extend_from_slice(header.name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(header.value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

async fn write_status(stream: &mut TcpStream, code: u16, reason: &str) -> anyhow::Result<()> {
    let body = format!("HTTP/1.1 {code} {reason}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    stream.write_all(body.as_bytes()).await?;
    Ok(())
}
