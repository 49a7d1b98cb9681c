//! Framed duplex wrapper around one QUIC stream pair.
//!
//! A `quinn` substream is already split into a `SendStream`/`RecvStream` pair;
//! `Transport` recombines them behind the `write`/`sync`/`spawn`/`close`/
//! `abandon` surface the rest of the system expects from one logical stream.
//! Writes are serialized through a lock, close is idempotent, and a
//! transport may be spawned (read loop dispatching to a handler) at most
//! once — subsequent calls see it as already closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use quinn::{RecvStream, SendStream};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{CoreError, CoreResult};
use crate::proto::{Message, BYTE_LF};

#[async_trait]
pub trait TransportHandler: Send + Sync + 'static {
    /// Called once per decoded frame. `writer` is a cheap clone of the same
    /// transport, so handlers can reply or close from within the callback.
    async fn handle(&self, writer: Transport, msg: Message) -> CoreResult<()>;
}

struct Inner {
    send: AsyncMutex<Option<SendStream>>,
    recv: AsyncMutex<Option<BufReader<RecvStream>>>,
    closed: AtomicBool,
    spawned: AtomicBool,
}

/// Cheaply cloneable handle to one framed QUIC substream.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    pub fn new(send: SendStream, recv: RecvStream) -> Self {
        Transport {
            inner: Arc::new(Inner {
                send: AsyncMutex::new(Some(send)),
                recv: AsyncMutex::new(Some(BufReader::new(recv))),
                closed: AtomicBool::new(false),
                spawned: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Write one frame. Errors with `TransportClosed` once the transport has
    /// been closed or abandoned.
    pub async fn write(&self, msg: &Message) -> CoreResult<()> {
        if self.is_closed() {
            return Err(CoreError::TransportClosed);
        }
        let mut guard = self.inner.send.lock().await;
        let send = guard.as_mut().ok_or(CoreError::TransportClosed)?;
        send.write_all(&msg.encode()).await?;
        Ok(())
    }

    /// Read exactly one frame. Used for request/response round trips that
    /// don't need a spawned handler loop (e.g. `RELAY_HELLO` → `RELAY_CONFIG`).
    pub async fn sync(&self) -> CoreResult<Message> {
        let mut guard = self.inner.recv.lock().await;
        let reader = guard.as_mut().ok_or(CoreError::TransportClosed)?;
        read_one_frame(reader).await
    }

    /// Start the read loop dispatching every subsequent frame to `handler`
    /// until the stream closes, the handler errors, or `close`/`abandon` is
    /// called. Only the first call takes effect.
    pub fn spawn<H: TransportHandler>(&self, handler: Arc<H>) -> CoreResult<()> {
        if self.inner.spawned.swap(true, Ordering::AcqRel) {
            return Err(CoreError::TransportClosed);
        }
        let transport = self.clone();
        tokio::spawn(async move { transport.run_loop(handler).await });
        Ok(())
    }

    async fn run_loop<H: TransportHandler>(&self, handler: Arc<H>) {
        loop {
            if self.is_closed() {
                break;
            }
            let frame = {
                let mut guard = self.inner.recv.lock().await;
                match guard.as_mut() {
                    Some(reader) => read_one_frame(reader).await,
                    None => break,
                }
            };
            match frame {
                Ok(msg) => {
                    if let Err(err) = handler.handle(self.clone(), msg).await {
                        tracing::warn!(error = %err, "transport handler returned an error, closing");
                        let _ = self.close().await;
                        break;
                    }
                }
                Err(_) => {
                    let _ = self.close().await;
                    break;
                }
            }
        }
    }

    /// Idempotent close: finishes the send side and marks the transport
    /// unusable for further `write`/`sync`/`spawn` calls.
    pub async fn close(&self) -> CoreResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut guard = self.inner.send.lock().await;
        if let Some(mut send) = guard.take() {
            let _ = send.finish();
        }
        self.inner.recv.lock().await.take();
        Ok(())
    }

    /// Stops this transport's own bookkeeping without closing the
    /// underlying stream, handing the raw send/recv halves back to the
    /// caller (used by the Relay/Edge forwarding cores, which keep
    /// splicing the stream after the handshake frame has been exchanged).
    pub async fn abandon(&self) -> CoreResult<(SendStream, RecvStream)> {
        self.inner.closed.store(true, Ordering::Release);
        let send = self
            .inner
            .send
            .lock()
            .await
            .take()
            .ok_or(CoreError::TransportClosed)?;
        let recv = self
            .inner
            .recv
            .lock()
            .await
            .take()
            .ok_or(CoreError::TransportClosed)?
            .into_inner();
        Ok((send, recv))
    }
}

async fn read_one_frame(reader: &mut BufReader<RecvStream>) -> CoreResult<Message> {
    let mut buf = Vec::new();
    let n = reader.read_until(BYTE_LF, &mut buf).await?;
    if n == 0 {
        return Err(CoreError::TransportClosed);
    }
    Message::decode(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct RecordingHandler {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl TransportHandler for RecordingHandler {
        async fn handle(&self, _writer: Transport, _msg: Message) -> CoreResult<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // Full duplex behaviour (spawn/write/sync over a live quinn pair, and
    // close-idempotence) is covered by the integration tests in `tests/`,
    // which set up a loopback QUIC endpoint — `Transport::new` needs a real
    // `SendStream`/`RecvStream` pair, not available at this unit level.
    // This just checks the handler trait object stays `Send + Sync`.
    #[test]
    fn handler_is_a_plain_send_sync_type() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RecordingHandler>();
    }
}
