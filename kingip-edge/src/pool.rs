//! Edge connection pool (§4.H): a bounded per-host TCP pool with in-flight
//! dial tracking and condvar-style waiter wakeup. Grounded in
//! `svc/edge/pool.go`'s `ConnPool` (mutex + `sync.Cond`), generalized to
//! `tokio::sync::Notify` for the wakeup (broadcast on every dial completion,
//! success or failure, so a failed dial never permanently parks a waiter).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kingip_core::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::Notify;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const POOL_RETRY_DELAY: Duration = Duration::from_millis(50);
const EVICTION_SCAN_INTERVAL: Duration = Duration::from_secs(60);

struct PooledConn {
    conn: TcpStream,
    last_used: Instant,
}

#[derive(Default)]
struct HostState {
    idle: Vec<PooledConn>,
    in_flight: usize,
}

impl HostState {
    fn live_plus_in_flight(&self) -> usize {
        self.idle.len() + self.in_flight
    }
}

struct Inner {
    max_per_host: usize,
    idle_timeout: Duration,
    hosts: Mutex<HashMap<String, HostState>>,
    notify: Notify,
}

/// Cheaply cloneable handle to one per-host connection pool.
#[derive(Clone)]
pub struct ConnPool(Arc<Inner>);

impl ConnPool {
    pub fn new(max_per_host: usize, idle_timeout: Duration) -> Self {
        ConnPool(Arc::new(Inner {
            max_per_host,
            idle_timeout,
            hosts: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }))
    }

    /// Returns an open connection to `host`: reuses an idle one if
    /// available, dials a fresh one if there's spare per-host capacity, or
    /// fails immediately with `pool.host_saturated`.
    pub async fn get(&self, host: &str) -> CoreResult<TcpStream> {
        loop {
            let should_dial = {
                let mut hosts = self.0.hosts.lock();
                let state = hosts.entry(host.to_string()).or_default();

                if let Some(pooled) = state.idle.pop() {
                    return Ok(pooled.conn);
                }

                if state.live_plus_in_flight() < self.0.max_per_host {
                    state.in_flight += 1;
                    true
                } else {
                    false
                }
            };

            if !should_dial {
                return Err(CoreError::PoolHostSaturated);
            }

            // Register interest before spawning the dial so a completion
            // that lands immediately can't be missed.
            let notified = self.0.notify.notified();
            let pool = self.clone();
            let host_owned = host.to_string();
            tokio::spawn(async move { pool.dial_and_complete(host_owned).await });
            notified.await;
        }
    }

    /// `get`, plus the ~50ms single retry the Edge dial handler performs
    /// when the first attempt sees `pool.host_saturated` (§4.H).
    pub async fn get_with_retry(&self, host: &str) -> CoreResult<TcpStream> {
        match self.get(host).await {
            Err(CoreError::PoolHostSaturated) => {
                tokio::time::sleep(POOL_RETRY_DELAY).await;
                self.get(host).await
            }
            other => other,
        }
    }

    /// Returns a still-usable `conn` to the idle stack for `host`, bounded
    /// by `max_per_host`; drops it if the stack is already full.
    pub fn put(&self, host: &str, conn: TcpStream) {
        let mut hosts = self.0.hosts.lock();
        let state = hosts.entry(host.to_string()).or_default();
        if state.idle.len() < self.0.max_per_host {
            state.idle.push(PooledConn { conn, last_used: Instant::now() });
        }
        drop(hosts);
        self.0.notify.notify_waiters();
    }

    async fn dial_and_complete(&self, host: String) {
        let result = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&host)).await;

        let mut hosts = self.0.hosts.lock();
        let state = hosts.entry(host.clone()).or_default();
        state.in_flight = state.in_flight.saturating_sub(1);

        match result {
            Ok(Ok(conn)) => {
                if state.idle.len() < self.0.max_per_host {
                    state.idle.push(PooledConn { conn, last_used: Instant::now() });
                }
                // Over cap by the time the dial finished: drop `conn`.
            }
            Ok(Err(err)) => tracing::warn!(%host, error = %err, "edge dial failed"),
            Err(_) => tracing::warn!(%host, "edge dial timed out"),
        }
        drop(hosts);
        self.0.notify.notify_waiters();
    }

    /// Background eviction task: every 1 minute, close idle connections
    /// that haven't been used within `idle_timeout`.
    pub async fn run_idle_eviction(&self) {
        loop {
            tokio::time::sleep(EVICTION_SCAN_INTERVAL).await;
            let mut hosts = self.0.hosts.lock();
            let now = Instant::now();
            for state in hosts.values_mut() {
                state.idle.retain(|pooled| now.duration_since(pooled.last_used) < self.0.idle_timeout);
            }
            hosts.retain(|_, state| !state.idle.is_empty() || state.in_flight > 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_reuses_connection_without_dialing() {
        let pool = ConnPool::new(2, Duration::from_secs(5));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });
        let conn = TcpStream::connect(addr).await.unwrap();
        pool.put(&addr.to_string(), conn);

        let reused = pool.get(&addr.to_string()).await;
        assert!(reused.is_ok());
    }

    #[tokio::test]
    async fn saturated_host_fails_fast() {
        let pool = ConnPool::new(0, Duration::from_secs(5));
        let err = pool.get("127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, CoreError::PoolHostSaturated));
    }

    #[tokio::test]
    async fn pool_cap_is_never_exceeded_under_concurrent_gets() {
        let pool = ConnPool::new(2, Duration::from_secs(5));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });

        let host = addr.to_string();
        let mut handles = Vec::new();
        for _ in 0..3 {
            let pool = pool.clone();
            let host = host.clone();
            handles.push(tokio::spawn(async move { pool.get_with_retry(&host).await }));
        }
        // The third request sees the host saturated at `max_per_host=2`
        // and falls back to the ~50ms retry, by which point the first two
        // dials have completed and freed a slot.
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }
}
