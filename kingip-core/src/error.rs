use thiserror::Error;

/// Error taxonomy shared by every node. Variants map 1:1 onto the dotted
/// strings used in logs and in `MsgError` bodies sent back over the wire.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("protocol.unknown_type")]
    ProtocolUnknownType,

    #[error("protocol.malformed")]
    ProtocolMalformed,

    #[error("protocol.not_a_map")]
    ProtocolNotAMap,

    #[error("transport.closed")]
    TransportClosed,

    #[error("registry.no_entry")]
    RegistryNoEntry,

    #[error("registry.full")]
    RegistryFull,

    #[error("pool.host_saturated")]
    PoolHostSaturated,

    #[error("pool.dial_failed: {0}")]
    PoolDialFailed(String),

    #[error("session.no_relay_in_region")]
    SessionNoRelayInRegion,

    #[error("session.relay_open_failed")]
    SessionRelayOpenFailed,

    #[error("session.proxy_init_failed")]
    SessionProxyInitFailed,

    #[error("session.too_many")]
    SessionTooMany,

    #[error("session.bandwidth_exceeded")]
    SessionBandwidthExceeded,

    #[error("session.duration_exceeded")]
    SessionDurationExceeded,

    #[error("liveness.timeout")]
    LivenessTimeout,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("quic connect: {0}")]
    QuicConnect(#[from] quinn::ConnectError),

    #[error("quic connection: {0}")]
    QuicConnection(#[from] quinn::ConnectionError),

    #[error("quic write: {0}")]
    QuicWrite(#[from] quinn::WriteError),

    #[error("quic read: {0}")]
    QuicRead(#[from] quinn::ReadError),

    #[error("tls: {0}")]
    Tls(#[from] rustls::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
