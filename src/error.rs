use thiserror::Error;

/// Invalid settings, caught before any network activity.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("smoothing factor must be in (0, 1], got {0}")]
    InvalidAlpha(f64),

    #[error("message count must be positive")]
    InvalidCount,
}

/// A reply datagram that couldn't be matched to the outstanding message.
/// These are expected on a lossy transport and never abort a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplyError {
    #[error("malformed reply")]
    Malformed,

    #[error("no pending message {0}")]
    Stale(u64),
}

/// Why a WebTransport session failed or ended.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session rejected with status {0}")]
    Rejected(http::StatusCode),

    #[error("missing or invalid :status")]
    InvalidStatus,

    #[error("webtransport unsupported by peer")]
    WebTransportUnsupported,

    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    #[error("session closed: {0}")]
    Closed(String),
}

/// An error returned by [`run`](crate::run).
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to connect: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("transport error: {0}")]
    Transport(#[from] crate::TransportError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("timed out waiting for the session to be established")]
    EstablishTimeout,

    #[error("timed out waiting for a reply")]
    ReplyTimeout,

    #[error("transport closed")]
    TransportClosed,
}

/// Failure writing measurements out.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
