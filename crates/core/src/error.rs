//! Error types for the AMP proxy library.

use std::fmt;

/// Errors that can occur in the AMP proxy library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Addressing**: [`Resolve`](Self::Resolve), [`Connect`](Self::Connect),
///   [`Io`](Self::Io) (bind and socket failures),
///   [`PortRangeExhausted`](Self::PortRangeExhausted).
/// - **Protocol**: [`Parse`](Self::Parse), [`IllegalValue`](Self::IllegalValue),
///   [`RtspStatus`](Self::RtspStatus), [`InvalidUrl`](Self::InvalidUrl).
/// - **Session**: [`SessionExists`](Self::SessionExists),
///   [`SessionNotFound`](Self::SessionNotFound),
///   [`StoppedPrematurely`](Self::StoppedPrematurely),
///   [`Cleanup`](Self::Cleanup), [`BackendStart`](Self::BackendStart).
/// - **Server**: [`HandlerExists`](Self::HandlerExists),
///   [`AlreadyRunning`](Self::AlreadyRunning).
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A host or `host:port` string did not resolve to a socket address.
    #[error("failed to resolve address {addr}: {reason}")]
    Resolve { addr: String, reason: String },

    /// A relay's outbound socket could not be connected to its target.
    #[error("failed to connect relay to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    /// No consecutive pair of ports could be bound in the configured range.
    #[error("failed to allocate UDP relay pair in port range {start}-{end}")]
    PortRangeExhausted { start: u16, end: u16 },

    /// A session is already registered under this key.
    #[error("session already exists for client {0}")]
    SessionExists(String),

    /// No session is registered under this key.
    #[error("session not found for client {0}")]
    SessionNotFound(String),

    /// The session ended on its own before it was asked to stop.
    /// Carries the captured cleanup error, or `(no error)`.
    #[error("session stopped prematurely: {0}")]
    StoppedPrematurely(String),

    /// The session's cleanup routine reported a failure.
    #[error("session cleanup failed: {0}")]
    Cleanup(String),

    /// The backend control URL is malformed or uses the wrong scheme.
    #[error("invalid RTSP URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The backend control session could not be established.
    #[error("failed to start RTSP client: {0}")]
    BackendStart(#[source] Box<ProxyError>),

    /// The backend answered a request with a non-success status.
    #[error("RTSP {method} failed: {status} {reason}")]
    RtspStatus {
        method: String,
        status: u16,
        reason: String,
    },

    /// Failed to parse an AMP or RTSP message.
    #[error("parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// A recognized AMP code carried a payload that could not be decoded.
    #[error("illegal value for AMP {code}: {value}")]
    IllegalValue { code: String, value: String },

    /// A handler for this AMP code is already registered on the server.
    #[error("handler already registered for AMP code {0}")]
    HandlerExists(String),

    /// [`ControlServer::start`](crate::server::ControlServer::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

/// Specific kind of message parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// The first line did not have the expected shape.
    InvalidStartLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// The message ended before the announced body was read.
    Truncated,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidStartLine => write!(f, "invalid start line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::Truncated => write!(f, "truncated message"),
        }
    }
}

impl ProxyError {
    pub(crate) fn parse(kind: ParseErrorKind) -> Self {
        Self::Parse { kind }
    }
}

/// Convenience alias for `Result<T, ProxyError>`.
pub type Result<T> = std::result::Result<T, ProxyError>;
