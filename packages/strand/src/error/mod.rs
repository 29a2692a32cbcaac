//! Error taxonomy for the client engine.
//!
//! Every failure a connection can experience surfaces either as an
//! [`Error`] returned from an API call, or as a code carried by exactly one
//! event dispatch: [`ConnectFailure`] on the Connect event for anything that
//! happens before the connection is established, [`CloseReason`] on the
//! Close event for anything after.

use std::io;

/// A `Result` alias where the `Err` case is [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the engine's public API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Hostname resolution failed.
    #[error("dns resolution failed: {0}")]
    Dns(String),

    /// Socket creation or connect failed.
    #[error("connect failed")]
    Connect(#[source] io::Error),

    /// The connect attempt exceeded its configured timeout.
    #[error("connect timed out")]
    Timeout,

    /// The peer actively refused the connection.
    #[error("connection refused")]
    Refused,

    /// TLS context construction failed (certificate, key or CA material).
    #[error("tls context error: {0}")]
    TlsContext(String),

    /// The TLS handshake failed, or exhausted its retry ceiling.
    #[error("tls handshake failed")]
    TlsHandshake,

    /// Fatal TLS protocol error on an established connection.
    #[error("tls protocol error: {0}")]
    Tls(String),

    /// Fatal I/O error on an established connection.
    #[error("i/o error")]
    Io(#[from] io::Error),

    /// The write queue has no free request slot.
    #[error("write queue saturated")]
    QueueFull,

    /// The operation targeted a connection that is closed or destroyed.
    #[error("connection closed")]
    Closed,

    /// Zero-length payloads are a caller contract violation.
    #[error("zero-length write")]
    ZeroLengthWrite,

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure code carried by the Connect event when a connect cycle fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    /// The connect attempt timed out.
    Timeout,
    /// The peer refused the connection.
    Refused,
    /// Hostname resolution failed.
    Dns,
    /// TLS context construction failed before any handshake took place.
    TlsContext,
    /// The TLS handshake failed or exceeded its attempt ceiling.
    TlsHandshake,
    /// Anything else (socket creation, routing, unexpected I/O errors).
    Unknown,
}

impl ConnectFailure {
    /// Classify an I/O error from a connect attempt.
    pub(crate) fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ConnectFailure::Refused,
            io::ErrorKind::TimedOut => ConnectFailure::Timeout,
            _ => ConnectFailure::Unknown,
        }
    }
}

/// Reason code carried by the Close event when an established connection
/// goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection and all pending bytes were drained.
    Eof,
    /// A fatal read or write error.
    Error,
    /// The read-idle or write-stall timeout expired.
    Timeout,
    /// The owner asked for the close.
    Requested,
}

impl From<ConnectFailure> for Error {
    fn from(f: ConnectFailure) -> Self {
        match f {
            ConnectFailure::Timeout => Error::Timeout,
            ConnectFailure::Refused => Error::Refused,
            ConnectFailure::Dns => Error::Dns("resolution failed".into()),
            ConnectFailure::TlsContext => Error::TlsContext("context construction failed".into()),
            ConnectFailure::TlsHandshake => Error::TlsHandshake,
            ConnectFailure::Unknown => Error::Connect(io::Error::other("connect failed")),
        }
    }
}
