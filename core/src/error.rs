//! Error types for the blocking HTTP client.
//!
//! # Design
//! Every failure of `connect` and `request` lands in exactly one
//! `ClientError` variant. `ErrorKind` collapses the variants into the five
//! transport stages (resolve, connect, handshake, write, read) plus `Usage`
//! for calls made in the wrong order, so callers can branch on the stage
//! without matching every detail.

use std::io;

/// Transport stage a `ClientError` belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Resolve,
    Connect,
    Handshake,
    Write,
    Read,
    /// The session was used out of order (no connection, no response yet,
    /// unserializable payload).
    Usage,
}

/// Errors returned by `Connection` and `RequestSession`.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The host name could not be resolved, or resolved to no addresses.
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// No resolved address accepted the TCP connection in time.
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// The shared TLS configuration could not be built.
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[from] rustls::Error),

    /// The host is not usable as a TLS server name.
    #[error("invalid TLS server name {0:?}")]
    InvalidServerName(String),

    /// The TLS handshake failed or timed out.
    #[error("TLS handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        #[source]
        source: io::Error,
    },

    /// Writing the request to the socket failed.
    #[error("failed to write request: {0}")]
    Write(#[source] io::Error),

    /// Reading the response from the socket failed.
    #[error("failed to read response: {0}")]
    Read(#[source] io::Error),

    /// The peer sent something that is not an HTTP/1.x response we can frame.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// `request` was called before a successful `connect`, or after `close`.
    #[error("not connected")]
    NotConnected,

    /// A response accessor was called before any successful `request`.
    #[error("no response has been received")]
    NoResponse,

    /// The JSON payload could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Resolve { .. } => ErrorKind::Resolve,
            ClientError::Connect { .. } => ErrorKind::Connect,
            ClientError::TlsConfig(_)
            | ClientError::InvalidServerName(_)
            | ClientError::Handshake { .. } => ErrorKind::Handshake,
            ClientError::Write(_) => ErrorKind::Write,
            ClientError::Read(_) | ClientError::MalformedResponse(_) => ErrorKind::Read,
            ClientError::NotConnected
            | ClientError::NoResponse
            | ClientError::Serialization(_) => ErrorKind::Usage,
        }
    }
}
