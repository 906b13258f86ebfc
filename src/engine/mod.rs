//! The underlying HTTP engine seam.
//!
//! DNS resolution, TCP/TLS handshakes, wire framing and connection pooling are
//! delegated to an [`HttpEngine`]. The transport hands it one
//! [`EngineRequest`] per exchange and gets back the response head plus a body
//! chunk stream, without waiting for the body itself.
//!
//! Engines are built by an [`EngineFactory`] from the subset of settings that
//! affect connection behaviour ([`SettingsKey`]), and cached by the
//! [`ClientProvider`](crate::cache::ClientProvider). The default factory is
//! [`ReqwestEngineFactory`].
//!
//! # Module Organization
//!
//! ```text
//! engine/
//! ├── mod            - engine trait, request/response heads, error codes
//! └── reqwest_engine - reqwest-backed engine and factory
//! ```

mod reqwest_engine;

pub use reqwest_engine::{ReqwestEngine, ReqwestEngineFactory};

use crate::cache::SettingsKey;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Response body chunks as produced by the engine.
pub type EngineBody = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, EngineError>> + Send>>;

/// Request body chunks pulled by the engine while writing to the connection.
pub type OutboundChunks = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Request body as handed to the engine.
pub enum OutboundBody {
    /// No body.
    Empty,
    /// Body written chunk by chunk as the engine pulls it.
    Chunks {
        /// Chunk source.
        chunks: OutboundChunks,
        /// Declared length, sent as `Content-Length` when known.
        length: Option<u64>,
    },
}

impl OutboundBody {
    /// Declared body length. `Some(0)` for an empty body.
    pub fn content_length(&self) -> Option<u64> {
        match self {
            OutboundBody::Empty => Some(0),
            OutboundBody::Chunks { length, .. } => *length,
        }
    }
}

impl fmt::Debug for OutboundBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundBody::Empty => f.write_str("Empty"),
            OutboundBody::Chunks { length, .. } => {
                f.debug_struct("Chunks").field("length", length).finish()
            }
        }
    }
}

/// Outbound message handed to the engine.
#[derive(Debug)]
pub struct EngineRequest {
    /// Wire verb.
    pub method: http::Method,
    /// Target URL.
    pub url: Url,
    /// Headers after deny-list filtering and `Host` override.
    pub headers: http::HeaderMap,
    /// Request body.
    pub body: OutboundBody,
}

/// Details about the connection an exchange ran over.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Peer address, when the engine exposes it.
    pub remote_addr: Option<SocketAddr>,
}

/// Response head and body stream returned by the engine.
pub struct EngineResponse {
    /// Numeric status code.
    pub status: u16,
    /// Response and content headers.
    pub headers: http::HeaderMap,
    /// Declared body length.
    pub content_length: Option<u64>,
    /// Connection the response arrived on.
    pub connection: Option<ConnectionInfo>,
    /// Body chunk stream. Dropping it releases the connection.
    pub body: EngineBody,
}

impl fmt::Debug for EngineResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("connection", &self.connection)
            .finish()
    }
}

/// Low-level socket error codes recognised by the error classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketError {
    /// Name resolution failed.
    HostNotFound,
    /// Remote host is down.
    HostDown,
    /// No route to the remote host.
    HostUnreachable,
    /// Local network is down.
    NetworkDown,
    /// Network is unreachable.
    NetworkUnreachable,
    /// Requested address is not available.
    AddressNotAvailable,
    /// Local address already in use.
    AddressAlreadyInUse,
    /// Peer refused the connection.
    ConnectionRefused,
    /// Connection aborted locally.
    ConnectionAborted,
    /// Connection reset by peer.
    ConnectionReset,
    /// Socket operation timed out.
    TimedOut,
    /// Temporary failure, try again.
    TryAgain,
    /// Too many open sockets or files.
    TooManyOpenSockets,
    /// No buffer space available.
    NoBufferSpaceAvailable,
    /// Destination address required.
    DestinationAddressRequired,
    /// Anything else.
    Other,
}

impl SocketError {
    /// Derive the code from an I/O error kind, falling back to the raw OS code.
    pub fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => SocketError::ConnectionRefused,
            io::ErrorKind::ConnectionReset => SocketError::ConnectionReset,
            io::ErrorKind::ConnectionAborted => SocketError::ConnectionAborted,
            io::ErrorKind::AddrNotAvailable => SocketError::AddressNotAvailable,
            io::ErrorKind::AddrInUse => SocketError::AddressAlreadyInUse,
            io::ErrorKind::TimedOut => SocketError::TimedOut,
            io::ErrorKind::WouldBlock => SocketError::TryAgain,
            io::ErrorKind::HostUnreachable => SocketError::HostUnreachable,
            io::ErrorKind::NetworkUnreachable => SocketError::NetworkUnreachable,
            io::ErrorKind::NetworkDown => SocketError::NetworkDown,
            _ => error
                .raw_os_error()
                .map_or(SocketError::Other, Self::from_raw_os_error),
        }
    }

    #[cfg(target_os = "linux")]
    fn from_raw_os_error(code: i32) -> Self {
        match code {
            11 => SocketError::TryAgain,
            23 | 24 => SocketError::TooManyOpenSockets,
            89 => SocketError::DestinationAddressRequired,
            105 => SocketError::NoBufferSpaceAvailable,
            112 => SocketError::HostDown,
            _ => SocketError::Other,
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn from_raw_os_error(_code: i32) -> Self {
        SocketError::Other
    }
}

/// Failure reported by the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The connection could not be established.
    #[error("connect error ({code:?}): {message}")]
    Connect {
        /// Socket-level cause.
        code: SocketError,
        /// Engine message.
        message: String,
    },

    /// The handshake did not complete within the connect timeout.
    #[error("connect timed out: {0}")]
    ConnectTimeout(String),

    /// An established connection failed.
    #[error("i/o error ({code:?}): {message}")]
    Io {
        /// Socket-level cause.
        code: SocketError,
        /// Engine message.
        message: String,
    },

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Whether the failure happened before a connection was established.
    pub fn is_connect(&self) -> bool {
        matches!(self, EngineError::Connect { .. } | EngineError::ConnectTimeout(_))
    }
}

impl From<EngineError> for io::Error {
    fn from(error: EngineError) -> Self {
        let kind = match &error {
            EngineError::ConnectTimeout(_) => io::ErrorKind::TimedOut,
            EngineError::Io {
                code: SocketError::ConnectionReset,
                ..
            } => io::ErrorKind::ConnectionReset,
            EngineError::Io {
                code: SocketError::TimedOut,
                ..
            } => io::ErrorKind::TimedOut,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, error)
    }
}

/// The single-attempt exchange primitive consumed by the transport.
#[async_trait]
pub trait HttpEngine: Send + Sync {
    /// Send `request` and resolve once the response head has arrived.
    ///
    /// Dropping the returned future aborts the exchange.
    async fn send(&self, request: EngineRequest) -> std::result::Result<EngineResponse, EngineError>;
}

/// Builds engines for a given connection configuration.
pub trait EngineFactory: Send + Sync {
    /// Build a new engine.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::EngineBuild`](crate::TransportError::EngineBuild)
    /// when the engine cannot be constructed.
    fn create(&self, key: &SettingsKey) -> Result<Arc<dyn HttpEngine>>;
}
