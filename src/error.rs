//! Error types for the sockets transport.
//!
//! Transport-level failures (refused connections, broken bodies, timeouts) are
//! never reported through this type: they come back as a [`Response`] with one
//! of the synthetic [`ResponseCode`]s. [`TransportError`] is reserved for faults
//! the caller has to fix in its own code, plus construction problems.
//!
//! # Error Categories
//!
//! | Variant | Raised by | Reaches `Transport::send` caller |
//! |---------|-----------|----------------------------------|
//! | `StreamAlreadyUsed` | Body Writer | Yes |
//! | `EngineBuild` | Handler Cache | No, surfaces as `UnknownFailure` |
//! | `InvalidConfig` | `SettingsFile` conversion | No, returned at construction |
//!
//! [`Response`]: crate::model::Response
//! [`ResponseCode`]: crate::model::ResponseCode

use thiserror::Error;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors produced by the transport itself, as opposed to the exchange.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// A request stream body was handed to the transport a second time.
    ///
    /// Stream bodies are single-use. Retrying a request whose body is a stream
    /// without supplying a fresh stream is a bug in the calling layer.
    #[error("request body stream has already been consumed")]
    StreamAlreadyUsed,

    /// The underlying HTTP engine could not be constructed.
    #[error("failed to build HTTP engine: {0}")]
    EngineBuild(String),

    /// Settings could not be turned into a usable configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),
}

impl TransportError {
    /// Whether this error signals caller misuse that must never be swallowed.
    #[inline]
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(self, TransportError::StreamAlreadyUsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_reuse_is_misuse() {
        assert!(TransportError::StreamAlreadyUsed.is_misuse());
        assert!(!TransportError::EngineBuild("tls".into()).is_misuse());
    }

    #[test]
    fn test_display_carries_detail() {
        let err = TransportError::InvalidConfig("proxy url".into());
        assert!(err.to_string().contains("proxy url"));
    }
}
