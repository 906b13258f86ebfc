//! Mapping of exchange failures to response codes.
//!
//! [`classify`] is a pure function; [`log_failure`] emits the matching log
//! event. Rules, first match wins:
//!
//! | Failure | Result |
//! |---------|--------|
//! | body stream already consumed | propagate |
//! | caller's token cancelled | `Canceled` |
//! | internal cancellation | `UnknownFailure` |
//! | caller body stream failed | `StreamInputFailure` |
//! | writing the body failed | `SendFailure` |
//! | response body failed | `ReceiveFailure` |
//! | connect error with a transient socket code | `ConnectFailure` |
//! | connect timeout | `ConnectFailure` |
//! | anything else | `UnknownFailure` |

use crate::engine::{EngineError, SocketError};
use crate::error::TransportError;
use crate::model::ResponseCode;
use std::io;
use thiserror::Error;

/// A failure somewhere in one exchange.
#[derive(Error, Debug)]
pub enum SendError {
    /// The engine failed before or while receiving the response head.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// Writing the request body to the connection failed.
    #[error("failed to send request body: {0}")]
    BodySend(EngineError),

    /// Reading the caller-provided body stream failed.
    #[error("failed to read from user-provided request body stream: {0}")]
    UserStream(io::Error),

    /// Reading the response body failed.
    #[error("failed to read response body: {0}")]
    Receive(io::Error),

    /// The exchange's cancellation token fired.
    #[error("exchange was canceled")]
    Canceled,

    /// Library error raised while preparing the exchange.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Verdict of the classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Turn the failure into a response with this code.
    Handled(ResponseCode),
    /// Caller misuse; hand the error back to the caller.
    Propagate,
}

/// Socket codes that mean the peer could not be reached at all.
pub fn is_transient_connect_code(code: SocketError) -> bool {
    !matches!(code, SocketError::Other)
}

/// Classify `error`. `caller_canceled` tells whether the caller's own token fired.
pub fn classify(error: &SendError, caller_canceled: bool) -> Classification {
    use Classification::{Handled, Propagate};

    if let SendError::Transport(TransportError::StreamAlreadyUsed) = error {
        return Propagate;
    }
    if caller_canceled {
        return Handled(ResponseCode::Canceled);
    }

    match error {
        SendError::Canceled => Handled(ResponseCode::UnknownFailure),
        SendError::UserStream(_) => Handled(ResponseCode::StreamInputFailure),
        SendError::BodySend(_) => Handled(ResponseCode::SendFailure),
        SendError::Receive(_) => Handled(ResponseCode::ReceiveFailure),
        SendError::Engine(EngineError::Connect { code, .. }) if is_transient_connect_code(*code) => {
            Handled(ResponseCode::ConnectFailure)
        }
        SendError::Engine(EngineError::ConnectTimeout(_)) => Handled(ResponseCode::ConnectFailure),
        _ => Handled(ResponseCode::UnknownFailure),
    }
}

/// Log `error` the way its classification calls for.
pub fn log_failure(error: &SendError, code: ResponseCode, target: &str) {
    match code {
        ResponseCode::Canceled => {}
        ResponseCode::ConnectFailure => {
            tracing::warn!(target = %target, error = %error, "connection failure");
        }
        ResponseCode::StreamInputFailure => {
            tracing::error!(target = %target, error = %error, "failed to read from user-provided request body stream");
        }
        ResponseCode::SendFailure => {
            tracing::error!(target = %target, error = %error, "failed to send request body");
        }
        ResponseCode::ReceiveFailure => {
            tracing::error!(target = %target, error = %error, "failed to read response body");
        }
        _ => {
            tracing::error!(target = %target, error = %error, "unknown failure in sending request");
        }
    }
}
