//! Response model and the closed response-code taxonomy.
//!
//! Peer status codes are carried verbatim. Failures of the exchange itself are
//! reported with synthetic codes outside the standard HTTP range so that the
//! calling layer can decide whether to retry without inspecting error types.
//!
//! | Code | Numeric | Meaning |
//! |------|---------|---------|
//! | `RequestTimeout` | 408 | overall deadline elapsed |
//! | `Canceled` | 499 | caller cancelled |
//! | `InsufficientStorage` | 507 | body exceeds the size cap |
//! | `UnknownFailure` | 599 | unclassified failure |
//! | `ConnectFailure` | 600 | connection could not be established |
//! | `SendFailure` | 601 | writing the request body failed |
//! | `ReceiveFailure` | 602 | reading the response body failed |
//! | `StreamInputFailure` | 605 | reading the caller body stream failed |

use super::headers::Headers;
use crate::limiter::EndpointPermit;
use bytes::Bytes;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Transport-level response code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    /// Status received from the peer.
    Status(u16),
    /// The overall deadline elapsed before the exchange completed.
    RequestTimeout,
    /// The caller's cancellation signal fired.
    Canceled,
    /// The response body exceeds the configured size cap.
    InsufficientStorage,
    /// Any unclassified failure.
    UnknownFailure,
    /// The connection could not be established.
    ConnectFailure,
    /// Writing the request body to the connection failed.
    SendFailure,
    /// Reading the response body failed or ended early.
    ReceiveFailure,
    /// Reading the caller-provided request body stream failed.
    StreamInputFailure,
}

impl ResponseCode {
    /// `200 OK`
    pub const OK: ResponseCode = ResponseCode::Status(200);

    /// Map a status received from the peer.
    ///
    /// 408 and 507 collapse onto their named variants so that equality does
    /// not depend on who produced the code.
    pub fn from_status(status: u16) -> Self {
        match status {
            408 => ResponseCode::RequestTimeout,
            507 => ResponseCode::InsufficientStorage,
            other => ResponseCode::Status(other),
        }
    }

    /// Numeric value of the code.
    pub fn as_u16(&self) -> u16 {
        match self {
            ResponseCode::Status(status) => *status,
            ResponseCode::RequestTimeout => 408,
            ResponseCode::Canceled => 499,
            ResponseCode::InsufficientStorage => 507,
            ResponseCode::UnknownFailure => 599,
            ResponseCode::ConnectFailure => 600,
            ResponseCode::SendFailure => 601,
            ResponseCode::ReceiveFailure => 602,
            ResponseCode::StreamInputFailure => 605,
        }
    }

    /// Whether the peer answered with a 2xx status.
    pub fn is_success(&self) -> bool {
        matches!(self, ResponseCode::Status(200..=299))
    }

    /// Whether the code describes a network-level failure of the exchange.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            ResponseCode::RequestTimeout
                | ResponseCode::ConnectFailure
                | ResponseCode::SendFailure
                | ResponseCode::ReceiveFailure
        )
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseCode::Status(status) => write!(f, "{}", status),
            other => write!(f, "{:?} ({})", other, other.as_u16()),
        }
    }
}

/// Live response body stream.
///
/// Owns the engine body and through it the underlying connection. The
/// connection is released when the stream is closed or dropped, whichever
/// comes first; later calls are no-ops.
pub struct ResponseStream {
    body: Option<Pin<Box<dyn AsyncRead + Send>>>,
    permit: Option<EndpointPermit>,
    target: String,
}

impl ResponseStream {
    pub(crate) fn new(body: Pin<Box<dyn AsyncRead + Send>>, target: String) -> Self {
        ResponseStream {
            body: Some(body),
            permit: None,
            target,
        }
    }

    /// Hold the destination's connection slot until the stream is released.
    pub(crate) fn with_permit(mut self, permit: EndpointPermit) -> Self {
        self.permit = Some(permit);
        self
    }

    /// Release the underlying connection. Returns `true` on the first call only.
    pub fn close(&mut self) -> bool {
        match self.body.take() {
            Some(body) => {
                drop(body);
                self.permit = None;
                tracing::debug!(target = %self.target, "released streamed response");
                true
            }
            None => false,
        }
    }

    /// Whether [`close`](Self::close) has already run.
    pub fn is_closed(&self) -> bool {
        self.body.is_none()
    }
}

impl AsyncRead for ResponseStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.body.as_mut() {
            Some(body) => body.as_mut().poll_read(cx, buf),
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "response stream has been closed",
            ))),
        }
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream")
            .field("target", &self.target)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Result of one exchange.
///
/// Holds at most one of a materialized body or a live stream.
#[derive(Debug)]
pub struct Response {
    code: ResponseCode,
    headers: Headers,
    content: Option<Bytes>,
    stream: Option<ResponseStream>,
}

impl Response {
    /// Bodyless response with the given code.
    pub fn new(code: ResponseCode) -> Self {
        Response {
            code,
            headers: Headers::new(),
            content: None,
            stream: None,
        }
    }

    /// `RequestTimeout` response.
    pub fn timeout() -> Self {
        Self::new(ResponseCode::RequestTimeout)
    }

    /// `Canceled` response.
    pub fn canceled() -> Self {
        Self::new(ResponseCode::Canceled)
    }

    /// `UnknownFailure` response.
    pub fn unknown_failure() -> Self {
        Self::new(ResponseCode::UnknownFailure)
    }

    /// Attach headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Attach a materialized body, dropping any stream.
    #[must_use]
    pub fn with_content(mut self, content: Bytes) -> Self {
        self.stream = None;
        self.content = Some(content);
        self
    }

    /// Attach a live body stream, dropping any materialized body.
    #[must_use]
    pub fn with_stream(mut self, stream: ResponseStream) -> Self {
        self.content = None;
        self.stream = Some(stream);
        self
    }

    /// Response code.
    pub fn code(&self) -> ResponseCode {
        self.code
    }

    /// Response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Materialized body, absent in stream mode.
    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    /// Live body stream, absent in buffered mode.
    pub fn stream_mut(&mut self) -> Option<&mut ResponseStream> {
        self.stream.as_mut()
    }

    /// Whether the response carries a live stream.
    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Take ownership of the live body stream.
    pub fn take_stream(&mut self) -> Option<ResponseStream> {
        self.stream.take()
    }

    /// Release connection resources held by a live stream, if any.
    pub fn dispose(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            stream.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_from_status_collapses_named_codes() {
        assert_eq!(ResponseCode::from_status(200), ResponseCode::OK);
        assert_eq!(ResponseCode::from_status(408), ResponseCode::RequestTimeout);
        assert_eq!(ResponseCode::from_status(507), ResponseCode::InsufficientStorage);
        assert_eq!(ResponseCode::from_status(404).as_u16(), 404);
    }

    #[test]
    fn test_code_classification() {
        assert!(ResponseCode::OK.is_success());
        assert!(!ResponseCode::Status(500).is_success());
        assert!(ResponseCode::ConnectFailure.is_network_error());
        assert!(!ResponseCode::Canceled.is_network_error());
        assert_eq!(ResponseCode::StreamInputFailure.as_u16(), 605);
    }

    #[tokio::test]
    async fn test_stream_closes_once() {
        let body: Pin<Box<dyn AsyncRead + Send>> = Box::pin(&b"payload"[..]);
        let mut stream = ResponseStream::new(body, "localhost".into());

        let mut first = [0u8; 3];
        stream.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"pay");

        assert!(stream.close());
        assert!(!stream.close());
        assert!(stream.read(&mut first).await.is_err());
    }

    #[test]
    fn test_content_and_stream_are_exclusive() {
        let body: Pin<Box<dyn AsyncRead + Send>> = Box::pin(&b""[..]);
        let response = Response::new(ResponseCode::OK)
            .with_content(Bytes::from_static(b"x"))
            .with_stream(ResponseStream::new(body, "t".into()));
        assert!(response.content().is_none());
        assert!(response.has_stream());
    }
}
