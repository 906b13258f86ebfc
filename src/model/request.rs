//! Outbound request model.
//!
//! A [`Request`] is built by the caller and never mutated by the transport. It
//! carries at most one body: an in-memory [`Content`] range or a single-use
//! [`StreamContent`].

use super::headers::Headers;
use crate::error::{Result, TransportError};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncRead;
use url::Url;

/// HTTP request method.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
    /// `HEAD`
    Head,
    /// `OPTIONS`
    Options,
    /// `TRACE`
    Trace,
    /// Any other token, sent verbatim.
    Other(String),
}

impl Method {
    /// Wire form of the method.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Other(token) => token,
        }
    }
}

impl From<&str> for Method {
    fn from(value: &str) -> Self {
        match value {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "TRACE" => Method::Trace,
            other => Method::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory request body: a byte range within a caller buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Content {
    buffer: Bytes,
    offset: usize,
    length: usize,
}

impl Content {
    /// Use the whole buffer as the body.
    pub fn new(buffer: impl Into<Bytes>) -> Self {
        let buffer = buffer.into();
        let length = buffer.len();
        Content {
            buffer,
            offset: 0,
            length,
        }
    }

    /// Use `length` bytes of `buffer` starting at `offset` as the body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] if the range does not fit in
    /// the buffer.
    pub fn with_range(buffer: impl Into<Bytes>, offset: usize, length: usize) -> Result<Self> {
        let buffer = buffer.into();
        match offset.checked_add(length) {
            Some(end) if end <= buffer.len() => Ok(Content {
                buffer,
                offset,
                length,
            }),
            _ => Err(TransportError::InvalidConfig(format!(
                "content range {}+{} exceeds buffer of {} bytes",
                offset,
                length,
                buffer.len()
            ))),
        }
    }

    /// Body bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.length]
    }

    /// Body bytes as a cheap slice of the caller buffer.
    pub fn to_bytes(&self) -> Bytes {
        self.buffer.slice(self.offset..self.offset + self.length)
    }

    /// Offset of the body within the caller buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Body length in bytes.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the body is zero-length.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Boxed caller-provided body source.
pub type BodySource = Box<dyn AsyncRead + Send + Unpin>;

/// Single-use streaming request body with an optional declared length.
pub struct StreamContent {
    source: Mutex<Option<BodySource>>,
    length: Option<u64>,
}

impl StreamContent {
    /// Wrap `source`. When `length` is set, exactly that many bytes are sent.
    pub fn new(source: impl AsyncRead + Send + Unpin + 'static, length: Option<u64>) -> Self {
        StreamContent {
            source: Mutex::new(Some(Box::new(source))),
            length,
        }
    }

    /// Declared length, if known.
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Take the source out for sending.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::StreamAlreadyUsed`] on every call after the first.
    pub fn take(&self) -> Result<BodySource> {
        self.source
            .lock()
            .take()
            .ok_or(TransportError::StreamAlreadyUsed)
    }

    /// Whether the source has already been taken.
    pub fn is_consumed(&self) -> bool {
        self.source.lock().is_none()
    }
}

impl fmt::Debug for StreamContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamContent")
            .field("length", &self.length)
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

/// Request body shape.
#[derive(Clone, Debug, Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// In-memory body.
    Content(Content),
    /// Streaming body.
    Stream(Arc<StreamContent>),
}

/// An HTTP request handed to the transport.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Headers,
    body: RequestBody,
}

impl Request {
    /// Create a bodyless request.
    pub fn new(method: Method, url: Url) -> Self {
        Request {
            method,
            url,
            headers: Headers::new(),
            body: RequestBody::Empty,
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    /// Shorthand for a `POST` request.
    pub fn post(url: Url) -> Self {
        Self::new(Method::Post, url)
    }

    /// Set a header, replacing earlier values with the same name.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Replace all headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Attach an in-memory body, dropping any stream body.
    #[must_use]
    pub fn with_content(mut self, content: Content) -> Self {
        self.body = RequestBody::Content(content);
        self
    }

    /// Attach a streaming body, dropping any in-memory body.
    #[must_use]
    pub fn with_stream(mut self, stream: StreamContent) -> Self {
        self.body = RequestBody::Stream(Arc::new(stream));
        self
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Request body.
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// `host[:port]` of the target, used as log context.
    pub fn authority(&self) -> String {
        match (self.url.host_str(), self.url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => self.url.as_str().to_string(),
        }
    }
}
