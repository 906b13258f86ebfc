//! Single-attempt request sender.
//!
//! One call to [`RequestSender::send`] performs exactly one exchange:
//!
//! 1. obtain the engine for the effective connect timeout,
//! 2. wait for a connection slot to the destination,
//! 3. build the outbound message and its body,
//! 4. hand it to the engine and wait for the response head only,
//! 5. check how the body write ended,
//! 6. run best-effort connection tuning,
//! 7. read the body and assemble the [`Response`].
//!
//! The slot is held until the body is read, or for a streamed body until the
//! caller releases the [`ResponseStream`](crate::ResponseStream).
//!
//! Failures are classified into response codes. Retrying is left to the
//! calling layer.

use crate::body::{BodyReader, BodyWriter, ReadResult, WriteOutcome, WriteReport};
use crate::cache::ClientProvider;
use crate::classify::{classify, log_failure, Classification, SendError};
use crate::config::TransportSettings;
use crate::constants::WRITE_OUTCOME_GRACE;
use crate::engine::{ConnectionInfo, EngineError, EngineRequest};
use crate::error::{Result, TransportError};
use crate::limiter::EndpointLimiter;
use crate::model::headers::names;
use crate::model::{Headers, Method, Request, Response, ResponseCode};
use crate::pool::BufferPool;
use crate::tuning::{ArpCacheWarmer, TuningChain};
use http::header::{HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Request headers never copied verbatim to the outbound message.
const SKIPPED_HEADERS: [&str; 4] = [
    names::CONTENT_LENGTH,
    names::CONNECTION,
    names::HOST,
    names::TRANSFER_ENCODING,
];

/// State of one in-flight attempt.
#[derive(Debug)]
pub struct SendContext {
    target: String,
    connect_timeout: Option<Duration>,
    caller: CancellationToken,
    exchange: CancellationToken,
    connection: Option<ConnectionInfo>,
}

impl SendContext {
    /// Context for sending `request`.
    ///
    /// `caller` is the caller's own token; `exchange` is cancelled when the
    /// attempt must stop for any reason, including the caller's token firing.
    pub fn new(
        request: &Request,
        connect_timeout: Option<Duration>,
        caller: CancellationToken,
        exchange: CancellationToken,
    ) -> Self {
        SendContext {
            target: request.authority(),
            connect_timeout,
            caller,
            exchange,
            connection: None,
        }
    }

    /// `host[:port]` of the destination.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Connection the response head arrived on, once known.
    pub fn connection(&self) -> Option<&ConnectionInfo> {
        self.connection.as_ref()
    }
}

/// Performs single exchanges for one transport.
pub struct RequestSender {
    settings: Arc<TransportSettings>,
    provider: ClientProvider,
    writer: BodyWriter,
    reader: BodyReader,
    tuning: TuningChain,
    limiter: EndpointLimiter,
}

impl RequestSender {
    /// Create a sender over `provider`, staging bodies through `pool`.
    pub fn new(
        settings: Arc<TransportSettings>,
        provider: ClientProvider,
        pool: BufferPool,
        arp: &Arc<ArpCacheWarmer>,
    ) -> Self {
        let tuning = TuningChain::from_settings(&settings, arp);
        let limiter = EndpointLimiter::new(settings.max_connections_per_endpoint);
        RequestSender {
            settings,
            provider,
            writer: BodyWriter::new(pool.clone()),
            reader: BodyReader::new(pool),
            tuning,
            limiter,
        }
    }

    /// Send `request` once.
    ///
    /// # Errors
    ///
    /// Only [`TransportError::StreamAlreadyUsed`]; every other failure is a
    /// [`Response`] with a synthetic code.
    pub async fn send(&self, request: &Request, context: &mut SendContext) -> Result<Response> {
        let error = match self.exchange(request, context).await {
            Ok(response) => return Ok(response),
            Err(error) => error,
        };

        match classify(&error, context.caller.is_cancelled()) {
            Classification::Propagate => match error {
                SendError::Transport(misuse) => Err(misuse),
                _ => Err(TransportError::StreamAlreadyUsed),
            },
            Classification::Handled(code) => {
                log_failure(&error, code, &context.target);
                Ok(Response::new(code))
            }
        }
    }

    async fn exchange(
        &self,
        request: &Request,
        context: &mut SendContext,
    ) -> std::result::Result<Response, SendError> {
        let engine = self.provider.obtain(context.connect_timeout).await?;

        let permit = tokio::select! {
            biased;
            _ = context.exchange.cancelled() => return Err(SendError::Canceled),
            permit = self.limiter.acquire(&context.target) => permit.map_err(|e| {
                SendError::Engine(EngineError::Other(format!("connection slot unavailable: {}", e)))
            })?,
        };

        let (body, mut report) = self
            .writer
            .prepare(request.body(), context.exchange.clone())?;

        let message = EngineRequest {
            method: translate_method(request.method())?,
            url: request.url().clone(),
            headers: build_headers(request.headers(), &context.target),
            body,
        };

        let sent = tokio::select! {
            biased;
            _ = context.exchange.cancelled() => return Err(SendError::Canceled),
            sent = engine.send(message) => sent,
        };

        let head = match sent {
            Ok(head) => head,
            Err(error) => return Err(refine(error, &mut report).await),
        };

        match report.outcome() {
            Some(WriteOutcome::SourceFailed(e)) => return Err(SendError::UserStream(e)),
            Some(WriteOutcome::Canceled) => return Err(SendError::Canceled),
            _ => {}
        }

        context.connection = head.connection;
        self.tuning.apply(context.connection.as_ref(), &context.target);

        let code = ResponseCode::from_status(head.status);
        let headers = convert_headers(&head.headers);

        let result = self
            .reader
            .read(
                head.body,
                head.content_length,
                &self.settings,
                &context.target,
                &context.exchange,
            )
            .await?;

        let response = match result {
            ReadResult::Content(content) => Response::new(code)
                .with_headers(headers)
                .with_content(content),
            ReadResult::Stream(stream) => Response::new(code)
                .with_headers(headers)
                .with_stream(stream.with_permit(permit)),
            ReadResult::Failed(code) => Response::new(code).with_headers(headers),
        };

        Ok(response)
    }
}

impl std::fmt::Debug for RequestSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSender")
            .field("provider", &self.provider)
            .field("tuners", &self.tuning.len())
            .field("limiter", &self.limiter)
            .finish()
    }
}

/// Attribute an engine failure using what the body writer reported.
///
/// Once body bytes have reached the engine, a failure that is not a connect
/// failure is a send failure.
async fn refine(error: EngineError, report: &mut WriteReport) -> SendError {
    let outcome = match report.outcome() {
        Some(outcome) => Some(outcome),
        None => report.settle(WRITE_OUTCOME_GRACE).await,
    };

    match outcome {
        Some(WriteOutcome::SourceFailed(e)) => SendError::UserStream(e),
        Some(WriteOutcome::Canceled) => SendError::Canceled,
        _ if error.is_connect() => SendError::Engine(error),
        Some(WriteOutcome::Abandoned { bytes_sent } | WriteOutcome::Completed { bytes_sent })
            if bytes_sent > 0 =>
        {
            SendError::BodySend(error)
        }
        _ => SendError::Engine(error),
    }
}

fn translate_method(method: &Method) -> std::result::Result<http::Method, SendError> {
    let translated = match method {
        Method::Get => http::Method::GET,
        Method::Post => http::Method::POST,
        Method::Put => http::Method::PUT,
        Method::Patch => http::Method::PATCH,
        Method::Delete => http::Method::DELETE,
        Method::Head => http::Method::HEAD,
        Method::Options => http::Method::OPTIONS,
        Method::Trace => http::Method::TRACE,
        Method::Other(token) => http::Method::from_bytes(token.as_bytes()).map_err(|e| {
            SendError::Engine(EngineError::Other(format!(
                "invalid request method '{}': {}",
                token, e
            )))
        })?,
    };
    Ok(translated)
}

fn build_headers(headers: &Headers, target: &str) -> http::HeaderMap {
    let mut map = http::HeaderMap::with_capacity(headers.len());

    for (name, value) in headers.iter() {
        if SKIPPED_HEADERS.iter().any(|skipped| skipped.eq_ignore_ascii_case(name)) {
            continue;
        }
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => tracing::error!(target = %target, header = %name, "skipping invalid request header"),
        }
    }

    if let Some(host) = headers.get(names::HOST) {
        match HeaderValue::from_str(host) {
            Ok(host) => {
                map.insert(http::header::HOST, host);
            }
            Err(_) => tracing::error!(target = %target, host = %host, "skipping invalid Host header"),
        }
    }

    map
}

/// Fold engine headers into the multimap, joining repeated names with `", "`.
fn convert_headers(map: &http::HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for name in map.keys() {
        let joined = map
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()))
            .collect::<Vec<_>>()
            .join(", ");
        headers.set(name.as_str(), joined);
    }
    headers
}
