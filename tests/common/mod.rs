//! Test utilities: a scripted in-memory engine and a log capture layer.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use parking_lot::Mutex;
use sockets_transport::cache::SettingsKey;
use sockets_transport::engine::{
    ConnectionInfo, EngineBody, EngineError, EngineFactory, EngineRequest, EngineResponse,
    HttpEngine, OutboundBody, SocketError,
};
use sockets_transport::{Transport, TransportSettings};
use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::Layer;

/// Peer address reported by the scripted engine.
pub const PEER: &str = "10.1.2.3:8080";

/// What the engine does with the next request.
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Read the whole request body, then answer.
    Reply(Reply),
    /// Fail the handshake.
    ConnectError(SocketError),
    /// Pull one body chunk, then fail as if the connection was reset.
    ResetAfterFirstChunk,
    /// Never answer.
    Hang,
}

/// Scripted response.
#[derive(Clone, Debug)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub declared_length: Option<u64>,
    pub chunks: Vec<Bytes>,
    pub body_error: bool,
    pub hang_after_chunks: bool,
    pub delay: Duration,
}

impl Reply {
    /// 200 with `body`, declared length and 4 KiB chunks.
    pub fn ok(body: &[u8]) -> Self {
        Reply {
            status: 200,
            headers: Vec::new(),
            declared_length: Some(body.len() as u64),
            chunks: body.chunks(4096).map(Bytes::copy_from_slice).collect(),
            body_error: false,
            hang_after_chunks: false,
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        Reply {
            status,
            ..Reply::ok(b"")
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_declared_length(mut self, length: Option<u64>) -> Self {
        self.declared_length = length;
        self
    }

    pub fn with_body_error(mut self) -> Self {
        self.body_error = true;
        self
    }

    pub fn hanging_after_chunks(mut self) -> Self {
        self.hang_after_chunks = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A request as observed by the engine.
#[derive(Clone, Debug)]
pub struct Captured {
    pub method: http::Method,
    pub url: String,
    pub headers: http::HeaderMap,
    pub declared_length: Option<u64>,
    pub body: Vec<u8>,
}

/// Counters shared between the engine, its bodies and the test.
#[derive(Debug, Default)]
pub struct Stats {
    pub sends: AtomicUsize,
    pub body_polls: AtomicUsize,
    pub bodies_released: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    pub captured: Mutex<Vec<Captured>>,
}

impl Stats {
    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn body_polls(&self) -> usize {
        self.body_polls.load(Ordering::SeqCst)
    }

    pub fn bodies_released(&self) -> usize {
        self.bodies_released.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<Captured> {
        self.captured.lock().last().cloned()
    }

    /// Exchanges inside the engine right now, counting unreleased bodies.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

/// Marks one exchange as inside the engine until dropped.
struct InFlight {
    stats: Arc<Stats>,
}

impl InFlight {
    fn enter(stats: &Arc<Stats>) -> Self {
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight {
            stats: stats.clone(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Response body that counts polls and reports when it is dropped.
struct TrackedBody {
    inner: EngineBody,
    stats: Arc<Stats>,
    _in_flight: InFlight,
}

impl Stream for TrackedBody {
    type Item = Result<Bytes, EngineError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stats.body_polls.fetch_add(1, Ordering::SeqCst);
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        self.stats.bodies_released.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory engine following a [`Behavior`].
pub struct ScriptedEngine {
    behavior: Behavior,
    stats: Arc<Stats>,
}

#[async_trait]
impl HttpEngine for ScriptedEngine {
    async fn send(&self, request: EngineRequest) -> Result<EngineResponse, EngineError> {
        self.stats.sends.fetch_add(1, Ordering::SeqCst);
        let in_flight = InFlight::enter(&self.stats);

        let reply = match &self.behavior {
            Behavior::ConnectError(code) => {
                return Err(EngineError::Connect {
                    code: *code,
                    message: "scripted connect failure".into(),
                })
            }
            Behavior::Hang => std::future::pending().await,
            Behavior::ResetAfterFirstChunk => {
                if let OutboundBody::Chunks { mut chunks, .. } = request.body {
                    let _ = chunks.next().await;
                }
                return Err(EngineError::Io {
                    code: SocketError::ConnectionReset,
                    message: "scripted reset while writing body".into(),
                });
            }
            Behavior::Reply(reply) => reply.clone(),
        };

        let EngineRequest {
            method,
            url,
            headers,
            body,
        } = request;
        let declared_length = body.content_length();

        let mut received = Vec::new();
        if let OutboundBody::Chunks { mut chunks, .. } = body {
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(chunk) => received.extend_from_slice(&chunk),
                    Err(e) => return Err(EngineError::Other(format!("request body failed: {}", e))),
                }
            }
        }

        self.stats.captured.lock().push(Captured {
            method,
            url: url.to_string(),
            headers,
            declared_length,
            body: received,
        });

        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }

        let mut headers = http::HeaderMap::new();
        for (name, value) in &reply.headers {
            headers.append(
                http::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                http::header::HeaderValue::from_str(value).unwrap(),
            );
        }

        let chunks = stream::iter(reply.chunks.into_iter().map(Ok));
        let inner: EngineBody = if reply.body_error {
            let failure = stream::once(async {
                Err(EngineError::Io {
                    code: SocketError::ConnectionReset,
                    message: "scripted body failure".into(),
                })
            });
            Box::pin(chunks.chain(failure))
        } else if reply.hang_after_chunks {
            Box::pin(chunks.chain(stream::pending()))
        } else {
            Box::pin(chunks)
        };

        Ok(EngineResponse {
            status: reply.status,
            headers,
            content_length: reply.declared_length,
            connection: Some(ConnectionInfo {
                remote_addr: Some(PEER.parse::<SocketAddr>().unwrap()),
            }),
            body: Box::pin(TrackedBody {
                inner,
                stats: self.stats.clone(),
                _in_flight: in_flight,
            }),
        })
    }
}

/// Factory handing out [`ScriptedEngine`]s and counting constructions.
pub struct ScriptedFactory {
    behavior: Behavior,
    pub stats: Arc<Stats>,
    pub created: AtomicUsize,
    pub build_delay: Duration,
}

impl ScriptedFactory {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(ScriptedFactory {
            behavior,
            stats: Arc::new(Stats::default()),
            created: AtomicUsize::new(0),
            build_delay: Duration::ZERO,
        })
    }

    pub fn slow(behavior: Behavior, build_delay: Duration) -> Arc<Self> {
        Arc::new(ScriptedFactory {
            behavior,
            stats: Arc::new(Stats::default()),
            created: AtomicUsize::new(0),
            build_delay,
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl EngineFactory for ScriptedFactory {
    fn create(&self, _key: &SettingsKey) -> sockets_transport::Result<Arc<dyn HttpEngine>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        if !self.build_delay.is_zero() {
            std::thread::sleep(self.build_delay);
        }
        Ok(Arc::new(ScriptedEngine {
            behavior: self.behavior.clone(),
            stats: self.stats.clone(),
        }))
    }
}

/// Transport over a scripted engine.
pub fn scripted(settings: TransportSettings, behavior: Behavior) -> (Transport, Arc<ScriptedFactory>) {
    let factory = ScriptedFactory::new(behavior);
    let transport = Transport::with_engine_factory(settings, factory.clone()).unwrap();
    (transport, factory)
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 253) as u8).collect()
}

/// A log event recorded by the capture layer.
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    pub level: Level,
    pub text: String,
}

fn events() -> &'static Mutex<Vec<CapturedEvent>> {
    static EVENTS: OnceLock<Mutex<Vec<CapturedEvent>>> = OnceLock::new();
    EVENTS.get_or_init(|| Mutex::new(Vec::new()))
}

struct FieldText(String);

impl Visit for FieldText {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        use std::fmt::Write;
        let _ = write!(self.0, "{}={:?} ", field.name(), value);
    }
}

struct CaptureLayer;

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
        let mut text = FieldText(String::new());
        event.record(&mut text);
        events().lock().push(CapturedEvent {
            level: *event.metadata().level(),
            text: text.0,
        });
    }
}

/// Install the process-wide capture layer once.
pub fn capture_logs() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let subscriber = tracing_subscriber::registry().with(CaptureLayer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Captured events whose text mentions `needle`.
pub fn logged(needle: &str) -> Vec<CapturedEvent> {
    events()
        .lock()
        .iter()
        .filter(|event| event.text.contains(needle))
        .cloned()
        .collect()
}

/// Poll `condition` every 10 ms until it holds or `limit` passes.
pub async fn wait_for<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < limit {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
