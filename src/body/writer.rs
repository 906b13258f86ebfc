//! Request body writer.
//!
//! Turns a [`RequestBody`] into the chunk stream the engine pulls while writing
//! to the connection, and reports how the write ended through a
//! [`WriteReport`]:
//!
//! | Body | Strategy |
//! |------|----------|
//! | empty | no chunks |
//! | content below [`LARGE_OBJECT_THRESHOLD`] | one chunk sharing the caller buffer |
//! | larger content | copied through pooled buffers in bounded chunks |
//! | stream | read into pooled buffers up to the declared length or end of data |
//!
//! The engine only sees an `io::Error` when a chunk cannot be produced; the
//! report tells the sender whether that was the caller's stream failing, the
//! exchange being cancelled, or the engine giving up on the body.

use crate::constants::LARGE_OBJECT_THRESHOLD;
use crate::engine::OutboundBody;
use crate::error::Result;
use crate::model::{BodySource, Content, RequestBody};
use crate::pool::BufferPool;
use bytes::Bytes;
use futures::stream;
use std::io;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// How a request body write ended.
#[derive(Debug)]
pub enum WriteOutcome {
    /// Every byte was handed to the engine.
    Completed {
        /// Bytes handed over.
        bytes_sent: u64,
    },
    /// Reading the caller's body stream failed.
    SourceFailed(io::Error),
    /// The exchange was cancelled while the body was being produced.
    Canceled,
    /// The engine dropped the body before it was complete.
    Abandoned {
        /// Bytes handed over before the body was dropped.
        bytes_sent: u64,
    },
}

/// Receiving side of a body write's outcome.
#[derive(Debug)]
pub struct WriteReport {
    outcome: oneshot::Receiver<WriteOutcome>,
}

impl WriteReport {
    /// The outcome, once the body has finished or been dropped.
    pub fn outcome(&mut self) -> Option<WriteOutcome> {
        self.outcome.try_recv().ok()
    }

    /// Wait up to `grace` for the outcome.
    ///
    /// The engine may drop the body on its connection task shortly after it
    /// has already failed the exchange.
    pub async fn settle(&mut self, grace: Duration) -> Option<WriteOutcome> {
        match tokio::time::timeout(grace, &mut self.outcome).await {
            Ok(Ok(outcome)) => Some(outcome),
            _ => None,
        }
    }
}

/// Sending side, owned by the chunk stream.
///
/// Reports `Abandoned` when dropped without an outcome.
struct Reporter {
    outcome: Option<oneshot::Sender<WriteOutcome>>,
    bytes_sent: u64,
}

impl Reporter {
    fn channel() -> (Reporter, WriteReport) {
        let (tx, rx) = oneshot::channel();
        let reporter = Reporter {
            outcome: Some(tx),
            bytes_sent: 0,
        };
        (reporter, WriteReport { outcome: rx })
    }

    fn finish(&mut self, outcome: WriteOutcome) {
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(outcome);
        }
    }

    fn complete(&mut self) {
        let bytes_sent = self.bytes_sent;
        self.finish(WriteOutcome::Completed { bytes_sent });
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        let bytes_sent = self.bytes_sent;
        self.finish(WriteOutcome::Abandoned { bytes_sent });
    }
}

fn canceled() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "request body write canceled")
}

/// Produces outbound bodies for one transport.
#[derive(Clone, Debug, Default)]
pub struct BodyWriter {
    pool: BufferPool,
}

impl BodyWriter {
    /// Create a writer staging chunks through `pool`.
    pub fn new(pool: BufferPool) -> Self {
        BodyWriter { pool }
    }

    /// Prepare the outbound body for `body`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::StreamAlreadyUsed`](crate::TransportError::StreamAlreadyUsed)
    /// if a stream body was already sent by an earlier exchange.
    pub fn prepare(
        &self,
        body: &RequestBody,
        cancellation: CancellationToken,
    ) -> Result<(OutboundBody, WriteReport)> {
        let (mut reporter, report) = Reporter::channel();

        let outbound = match body {
            RequestBody::Empty => {
                reporter.complete();
                OutboundBody::Empty
            }
            RequestBody::Content(content) if content.is_empty() => {
                reporter.complete();
                OutboundBody::Empty
            }
            RequestBody::Content(content) if content.len() < LARGE_OBJECT_THRESHOLD => {
                direct_content(content, reporter)
            }
            RequestBody::Content(content) => {
                chunked_content(content, self.pool.clone(), reporter, cancellation)
            }
            RequestBody::Stream(stream) => {
                let source = stream.take()?;
                stream_source(source, stream.length(), self.pool.clone(), reporter, cancellation)
            }
        };

        Ok((outbound, report))
    }
}

fn direct_content(content: &Content, mut reporter: Reporter) -> OutboundBody {
    let chunk = content.to_bytes();
    let length = chunk.len() as u64;

    let chunks = stream::once(async move {
        reporter.bytes_sent = length;
        reporter.complete();
        Ok::<Bytes, io::Error>(chunk)
    });

    OutboundBody::Chunks {
        chunks: Box::pin(chunks),
        length: Some(length),
    }
}

struct ContentCopy {
    source: Bytes,
    offset: usize,
    pool: BufferPool,
    reporter: Reporter,
    cancellation: CancellationToken,
}

fn chunked_content(
    content: &Content,
    pool: BufferPool,
    reporter: Reporter,
    cancellation: CancellationToken,
) -> OutboundBody {
    let source = content.to_bytes();
    let length = source.len() as u64;
    let state = ContentCopy {
        source,
        offset: 0,
        pool,
        reporter,
        cancellation,
    };

    let chunks = stream::unfold(Some(state), |state| async move {
        let Some(mut state) = state else {
            return None;
        };
        if state.cancellation.is_cancelled() {
            state.reporter.finish(WriteOutcome::Canceled);
            return Some((Err(canceled()), None));
        }

        let remaining = state.source.len() - state.offset;
        let mut buffer = state.pool.acquire();
        let n = remaining.min(buffer.len());
        buffer[..n].copy_from_slice(&state.source[state.offset..state.offset + n]);
        state.offset += n;
        state.reporter.bytes_sent += n as u64;

        let chunk = buffer.freeze(n);
        if state.offset == state.source.len() {
            state.reporter.complete();
            Some((Ok(chunk), None))
        } else {
            Some((Ok(chunk), Some(state)))
        }
    });

    OutboundBody::Chunks {
        chunks: Box::pin(chunks),
        length: Some(length),
    }
}

struct StreamCopy {
    source: BodySource,
    remaining: Option<u64>,
    declared: Option<u64>,
    pool: BufferPool,
    reporter: Reporter,
    cancellation: CancellationToken,
}

fn stream_source(
    source: BodySource,
    length: Option<u64>,
    pool: BufferPool,
    mut reporter: Reporter,
    cancellation: CancellationToken,
) -> OutboundBody {
    if length == Some(0) {
        reporter.complete();
        return OutboundBody::Empty;
    }

    let state = StreamCopy {
        source,
        remaining: length,
        declared: length,
        pool,
        reporter,
        cancellation,
    };

    let chunks = stream::unfold(Some(state), |state| async move {
        let Some(mut state) = state else {
            return None;
        };
        let mut buffer = state.pool.acquire();
        let want = match state.remaining {
            Some(remaining) => usize::try_from(remaining).map_or(buffer.len(), |r| r.min(buffer.len())),
            None => buffer.len(),
        };

        let read = tokio::select! {
            biased;
            _ = state.cancellation.cancelled() => {
                state.reporter.finish(WriteOutcome::Canceled);
                return Some((Err(canceled()), None));
            }
            read = state.source.read(&mut buffer[..want]) => read,
        };

        match read {
            Ok(0) => match state.declared {
                None => {
                    state.reporter.complete();
                    None
                }
                Some(declared) => {
                    let error = io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!(
                            "request body stream ended after {} of {} bytes",
                            state.reporter.bytes_sent, declared
                        ),
                    );
                    state.reporter.finish(WriteOutcome::SourceFailed(error));
                    Some((Err(io::Error::from(io::ErrorKind::UnexpectedEof)), None))
                }
            },
            Ok(n) => {
                state.reporter.bytes_sent += n as u64;
                let chunk = buffer.freeze(n);
                if let Some(remaining) = state.remaining.as_mut() {
                    *remaining -= n as u64;
                    if *remaining == 0 {
                        state.reporter.complete();
                        return Some((Ok(chunk), None));
                    }
                }
                Some((Ok(chunk), Some(state)))
            }
            Err(e) => {
                let kind = e.kind();
                state.reporter.finish(WriteOutcome::SourceFailed(e));
                Some((Err(io::Error::new(kind, "request body stream failed")), None))
            }
        }
    });

    OutboundBody::Chunks {
        chunks: Box::pin(chunks),
        length,
    }
}
