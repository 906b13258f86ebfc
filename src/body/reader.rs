//! Response body reader.
//!
//! The reader decides once, from the declared content length, how a body is
//! handed to the caller:
//!
//! 1. **Stream mode**: the streaming predicate said yes. The engine body is
//!    wrapped unread into a [`ResponseStream`]; closing it releases the
//!    connection.
//! 2. **Known length**: the body is read up to that length. Small bodies fill
//!    an exact-size buffer; large ones grow with the bytes received, so a
//!    bogus header cannot force a huge allocation. A length above
//!    `max_response_body_size` yields `InsufficientStorage` without reading,
//!    and a body that ends early is a receive error.
//! 3. **Unknown length**: pooled chunks are appended to a growable buffer and
//!    the size cap is checked after every chunk.
//!
//! Every read races the exchange's cancellation token.

use crate::classify::SendError;
use crate::config::TransportSettings;
use crate::constants::{LARGE_OBJECT_THRESHOLD, PREFERRED_READ_SIZE};
use crate::engine::EngineBody;
use crate::model::{ResponseCode, ResponseStream};
use crate::pool::BufferPool;
use bytes::Bytes;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

/// What the reader produced.
#[derive(Debug)]
pub enum ReadResult {
    /// Fully materialized body.
    Content(Bytes),
    /// Live body stream handed to the caller.
    Stream(ResponseStream),
    /// The body was abandoned with the given code.
    Failed(ResponseCode),
}

type BodyReadHalf = StreamReader<EngineBody, Bytes>;

/// Reads response bodies for one transport.
#[derive(Clone, Debug, Default)]
pub struct BodyReader {
    pool: BufferPool,
}

impl BodyReader {
    /// Create a reader staging chunks through `pool`.
    pub fn new(pool: BufferPool) -> Self {
        BodyReader { pool }
    }

    /// Read `body` according to `settings`.
    ///
    /// # Errors
    ///
    /// [`SendError::Receive`] when the body fails or ends before the declared
    /// length, [`SendError::Canceled`] when `cancellation` fires mid-read.
    pub async fn read(
        &self,
        body: EngineBody,
        content_length: Option<u64>,
        settings: &TransportSettings,
        target: &str,
        cancellation: &CancellationToken,
    ) -> Result<ReadResult, SendError> {
        let mut reader = StreamReader::new(body);

        if settings.use_response_streaming.evaluate(content_length) {
            let stream = ResponseStream::new(Box::pin(reader), target.to_string());
            return Ok(ReadResult::Stream(stream));
        }

        match content_length {
            Some(0) => Ok(ReadResult::Content(Bytes::new())),
            Some(length) => {
                let within_cap = settings
                    .max_response_body_size
                    .map_or(true, |max| length <= max);
                match usize::try_from(length) {
                    Ok(length) if within_cap => {
                        self.read_known(&mut reader, length, cancellation).await
                    }
                    _ => {
                        if settings.max_response_drain_size.is_some_and(|max| length <= max) {
                            self.drain(&mut reader, length, cancellation).await;
                        }
                        Ok(ReadResult::Failed(ResponseCode::InsufficientStorage))
                    }
                }
            }
            None => {
                self.read_unknown(&mut reader, settings.max_response_body_size, cancellation)
                    .await
            }
        }
    }

    async fn read_known(
        &self,
        reader: &mut BodyReadHalf,
        length: usize,
        cancellation: &CancellationToken,
    ) -> Result<ReadResult, SendError> {
        let mut array;
        let mut total = 0;

        if length < LARGE_OBJECT_THRESHOLD {
            array = vec![0u8; length];
            while total < length {
                let want = (length - total).min(PREFERRED_READ_SIZE);
                let n = read_some(reader, &mut array[total..total + want], cancellation).await?;
                if n == 0 {
                    break;
                }
                total += n;
            }
        } else {
            // The declared length is untrusted: grow with the data actually received.
            array = Vec::with_capacity(LARGE_OBJECT_THRESHOLD);
            let mut buffer = self.pool.acquire();
            while total < length {
                let want = (length - total).min(buffer.len());
                let n = read_some(reader, &mut buffer[..want], cancellation).await?;
                if n == 0 {
                    break;
                }
                array.extend_from_slice(&buffer[..n]);
                total += n;
            }
        }

        if total < length {
            return Err(SendError::Receive(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "response stream ended prematurely: read {} of {} declared bytes",
                    total, length
                ),
            )));
        }

        Ok(ReadResult::Content(Bytes::from(array)))
    }

    async fn read_unknown(
        &self,
        reader: &mut BodyReadHalf,
        max: Option<u64>,
        cancellation: &CancellationToken,
    ) -> Result<ReadResult, SendError> {
        let mut collected = Vec::new();
        let mut buffer = self.pool.acquire();

        loop {
            let n = read_some(reader, &mut buffer, cancellation).await?;
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buffer[..n]);
            if max.is_some_and(|max| collected.len() as u64 > max) {
                return Ok(ReadResult::Failed(ResponseCode::InsufficientStorage));
            }
        }

        Ok(ReadResult::Content(Bytes::from(collected)))
    }

    /// Read and discard up to `length` bytes so the engine can reuse the connection.
    async fn drain(&self, reader: &mut BodyReadHalf, length: u64, cancellation: &CancellationToken) {
        let mut buffer = self.pool.acquire();
        let mut remaining = length;
        while remaining > 0 {
            let want = usize::try_from(remaining).map_or(buffer.len(), |r| r.min(buffer.len()));
            match read_some(reader, &mut buffer[..want], cancellation).await {
                Ok(0) | Err(_) => break,
                Ok(n) => remaining -= n as u64,
            }
        }
    }
}

async fn read_some<R>(
    reader: &mut R,
    buffer: &mut [u8],
    cancellation: &CancellationToken,
) -> Result<usize, SendError>
where
    R: AsyncRead + Unpin,
{
    tokio::select! {
        biased;
        _ = cancellation.cancelled() => Err(SendError::Canceled),
        read = reader.read(buffer) => read.map_err(SendError::Receive),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamingPredicate;
    use crate::engine::EngineError;
    use futures::stream;

    fn chunked(data: &[u8], chunk: usize) -> EngineBody {
        let chunks: Vec<Result<Bytes, EngineError>> = data
            .chunks(chunk)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Box::pin(stream::iter(chunks))
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    async fn read(
        body: EngineBody,
        length: Option<u64>,
        settings: &TransportSettings,
    ) -> Result<ReadResult, SendError> {
        BodyReader::default()
            .read(body, length, settings, "test", &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_known_length_small_and_large() {
        let settings = TransportSettings::default();
        for len in [1, 1000, LARGE_OBJECT_THRESHOLD, 300_000] {
            let data = payload(len);
            match read(chunked(&data, 7001), Some(len as u64), &settings).await {
                Ok(ReadResult::Content(content)) => assert_eq!(&content[..], &data[..]),
                other => panic!("unexpected result {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_zero_length_reads_nothing() {
        let body: EngineBody = Box::pin(stream::pending());
        let result = read(body, Some(0), &TransportSettings::default()).await;
        assert!(matches!(result, Ok(ReadResult::Content(c)) if c.is_empty()));
    }

    #[tokio::test]
    async fn test_truncated_body_is_receive_error() {
        let data = payload(500);
        let result = read(chunked(&data, 100), Some(1000), &TransportSettings::default()).await;
        match result {
            Err(SendError::Receive(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_huge_declared_length_is_not_preallocated() {
        let data = payload(4);
        let result = read(chunked(&data, 4), Some(1 << 62), &TransportSettings::default()).await;
        match result {
            Err(SendError::Receive(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversize_known_length_is_not_read() {
        let settings = TransportSettings {
            max_response_body_size: Some(100),
            ..Default::default()
        };
        let body: EngineBody = Box::pin(stream::pending());
        let result = read(body, Some(101), &settings).await;
        assert!(matches!(
            result,
            Ok(ReadResult::Failed(ResponseCode::InsufficientStorage))
        ));
    }

    #[tokio::test]
    async fn test_oversize_body_within_drain_cap_is_drained() {
        let settings = TransportSettings {
            max_response_body_size: Some(10),
            max_response_drain_size: Some(1000),
            ..Default::default()
        };
        let data = payload(200);
        let result = read(chunked(&data, 50), Some(200), &settings).await;
        assert!(matches!(
            result,
            Ok(ReadResult::Failed(ResponseCode::InsufficientStorage))
        ));
    }

    #[tokio::test]
    async fn test_unknown_length_enforces_cap_per_chunk() {
        let settings = TransportSettings {
            max_response_body_size: Some(1000),
            ..Default::default()
        };
        let within = payload(1000);
        match read(chunked(&within, 300), None, &settings).await {
            Ok(ReadResult::Content(content)) => assert_eq!(&content[..], &within[..]),
            other => panic!("unexpected result {:?}", other),
        }

        let mut chunks: Vec<Result<Bytes, EngineError>> = vec![Ok(Bytes::from(payload(1001)))];
        chunks.push(Err(EngineError::Other("must not be reached".into())));
        let body: EngineBody = Box::pin(stream::iter(chunks));
        let result = read(body, None, &settings).await;
        assert!(matches!(
            result,
            Ok(ReadResult::Failed(ResponseCode::InsufficientStorage))
        ));
    }

    #[tokio::test]
    async fn test_streaming_predicate_selects_stream_mode() {
        let settings = TransportSettings {
            use_response_streaming: StreamingPredicate::above(10),
            ..Default::default()
        };
        let data = payload(50);
        match read(chunked(&data, 8), Some(50), &settings).await {
            Ok(ReadResult::Stream(mut stream)) => {
                let mut received = Vec::new();
                stream.read_to_end(&mut received).await.unwrap();
                assert_eq!(received, data);
            }
            other => panic!("unexpected result {:?}", other),
        }

        match read(chunked(&data[..5], 8), Some(5), &settings).await {
            Ok(ReadResult::Content(content)) => assert_eq!(&content[..], &data[..5]),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_read() {
        let token = CancellationToken::new();
        token.cancel();
        let body: EngineBody = Box::pin(stream::pending());
        let result = BodyReader::default()
            .read(body, Some(10), &TransportSettings::default(), "test", &token)
            .await;
        assert!(matches!(result, Err(SendError::Canceled)));
    }

    #[tokio::test]
    async fn test_pool_buffers_returned_after_read() {
        let pool = BufferPool::new();
        let reader = BodyReader::new(pool.clone());
        let data = payload(200_000);
        let result = reader
            .read(
                chunked(&data, 10_000),
                Some(200_000),
                &TransportSettings::default(),
                "test",
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Ok(ReadResult::Content(_))));
        assert_eq!(pool.outstanding(), 0);
    }
}
