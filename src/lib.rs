#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

//! # Sockets Transport
//!
//! A single-attempt HTTP transport for cluster-aware clients. The calling layer
//! picks a replica, decides whether to retry, and hands one [`Request`] to
//! [`Transport::send`]; the transport performs exactly one exchange and always
//! answers with a [`Response`]: transport failures are response codes, not
//! errors.
//!
//! ## Key Features
//!
//! - **Deadlines**: an overall timeout per call plus a connect timeout per
//!   attempt, with a bounded abort wait for exchanges that overrun.
//! - **Cancellation**: the caller's [`CancellationToken`](tokio_util::sync::CancellationToken)
//!   is honoured before dispatch, while connecting, writing and reading.
//! - **Body streaming**: request bodies may be caller streams; response
//!   bodies are buffered or handed out as a live [`ResponseStream`] depending
//!   on a predicate over the declared length.
//! - **Pooled buffers**: bodies move through leases from a [`BufferPool`].
//! - **Engine caching**: engines (and their connection pools) are cached per
//!   connection settings and shared between transports.
//!
//! ## Response Codes
//!
//! | Code | When |
//! |------|------|
//! | peer status | the exchange completed |
//! | `RequestTimeout` | the overall deadline elapsed |
//! | `Canceled` | the caller cancelled |
//! | `ConnectFailure` | no connection could be established |
//! | `SendFailure` | writing the request body failed |
//! | `StreamInputFailure` | reading the caller's body stream failed |
//! | `ReceiveFailure` | the response body failed or ended early |
//! | `InsufficientStorage` | the response body exceeds the size cap |
//! | `UnknownFailure` | anything else |
//!
//! ## Usage
//!
//! ```no_run
//! use sockets_transport::{Content, Request, ResponseCode, Transport, TransportSettings};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Transport::new(TransportSettings {
//!         max_response_body_size: Some(16 * 1024 * 1024),
//!         ..Default::default()
//!     })?;
//!
//!     let request = Request::post(Url::parse("http://localhost:8080/items")?)
//!         .with_header("Content-Type", "application/json")
//!         .with_content(Content::new(&b"{\"id\":1}"[..]));
//!
//!     let response = transport
//!         .send(request, Some(Duration::from_millis(300)), Duration::from_secs(5), CancellationToken::new())
//!         .await?;
//!
//!     if response.code() == ResponseCode::OK {
//!         println!("{} bytes", response.content().map_or(0, |c| c.len()));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! ```text
//! sockets_transport/
//! ├── transport  - entry point, deadline and abort wait
//! ├── sender     - single exchange
//! ├── classify   - failure to response code mapping
//! ├── body       - request writer and response reader
//! ├── engine     - HTTP engine seam and reqwest engine
//! ├── cache      - engine caching
//! ├── limiter    - per-destination connection cap
//! ├── tuning     - post-connect tuning
//! ├── pool       - buffer pool
//! ├── model      - request, response, headers
//! ├── config     - settings
//! ├── constants  - sizes and thresholds
//! └── error      - library errors
//! ```

pub mod body;
pub mod cache;
pub mod classify;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod model;
pub mod pool;
pub mod sender;
pub mod transport;
pub mod tuning;

pub use cache::{ClientProvider, HandlerCache, SettingsKey, SharedEngineCache};
pub use config::{SettingsFile, StreamingPredicate, TransportSettings};
pub use engine::{EngineFactory, HttpEngine, ReqwestEngineFactory};
pub use error::{Result, TransportError};
pub use model::{
    Content, Headers, Method, Request, RequestBody, Response, ResponseCode, ResponseStream,
    StreamContent,
};
pub use pool::BufferPool;
pub use transport::Transport;
pub use tuning::{ArpCacheWarmer, NoopTuner, SocketTuner};
