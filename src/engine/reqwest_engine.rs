//! Default engine backed by [`reqwest`].
//!
//! One [`reqwest::Client`] is built per [`SettingsKey`]; it owns the connection
//! pool for every destination reached through it. The client is built with
//! automatic decompression off, cookies off and redirects off unless the
//! settings allow them.
//!
//! reqwest has no knob for a maximum connection lifetime; that part of the key
//! only keeps differently configured transports on separate clients. The
//! per-destination connection cap is enforced by the transport, the client only
//! bounds how many idle connections it keeps.

use super::{
    ConnectionInfo, EngineError, EngineFactory, EngineRequest, EngineResponse, HttpEngine,
    OutboundBody, SocketError,
};
use crate::cache::SettingsKey;
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::redirect::Policy;
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

const MAX_REDIRECTS: usize = 3;

/// [`HttpEngine`] over a pooled [`reqwest::Client`].
#[derive(Clone, Debug)]
pub struct ReqwestEngine {
    client: reqwest::Client,
}

impl ReqwestEngine {
    /// Build a client configured from `key`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::EngineBuild`] if the proxy URL is rejected or
    /// the TLS backend cannot be initialised.
    pub fn build(key: &SettingsKey) -> Result<Self> {
        let redirect = if key.allow_auto_redirect {
            Policy::limited(MAX_REDIRECTS)
        } else {
            Policy::none()
        };

        let mut builder = reqwest::Client::builder()
            .redirect(redirect)
            .pool_idle_timeout(key.idle_timeout)
            .pool_max_idle_per_host(key.max_connections_per_endpoint)
            .danger_accept_invalid_certs(key.accept_invalid_certs);

        if let Some(timeout) = key.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }

        if let Some(keep_alive) = key.tcp_keep_alive {
            builder = builder
                .tcp_keepalive(keep_alive.time)
                .tcp_keepalive_interval(keep_alive.interval);
        }

        builder = match &key.proxy {
            Some(url) => {
                let proxy = reqwest::Proxy::all(url.as_str())
                    .map_err(|e| TransportError::EngineBuild(format!("invalid proxy: {}", e)))?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        let client = builder
            .build()
            .map_err(|e| TransportError::EngineBuild(e.to_string()))?;

        Ok(ReqwestEngine { client })
    }

    /// Wrap an already configured client.
    pub fn from_client(client: reqwest::Client) -> Self {
        ReqwestEngine { client }
    }
}

#[async_trait]
impl HttpEngine for ReqwestEngine {
    async fn send(&self, request: EngineRequest) -> std::result::Result<EngineResponse, EngineError> {
        let EngineRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = self.client.request(method, url).headers(headers);

        builder = match body {
            OutboundBody::Empty => builder,
            OutboundBody::Chunks { chunks, length } => {
                if let Some(length) = length {
                    builder = builder.header(http::header::CONTENT_LENGTH, length);
                }
                builder.body(reqwest::Body::wrap_stream(chunks))
            }
        };

        let response = builder.send().await.map_err(map_error)?;

        Ok(EngineResponse {
            status: response.status().as_u16(),
            headers: response.headers().clone(),
            content_length: response.content_length(),
            connection: Some(ConnectionInfo {
                remote_addr: response.remote_addr(),
            }),
            body: Box::pin(response.bytes_stream().map_err(map_error)),
        })
    }
}

/// Builds one [`ReqwestEngine`] per settings key.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReqwestEngineFactory;

impl EngineFactory for ReqwestEngineFactory {
    fn create(&self, key: &SettingsKey) -> Result<Arc<dyn HttpEngine>> {
        Ok(Arc::new(ReqwestEngine::build(key)?))
    }
}

fn map_error(error: reqwest::Error) -> EngineError {
    let message = describe(&error);
    let io_error = find_io_error(&error);

    if error.is_connect() {
        if error.is_timeout() {
            return EngineError::ConnectTimeout(message);
        }
        let code = if mentions_name_resolution(&error) {
            SocketError::HostNotFound
        } else {
            io_error.map_or(SocketError::Other, SocketError::from_io)
        };
        return EngineError::Connect { code, message };
    }

    if error.is_timeout() {
        return EngineError::Io {
            code: SocketError::TimedOut,
            message,
        };
    }

    match io_error {
        Some(io_error) => EngineError::Io {
            code: SocketError::from_io(io_error),
            message,
        },
        None => EngineError::Other(message),
    }
}

fn sources<'a>(error: &'a (dyn StdError + 'static)) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(error), |&e| e.source())
}

fn find_io_error(error: &reqwest::Error) -> Option<&io::Error> {
    sources(error).find_map(|e| e.downcast_ref::<io::Error>())
}

fn mentions_name_resolution(error: &reqwest::Error) -> bool {
    sources(error).any(|e| {
        let text = e.to_string();
        text.contains("dns error") || text.contains("failed to lookup address")
    })
}

/// The error and all of its causes on one line.
fn describe(error: &reqwest::Error) -> String {
    sources(error)
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportSettings;
    use std::time::Duration;
    use url::Url;

    #[test]
    fn test_build_with_defaults() {
        let key = SettingsKey::new(&TransportSettings::default(), None);
        assert!(ReqwestEngine::build(&key).is_ok());
    }

    #[test]
    fn test_build_with_proxy() {
        let settings = TransportSettings {
            proxy: Some("http://127.0.0.1:3128".into()),
            allow_auto_redirect: true,
            tcp_keep_alive_enabled: true,
            ..Default::default()
        };
        let key = SettingsKey::new(&settings, None);
        assert!(ReqwestEngineFactory.create(&key).is_ok());
    }

    #[test]
    fn test_build_with_keep_alive_probes() {
        let settings = TransportSettings {
            tcp_keep_alive_enabled: true,
            tcp_keep_alive_time: Duration::from_secs(10),
            tcp_keep_alive_interval: Duration::from_secs(2),
            ..Default::default()
        };
        let key = SettingsKey::new(&settings, None);
        let keep_alive = key.tcp_keep_alive.unwrap();
        assert_eq!(keep_alive.interval, Duration::from_secs(2));
        assert!(ReqwestEngine::build(&key).is_ok());
    }

    #[tokio::test]
    async fn test_refused_connection_maps_to_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let key = SettingsKey::new(&TransportSettings::default(), None);
        let engine = ReqwestEngine::build(&key).unwrap();
        let request = EngineRequest {
            method: http::Method::GET,
            url: Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap(),
            headers: http::HeaderMap::new(),
            body: OutboundBody::Empty,
        };

        match engine.send(request).await {
            Err(EngineError::Connect { code, .. }) => {
                assert_eq!(code, SocketError::ConnectionRefused)
            }
            other => panic!("expected connect error, got {:?}", other.map(|r| r.status)),
        }
    }
}
