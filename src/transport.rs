//! Base transport seam.
//!
//! The core treats the transport as a single suspending call per attempt.
//! Connection pooling, TLS and DNS live behind this trait; tests inject
//! scripted transports through it.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use thiserror::Error;

use crate::request::LogicalRequest;

/// Raw failure from a single attempt, before classification.
///
/// Variants distinguish the send phase so the classifier can tell provably
/// pre-send failures (safe to retry even for non-idempotent requests) from
/// ambiguous post-send ones.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established (refused, reset during connect,
    /// DNS failure). The request never reached the server.
    #[error("connection failed: {message}")]
    Connect { message: String },

    /// The attempt exceeded its timeout. The server may have executed it.
    #[error("attempt timed out")]
    Timeout,

    /// Network failure after the request was sent. Ambiguous: the server may
    /// have executed it.
    #[error("network error after send: {message}")]
    Network { message: String },

    /// Anything else (request build failure, protocol violation).
    #[error("transport error: {message}")]
    Other { message: String },
}

/// A complete HTTP response from one attempt.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// One attempt in, one outcome out. Implementations must not retry
/// internally; the retry executor owns that loop.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &LogicalRequest,
        attempt_timeout: Option<Duration>,
    ) -> Result<RawResponse, TransportError>;
}

/// Production transport over a pooled reqwest client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| {
                crate::Error::Transport(TransportError::Other {
                    message: e.to_string(),
                })
            })?;
        Ok(Self { client })
    }

    /// Wrap an already-configured reqwest client (custom TLS, proxies).
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &LogicalRequest,
        attempt_timeout: Option<Duration>,
    ) -> Result<RawResponse, TransportError> {
        let mut req = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .header("x-request-id", request.request_id.as_str());
        if let Some(body) = &request.body {
            req = req.body(body.clone());
        }
        if let Some(timeout) = attempt_timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect {
            message: err.to_string(),
        }
    } else if err.is_request() || err.is_builder() {
        TransportError::Other {
            message: err.to_string(),
        }
    } else {
        TransportError::Network {
            message: err.to_string(),
        }
    }
}
