//! HTTP transport contract and its reqwest implementation.
//!
//! The transport only moves bytes: it knows nothing about tokens, JSON or
//! error envelopes. Everything above it goes through [`HttpTransport`], so
//! tests can swap in an in-process server.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use std::pin::Pin;
use std::time::Duration;
use url::Url;

use crate::config::ClientConfig;
use sealdrop_common::{Error, Result};

/// Byte stream type for request and response bodies.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Request body.
pub enum RequestBody {
    /// No body.
    Empty,
    /// Serialized JSON document.
    Json(Vec<u8>),
    /// Streamed body, sent as it is produced.
    Stream {
        content_type: String,
        content_length: Option<u64>,
        stream: ByteStream,
    },
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestBody::Empty => write!(f, "Empty"),
            RequestBody::Json(bytes) => write!(f, "Json({} bytes)", bytes.len()),
            RequestBody::Stream {
                content_type,
                content_length,
                ..
            } => write!(f, "Stream({}, {:?})", content_type, content_length),
        }
    }
}

/// A request relative to the server root.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    /// Path and query, e.g. `/api/file/transfer?username=frodo`.
    pub uri: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl HttpRequest {
    /// Create a request without a body.
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    /// Attach a JSON body.
    pub fn with_json<B: serde::Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        self.body = RequestBody::Json(serde_json::to_vec(body)?);
        Ok(self)
    }

    /// Attach a streamed body.
    pub fn with_stream(
        mut self,
        content_type: impl Into<String>,
        content_length: Option<u64>,
        stream: ByteStream,
    ) -> Self {
        self.body = RequestBody::Stream {
            content_type: content_type.into(),
            content_length,
            stream,
        };
        self
    }
}

/// A response whose headers have been read and whose body is still pending.
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Declared body length, if the server sent one.
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl HttpResponse {
    /// Read the whole body, refusing anything longer than `limit` bytes.
    ///
    /// # Errors
    /// - `Network` if the body stream fails
    /// - `Protocol` if the body exceeds `limit`
    pub async fn bytes_limited(mut self, limit: usize) -> Result<Bytes> {
        if self.content_length.is_some_and(|len| len > limit as u64) {
            return Err(Error::Protocol(format!(
                "Response body of {} bytes exceeds limit of {}",
                self.content_length.unwrap_or_default(),
                limit
            )));
        }

        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            let chunk = chunk?;
            if buffer.len() + chunk.len() > limit {
                return Err(Error::Protocol(format!(
                    "Response body exceeds limit of {} bytes",
                    limit
                )));
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Anything that can exchange an [`HttpRequest`] for an [`HttpResponse`].
///
/// Implementations return as soon as the response headers are available;
/// the body is consumed lazily by the caller.
///
/// # Errors
/// - `Network` when the server cannot be reached or the connection drops
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Production transport over reqwest.
pub struct ReqwestTransport {
    http: Client,
    base_url: Url,
}

impl ReqwestTransport {
    /// Create a transport for the configured server.
    ///
    /// # Errors
    /// - `Config` if the base URL is invalid or the client cannot be built
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut base_url = config.base_url()?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let timeout = Duration::from_secs(config.request_timeout_secs);
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, base_url })
    }

    fn resolve(&self, uri: &str) -> Result<Url> {
        self.base_url
            .join(uri.trim_start_matches('/'))
            .map_err(|e| Error::InvalidInput(format!("Invalid request URI '{}': {}", uri, e)))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = self.resolve(&request.uri)?;
        let mut builder = self
            .http
            .request(request.method, url)
            .headers(request.headers);

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(bytes) => builder
                .header(CONTENT_TYPE, "application/json; charset=utf-8")
                .body(bytes),
            RequestBody::Stream {
                content_type,
                content_length,
                stream,
            } => {
                let builder = builder.header(CONTENT_TYPE, content_type);
                let builder = match content_length {
                    Some(len) => builder.header(CONTENT_LENGTH, len),
                    None => builder,
                };
                builder.body(reqwest::Body::wrap_stream(stream))
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(format!("Request failed: {}", e)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map(|result| result.map_err(|e| Error::Network(format!("Stream read error: {}", e))));

        Ok(HttpResponse {
            status,
            headers,
            content_length,
            body: Box::pin(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn response(chunks: Vec<&'static [u8]>, content_length: Option<u64>) -> HttpResponse {
        let items: Vec<Result<Bytes>> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::from_static(c)))
            .collect();
        HttpResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            content_length,
            body: Box::pin(stream::iter(items)),
        }
    }

    #[tokio::test]
    async fn test_bytes_limited_collects_chunks() {
        let body = response(vec![b"hello ", b"world"], None)
            .bytes_limited(64)
            .await
            .unwrap();
        assert_eq!(&body[..], b"hello world");
    }

    #[tokio::test]
    async fn test_bytes_limited_rejects_declared_oversize() {
        let result = response(vec![b"x"], Some(1000)).bytes_limited(10).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_bytes_limited_rejects_streamed_oversize() {
        let result = response(vec![b"0123456789", b"abc"], None)
            .bytes_limited(10)
            .await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_resolve_keeps_base_path() {
        let config = ClientConfig {
            base_url: "https://files.example/sealdrop".to_string(),
            ..Default::default()
        };
        let transport = ReqwestTransport::new(&config).unwrap();
        let url = transport.resolve("/api/file/transfer?username=frodo").unwrap();
        assert_eq!(
            url.as_str(),
            "https://files.example/sealdrop/api/file/transfer?username=frodo"
        );
    }

    #[test]
    fn test_json_body_debug_hides_content() {
        let request = HttpRequest::new(Method::POST, "/x")
            .with_json(&serde_json::json!({"password": "secret"}))
            .unwrap();
        assert!(!format!("{:?}", request).contains("secret"));
    }
}
