//! HTTP client abstraction for remote operations.
//!
//! The fetcher and downloader depend on this trait instead of a concrete
//! client so tests can inject mock transports. [`ReqwestClient`] is the
//! production implementation; it applies one read/connect timeout to every
//! request.

use futures::stream::BoxStream;
use futures::StreamExt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Default timeout applied to every HTTP request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the HTTP transport layer.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The server answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// The request never completed (connect failure, timeout, aborted
    /// stream).
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
}

/// A response body delivered as a chunk stream.
pub struct HttpBody {
    /// Value of the Content-Length header, when the server sent one.
    pub content_length: Option<u64>,
    /// Body chunks in arrival order.
    pub stream: BoxStream<'static, Result<Vec<u8>, HttpError>>,
}

/// Asynchronous HTTP operations needed by fetch and pull.
pub trait HttpClient: Send + Sync {
    /// Performs a GET request and buffers the whole body.
    fn get(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, HttpError>> + Send;

    /// Performs a GET request and returns the body as a stream, for large
    /// artifact downloads.
    fn get_stream(&self, url: &str) -> impl Future<Output = Result<HttpBody, HttpError>> + Send;
}

/// Production HTTP client backed by reqwest.
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with the default timeout.
    pub fn new() -> Result<Self, HttpError> {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
    }

    /// Creates a client with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| HttpError::Transport {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, HttpError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HttpError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<Vec<u8>, HttpError> {
        let response = self.send(url).await?;
        let bytes = response.bytes().await.map_err(|e| HttpError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    async fn get_stream(&self, url: &str) -> Result<HttpBody, HttpError> {
        let response = self.send(url).await?;
        let content_length = response.content_length();
        let owned_url = url.to_string();

        let stream = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map(|b| b.to_vec()).map_err(|e| HttpError::Transport {
                    url: owned_url.clone(),
                    message: e.to_string(),
                })
            })
            .boxed();

        Ok(HttpBody {
            content_length,
            stream,
        })
    }
}

impl std::fmt::Debug for ReqwestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestClient").finish()
    }
}
