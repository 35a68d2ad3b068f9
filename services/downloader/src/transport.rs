//! HTTP transport for index files and ranged archive reads.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use grib_inventory::{ByteRange, FetchError, IndexFetcher};
use reqwest::{header, redirect, Client, StatusCode};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{DownloaderError, Result};

/// One ranged read of a remote archive file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    pub url: String,
    pub range: ByteRange,
    /// Whole-request timeout, `None` waits indefinitely
    pub timeout: Option<Duration>,
}

/// Streams one byte range of a remote resource into a sink.
///
/// Implementations must only report success once the full body has been
/// written. On failure the sink may hold a partial body; the caller rolls
/// it back.
#[async_trait]
pub trait RangeTransport: Send + Sync {
    async fn fetch_range(
        &self,
        request: &RangeRequest,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> std::result::Result<u64, FetchError>;
}

/// reqwest-backed transport. Redirects are not followed.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder()
            .redirect(redirect::Policy::none())
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true);
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| DownloaderError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    let url = url.to_string();
    if err.is_timeout() {
        FetchError::Timeout { url }
    } else if err.is_connect() {
        FetchError::Connect {
            url,
            message: err.to_string(),
        }
    } else if err.is_body() || err.is_decode() {
        FetchError::Body {
            url,
            message: err.to_string(),
        }
    } else {
        FetchError::Request {
            url,
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl RangeTransport for HttpTransport {
    async fn fetch_range(
        &self,
        request: &RangeRequest,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> std::result::Result<u64, FetchError> {
        let mut builder = self
            .client
            .get(&request.url)
            .header(header::RANGE, request.range.header_value());
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify(&request.url, e))?;

        // a 200 would carry the whole file instead of the requested range
        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(FetchError::Status {
                url: request.url.clone(),
                status: response.status().as_u16(),
            });
        }

        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| classify(&request.url, e))?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        if let Some(expected) = request.range.byte_count() {
            if written != expected {
                return Err(FetchError::Body {
                    url: request.url.clone(),
                    message: format!("expected {} bytes, received {}", expected, written),
                });
            }
        }

        debug!(url = %request.url, range = %request.range, bytes = written, "Range received");
        Ok(written)
    }
}

#[async_trait]
impl IndexFetcher for HttpTransport {
    async fn fetch_index(&self, url: &str) -> std::result::Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response.text().await.map_err(|e| classify(url, e))
    }
}
