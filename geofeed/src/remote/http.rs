//! HTTP blob service client.
//!
//! Blobs are addressed by URL. `put_blob` PUTs the body to
//! `<base_url>/<path>` and returns that URL; `get_blob` and `delete_blob`
//! accept either an absolute URL or a path relative to the base.

use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use tracing::debug;

use super::{BlobStore, BoxFuture};
use crate::error::{FetchError, FetchResult};

/// Default request timeout for blob transfers.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

/// reqwest-backed [`BlobStore`].
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBlobStore {
    /// Creates a client with the default timeout.
    pub fn new(base_url: impl Into<String>) -> FetchResult<Self> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::transient(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for `url_or_path`.
    fn resolve(&self, url_or_path: &str) -> String {
        if url_or_path.starts_with("http://") || url_or_path.starts_with("https://") {
            url_or_path.to_string()
        } else {
            format!("{}/{}", self.base_url, url_or_path.trim_start_matches('/'))
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> FetchResult<reqwest::Response> {
        let response = request.send().await.map_err(map_request_error)?;
        let status = response.status();
        debug!(url, status = status.as_u16(), "Blob request");
        if status.is_success() {
            Ok(response)
        } else {
            Err(map_status(status, url))
        }
    }
}

impl BlobStore for HttpBlobStore {
    fn put_blob<'a>(&'a self, path: &'a str, bytes: Bytes) -> BoxFuture<'a, FetchResult<String>> {
        Box::pin(async move {
            let url = self.resolve(path);
            self.send(self.client.put(&url).body(bytes), &url).await?;
            Ok(url)
        })
    }

    fn get_blob<'a>(&'a self, url: &'a str) -> BoxFuture<'a, FetchResult<Bytes>> {
        Box::pin(async move {
            let url = self.resolve(url);
            let response = self.send(self.client.get(&url), &url).await?;
            response.bytes().await.map_err(map_request_error)
        })
    }

    fn delete_blob<'a>(&'a self, url: &'a str) -> BoxFuture<'a, FetchResult<()>> {
        Box::pin(async move {
            let url = self.resolve(url);
            self.send(self.client.delete(&url), &url).await?;
            Ok(())
        })
    }
}

/// Maps a non-success status onto the error taxonomy.
fn map_status(status: StatusCode, url: &str) -> FetchError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => FetchError::not_found(url),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            FetchError::permission_denied(format!("HTTP {} from {}", status, url))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            FetchError::transient(format!("HTTP {} from {}", status, url))
        }
        s if s.is_server_error() => FetchError::transient(format!("HTTP {} from {}", s, url)),
        s => FetchError::malformed(url, format!("unexpected HTTP {}", s)),
    }
}

fn map_request_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::transient(format!("Request timed out: {}", e))
    } else if e.is_decode() || e.is_body() {
        FetchError::malformed("response", e.to_string())
    } else {
        FetchError::transient(format!("Request failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_status_mapping() {
        let url = "https://cdn.example.com/x.jpg";
        assert_eq!(map_status(StatusCode::NOT_FOUND, url).kind(), ErrorKind::NotFound);
        assert_eq!(
            map_status(StatusCode::FORBIDDEN, url).kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(
            map_status(StatusCode::UNAUTHORIZED, url).kind(),
            ErrorKind::PermissionDenied
        );
        assert!(map_status(StatusCode::SERVICE_UNAVAILABLE, url).is_retryable());
        assert!(map_status(StatusCode::TOO_MANY_REQUESTS, url).is_retryable());
        assert_eq!(
            map_status(StatusCode::IM_A_TEAPOT, url).kind(),
            ErrorKind::Malformed
        );
    }

    #[test]
    fn test_resolve() {
        let store = HttpBlobStore::new("https://cdn.example.com/blobs/").unwrap();
        assert_eq!(store.base_url(), "https://cdn.example.com/blobs");
        assert_eq!(
            store.resolve("/photos/a.jpg"),
            "https://cdn.example.com/blobs/photos/a.jpg"
        );
        assert_eq!(store.resolve("http://other/x"), "http://other/x");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        let store =
            HttpBlobStore::with_timeout("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = store.get_blob("missing.jpg").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
