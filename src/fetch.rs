//! Image byte retrieval from object storage.
//!
//! The storage service itself is an external collaborator; this module only
//! defines the retrieval seam and its concrete clients. Fetch failures are
//! non-fatal upstream (the renderer substitutes a placeholder image), so the
//! error type stays descriptive rather than actionable.

use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    #[error("unexpected status: {0}")]
    Status(reqwest::StatusCode),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
    #[error("failed to read local file: {0}")]
    ReadFile(std::io::Error),
}

pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &url::Url) -> impl Future<Output = Result<Bytes, FetchError>> + Send;
}

/// HTTP client with a hard per-request deadline. Expiry is reported as a
/// plain fetch failure so the caller's placeholder fallback applies.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &url::Url) -> Result<Bytes, FetchError> {
        let request = async {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(FetchError::Transport)?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status));
            }
            response.bytes().await.map_err(FetchError::Transport)
        };
        let bytes = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;
        debug!(%url, size = bytes.len(), "fetched image");
        Ok(bytes)
    }
}

/// Dispatches on url scheme, so a report mixing object-storage and local
/// photographs still renders.
pub struct SchemeFetcher {
    http: HttpFetcher,
}

impl SchemeFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: HttpFetcher::new(timeout),
        }
    }
}

impl ImageFetcher for SchemeFetcher {
    async fn fetch(&self, url: &url::Url) -> Result<Bytes, FetchError> {
        match url.scheme() {
            "file" => LocalFetcher.fetch(url).await,
            _ => self.http.fetch(url).await,
        }
    }
}

/// Reads `file://` storage urls. Used by the CLI when photographs live on
/// the local filesystem instead of object storage.
pub struct LocalFetcher;

impl ImageFetcher for LocalFetcher {
    async fn fetch(&self, url: &url::Url) -> Result<Bytes, FetchError> {
        if url.scheme() != "file" {
            return Err(FetchError::UnsupportedScheme(url.scheme().to_owned()));
        }
        let path = url
            .to_file_path()
            .map_err(|()| FetchError::UnsupportedScheme(url.scheme().to_owned()))?;
        let data = tokio::fs::read(&path).await.map_err(FetchError::ReadFile)?;
        Ok(Bytes::from(data))
    }
}
