//! The fetch collaborator: HTTP download of one resource to a staged file.
//!
//! Downloads land in a named temp file that the cache engine's `put` moves
//! into the store by rename. Each call resolves exactly once, with either
//! an error or a staged file plus the response Content-Type; cancellation
//! happens through the abort handle the caller registers in the engine's
//! task tracker.

mod url;

use std::path::Path;
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode, Url, header};
use tempfile::NamedTempFile;

use permacache_core::Error;

pub use url::canonicalize;

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "permacache/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 10MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "permacache/0.1".to_string(),
            max_bytes: 10 * 1024 * 1024,
            timeout: Duration::from_millis(20_000),
            max_redirects: 5,
        }
    }
}

/// One completed download, staged for the cache engine.
///
/// The temp file lives as long as this value; `put` renames it away, after
/// which the drop-time cleanup is a no-op.
#[derive(Debug)]
pub struct Download {
    /// The canonicalized URL that was requested.
    pub url: Url,
    /// The final URL after redirects.
    pub final_url: Url,
    /// HTTP status code.
    pub status: StatusCode,
    /// Content-Type header, for response reconstruction after a cache hit.
    pub content_type: Option<String>,
    /// Number of bytes staged.
    pub len: usize,
    file: NamedTempFile,
}

impl Download {
    /// Path of the staged file to hand to the engine's save pipeline.
    pub fn staged_path(&self) -> &Path {
        self.file.path()
    }

    /// Assemble a download from an already-staged file, for fetchers other
    /// than [`FetchClient`].
    pub fn from_staged(url: Url, content_type: Option<String>, file: NamedTempFile) -> Self {
        let len = file.path().metadata().map(|m| m.len() as usize).unwrap_or(0);
        Self { url: url.clone(), final_url: url, status: StatusCode::OK, content_type, len, file }
    }
}

/// Abstraction over "fetch one resource to a staged file".
///
/// The downloader depends on this seam rather than on a concrete HTTP
/// client, so save-pipeline behavior is testable without a network.
#[async_trait::async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn download(&self, url: &Url) -> Result<Download, Error>;
}

/// HTTP fetch client that stages response bodies into temp files.
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::HttpError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl ResourceFetcher for FetchClient {
    /// Fetch a URL and stage the body in a temp file.
    ///
    /// Non-success statuses and oversize bodies are errors; transient
    /// failures here never abort sibling resource downloads, the caller
    /// decides what a partial article means.
    async fn download(&self, url: &Url) -> Result<Download, Error> {
        let start = Instant::now();

        let response = self
            .http
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::FetchTimeout(url.to_string())
                } else {
                    Error::HttpError(format!("network error: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpError(format!("status {} for {}", status.as_u16(), url)));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::FetchTooLarge(format!("{} bytes exceeds {}", len, self.config.max_bytes)));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::HttpError(format!("failed to read response: {}", e)))?;

        if bytes.len() > self.config.max_bytes {
            return Err(Error::FetchTooLarge(format!(
                "{} bytes exceeds {}",
                bytes.len(),
                self.config.max_bytes
            )));
        }

        let file = NamedTempFile::new().map_err(|e| Error::HttpError(format!("cannot stage download: {}", e)))?;
        tokio::fs::write(file.path(), &bytes)
            .await
            .map_err(|e| Error::HttpError(format!("cannot stage download: {}", e)))?;

        tracing::debug!(
            "staged {} -> {} in {}ms ({} bytes)",
            url,
            final_url,
            start.elapsed().as_millis(),
            bytes.len()
        );

        Ok(Download { url: url.clone(), final_url, status, content_type, len: bytes.len(), file })
    }
}
