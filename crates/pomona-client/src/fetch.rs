//! Retrying HTTP fetcher.
//!
//! Every request goes through [`retry_with_backoff`]. Transport failures are
//! classified before they reach the retry loop: connection errors, timeouts
//! and short bodies are transient, any non-success status is fatal.
//!
//! Large documents are streamed chunk by chunk into a scratch file instead of
//! being buffered in memory.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pomona_core::error::AppError;
use pomona_core::metrics::{MetricsSink, NoopMetrics, names};
use pomona_core::retry::retry_with_backoff;
use pomona_core::{HttpConfig, ScratchDocument};
use reqwest::{Client, Response, Url};
use tokio::io::AsyncWriteExt;

/// HTTP client with retries, a connect timeout and a per-chunk read timeout.
///
/// # Examples
///
/// ```no_run
/// use pomona_client::HttpFetcher;
/// use pomona_core::HttpConfig;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = HttpFetcher::new(HttpConfig::default())?;
/// let url = "https://www.ine.pt/ine/xml_indic.jsp?opc=3&lang=PT".parse()?;
/// let document = fetcher.download_to_scratch(&url).await?;
/// println!("Downloaded {} bytes", document.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    config: HttpConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl HttpFetcher {
    /// Creates a fetcher from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ClientError` if the HTTP client cannot be built.
    pub fn new(config: HttpConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            config,
            metrics: Arc::new(NoopMetrics),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Streams `url` into a scratch file, retrying transient failures.
    ///
    /// A failed attempt discards its partial file; the next one starts over.
    pub async fn download_to_scratch(&self, url: &Url) -> Result<ScratchDocument, AppError> {
        let started = Instant::now();
        let document = retry_with_backoff(&self.config.retry, self.metrics.as_ref(), "download", |attempt| {
            self.download_once(url, attempt)
        })
        .await?;

        tracing::info!(
            url = %url,
            bytes = document.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Document downloaded"
        );
        Ok(document)
    }

    /// Fetches `url` into memory, retrying transient failures.
    ///
    /// Meant for small documents such as per-item details and id lists.
    pub async fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>, AppError> {
        retry_with_backoff(&self.config.retry, self.metrics.as_ref(), "fetch", |attempt| {
            self.fetch_once(url, attempt)
        })
        .await
    }

    async fn send(&self, url: &Url, attempt: u32) -> Result<Response, AppError> {
        tracing::debug!(url = %url, attempt, "GET");

        let response = tokio::time::timeout(self.config.read_timeout, self.client.get(url.clone()).send())
            .await
            .map_err(|_| timeout_error(self.config.read_timeout))?
            .map_err(|e| self.classify_request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    async fn download_once(&self, url: &Url, attempt: u32) -> Result<ScratchDocument, AppError> {
        let mut response = self.send(url, attempt).await?;
        let expected = response.content_length();

        let scratch = match &self.config.scratch_dir {
            Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
            None => tempfile::NamedTempFile::new()?,
        };
        let (file, path) = scratch.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let mut received: u64 = 0;

        loop {
            let chunk = tokio::time::timeout(self.config.read_timeout, response.chunk())
                .await
                .map_err(|_| timeout_error(self.config.read_timeout))?
                .map_err(|e| classify_body_error(e, expected, received))?;
            let Some(chunk) = chunk else { break };

            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
        }
        file.flush().await?;

        check_length(expected, received)?;
        self.metrics.increment(names::BYTES_DOWNLOADED, received);
        Ok(ScratchDocument::new(path, received))
    }

    async fn fetch_once(&self, url: &Url, attempt: u32) -> Result<Vec<u8>, AppError> {
        let mut response = self.send(url, attempt).await?;
        let expected = response.content_length();
        let mut body = Vec::with_capacity(expected.unwrap_or(0).min(1 << 20) as usize);

        loop {
            let chunk = tokio::time::timeout(self.config.read_timeout, response.chunk())
                .await
                .map_err(|_| timeout_error(self.config.read_timeout))?
                .map_err(|e| classify_body_error(e, expected, body.len() as u64))?;
            let Some(chunk) = chunk else { break };
            body.extend_from_slice(&chunk);
        }

        check_length(expected, body.len() as u64)?;
        self.metrics
            .increment(names::BYTES_DOWNLOADED, body.len() as u64);
        Ok(body)
    }

    fn classify_request_error(&self, err: reqwest::Error) -> AppError {
        if err.is_timeout() {
            // The client only sets a connect timeout; anything else is the read bound.
            let limit = if err.is_connect() {
                self.config.connect_timeout
            } else {
                self.config.read_timeout
            };
            timeout_error(limit)
        } else if err.is_builder() {
            AppError::InvalidUrl(err.to_string())
        } else {
            AppError::NetworkError(err.to_string())
        }
    }
}

/// Reports `limit` in whole seconds, rounding sub-second bounds up.
fn timeout_error(limit: Duration) -> AppError {
    AppError::Timeout(limit.as_secs() + u64::from(limit.subsec_nanos() > 0))
}

/// A body that breaks off mid-stream is a truncated transfer.
fn classify_body_error(err: reqwest::Error, expected: Option<u64>, received: u64) -> AppError {
    if err.is_timeout() {
        AppError::NetworkError(err.to_string())
    } else if err.is_body() || err.is_decode() {
        tracing::debug!(error = %err, received, "Body stream ended early");
        AppError::TruncatedTransfer { expected, received }
    } else {
        AppError::NetworkError(err.to_string())
    }
}

fn check_length(expected: Option<u64>, received: u64) -> Result<(), AppError> {
    match expected {
        Some(expected) if received < expected => Err(AppError::TruncatedTransfer {
            expected: Some(expected),
            received,
        }),
        _ => Ok(()),
    }
}
