//! HTTP transport used to reach the update server.

use crate::error::{Error, Result};
use crate::update::UpdateRequest;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

/// A completed HTTP exchange: status code and raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, exactly as received.
    pub body: Bytes,
}

impl HttpResponse {
    /// Build a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Abstraction over the HTTP client.
///
/// Transport-level failures (DNS, TLS, timeouts) are reported as
/// [`Error::Transport`]; any response the server actually sent, whatever its
/// status, is returned as `Ok` for the feed parser to classify.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send the update-check request.
    async fn send(&self, request: &UpdateRequest) -> Result<HttpResponse>;

    /// Download `url` into the file at `destination`, replacing it.
    async fn download(&self, url: &Url, destination: &Path) -> Result<()>;
}

/// [`HttpTransport`] backed by reqwest with rustls.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport around an existing client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &UpdateRequest) -> Result<HttpResponse> {
        debug!("Requesting update feed from {}", request.url());

        let mut builder = self
            .client
            .get(request.url().clone())
            .header(reqwest::header::ACCEPT, "application/json");
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout() {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::InvalidServerBody {
                body: Bytes::new(),
                reason: format!("failed to read response body: {e}"),
            })?;

        Ok(HttpResponse { status, body })
    }

    async fn download(&self, url: &Url, destination: &Path) -> Result<()> {
        debug!("Downloading {} to {}", url, destination.display());

        let download_err = |reason: String| Error::Download {
            url: url.to_string(),
            reason,
        };

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| download_err(e.to_string()))?;

        let mut file = tokio::fs::File::create(destination).await?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| download_err(e.to_string()))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok(())
    }
}
