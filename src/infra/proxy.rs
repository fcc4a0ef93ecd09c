//! HTTP adapter for the privileged fetch channel.

use async_trait::async_trait;
use reqwest::{Client, header};
use tracing::debug;
use url::Url;

use crate::application::host::{FetchProxy, ProxyError};

/// Fetches document text over plain HTTP.
///
/// Every request bypasses intermediary caches so polling observes fresh
/// bytes. An optional origin guard mirrors the same-origin posture of a
/// sandboxed host page: requests outside the configured origin are refused
/// before they leave the process.
pub struct HttpFetchProxy {
    client: Client,
    allowed_origin: Option<String>,
}

impl HttpFetchProxy {
    /// Build the underlying client. Failing to construct it means there is
    /// no channel at all, not a bad request.
    pub fn new() -> Result<Self, ProxyError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .build()
            .map_err(|err| ProxyError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            allowed_origin: None,
        })
    }

    /// Refuse requests whose origin differs from `origin` (ASCII
    /// serialization, e.g. `https://example.com`).
    pub fn same_origin_only(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origin = Some(origin.into());
        self
    }

    pub fn user_agent() -> &'static str {
        concat!("foglio/", env!("CARGO_PKG_VERSION"))
    }
}

#[async_trait]
impl FetchProxy for HttpFetchProxy {
    async fn fetch_document(&self, url: &Url) -> Result<String, ProxyError> {
        if let Some(allowed) = &self.allowed_origin {
            let origin = url.origin().ascii_serialization();
            if origin != *allowed {
                return Err(ProxyError::Request(format!(
                    "origin {origin} is outside the permitted origin {allowed}"
                )));
            }
        }

        debug!(target: "foglio::proxy", url = %url, "fetching document");
        let response = self
            .client
            .get(url.clone())
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::Request(format!("unexpected status {status}")));
        }

        response
            .text()
            .await
            .map_err(|err| ProxyError::Request(err.to_string()))
    }
}

/// No route to the host at all is channel loss; anything the server had a
/// say in is a per-request failure.
fn classify_send_error(err: reqwest::Error) -> ProxyError {
    if err.is_connect() {
        ProxyError::Unavailable(err.to_string())
    } else {
        ProxyError::Request(err.to_string())
    }
}
