//! Document acquisition. The fetcher asks the privileged proxy first and
//! degrades to the page's own visible text; callers always get a response,
//! never an error.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use crate::domain::locator::DocumentLocator;

use super::host::{FetchProxy, HostPage, ProxyError};

const METRIC_FETCH_TOTAL: &str = "foglio_fetch_total";

/// Outcome of one acquisition attempt. Failure is a state of the response,
/// not an `Err`; retry policy belongs to the caller's polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub data: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub from_fallback: bool,
    /// The proxy channel itself was gone, not just this request. Drives the
    /// one-time degraded-mode notice.
    pub proxy_unavailable: bool,
}

impl FetchResponse {
    fn proxied(text: String) -> Self {
        Self {
            data: Some(text),
            success: true,
            error: None,
            from_fallback: false,
            proxy_unavailable: false,
        }
    }

    fn fallback(text: String, error: &ProxyError) -> Self {
        Self {
            data: Some(text),
            success: true,
            error: Some(error.to_string()),
            from_fallback: true,
            proxy_unavailable: error.is_unavailable(),
        }
    }

    fn failed(error: &ProxyError) -> Self {
        Self {
            data: None,
            success: false,
            error: Some(error.to_string()),
            from_fallback: false,
            proxy_unavailable: error.is_unavailable(),
        }
    }

    /// The text to render, when the attempt produced any.
    pub fn usable_text(&self) -> Option<&str> {
        if self.success { self.data.as_deref() } else { None }
    }
}

/// Fetches document text through the proxy with page-text fallback.
pub struct ContentFetcher {
    proxy: Arc<dyn FetchProxy>,
    page: Arc<dyn HostPage>,
}

impl ContentFetcher {
    pub fn new(proxy: Arc<dyn FetchProxy>, page: Arc<dyn HostPage>) -> Self {
        Self { proxy, page }
    }

    pub async fn fetch(&self, locator: &DocumentLocator) -> FetchResponse {
        match self.proxy.fetch_document(locator.url()).await {
            Ok(text) => {
                debug!(
                    target: "foglio::fetch",
                    url = %locator.url(),
                    bytes = text.len(),
                    "document fetched via proxy"
                );
                counter!(METRIC_FETCH_TOTAL, "result" => "proxy").increment(1);
                FetchResponse::proxied(text)
            }
            Err(err) => {
                warn!(
                    target: "foglio::fetch",
                    url = %locator.url(),
                    error = %err,
                    unavailable = err.is_unavailable(),
                    "proxy fetch failed; trying page text fallback"
                );
                let fallback = self
                    .page
                    .visible_text()
                    .await
                    .filter(|text| !text.trim().is_empty());
                match fallback {
                    Some(text) => {
                        counter!(METRIC_FETCH_TOTAL, "result" => "fallback").increment(1);
                        FetchResponse::fallback(text, &err)
                    }
                    None => {
                        counter!(METRIC_FETCH_TOTAL, "result" => "failed").increment(1);
                        FetchResponse::failed(&err)
                    }
                }
            }
        }
    }
}
