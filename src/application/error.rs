//! Top-level engine error taxonomy.

use thiserror::Error;

use crate::application::host::{PageError, ProxyError, StoreError};
use crate::application::render::RenderError;
use crate::infra::telemetry::TelemetryError;

/// Errors surfaced to the embedder while assembling or driving the engine.
///
/// Acquisition failures never appear here: the fetcher degrades to the page
/// fallback instead of failing, and a failed render cycle keeps the previous
/// display. What remains is assembly (telemetry, fetch channel construction)
/// and the port errors an embedder meets when calling the ports directly.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Page(#[from] PageError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
