//! Foglio renders markdown documents into sanitized, themeable HTML and keeps
//! the rendered view current as the source changes.
//!
//! The engine is host-agnostic: everything it knows about its environment
//! flows through three ports — a [`HostPage`](application::host::HostPage) to
//! display into, a [`SettingsStore`](application::host::SettingsStore) for
//! user preferences, and a [`FetchProxy`](application::host::FetchProxy) for
//! privileged document acquisition. A
//! [`LiveUpdateController`](application::live::LiveUpdateController) owns one
//! viewed document end to end: eligibility, the initial render, settings
//! reactions, and change polling.
//!
//! ## Modules
//! - `domain`: locators, heading records, the settings model.
//! - `application`: the render pipeline, fetcher, theme resolution, TOC
//!   builder, and the live-update controller.
//! - `infra`: telemetry, bundled theme assets, the HTTP fetch adapter, and
//!   in-memory adapters for tests and manual embedding.
//! - `config`: typed [`EngineConfig`](config::EngineConfig) tunables.
//!
//! ## Driving the engine
//!
//! ```
//! use std::sync::Arc;
//!
//! use foglio::application::error::EngineError;
//! use foglio::application::host::{FetchProxy, HostPage, SettingsStore};
//! use foglio::application::live::LiveUpdateController;
//! use foglio::application::theme::ThemeCatalog;
//! use foglio::config::EngineConfig;
//! use foglio::domain::locator::DocumentLocator;
//! use foglio::infra::assets::BundledThemes;
//! use foglio::infra::memory::{MemoryPage, MemoryProxy, MemorySettingsStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), EngineError> {
//! let config = EngineConfig::default();
//! foglio::infra::telemetry::init(&config.logging)?;
//!
//! let locator = DocumentLocator::parse("https://example.com/notes.md").unwrap();
//! let page = Arc::new(MemoryPage::new(locator, None, "# Notes\n\nHello."));
//! let store = Arc::new(MemorySettingsStore::new());
//! let proxy = Arc::new(MemoryProxy::serving("# Notes\n\nHello."));
//! let themes = Arc::new(BundledThemes::new(config.theme.asset_base.clone()));
//!
//! let mut controller = LiveUpdateController::new(
//!     Arc::clone(&page) as Arc<dyn HostPage>,
//!     store as Arc<dyn SettingsStore>,
//!     proxy as Arc<dyn FetchProxy>,
//!     themes as Arc<dyn ThemeCatalog>,
//!     None,
//!     config,
//! );
//! controller.initialize().await;
//! assert!(page.displayed_body().is_some());
//! # Ok(())
//! # }
//! ```
//!
//! Long-running hosts hand the controller to
//! [`run`](application::live::LiveUpdateController::run), which polls for
//! source changes and reacts to settings mutations until the store shuts
//! down.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;

pub use application::error::EngineError;
