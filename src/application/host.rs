//! Host ports: the traits an embedder implements to give the engine a page,
//! a settings store, and a privileged fetch channel.
//!
//! Everything the engine knows about its environment flows through these
//! three traits; adapters live under `infra`. All implementations must be
//! `Send + Sync` because the controller holds them across await points.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use url::Url;

use crate::domain::locator::DocumentLocator;
use crate::domain::settings::{SettingChange, SettingsMap};

/// Marker class carried by external stylesheet links so re-theming can find
/// and remove them.
pub const CSS_PATH_MARKER_CLASS: &str = "CUSTOM_CSS_PATH";
/// Slot id of the named-theme stylesheet link.
pub const THEME_LINK_ID: &str = "theme";
/// Slot id of the inline custom-theme style element.
pub const CUSTOM_THEME_STYLE_ID: &str = "custom-theme";

/// Errors from the privileged fetch channel.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The channel itself is gone (host context torn down, bridge closed).
    /// This is the consolidated capability probe: callers decide on fallback
    /// and user-facing notices from this one variant.
    #[error("fetch channel unavailable: {0}")]
    Unavailable(String),
    /// The channel works but this particular request failed.
    #[error("document fetch failed: {0}")]
    Request(String),
}

impl ProxyError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Privileged document acquisition, bypassing the page's own (possibly
/// cache-tainted or CORS-restricted) fetch abilities.
#[async_trait]
pub trait FetchProxy: Send + Sync {
    /// Fetch the raw document text. Implementations must bypass intermediary
    /// caches so polling observes fresh bytes.
    async fn fetch_document(&self, url: &Url) -> Result<String, ProxyError>;
}

/// Errors from the settings store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("settings store unavailable: {0}")]
    Unavailable(String),
}

/// Key/value settings owned by the host, with batched reads and a change
/// stream. The engine never writes settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read the listed keys in one batch; absent keys are omitted from the map.
    async fn get(&self, keys: &[&str]) -> Result<SettingsMap, StoreError>;

    /// Subscribe to settings mutations. The stream ends when the store shuts
    /// down, which also ends the controller's run loop.
    fn watch(&self) -> BoxStream<'static, SettingChange>;
}

/// Errors from host page operations.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("host page unavailable: {0}")]
    Unavailable(String),
    #[error("page update failed: {0}")]
    Update(String),
}

/// The theme artifact a resolved directive installs on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThemeArtifact {
    /// Bundled named theme: a stylesheet link in the `theme` slot.
    NamedStylesheet { href: String },
    /// User-authored CSS text: an inline style element in the
    /// `custom-theme` slot.
    InlineStyle { css: String },
    /// External stylesheet links, each tagged with
    /// [`CSS_PATH_MARKER_CLASS`].
    StylesheetSet { hrefs: Vec<String> },
}

/// Where a deferred fragment scroll should land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrollTarget {
    /// Element carrying the id.
    Element { id: String },
    /// Legacy named anchor (`<a name=…>`).
    Anchor { name: String },
    /// No match; scroll to the document top.
    Top,
}

/// The displayed page. One instance corresponds to one viewed document.
///
/// Theme-artifact methods are idempotent slot replacements: applying an
/// artifact removes every previously applied theme artifact (all three kinds)
/// before installing the new one, so repeated application converges.
#[async_trait]
pub trait HostPage: Send + Sync {
    /// Identity of the viewed document.
    fn location(&self) -> DocumentLocator;

    /// The content type the document was served with, when the host knows it.
    fn content_type(&self) -> Option<String>;

    /// Currently visible text of the page, used as the fetch fallback.
    /// `None` or empty when the page cannot provide text.
    async fn visible_text(&self) -> Option<String>;

    /// Atomically replace the page body with rendered HTML.
    async fn replace_body(&self, html: &str) -> Result<(), PageError>;

    /// Put the raw source text back on display (inverse of `replace_body`).
    async fn restore_source(&self) -> Result<(), PageError>;

    /// Install a theme artifact, replacing all previously applied ones.
    async fn apply_theme(&self, artifact: ThemeArtifact) -> Result<(), PageError>;

    /// Install the math stylesheet. Independent of the theme slots; repeated
    /// installation replaces the previous link.
    async fn install_math_stylesheet(&self, href: &str) -> Result<(), PageError>;

    /// Resolve where a fragment identifier lands in the current display:
    /// the element carrying the id, else a same-name anchor, else the top.
    async fn fragment_target(&self, fragment: &str) -> ScrollTarget;

    /// Scroll to the resolved fragment target.
    async fn scroll_to(&self, target: ScrollTarget) -> Result<(), PageError>;

    /// Show a dismissible notice banner to the reader.
    async fn show_notice(&self, message: &str) -> Result<(), PageError>;
}
