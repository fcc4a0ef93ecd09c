//! Engine configuration: typed settings the embedder hands to the controller.
//!
//! Everything carries a working default so `EngineConfig::default()` yields a
//! usable engine; embedders override the fields they care about. User-facing
//! behavior toggles (math, TOC, reload cadence, …) are NOT here — those live
//! in the host's settings store and are re-read every cycle.

use std::{path::PathBuf, time::Duration};

use tracing::level_filters::LevelFilter;

use crate::domain::locator::DEFAULT_EXTENSIONS;

const DEFAULT_HEADER_PREFIX: &str = "md-";
const DEFAULT_SCROLL_DELAY_MS: u64 = 300;
const DEFAULT_MATH_CACHE_CAPACITY: usize = 256;
const DEFAULT_MATH_STYLESHEET_HREF: &str = "assets/katex.min.css";
const DEFAULT_RELOAD_INTERVAL_SECS: u64 = 3;
const DEFAULT_THEME: &str = "Clearness";
const DEFAULT_ASSET_BASE: &str = "assets/themes";
pub(crate) const DEFAULT_DIAGRAM_CLI_PATH: &str = "mmdc";
pub(crate) const DEFAULT_DIAGRAM_CACHE_DIR: &str = "/tmp/foglio-diagrams";

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub logging: LoggingSettings,
    pub render: RenderTunables,
    pub reload: ReloadTunables,
    pub theme: ThemeTunables,
    pub diagrams: DiagramSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderTunables {
    /// Prefix for derived heading anchors.
    pub header_prefix: String,
    /// Wait between body replacement and the deferred fragment scroll.
    pub scroll_delay: Duration,
    /// Bound on the memoized math fragment cache.
    pub math_cache_capacity: usize,
    /// Stylesheet installed when math support is on.
    pub math_stylesheet_href: String,
    /// Extensions recognized as renderable documents, before the user's
    /// exclusion list is subtracted.
    pub recognized_extensions: Vec<String>,
}

impl Default for RenderTunables {
    fn default() -> Self {
        Self {
            header_prefix: DEFAULT_HEADER_PREFIX.to_string(),
            scroll_delay: Duration::from_millis(DEFAULT_SCROLL_DELAY_MS),
            math_cache_capacity: DEFAULT_MATH_CACHE_CAPACITY,
            math_stylesheet_href: DEFAULT_MATH_STYLESHEET_HREF.to_string(),
            recognized_extensions: DEFAULT_EXTENSIONS
                .iter()
                .map(|extension| (*extension).to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReloadTunables {
    /// Polling cadence when the store holds no `reload_freq`.
    pub default_interval: Duration,
}

impl Default for ReloadTunables {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(DEFAULT_RELOAD_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThemeTunables {
    /// Theme applied when the store names none.
    pub default_theme: String,
    /// Base path bundled stylesheet hrefs are formed under.
    pub asset_base: String,
}

impl Default for ThemeTunables {
    fn default() -> Self {
        Self {
            default_theme: DEFAULT_THEME.to_string(),
            asset_base: DEFAULT_ASSET_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiagramSettings {
    pub cli_path: PathBuf,
    pub cache_dir: PathBuf,
}

impl Default for DiagramSettings {
    fn default() -> Self {
        Self {
            cli_path: PathBuf::from(DEFAULT_DIAGRAM_CLI_PATH),
            cache_dir: PathBuf::from(DEFAULT_DIAGRAM_CACHE_DIR),
        }
    }
}
