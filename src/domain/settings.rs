//! Settings model shared between the engine and its host.
//!
//! The store is schemaless key/value; this module gives the engine a typed
//! view of it: the wire keys, a tolerant [`SettingValue`] representation,
//! snapshot structs decoded per render cycle, and the [`SettingChange`] event
//! delivered on the store's watch stream.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

/// Wire names of the settings keys the engine reads and routes on.
pub mod keys {
    /// Render the raw source untouched when set.
    pub const DISABLE_MARKDOWN: &str = "disable_markdown";
    /// Math support toggle (KaTeX rendering plus diagram preparation).
    pub const MATH_SUPPORT: &str = "katex";
    /// Prepend a table of contents when set.
    pub const TOC: &str = "toc";
    /// Global named theme.
    pub const THEME: &str = "theme";
    /// JSON list of external stylesheet paths.
    pub const CUSTOM_CSS_PATHS: &str = "custom_css_paths";
    /// Polling on/off.
    pub const AUTO_RELOAD: &str = "auto_reload";
    /// Polling cadence in seconds.
    pub const RELOAD_FREQ: &str = "reload_freq";
    /// Extensions excluded from the recognized set (array or `{ext: true}` map).
    pub const EXCLUDE_EXTENSIONS: &str = "exclude_exts";
    /// Prefix of keys holding user-authored theme CSS text.
    pub const CUSTOM_THEME_PREFIX: &str = "theme_";
    /// Prefix of per-page theme overrides, keyed by the exact page URL.
    pub const PAGE_THEME_PREFIX: &str = "special_";

    /// Store key holding the CSS text of the named custom theme.
    pub fn custom_theme(name: &str) -> String {
        format!("{CUSTOM_THEME_PREFIX}{name}")
    }

    /// Store key holding the per-page theme override for `page_key`.
    pub fn page_theme(page_key: &str) -> String {
        format!("{PAGE_THEME_PREFIX}{page_key}")
    }
}

/// A single stored setting value.
///
/// Stores written by different host generations disagree on representation
/// (booleans, numbers, bare strings, JSON documents), so the engine keeps the
/// union and decodes at the point of use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Json(serde_json::Value),
}

impl SettingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<serde_json::Value> for SettingValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Result of a batched store read. Absent keys are simply missing.
pub type SettingsMap = HashMap<String, SettingValue>;

fn bool_setting(map: &SettingsMap, key: &str, default: bool) -> bool {
    map.get(key).and_then(SettingValue::as_bool).unwrap_or(default)
}

/// Toggles consumed by the render pipeline, decoded fresh each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderToggles {
    pub math: bool,
    pub toc: bool,
}

impl RenderToggles {
    pub const KEYS: [&'static str; 2] = [keys::MATH_SUPPORT, keys::TOC];

    pub fn from_map(map: &SettingsMap) -> Self {
        Self {
            math: bool_setting(map, keys::MATH_SUPPORT, false),
            toc: bool_setting(map, keys::TOC, false),
        }
    }
}

/// Polling configuration decoded from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadSettings {
    pub auto_reload: bool,
    pub interval: Duration,
}

impl ReloadSettings {
    pub const KEYS: [&'static str; 2] = [keys::AUTO_RELOAD, keys::RELOAD_FREQ];

    pub fn from_map(map: &SettingsMap, default_interval: Duration) -> Self {
        Self {
            auto_reload: bool_setting(map, keys::AUTO_RELOAD, true),
            interval: reload_interval(map.get(keys::RELOAD_FREQ), default_interval),
        }
    }
}

/// Decode a polling cadence in seconds, falling back for absent or nonsense
/// values (zero, negative, non-finite).
pub fn reload_interval(value: Option<&SettingValue>, default: Duration) -> Duration {
    match value.and_then(SettingValue::as_f64) {
        Some(seconds) if seconds.is_finite() && seconds > 0.0 => {
            Duration::from_secs_f64(seconds)
        }
        Some(other) => {
            warn!(target: "foglio::settings", seconds = other, "ignoring invalid reload cadence");
            default
        }
        None => default,
    }
}

/// Inputs to the document eligibility gate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EligibilitySettings {
    pub markdown_disabled: bool,
    /// `None` when the user never configured an exclusion list.
    pub excluded_extensions: Option<HashSet<String>>,
}

impl EligibilitySettings {
    pub const KEYS: [&'static str; 2] = [keys::DISABLE_MARKDOWN, keys::EXCLUDE_EXTENSIONS];

    pub fn from_map(map: &SettingsMap) -> Self {
        Self {
            markdown_disabled: bool_setting(map, keys::DISABLE_MARKDOWN, false),
            excluded_extensions: map.get(keys::EXCLUDE_EXTENSIONS).and_then(excluded_extensions),
        }
    }
}

/// Decode the exclusion list from either stored shape: a JSON array of
/// extensions, or a `{"md": true}` style map where only truthy entries count.
fn excluded_extensions(value: &SettingValue) -> Option<HashSet<String>> {
    let json = value.as_json()?;
    match json {
        serde_json::Value::Array(entries) => Some(
            entries
                .iter()
                .filter_map(|entry| entry.as_str())
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
        ),
        serde_json::Value::Object(entries) => Some(
            entries
                .iter()
                .filter(|(_, enabled)| enabled.as_bool().unwrap_or(false))
                .map(|(ext, _)| ext.to_ascii_lowercase())
                .collect(),
        ),
        other => {
            warn!(target: "foglio::settings", value = %other, "unrecognized exclusion list shape");
            None
        }
    }
}

/// Decode the external stylesheet path list.
///
/// Accepts a JSON array value or a JSON-encoded string containing one (older
/// stores kept the serialized form). `Some(vec![])` is a present-but-empty
/// list and still wins the theme precedence; `None` means not configured.
pub fn css_path_list(value: &SettingValue) -> Option<Vec<String>> {
    match value {
        SettingValue::Json(serde_json::Value::Array(entries)) => Some(
            entries
                .iter()
                .filter_map(|entry| entry.as_str())
                .map(str::to_string)
                .collect(),
        ),
        SettingValue::Text(raw) => match serde_json::from_str::<Vec<String>>(raw) {
            Ok(paths) => Some(paths),
            Err(error) => {
                warn!(
                    target: "foglio::settings",
                    %error,
                    "stylesheet path list is not valid JSON"
                );
                None
            }
        },
        _ => None,
    }
}

/// Monotonic epoch ordering change events within one store.
pub type Epoch = u64;

/// A single settings mutation observed on the store's watch stream.
#[derive(Debug, Clone)]
pub struct SettingChange {
    /// Unique identifier for idempotency (UUIDv4).
    pub id: Uuid,
    /// Store-assigned monotonic epoch.
    pub epoch: Epoch,
    /// The mutated key.
    pub key: String,
    pub old_value: Option<SettingValue>,
    pub new_value: Option<SettingValue>,
    /// When the change was observed.
    pub observed_at: OffsetDateTime,
}

impl SettingChange {
    pub fn new(
        key: impl Into<String>,
        old_value: Option<SettingValue>,
        new_value: Option<SettingValue>,
        epoch: Epoch,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            key: key.into(),
            old_value,
            new_value,
            observed_at: OffsetDateTime::now_utc(),
        }
    }
}
