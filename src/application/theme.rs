//! Theme resolution: decide which stylesheet artifact the page should carry.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::locator::DocumentLocator;
use crate::domain::settings::{css_path_list, keys};

use super::host::{SettingsStore, StoreError, ThemeArtifact};

/// Bundled stylesheet lookup. The engine ships a set of named themes as
/// build-time assets; hosts can substitute their own catalog.
pub trait ThemeCatalog: Send + Sync {
    fn contains(&self, name: &str) -> bool;

    /// Href of the bundled stylesheet under the host's asset base.
    fn href_for(&self, name: &str) -> String;
}

/// A resolved theme decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThemeDirective {
    /// A theme shipped with the engine, applied as a stylesheet link.
    Bundled { name: String, href: String },
    /// User-authored CSS stored under `theme_<name>`, applied inline.
    CustomCss { name: String, css: String },
    /// External stylesheet paths from `custom_css_paths`.
    ExternalPaths { paths: Vec<String> },
}

impl ThemeDirective {
    /// The page artifact installing this directive.
    pub fn artifact(&self) -> ThemeArtifact {
        match self {
            Self::Bundled { href, .. } => ThemeArtifact::NamedStylesheet { href: href.clone() },
            Self::CustomCss { css, .. } => ThemeArtifact::InlineStyle { css: css.clone() },
            Self::ExternalPaths { paths } => ThemeArtifact::StylesheetSet {
                hrefs: paths.clone(),
            },
        }
    }

    /// The theme name behind this directive, when it has one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Bundled { name, .. } | Self::CustomCss { name, .. } => Some(name),
            Self::ExternalPaths { .. } => None,
        }
    }
}

pub struct ThemeResolver {
    store: Arc<dyn SettingsStore>,
    catalog: Arc<dyn ThemeCatalog>,
    default_theme: String,
}

impl ThemeResolver {
    pub fn new(
        store: Arc<dyn SettingsStore>,
        catalog: Arc<dyn ThemeCatalog>,
        default_theme: impl Into<String>,
    ) -> Self {
        Self {
            store,
            catalog,
            default_theme: default_theme.into(),
        }
    }

    /// Resolve the directive for the viewed document.
    ///
    /// Precedence: per-page override (`special_<url>`), external stylesheet
    /// paths (`custom_css_paths`), the global `theme`, then the default
    /// theme name. `Ok(None)` means the page keeps whatever artifact it
    /// already carries.
    pub async fn resolve(
        &self,
        locator: &DocumentLocator,
    ) -> Result<Option<ThemeDirective>, StoreError> {
        let page_key = keys::page_theme(locator.page_key());
        let wanted = [page_key.as_str(), keys::CUSTOM_CSS_PATHS, keys::THEME];
        let batch = self.store.get(&wanted).await?;

        if let Some(name) = batch
            .get(page_key.as_str())
            .and_then(|value| value.as_str())
            .filter(|name| !name.is_empty())
        {
            debug!(
                target: "foglio::theme",
                url = %locator.url(),
                theme = name,
                "per-page theme override"
            );
            return self.resolve_named(name).await;
        }

        if let Some(paths) = batch
            .get(keys::CUSTOM_CSS_PATHS)
            .and_then(css_path_list)
            .filter(|paths| !paths.is_empty())
        {
            return Ok(Some(ThemeDirective::ExternalPaths { paths }));
        }

        let name = batch
            .get(keys::THEME)
            .and_then(|value| value.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.default_theme);
        self.resolve_named(name).await
    }

    /// Bundled names win; anything else is looked up in the custom theme
    /// store. Unknown names resolve to nothing rather than tearing down the
    /// current artifact.
    async fn resolve_named(&self, name: &str) -> Result<Option<ThemeDirective>, StoreError> {
        if self.catalog.contains(name) {
            return Ok(Some(ThemeDirective::Bundled {
                name: name.to_string(),
                href: self.catalog.href_for(name),
            }));
        }

        let custom_key = keys::custom_theme(name);
        let wanted = [custom_key.as_str()];
        let stored = self.store.get(&wanted).await?;
        if let Some(css) = stored
            .get(custom_key.as_str())
            .and_then(|value| value.as_str())
            .filter(|css| !css.trim().is_empty())
        {
            return Ok(Some(ThemeDirective::CustomCss {
                name: name.to_string(),
                css: css.to_string(),
            }));
        }

        warn!(
            target: "foglio::theme",
            theme = name,
            "theme neither bundled nor stored; keeping current artifact"
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures::{StreamExt, stream};

    use crate::domain::settings::{SettingChange, SettingValue, SettingsMap};

    use super::*;

    struct MapStore(SettingsMap);

    impl MapStore {
        fn new(entries: &[(&str, SettingValue)]) -> Self {
            Self(
                entries
                    .iter()
                    .map(|(key, value)| ((*key).to_string(), value.clone()))
                    .collect(),
            )
        }
    }

    #[async_trait]
    impl SettingsStore for MapStore {
        async fn get(&self, keys: &[&str]) -> Result<SettingsMap, StoreError> {
            Ok(keys
                .iter()
                .filter_map(|key| {
                    self.0
                        .get(*key)
                        .map(|value| ((*key).to_string(), value.clone()))
                })
                .collect())
        }

        fn watch(&self) -> futures::stream::BoxStream<'static, SettingChange> {
            stream::empty().boxed()
        }
    }

    struct FixedCatalog(&'static [&'static str]);

    impl ThemeCatalog for FixedCatalog {
        fn contains(&self, name: &str) -> bool {
            self.0.contains(&name)
        }

        fn href_for(&self, name: &str) -> String {
            format!("assets/themes/{name}.css")
        }
    }

    fn resolver(entries: &[(&str, SettingValue)]) -> ThemeResolver {
        ThemeResolver::new(
            Arc::new(MapStore::new(entries)),
            Arc::new(FixedCatalog(&["Clearness", "Github", "Clearness Dark"])),
            "Clearness",
        )
    }

    fn locator() -> DocumentLocator {
        DocumentLocator::parse("https://example.com/doc.md").expect("locator")
    }

    #[tokio::test]
    async fn default_theme_applies_when_nothing_is_set() {
        let directive = resolver(&[]).resolve(&locator()).await.expect("resolve");

        assert_eq!(
            directive,
            Some(ThemeDirective::Bundled {
                name: "Clearness".to_string(),
                href: "assets/themes/Clearness.css".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn global_theme_overrides_default() {
        let directive = resolver(&[("theme", SettingValue::from("Github"))])
            .resolve(&locator())
            .await
            .expect("resolve");

        assert_eq!(directive.as_ref().and_then(ThemeDirective::name), Some("Github"));
    }

    #[tokio::test]
    async fn css_paths_beat_global_theme() {
        let directive = resolver(&[
            ("theme", SettingValue::from("Github")),
            (
                "custom_css_paths",
                SettingValue::from(serde_json::json!(["https://cdn.example.com/a.css", "b.css"])),
            ),
        ])
        .resolve(&locator())
        .await
        .expect("resolve");

        assert_eq!(
            directive,
            Some(ThemeDirective::ExternalPaths {
                paths: vec![
                    "https://cdn.example.com/a.css".to_string(),
                    "b.css".to_string()
                ],
            })
        );
    }

    #[tokio::test]
    async fn page_override_beats_css_paths() {
        let directive = resolver(&[
            (
                "special_https://example.com/doc.md",
                SettingValue::from("Clearness Dark"),
            ),
            (
                "custom_css_paths",
                SettingValue::from(serde_json::json!(["a.css"])),
            ),
        ])
        .resolve(&locator())
        .await
        .expect("resolve");

        assert_eq!(
            directive.as_ref().and_then(ThemeDirective::name),
            Some("Clearness Dark")
        );
    }

    #[tokio::test]
    async fn unbundled_name_resolves_through_custom_store() {
        let directive = resolver(&[
            ("theme", SettingValue::from("Neon")),
            ("theme_Neon", SettingValue::from("body { color: lime; }")),
        ])
        .resolve(&locator())
        .await
        .expect("resolve");

        assert_eq!(
            directive,
            Some(ThemeDirective::CustomCss {
                name: "Neon".to_string(),
                css: "body { color: lime; }".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn unknown_theme_keeps_current_artifact() {
        let directive = resolver(&[("theme", SettingValue::from("Missing"))])
            .resolve(&locator())
            .await
            .expect("resolve");

        assert_eq!(directive, None);
    }

    #[tokio::test]
    async fn json_string_css_paths_are_tolerated() {
        let directive = resolver(&[(
            "custom_css_paths",
            SettingValue::from("[\"legacy.css\"]"),
        )])
        .resolve(&locator())
        .await
        .expect("resolve");

        assert_eq!(
            directive,
            Some(ThemeDirective::ExternalPaths {
                paths: vec!["legacy.css".to_string()],
            })
        );
    }
}
