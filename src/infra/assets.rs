//! Bundled theme stylesheets, embedded at build time.
//!
//! `build.rs` copies `themes/*.css` into `$OUT_DIR/themes` and appends the
//! generated syntax-highlight class rules to each file, so one stylesheet
//! covers both document styling and highlighted code.

use include_dir::{Dir, include_dir};

use crate::application::theme::ThemeCatalog;

static THEME_ASSETS: Dir<'_> = include_dir!("$OUT_DIR/themes");

/// Catalog over the stylesheets compiled into the engine.
///
/// Theme names are display names ("Clearness Dark"); files are their
/// kebab-case forms (`clearness-dark.css`).
pub struct BundledThemes {
    asset_base: String,
}

impl BundledThemes {
    pub fn new(asset_base: impl Into<String>) -> Self {
        Self {
            asset_base: asset_base.into(),
        }
    }

    /// File name a display name resolves to.
    fn file_name(name: &str) -> String {
        let mut slug = String::with_capacity(name.len());
        for part in name.split_whitespace() {
            if !slug.is_empty() {
                slug.push('-');
            }
            slug.push_str(&part.to_ascii_lowercase());
        }
        format!("{slug}.css")
    }

    /// Display names of every bundled theme, recovered from the file stems
    /// (`clearness-dark` → `Clearness Dark`). Hosts use this to build theme
    /// pickers.
    pub fn names() -> impl Iterator<Item = String> {
        THEME_ASSETS.files().filter_map(|file| {
            let stem = file.path().file_stem()?.to_str()?;
            let mut name = String::with_capacity(stem.len());
            for part in stem.split('-') {
                if !name.is_empty() {
                    name.push(' ');
                }
                let mut chars = part.chars();
                if let Some(first) = chars.next() {
                    name.extend(first.to_uppercase());
                    name.push_str(chars.as_str());
                }
            }
            Some(name)
        })
    }

    /// Raw CSS text for hosts that inline stylesheets instead of linking.
    pub fn stylesheet(name: &str) -> Option<&'static str> {
        THEME_ASSETS
            .get_file(Self::file_name(name))
            .and_then(|file| file.contents_utf8())
    }
}

impl ThemeCatalog for BundledThemes {
    fn contains(&self, name: &str) -> bool {
        THEME_ASSETS.get_file(Self::file_name(name)).is_some()
    }

    fn href_for(&self, name: &str) -> String {
        format!(
            "{}/{}",
            self.asset_base.trim_end_matches('/'),
            Self::file_name(name)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_map_to_kebab_case_files() {
        assert_eq!(BundledThemes::file_name("Clearness"), "clearness.css");
        assert_eq!(
            BundledThemes::file_name("Clearness Dark"),
            "clearness-dark.css"
        );
        assert_eq!(BundledThemes::file_name("Google Code"), "google-code.css");
    }

    #[test]
    fn bundled_themes_are_present() {
        let catalog = BundledThemes::new("assets/themes");

        assert!(catalog.contains("Clearness"));
        assert!(catalog.contains("Clearness Dark"));
        assert!(catalog.contains("Github"));
        assert!(!catalog.contains("Nonexistent"));
    }

    #[test]
    fn listed_names_resolve_back_through_the_catalog() {
        let catalog = BundledThemes::new("assets/themes");
        let names: Vec<String> = BundledThemes::names().collect();

        assert!(names.iter().any(|name| name == "Clearness Dark"));
        assert!(names.iter().any(|name| name == "Google Code"));
        for name in &names {
            assert!(catalog.contains(name), "{name} must resolve to its file");
        }
    }

    #[test]
    fn hrefs_form_under_the_asset_base() {
        let catalog = BundledThemes::new("assets/themes/");

        assert_eq!(
            catalog.href_for("Clearness Dark"),
            "assets/themes/clearness-dark.css"
        );
    }

    #[test]
    fn stylesheets_carry_highlight_rules() {
        let css = BundledThemes::stylesheet("Clearness").expect("bundled css");

        // build.rs appends the generated syntax-highlight classes.
        assert!(css.contains(".syntax-"));
    }
}
