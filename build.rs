use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use syntect::dumps::dump_to_uncompressed_file;
use syntect::highlighting::ThemeSet;
use syntect::html::{ClassStyle, css_for_theme_with_class_style};
use two_face::syntax;
use walkdir::WalkDir;

/// Syntax color scheme appended to light themes.
const LIGHT_SYNTAX_THEME: &str = "base16-ocean.light";
/// Syntax color scheme appended to `*-dark` themes.
const DARK_SYNTAX_THEME: &str = "base16-ocean.dark";

fn main() {
    prepare_theme_assets().expect("failed to prepare bundled theme assets");

    let themes_dir = Path::new("themes");
    println!("cargo:rerun-if-changed={}", themes_dir.display());
    if themes_dir.is_dir() {
        for entry in WalkDir::new(themes_dir).into_iter().flatten() {
            println!("cargo:rerun-if-changed={}", entry.path().display());
        }
    }
}

/// Copy `themes/*.css` into `$OUT_DIR/themes`, appending the syntect class
/// CSS each stylesheet needs for highlighted code blocks, then serialize the
/// syntax pack the highlighter embeds.
fn prepare_theme_assets() -> Result<(), String> {
    let out_dir = PathBuf::from(env::var("OUT_DIR").map_err(|err| err.to_string())?);
    let source_themes = Path::new("themes");
    let dest_themes = out_dir.join("themes");

    if dest_themes.exists() {
        fs::remove_dir_all(&dest_themes)
            .map_err(|err| format!("failed to clean {}: {err}", dest_themes.display()))?;
    }
    fs::create_dir_all(&dest_themes)
        .map_err(|err| format!("failed to create {}: {err}", dest_themes.display()))?;

    let mut bundled = 0usize;
    for entry in WalkDir::new(source_themes)
        .max_depth(1)
        .into_iter()
        .flatten()
    {
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().and_then(|ext| ext.to_str()) != Some("css")
        {
            continue;
        }

        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| format!("non-utf8 theme file name: {}", path.display()))?;
        let base_css = fs::read_to_string(path)
            .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
        let syntax_theme = if stem.ends_with("-dark") {
            DARK_SYNTAX_THEME
        } else {
            LIGHT_SYNTAX_THEME
        };

        let mut combined = String::with_capacity(base_css.len() + 4096);
        combined.push_str(base_css.trim_end());
        combined.push_str(&format!(
            "\n\n/* --- Syntect theme ({syntax_theme}), generated at build time --- */\n"
        ));
        combined.push_str(&render_syntax_css(syntax_theme)?);
        combined.push('\n');

        let dest_file = dest_themes.join(format!("{stem}.css"));
        fs::write(&dest_file, combined)
            .map_err(|err| format!("failed to write {}: {err}", dest_file.display()))?;
        bundled += 1;
    }

    if bundled == 0 {
        return Err(format!(
            "no theme stylesheets found in {}",
            source_themes.display()
        ));
    }

    write_syntax_pack(&out_dir)
}

fn render_syntax_css(theme_name: &str) -> Result<String, String> {
    let theme_set = ThemeSet::load_defaults();
    let theme = theme_set
        .themes
        .get(theme_name)
        .ok_or_else(|| format!("theme `{theme_name}` not found"))?;

    css_for_theme_with_class_style(theme, ClassStyle::SpacedPrefixed { prefix: "syntax-" })
        .map_err(|err| err.to_string())
}

fn write_syntax_pack(out_dir: &Path) -> Result<(), String> {
    let syntax_set = syntax::extra_newlines();
    let pack_path = out_dir.join("syntaxes.packdump");
    dump_to_uncompressed_file(&syntax_set, &pack_path)
        .map_err(|err| format!("failed to encode syntax set: {err}"))?;

    println!("cargo:rustc-env=SYNTAX_PACK_FILE={}", pack_path.display());

    Ok(())
}
