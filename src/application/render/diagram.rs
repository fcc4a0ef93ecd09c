//! Diagram handling: fence preparation before conversion and SVG swap-in
//! after sanitization.
//!
//! Fenced `mermaid`/`flow` blocks are lifted out of the markdown before the
//! converter runs, leaving passthrough containers the sanitizer is configured
//! to keep. After sanitization the containers are either replaced with
//! CLI-rendered SVG or, when no renderer can handle the kind, filled with the
//! diagram source text so a host-side script can render it later.

use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::PathBuf,
    process::{Command, Stdio},
    time::Instant,
};

use lol_html::{RewriteStrSettings, element, html_content::ContentType, rewrite_str};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::DiagramSettings;

use super::RenderError;
use super::highlight::plain_code_block;

/// Fence info words recognized as diagram markup.
const DIAGRAM_KINDS: [&str; 2] = ["mermaid", "flow"];

#[derive(Debug, Error)]
pub enum DiagramError {
    #[error("failed to prepare cache directory: {0}")]
    CacheInit(io::Error),
    #[error("failed to write temporary file: {0}")]
    Io(io::Error),
    #[error("diagram CLI invocation failed (exit {exit_code:?}): {stderr}")]
    Cli {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("diagram CLI unavailable: {0}")]
    NotFound(io::Error),
    #[error("failed to read rendered SVG: {0}")]
    Read(io::Error),
}

/// Renders diagram source to SVG. The engine ships a Mermaid CLI adapter;
/// hosts with their own renderer can substitute it or omit one entirely.
pub trait DiagramRenderer: Send + Sync {
    /// Whether this renderer understands the fence kind (`mermaid`, `flow`).
    fn supports(&self, kind: &str) -> bool;

    fn render_svg(&self, source: &str) -> Result<String, DiagramError>;
}

/// A diagram block lifted out of the source markdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DiagramBlock {
    pub(crate) kind: String,
    pub(crate) source: String,
}

/// Markdown with diagram fences replaced by indexed containers.
#[derive(Debug, Default)]
pub(crate) struct PreparedMarkup {
    pub(crate) text: String,
    pub(crate) blocks: Vec<DiagramBlock>,
}

/// Replace fenced diagram blocks with `<div data-diagram=…>` containers,
/// keeping the sources out of band. Fences inside other fenced code blocks
/// are left alone.
pub(crate) fn prepare_markup(markdown: &str) -> PreparedMarkup {
    let mut prepared = PreparedMarkup::default();
    let mut inside_other_fence: Option<String> = None;
    let mut diagram: Option<(String, String, Vec<String>)> = None; // (marker, kind, lines)

    for line in markdown.lines() {
        let trimmed = line.trim_start();

        if let Some((marker, kind, lines)) = diagram.as_mut() {
            if is_fence_close(trimmed, marker) {
                let index = prepared.blocks.len();
                prepared.text.push_str(&format!(
                    "<div data-diagram=\"{kind}\" data-diagram-index=\"{index}\"></div>\n"
                ));
                prepared.blocks.push(DiagramBlock {
                    kind: kind.clone(),
                    source: lines.join("\n"),
                });
                diagram = None;
            } else {
                lines.push(line.to_string());
            }
            continue;
        }

        if let Some(marker) = inside_other_fence.as_deref() {
            prepared.text.push_str(line);
            prepared.text.push('\n');
            if is_fence_close(trimmed, marker) {
                inside_other_fence = None;
            }
            continue;
        }

        if let Some((marker, info)) = parse_fence_open(trimmed) {
            let kind = info.split_whitespace().next().unwrap_or_default().to_ascii_lowercase();
            if DIAGRAM_KINDS.contains(&kind.as_str()) {
                diagram = Some((marker, kind, Vec::new()));
            } else {
                inside_other_fence = Some(marker);
                prepared.text.push_str(line);
                prepared.text.push('\n');
            }
            continue;
        }

        prepared.text.push_str(line);
        prepared.text.push('\n');
    }

    // An unterminated diagram fence runs to the end of the document.
    if let Some((_, kind, lines)) = diagram {
        let index = prepared.blocks.len();
        prepared.text.push_str(&format!(
            "<div data-diagram=\"{kind}\" data-diagram-index=\"{index}\"></div>\n"
        ));
        prepared.blocks.push(DiagramBlock {
            kind,
            source: lines.join("\n"),
        });
    }

    prepared
}

fn parse_fence_open(trimmed: &str) -> Option<(String, String)> {
    for marker in ["```", "~~~"] {
        if let Some(info) = trimmed.strip_prefix(marker) {
            return Some((marker.to_string(), info.trim().to_string()));
        }
    }
    None
}

fn is_fence_close(trimmed: &str, marker: &str) -> bool {
    trimmed
        .strip_prefix(marker)
        .is_some_and(|rest| rest.trim().is_empty())
}

/// Finalize diagram containers in sanitized HTML.
///
/// Containers whose kind the renderer supports become SVG figures (rendering
/// failures degrade to an escaped code block); the rest keep their source as
/// text content for deferred host-side rendering.
pub(crate) fn swap_diagrams(
    html: &str,
    blocks: &[DiagramBlock],
    renderer: Option<&dyn DiagramRenderer>,
) -> Result<String, RenderError> {
    if blocks.is_empty() {
        return Ok(html.to_string());
    }

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("div[data-diagram]", |el| {
                let kind = el.get_attribute("data-diagram").unwrap_or_default();
                let block = el
                    .get_attribute("data-diagram-index")
                    .and_then(|raw| raw.parse::<usize>().ok())
                    .and_then(|index| blocks.get(index));
                el.remove_attribute("data-diagram-index");

                let Some(block) = block else {
                    warn!(
                        target: "foglio::render::diagram",
                        kind,
                        "diagram container without matching source block"
                    );
                    return Ok(());
                };

                match renderer.filter(|r| r.supports(&kind)) {
                    Some(active) => match active.render_svg(&block.source) {
                        Ok(svg) => {
                            el.replace(
                                &format!("<figure data-role=\"diagram-{kind}\">{svg}</figure>"),
                                ContentType::Html,
                            );
                        }
                        Err(err) => {
                            warn!(
                                target: "foglio::render::diagram",
                                kind,
                                error = %err,
                                "diagram rendering failed; falling back to code block"
                            );
                            el.replace(&plain_code_block(&kind, &block.source), ContentType::Html);
                        }
                    },
                    None => {
                        el.set_inner_content(&block.source, ContentType::Text);
                    }
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| RenderError::Document {
        message: err.to_string(),
    })
}

/// Mermaid CLI adapter with a content-hash SVG cache.
#[derive(Debug, Clone)]
pub struct MermaidCli {
    cli_path: PathBuf,
    cache_dir: PathBuf,
}

impl MermaidCli {
    pub fn new(cli_path: PathBuf, cache_dir: PathBuf) -> Result<Self, DiagramError> {
        fs::create_dir_all(&cache_dir).map_err(DiagramError::CacheInit)?;
        Ok(Self {
            cli_path,
            cache_dir,
        })
    }

    /// Build the renderer from engine configuration. Initialization failure
    /// (usually an unwritable cache directory) downgrades to no renderer, so
    /// diagram containers fall through to host-side rendering.
    pub fn from_settings(settings: &DiagramSettings) -> Option<std::sync::Arc<dyn DiagramRenderer>> {
        match Self::new(settings.cli_path.clone(), settings.cache_dir.clone()) {
            Ok(renderer) => Some(std::sync::Arc::new(renderer)),
            Err(err) => {
                warn!(
                    target: "foglio::render::diagram",
                    error = %err,
                    cache_dir = %settings.cache_dir.display(),
                    "diagram renderer unavailable; containers will defer to the host"
                );
                None
            }
        }
    }
}

impl DiagramRenderer for MermaidCli {
    fn supports(&self, kind: &str) -> bool {
        kind.eq_ignore_ascii_case("mermaid")
    }

    fn render_svg(&self, source: &str) -> Result<String, DiagramError> {
        let started_at = Instant::now();
        let cache_path = self.cache_dir.join(format!("{}.svg", hash_source(source)));

        match fs::read_to_string(&cache_path) {
            Ok(svg) => {
                info!(
                    target: "foglio::render::diagram",
                    op = "mermaid::render_svg",
                    result = "cache_hit",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    svg_bytes = svg.len(),
                    "diagram served from cache"
                );
                return Ok(svg);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!(
                    target: "foglio::render::diagram",
                    op = "mermaid::render_svg",
                    result = "cache_read_error",
                    error = %err,
                    "failed to read cached diagram; re-rendering"
                );
            }
        }

        let mut input_file = NamedTempFile::new().map_err(DiagramError::Io)?;
        input_file
            .write_all(source.as_bytes())
            .map_err(DiagramError::Io)?;
        input_file.flush().map_err(DiagramError::Io)?;

        let output_file = tempfile::Builder::new()
            .suffix(".svg")
            .tempfile_in(&self.cache_dir)
            .map_err(DiagramError::Io)?;
        let output_path = output_file.path().to_path_buf();

        let output = Command::new(&self.cli_path)
            .arg("--input")
            .arg(input_file.path())
            .arg("--output")
            .arg(&output_path)
            .arg("--outputFormat")
            .arg("svg")
            .arg("--quiet")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| {
                warn!(
                    target: "foglio::render::diagram",
                    op = "mermaid::render_svg",
                    result = "spawn_error",
                    error = %err,
                    "failed to spawn diagram CLI"
                );
                if err.kind() == ErrorKind::NotFound {
                    DiagramError::NotFound(err)
                } else {
                    DiagramError::Io(err)
                }
            })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target: "foglio::render::diagram",
                op = "mermaid::render_svg",
                result = "cli_error",
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                stderr = %stderr,
                "diagram CLI invocation failed"
            );
            return Err(DiagramError::Cli { exit_code, stderr });
        }

        match output_file.persist(&cache_path) {
            Ok(_) => {}
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
                // A concurrent render persisted the same diagram; fall through.
            }
            Err(err) => return Err(DiagramError::Io(err.error)),
        }

        let svg = fs::read_to_string(&cache_path).map_err(DiagramError::Read)?;

        info!(
            target: "foglio::render::diagram",
            op = "mermaid::render_svg",
            result = "cache_miss",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            svg_bytes = svg.len(),
            "diagram rendered via CLI"
        );

        Ok(svg)
    }
}

fn hash_source(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_lifts_diagram_fences_out() {
        let markdown = "intro\n\n```mermaid\ngraph TD;\nA-->B;\n```\n\noutro\n";
        let prepared = prepare_markup(markdown);

        assert_eq!(prepared.blocks.len(), 1);
        assert_eq!(prepared.blocks[0].kind, "mermaid");
        assert_eq!(prepared.blocks[0].source, "graph TD;\nA-->B;");
        assert!(prepared.text.contains("data-diagram=\"mermaid\""));
        assert!(prepared.text.contains("data-diagram-index=\"0\""));
        assert!(!prepared.text.contains("graph TD"));
        assert!(prepared.text.contains("intro"));
        assert!(prepared.text.contains("outro"));
    }

    #[test]
    fn prepare_keeps_ordinary_fences() {
        let markdown = "```rust\nfn main() {}\n```\n";
        let prepared = prepare_markup(markdown);

        assert!(prepared.blocks.is_empty());
        assert_eq!(prepared.text, markdown);
    }

    #[test]
    fn prepare_ignores_diagram_fence_inside_code_fence() {
        let markdown = "````\n```mermaid\nnot a diagram\n```\n````\n";
        let prepared = prepare_markup(markdown);

        // The inner fence opens inside a literal block and must survive.
        assert!(prepared.blocks.is_empty());
        assert!(prepared.text.contains("```mermaid"));
    }

    #[test]
    fn prepare_closes_unterminated_fence_at_eof() {
        let prepared = prepare_markup("```flow\nst=>start: Begin");

        assert_eq!(prepared.blocks.len(), 1);
        assert_eq!(prepared.blocks[0].kind, "flow");
        assert_eq!(prepared.blocks[0].source, "st=>start: Begin");
    }

    #[test]
    fn swap_without_renderer_injects_source_text() {
        let blocks = vec![DiagramBlock {
            kind: "mermaid".to_string(),
            source: "graph TD;A-->B;".to_string(),
        }];
        let html = "<div data-diagram=\"mermaid\" data-diagram-index=\"0\"></div>";
        let swapped = swap_diagrams(html, &blocks, None).expect("swap");

        assert!(swapped.contains("A--&gt;B"));
        assert!(swapped.contains("data-diagram=\"mermaid\""));
        assert!(!swapped.contains("data-diagram-index"));
    }

    #[cfg(unix)]
    mod cli {
        use std::os::unix::fs::PermissionsExt;

        use tempfile::TempDir;

        use super::*;

        fn make_executable(path: &PathBuf) {
            let mut perms = fs::metadata(path).expect("metadata").permissions();
            perms.set_mode(0o755);
            fs::set_permissions(path, perms).expect("set perms");
        }

        fn write_fake_cli(dir: &TempDir, body: &str) -> PathBuf {
            let script_path = dir.path().join("fake-mmdc");
            fs::write(&script_path, body).expect("write script");
            make_executable(&script_path);
            script_path
        }

        #[test]
        fn renders_and_caches_svg() {
            let dir = TempDir::new().expect("temp dir");
            let calls_path = dir.path().join("calls.log");
            let script = format!(
                r#"#!/bin/sh
set -eu
echo run >> "{calls}"
out=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    --output)
      shift
      out="$1"
      ;;
    *)
      shift
      ;;
  esac
done
if [ -z "${{out:-}}" ]; then
  echo "missing --output" >&2
  exit 2
fi
printf '<svg>diagram</svg>' > "$out"
"#,
                calls = calls_path.display()
            );
            let script_path = write_fake_cli(&dir, &script);

            let cache_dir = dir.path().join("cache");
            let renderer = MermaidCli::new(script_path, cache_dir).expect("renderer");

            let svg = renderer.render_svg("graph TD;A-->B;").expect("svg");
            assert!(svg.contains("<svg>diagram</svg>"));

            // Second render of the same source is a cache hit.
            let again = renderer.render_svg("graph TD;A-->B;").expect("svg");
            assert_eq!(again, svg);

            let calls = fs::read_to_string(&calls_path).expect("calls log");
            assert_eq!(calls.lines().count(), 1, "CLI ran more than once: {calls}");
        }

        #[test]
        fn surfaces_cli_failure() {
            let dir = TempDir::new().expect("temp dir");
            let script_path = write_fake_cli(
                &dir,
                "#!/bin/sh\necho \"render exploded\" >&2\nexit 9\n",
            );

            let cache_dir = dir.path().join("cache");
            let renderer = MermaidCli::new(script_path, cache_dir).expect("renderer");

            let err = renderer
                .render_svg("graph TD;A-->B;")
                .expect_err("cli failure");
            match err {
                DiagramError::Cli { exit_code, stderr } => {
                    assert_eq!(exit_code, Some(9));
                    assert!(stderr.contains("render exploded"));
                }
                other => panic!("unexpected error variant: {other:?}"),
            }
        }
    }
}
