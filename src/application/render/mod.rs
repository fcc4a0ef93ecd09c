//! The document rendering pipeline.
//!
//! Rendering is a fixed sequence of named stages: diagram fences are lifted
//! out of the source, markdown converts to HTML with headings collected along
//! the way, the HTML is sanitized, math placeholders are swapped back in,
//! heading anchors and image fallbacks are stamped on, diagram containers are
//! finalized, and the table of contents is prepended. The pipeline is pure
//! with respect to the host page: it accepts markdown and render toggles and
//! produces `PreparedDocument`, leaving DOM concerns to the caller.

mod config;
mod convert;
mod diagram;
mod highlight;
mod math;

use std::{sync::Arc, time::Instant};

use lol_html::{RewriteStrSettings, element, rewrite_str};
use metrics::histogram;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::info;

use crate::domain::{headings::HeadingRecord, settings::RenderToggles};

use convert::{ConverterSettings, MarkdownConverter, MathFragment};
use diagram::DiagramBlock;

pub use diagram::{DiagramError, DiagramRenderer, MermaidCli};
pub use highlight::{CodeHighlighter, SyntectHighlighter};

use super::toc;

const METRIC_RENDER_MS: &str = "foglio_render_ms";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("markdown parsing failed: {message}")]
    Markdown { message: String },
    #[error("syntax highlighting failed: {language}: {message}")]
    Highlighting { language: String, message: String },
    #[error("document processing failed: {message}")]
    Document { message: String },
}

/// Tunables fixed for the lifetime of a pipeline.
#[derive(Clone)]
pub struct PipelineSettings {
    /// Prefix prepended to every derived heading anchor.
    pub header_prefix: String,
    /// Bound on the memoized math fragment cache.
    pub math_cache_capacity: usize,
    pub highlighter: Arc<dyn CodeHighlighter>,
}

/// The finished product of a render cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedDocument {
    pub html: String,
    pub headings: Vec<HeadingRecord>,
    /// Rendered TOC block, also embedded at the top of `html`.
    pub toc: Option<String>,
    pub contains_math: bool,
    pub contains_diagrams: bool,
}

pub struct RenderPipeline {
    settings: PipelineSettings,
    converter: OnceCell<MarkdownConverter>,
    sanitizer: ammonia::Builder<'static>,
    diagrams: Option<Arc<dyn DiagramRenderer>>,
}

impl RenderPipeline {
    pub fn new(settings: PipelineSettings, diagrams: Option<Arc<dyn DiagramRenderer>>) -> Self {
        Self {
            settings,
            converter: OnceCell::new(),
            sanitizer: config::document_sanitizer(),
            diagrams,
        }
    }

    /// Run the full stage sequence over one markdown document.
    ///
    /// The converter is built on first use and reused for the pipeline's
    /// lifetime; callers that change render semantics construct a fresh
    /// pipeline rather than reconfiguring this one.
    pub fn render(
        &self,
        markdown: &str,
        toggles: &RenderToggles,
    ) -> Result<PreparedDocument, RenderError> {
        let started_at = Instant::now();

        let prepared = self.prepare_stage(markdown, toggles);
        let conversion = self.convert_stage(&prepared.text, toggles)?;
        let sanitized = self.sanitize_stage(&conversion.html);
        let restored = restore_stage(sanitized, &conversion.math_fragments);
        let anchored = anchor_stage(&restored, &conversion.headings)?;
        let with_fallbacks = image_stage(&anchored)?;
        let with_diagrams = self.diagram_stage(&with_fallbacks, &prepared.blocks)?;
        let (html, toc) = toc_stage(with_diagrams, &conversion.headings, toggles);

        info!(
            target: "foglio::render",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            headings = conversion.headings.len(),
            math_fragments = conversion.math_fragments.len(),
            diagrams = prepared.blocks.len(),
            contains_code = conversion.contains_code,
            toc = toc.is_some(),
            "document rendered"
        );
        histogram!(
            METRIC_RENDER_MS,
            "math" => if toggles.math { "on" } else { "off" }
        )
        .record(started_at.elapsed().as_secs_f64() * 1000.0);

        Ok(PreparedDocument {
            html,
            headings: conversion.headings,
            toc,
            contains_math: conversion.contains_math,
            contains_diagrams: !prepared.blocks.is_empty(),
        })
    }

    /// Diagram fences are only special when math support is on, matching the
    /// converter profile hosts opt into together with math.
    fn prepare_stage(&self, markdown: &str, toggles: &RenderToggles) -> diagram::PreparedMarkup {
        if toggles.math {
            diagram::prepare_markup(markdown)
        } else {
            diagram::PreparedMarkup {
                text: markdown.to_string(),
                blocks: Vec::new(),
            }
        }
    }

    fn convert_stage(
        &self,
        markdown: &str,
        toggles: &RenderToggles,
    ) -> Result<convert::Conversion, RenderError> {
        let converter = self.converter.get_or_init(|| {
            MarkdownConverter::new(ConverterSettings {
                header_prefix: self.settings.header_prefix.clone(),
                math: toggles.math,
                math_cache_capacity: self.settings.math_cache_capacity,
                highlighter: Arc::clone(&self.settings.highlighter),
            })
        });
        converter.convert(markdown)
    }

    fn sanitize_stage(&self, html: &str) -> String {
        self.sanitizer.clean(html).to_string()
    }

    fn diagram_stage(
        &self,
        html: &str,
        blocks: &[DiagramBlock],
    ) -> Result<String, RenderError> {
        diagram::swap_diagrams(html, blocks, self.diagrams.as_deref())
    }
}

/// Swap math placeholder tokens back for their rendered fragments.
/// Placeholders are plain text, which is exactly why they exist: the KaTeX
/// markup never passes through the sanitizer.
fn restore_stage(html: String, fragments: &[MathFragment]) -> String {
    if fragments.is_empty() {
        return html;
    }

    let mut restored = html;
    for fragment in fragments {
        if fragment.is_block {
            // The converter wrapped block placeholders in a bare div; fold
            // the wrapper away when it survived sanitization intact.
            let wrapped = format!("<div>{}</div>", fragment.placeholder);
            if restored.contains(&wrapped) {
                restored = restored.replace(&wrapped, &fragment.html);
                continue;
            }
        }
        restored = restored.replace(&fragment.placeholder, &fragment.html);
    }
    restored
}

/// Stamp collected anchor ids onto heading elements in document order.
///
/// Headings written as raw HTML in the source have no collected record; they
/// are left without an id, and the cursor holds position until an element of
/// the expected level comes along.
fn anchor_stage(html: &str, headings: &[HeadingRecord]) -> Result<String, RenderError> {
    if headings.is_empty() {
        return Ok(html.to_string());
    }

    let mut cursor = 0usize;
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("h1, h2, h3, h4, h5, h6", move |el| {
                let tag_name = el.tag_name();
                let level = tag_name
                    .strip_prefix('h')
                    .and_then(|value| value.parse::<u8>().ok())
                    .unwrap_or(0);
                if let Some(record) = headings.get(cursor) {
                    if record.level == level {
                        cursor += 1;
                        el.set_attribute("id", &record.anchor)?;
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

/// Annotate root-relative images with the recovery source the host retries
/// with when the original fails to load: the same path minus one leading `/`.
fn image_stage(html: &str) -> Result<String, RenderError> {
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("img[src]", |el| {
                if let Some(src) = el.get_attribute("src") {
                    if let Some(stripped) = src.strip_prefix('/') {
                        if !stripped.is_empty() && !stripped.starts_with('/') {
                            el.set_attribute("data-fallback-src", stripped)?;
                        }
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

fn toc_stage(
    html: String,
    headings: &[HeadingRecord],
    toggles: &RenderToggles,
) -> (String, Option<String>) {
    if !toggles.toc || headings.is_empty() {
        return (html, None);
    }

    let block = toc::toc_block(headings);
    let combined = format!("{block}\n{html}");
    (combined, Some(block))
}
