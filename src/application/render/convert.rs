//! Markdown conversion: comrak AST walk producing HTML plus the structured
//! facts later stages need (headings in document order, math fragments).

use std::sync::Arc;

use comrak::{
    Arena, format_html,
    nodes::{AstNode, NodeHtmlBlock, NodeValue},
    parse_document,
};
use tracing::warn;

use crate::domain::headings::HeadingRecord;
use crate::domain::slug::AnchorSlugger;

use super::RenderError;
use super::config;
use super::highlight::{self, CodeHighlighter};
use super::math::MathRenderer;

/// Fixed converter inputs, decided once per pipeline.
pub(crate) struct ConverterSettings {
    pub header_prefix: String,
    pub math: bool,
    pub math_cache_capacity: usize,
    pub highlighter: Arc<dyn CodeHighlighter>,
}

/// One-time-constructed markdown converter.
///
/// Math parsing is baked into the comrak options at construction, so a
/// pipeline built without math support never sees math nodes at all.
pub(crate) struct MarkdownConverter {
    options: comrak::Options<'static>,
    header_prefix: String,
    highlighter: Arc<dyn CodeHighlighter>,
    math: Option<MathRenderer>,
}

/// A rendered math fragment swapped out as an opaque placeholder until the
/// restore stage puts it back, after sanitization.
#[derive(Clone)]
pub(crate) struct MathFragment {
    pub(crate) placeholder: String,
    pub(crate) html: String,
    pub(crate) is_block: bool,
}

/// Structured conversion result.
#[derive(Default)]
pub(crate) struct Conversion {
    pub(crate) html: String,
    pub(crate) headings: Vec<HeadingRecord>,
    pub(crate) math_fragments: Vec<MathFragment>,
    pub(crate) contains_math: bool,
    pub(crate) contains_code: bool,
}

impl MarkdownConverter {
    pub(crate) fn new(settings: ConverterSettings) -> Self {
        Self {
            options: config::converter_options(settings.math),
            header_prefix: settings.header_prefix,
            highlighter: settings.highlighter,
            math: settings
                .math
                .then(|| MathRenderer::new(settings.math_cache_capacity)),
        }
    }

    pub(crate) fn convert(&self, markdown: &str) -> Result<Conversion, RenderError> {
        let arena = Arena::new();
        let root = parse_document(&arena, markdown, &self.options);

        let mut walker = ConvertWalker {
            converter: self,
            slugger: AnchorSlugger::new(),
            conversion: Conversion::default(),
            math_counter: 0,
        };
        walker.visit(root)?;

        let mut conversion = walker.conversion;
        let mut html = String::new();
        format_html(root, &self.options, &mut html).map_err(|err| RenderError::Markdown {
            message: err.to_string(),
        })?;
        conversion.html = html;

        Ok(conversion)
    }
}

struct ConvertWalker<'c> {
    converter: &'c MarkdownConverter,
    slugger: AnchorSlugger,
    conversion: Conversion,
    math_counter: usize,
}

impl ConvertWalker<'_> {
    fn visit(&mut self, node: &AstNode<'_>) -> Result<(), RenderError> {
        if let Some(level) = heading_level(node) {
            self.collect_heading(node, level);
        }

        if self.handle_math_node(node)? {
            // Fully rewritten; children were replaced along with the node.
        } else if let Some((info, literal)) = extract_code_block(node) {
            self.highlight_code_block(node, &info, &literal)?;
        }

        let mut child = node.first_child();
        while let Some(next) = child {
            self.visit(next)?;
            child = next.next_sibling();
        }

        Ok(())
    }

    fn collect_heading(&mut self, node: &AstNode<'_>, level: u8) {
        let text = collect_inline_text(node);
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let slug = self.slugger.anchor_for(&normalized);
        self.conversion.headings.push(HeadingRecord {
            anchor: format!("{}{slug}", self.converter.header_prefix),
            level,
            text: normalized,
        });
    }

    fn highlight_code_block(
        &mut self,
        node: &AstNode<'_>,
        info: &str,
        literal: &str,
    ) -> Result<(), RenderError> {
        let mut segments = info.split_whitespace();
        let language = segments.next().map(str::to_string);
        let meta = segments.collect::<Vec<_>>().join(" ");
        let meta_ref = (!meta.is_empty()).then_some(meta.as_str());

        let html = self
            .converter
            .highlighter
            .highlight(language.as_deref(), meta_ref, literal)?;
        self.conversion.contains_code = true;

        let mut data = node.data.borrow_mut();
        data.value = NodeValue::HtmlBlock(NodeHtmlBlock {
            block_type: 0,
            literal: html,
        });
        Ok(())
    }

    fn handle_math_node(&mut self, node: &AstNode<'_>) -> Result<bool, RenderError> {
        let math_data = {
            let data = node.data.borrow();
            if let NodeValue::Math(math_node) = &data.value {
                Some((math_node.literal.clone(), math_node.display_math))
            } else {
                None
            }
        };
        let Some((literal, display_mode)) = math_data else {
            return Ok(false);
        };

        // Math nodes only exist when the converter was built with math
        // parsing on, so the renderer is present here.
        let Some(renderer) = &self.converter.math else {
            return Ok(false);
        };

        match renderer.render(&literal, display_mode) {
            Ok(html) => {
                let container = if display_mode {
                    format!("<div data-role=\"math-block\">{html}</div>")
                } else {
                    format!("<span data-role=\"math-inline\">{html}</span>")
                };
                let placeholder = format!("__FOGLIO_MATH_{}__", self.math_counter);
                self.math_counter = self.math_counter.saturating_add(1);
                self.conversion.math_fragments.push(MathFragment {
                    placeholder: placeholder.clone(),
                    html: container,
                    is_block: display_mode,
                });

                let mut data = node.data.borrow_mut();
                data.value = if display_mode {
                    NodeValue::HtmlBlock(NodeHtmlBlock {
                        block_type: 0,
                        literal: format!("<div>{placeholder}</div>"),
                    })
                } else {
                    NodeValue::HtmlInline(placeholder)
                };
                self.conversion.contains_math = true;
                Ok(true)
            }
            Err(err) => {
                warn!(
                    target: "foglio::render::math",
                    error = %err,
                    display_mode,
                    "math rendering failed; falling back to source text"
                );
                self.apply_math_fallback(node, &literal, display_mode);
                Ok(true)
            }
        }
    }

    fn apply_math_fallback(&mut self, node: &AstNode<'_>, literal: &str, display_mode: bool) {
        if display_mode {
            let highlighted = self
                .converter
                .highlighter
                .highlight(Some("math"), None, literal)
                .unwrap_or_else(|_| highlight::plain_code_block("math", literal));
            self.conversion.contains_code = true;

            let mut data = node.data.borrow_mut();
            data.value = NodeValue::HtmlBlock(NodeHtmlBlock {
                block_type: 0,
                literal: highlighted,
            });
        } else {
            let escaped = ammonia::clean_text(literal);
            let mut data = node.data.borrow_mut();
            data.value =
                NodeValue::HtmlInline(format!("<code data-math-style=\"inline\">{escaped}</code>"));
        }
    }
}

fn heading_level(node: &AstNode<'_>) -> Option<u8> {
    let data = node.data.borrow();
    if let NodeValue::Heading(heading) = &data.value {
        Some(heading.level)
    } else {
        None
    }
}

fn extract_code_block(node: &AstNode<'_>) -> Option<(String, String)> {
    let data = node.data.borrow();
    if let NodeValue::CodeBlock(block) = &data.value {
        Some((block.info.trim().to_string(), block.literal.clone()))
    } else {
        None
    }
}

fn collect_inline_text(node: &AstNode<'_>) -> String {
    fn walk(node: &AstNode<'_>, buffer: &mut String) {
        {
            let data = node.data.borrow();
            match &data.value {
                NodeValue::Text(text) => buffer.push_str(text),
                NodeValue::Code(code) => buffer.push_str(&code.literal),
                NodeValue::LineBreak | NodeValue::SoftBreak => buffer.push(' '),
                _ => {}
            }
        }
        let mut child = node.first_child();
        while let Some(next) = child {
            walk(next, buffer);
            child = next.next_sibling();
        }
    }

    let mut text = String::new();
    let mut child = node.first_child();
    while let Some(next) = child {
        walk(next, &mut text);
        child = next.next_sibling();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::render::highlight::SyntectHighlighter;

    fn converter(math: bool, prefix: &str) -> MarkdownConverter {
        MarkdownConverter::new(ConverterSettings {
            header_prefix: prefix.to_string(),
            math,
            math_cache_capacity: 16,
            highlighter: SyntectHighlighter::shared(),
        })
    }

    #[test]
    fn collects_headings_in_order_with_prefix() {
        let conversion = converter(false, "md-")
            .convert("# Intro\n\n## Details\n\n### Fine print\n")
            .expect("convert");

        let anchors: Vec<_> = conversion
            .headings
            .iter()
            .map(|h| (h.anchor.as_str(), h.level))
            .collect();
        assert_eq!(
            anchors,
            vec![("md-intro", 1), ("md-details", 2), ("md-fine-print", 3)]
        );
    }

    #[test]
    fn duplicate_headings_receive_suffixed_anchors() {
        let conversion = converter(false, "")
            .convert("## Usage\n\ntext\n\n## Usage\n")
            .expect("convert");

        assert_eq!(conversion.headings[0].anchor, "usage");
        assert_eq!(conversion.headings[1].anchor, "usage-2");
    }

    #[test]
    fn symbol_only_heading_gets_positional_anchor() {
        let conversion = converter(false, "md-").convert("## !!!\n").expect("convert");
        assert_eq!(conversion.headings[0].anchor, "md-section");
    }

    #[test]
    fn fenced_code_is_highlighted() {
        let conversion = converter(false, "")
            .convert("```rust\nfn main() {}\n```\n")
            .expect("convert");

        assert!(conversion.contains_code);
        assert!(conversion.html.contains("syntax-lang-rust"));
    }

    #[test]
    fn math_produces_placeholder_fragments() {
        let conversion = converter(true, "").convert("inline $a^2$ math\n").expect("convert");

        assert!(conversion.contains_math);
        assert_eq!(conversion.math_fragments.len(), 1);
        assert!(conversion.html.contains("__FOGLIO_MATH_0__"));
        assert!(!conversion.html.contains("class=\"katex"));
    }

    #[test]
    fn math_disabled_leaves_dollars_as_text() {
        let conversion = converter(false, "").convert("price $5 and $x$\n").expect("convert");

        assert!(!conversion.contains_math);
        assert!(conversion.math_fragments.is_empty());
        assert!(conversion.html.contains("$x$"));
    }
}
