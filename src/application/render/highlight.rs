//! Pluggable code highlighting for fenced blocks.

use std::sync::Arc;

use syntect::{
    dumps::from_uncompressed_data,
    html::{ClassStyle, ClassedHTMLGenerator},
    parsing::{SyntaxReference, SyntaxSet},
    util::LinesWithEndings,
};

use super::RenderError;

/// Turns a fenced code block into display HTML. The pipeline ships a syntect
/// implementation; embedders can substitute their own.
pub trait CodeHighlighter: Send + Sync {
    fn highlight(
        &self,
        language: Option<&str>,
        meta: Option<&str>,
        code: &str,
    ) -> Result<String, RenderError>;
}

/// Syntect-backed highlighter emitting `syntax-` prefixed CSS classes, so the
/// palette comes from the theme stylesheet rather than inline styles.
pub struct SyntectHighlighter {
    syntax_set: SyntaxSet,
    class_style: ClassStyle,
}

impl SyntectHighlighter {
    pub fn new() -> Self {
        let syntax_bytes = include_bytes!(env!("SYNTAX_PACK_FILE"));
        let syntax_set: SyntaxSet =
            from_uncompressed_data(syntax_bytes).expect("syntax pack must be valid");
        Self {
            syntax_set,
            class_style: ClassStyle::SpacedPrefixed { prefix: "syntax-" },
        }
    }

    pub fn shared() -> Arc<dyn CodeHighlighter> {
        Arc::new(Self::new())
    }

    fn find_syntax(&self, token: &str) -> Option<&SyntaxReference> {
        let lowercase = token.to_ascii_lowercase();
        self.syntax_set
            .find_syntax_by_token(&lowercase)
            .or_else(|| self.syntax_set.find_syntax_by_name(&lowercase))
            .or_else(|| self.syntax_set.find_syntax_by_extension(&lowercase))
    }
}

impl Default for SyntectHighlighter {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeHighlighter for SyntectHighlighter {
    fn highlight(
        &self,
        language: Option<&str>,
        meta: Option<&str>,
        code: &str,
    ) -> Result<String, RenderError> {
        let lang_token = language.unwrap_or("text");
        let syntax = self
            .find_syntax(lang_token)
            .unwrap_or_else(|| self.syntax_set.find_syntax_plain_text());

        let mut code_with_newline = code.to_string();
        if !code_with_newline.ends_with('\n') {
            code_with_newline.push('\n');
        }

        let mut generator =
            ClassedHTMLGenerator::new_with_class_style(syntax, &self.syntax_set, self.class_style);

        for line in LinesWithEndings::from(code_with_newline.as_str()) {
            generator
                .parse_html_for_line_which_includes_newline(line)
                .map_err(|err| RenderError::Highlighting {
                    language: lang_token.to_string(),
                    message: err.to_string(),
                })?;
        }

        let highlighted = generator.finalize();
        let lang_lower = lang_token.to_ascii_lowercase();
        let meta_attr = meta
            .filter(|m| !m.is_empty())
            .map(|m| format!(" data-meta=\"{}\"", ammonia::clean_text(m)))
            .unwrap_or_default();

        Ok(format!(
            "<pre class=\"syntax-highlight syntax-lang-{lang_lower}\" data-language=\"{lang_lower}\">\
<code class=\"language-{lang_lower} syntax-code\"{meta_attr}>{highlighted}</code></pre>"
        ))
    }
}

/// Escaped, unhighlighted code block used when highlighting itself fails.
pub(crate) fn plain_code_block(language: &str, literal: &str) -> String {
    let escaped = ammonia::clean_text(literal);
    let mut html = String::from("<pre class=\"syntax-highlight\"");
    if !language.is_empty() {
        html.push_str(" data-language=\"");
        html.push_str(&ammonia::clean_text(language));
        html.push('"');
    }
    html.push_str("><code>");
    html.push_str(&escaped);
    if !escaped.ends_with('\n') {
        html.push('\n');
    }
    html.push_str("</code></pre>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highlights_known_language_with_prefixed_classes() {
        let highlighter = SyntectHighlighter::new();
        let html = highlighter
            .highlight(Some("rust"), None, "fn main() {}")
            .expect("highlight");

        assert!(html.contains("syntax-lang-rust"));
        assert!(html.contains("data-language=\"rust\""));
        assert!(html.contains("class=\"syntax-"));
    }

    #[test]
    fn unknown_language_falls_back_to_plain_text() {
        let highlighter = SyntectHighlighter::new();
        let html = highlighter
            .highlight(Some("no-such-lang"), None, "plain words")
            .expect("highlight");

        assert!(html.contains("plain words"));
        assert!(html.contains("syntax-lang-no-such-lang"));
    }

    #[test]
    fn meta_text_is_escaped() {
        let highlighter = SyntectHighlighter::new();
        let html = highlighter
            .highlight(Some("text"), Some("title=\"<x>\""), "body")
            .expect("highlight");

        assert!(html.contains("data-meta="));
        assert!(!html.contains("<x>"));
    }

    #[test]
    fn plain_block_escapes_markup() {
        let html = plain_code_block("text", "<b>bold</b>");
        assert!(html.contains("&lt;b&gt;"));
        assert!(!html.contains("<b>bold"));
    }
}
