//! Identity of the document being viewed.
//!
//! A [`DocumentLocator`] wraps the page URL and answers the routing questions
//! the engine asks of it: the settings key for per-page overrides, the file
//! extension used by the eligibility gate, the fragment used for post-render
//! scrolling, and a content-type guess for hosts that cannot report one.

use url::Url;

/// Extensions the engine recognizes as renderable documents by default.
pub const DEFAULT_EXTENSIONS: [&str; 8] = [
    "md", "text", "markdown", "mdown", "txt", "mkd", "rst", "rmd",
];

/// Wrapper around the viewed document's URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLocator {
    url: Url,
}

impl DocumentLocator {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    /// Parse a locator from a URL string.
    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(input)?))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The exact URL string, fragment included. Per-page theme overrides are
    /// keyed by this value.
    pub fn page_key(&self) -> &str {
        self.url.as_str()
    }

    /// Scheme plus authority, used by same-origin fetch guards.
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    /// The fragment identifier, if any.
    pub fn fragment(&self) -> Option<&str> {
        self.url.fragment()
    }

    /// Lowercased extension of the final path segment, query and fragment
    /// excluded. `None` when the last segment carries no dot suffix.
    pub fn extension(&self) -> Option<String> {
        let segment = self.url.path_segments()?.next_back()?;
        let (stem, ext) = segment.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// Guess the content type from the path, for hosts that cannot report the
    /// served type.
    pub fn guessed_content_type(&self) -> Option<String> {
        let mime = mime_guess::from_path(self.url.path()).first()?;
        Some(mime.essence_str().to_string())
    }
}

/// Whether a served content type denotes renderable document text.
///
/// Accepts `text/markdown`, `text/x-markdown`, `text/plain` and
/// `text/x-plain`; parameters such as charset are ignored.
pub fn is_text_document(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let Some(subtype) = essence.strip_prefix("text/") else {
        return false;
    };
    let subtype = subtype.strip_prefix("x-").unwrap_or(subtype);
    matches!(subtype, "markdown" | "plain")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator(input: &str) -> DocumentLocator {
        DocumentLocator::parse(input).expect("valid url")
    }

    #[test]
    fn extension_ignores_query_and_fragment() {
        let doc = locator("https://example.com/notes/README.MD?raw=1#usage");
        assert_eq!(doc.extension().as_deref(), Some("md"));
        assert_eq!(doc.fragment(), Some("usage"));
    }

    #[test]
    fn extension_absent_for_bare_segment() {
        assert_eq!(locator("https://example.com/docs/guide").extension(), None);
        assert_eq!(locator("https://example.com/.hidden").extension(), None);
    }

    #[test]
    fn page_key_retains_fragment() {
        let doc = locator("https://example.com/a.md#top");
        assert_eq!(doc.page_key(), "https://example.com/a.md#top");
    }

    #[test]
    fn text_document_gate_accepts_markdown_variants() {
        assert!(is_text_document("text/markdown"));
        assert!(is_text_document("text/x-markdown; charset=UTF-8"));
        assert!(is_text_document("Text/Plain"));
        assert!(!is_text_document("text/html"));
        assert!(!is_text_document("application/json"));
    }

    #[test]
    fn guessed_content_type_follows_path() {
        let doc = locator("https://example.com/docs/design.md");
        assert_eq!(doc.guessed_content_type().as_deref(), Some("text/markdown"));
    }
}
