//! KaTeX math rendering with a bounded per-pipeline memo.
//!
//! Math fragments repeat across live re-renders of the same document, and
//! KaTeX is by far the slowest stage, so rendered HTML is cached keyed by
//! (source, display-mode).

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use katex::{OptsBuilder, OutputType};
use lru::LruCache;
use tracing::warn;

use super::RenderError;

pub(crate) struct MathRenderer {
    cache: Mutex<LruCache<(String, bool), String>>,
}

impl MathRenderer {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("clamped to at least 1");
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Render a math expression to HTML, inline or display-style.
    pub(crate) fn render(&self, literal: &str, display_mode: bool) -> Result<String, RenderError> {
        let key = (literal.to_string(), display_mode);
        if let Some(html) = self.lock_cache("lookup").get(&key) {
            return Ok(html.clone());
        }

        let html = render_math_html(literal, display_mode)?;
        self.lock_cache("store").put(key, html.clone());
        Ok(html)
    }

    fn lock_cache(&self, op: &'static str) -> MutexGuard<'_, LruCache<(String, bool), String>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    target: "foglio::render::math",
                    op,
                    result = "poisoned_recovered",
                    "Recovered from poisoned math cache lock"
                );
                poisoned.into_inner()
            }
        }
    }
}

fn render_math_html(literal: &str, display_mode: bool) -> Result<String, RenderError> {
    let mut builder = OptsBuilder::default();
    builder.display_mode(display_mode);
    builder.output_type(OutputType::Html);

    let opts = builder.build().map_err(|err| RenderError::Document {
        message: format!("failed to build KaTeX options: {err}"),
    })?;

    katex::render_with_opts(literal, opts).map_err(|err| RenderError::Document {
        message: format!("KaTeX rendering failed: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_inline_math() {
        let renderer = MathRenderer::new(16);
        let html = renderer.render("a^2 + b^2", false).expect("katex html");
        assert!(html.contains("class=\"katex"));
    }

    #[test]
    fn cache_returns_identical_fragment() {
        let renderer = MathRenderer::new(16);
        let first = renderer.render("\\frac{1}{2}", true).expect("katex html");
        let second = renderer.render("\\frac{1}{2}", true).expect("katex html");
        assert_eq!(first, second);
    }

    #[test]
    fn invalid_input_surfaces_error() {
        let renderer = MathRenderer::new(16);
        assert!(renderer.render("\\undefinedmacro{", false).is_err());
    }
}
