use std::{borrow::Cow, collections::HashSet};

use ammonia::Builder as AmmoniaBuilder;
use comrak::options::{ListStyleType, Options};

/// Comrak options for document conversion. Math parsing is only enabled when
/// the math toggle is on so `$` stays literal text otherwise.
pub(crate) fn converter_options(math: bool) -> Options<'static> {
    let mut options = Options::default();

    let ext = &mut options.extension;
    ext.strikethrough = true;
    ext.tagfilter = false;
    ext.table = true;
    ext.autolink = true;
    ext.tasklist = true;
    ext.superscript = true;
    ext.footnotes = true;
    ext.inline_footnotes = true;
    ext.description_lists = true;
    ext.front_matter_delimiter = Some("---".to_string());
    ext.multiline_block_quotes = true;
    ext.alerts = true;
    ext.math_dollars = math;
    ext.math_code = math;
    ext.wikilinks_title_after_pipe = true;
    ext.underline = true;
    ext.subscript = true;
    ext.spoiler = true;
    ext.cjk_friendly_emphasis = true;

    let render = &mut options.render;
    render.github_pre_lang = true;
    render.full_info_string = true;
    render.tasklist_classes = true;
    render.list_style = ListStyleType::Dash;
    // Raw HTML passes through here; the sanitize stage is the security boundary.
    render.r#unsafe = true;
    render.figure_with_caption = true;
    render.sourcepos = false;
    render.escaped_char_spans = true;
    render.gfm_quirks = true;

    options
}

/// Ammonia sanitizer for converted documents.
///
/// `id` and `name` survive so fragment targets keep working, `data-diagram`
/// containers and `data-fallback-src` annotations survive for the later
/// pipeline stages, and inline `style` is reduced to a vetted declaration
/// subset rather than dropped wholesale.
pub(crate) fn document_sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();

    let tags: HashSet<&'static str> = HashSet::from([
        "a",
        "abbr",
        "blockquote",
        "br",
        "caption",
        "code",
        "dd",
        "del",
        "details",
        "div",
        "dl",
        "dt",
        "em",
        "figcaption",
        "figure",
        "h1",
        "h2",
        "h3",
        "h4",
        "h5",
        "h6",
        "hr",
        "i",
        "img",
        "input",
        "ins",
        "kbd",
        "li",
        "mark",
        "ol",
        "p",
        "pre",
        "s",
        "section",
        "small",
        "span",
        "strong",
        "sub",
        "summary",
        "sup",
        "table",
        "tbody",
        "td",
        "tfoot",
        "th",
        "thead",
        "tr",
        "u",
        "ul",
        // Hand-written SVG in documents; CLI-rendered diagrams bypass this
        // builder entirely.
        "svg",
        "g",
        "path",
        "rect",
        "circle",
        "ellipse",
        "line",
        "polygon",
        "polyline",
        "text",
        "tspan",
        "defs",
        "marker",
        "title",
        "desc",
        "use",
    ]);
    builder.tags(tags);

    let generic: HashSet<&'static str> = HashSet::from([
        "class",
        "id",
        "title",
        "lang",
        "dir",
        "aria-hidden",
        "aria-label",
        "role",
        "data-footnote-ref",
        "data-footnotes",
        "data-footnote-backref",
        "data-footnote-backref-idx",
    ]);
    builder.generic_attributes(generic);

    builder.add_tags(&["style"]);
    builder.rm_clean_content_tags(&["style"]);
    builder.add_generic_attributes(&["style"]);

    builder.add_tag_attributes("a", &["name", "target"]);
    builder.add_tag_attributes(
        "img",
        &[
            "alt",
            "title",
            "width",
            "height",
            "loading",
            "decoding",
            "data-fallback-src",
        ],
    );
    builder.add_tag_attributes("code", &["data-language", "data-meta", "data-math-style"]);
    builder.add_tag_attributes("pre", &["data-language"]);
    builder.add_tag_attributes("div", &["data-diagram", "data-diagram-index"]);
    builder.add_tag_attributes("span", &["data-math-style"]);
    builder.add_tag_attributes("th", &["align", "colspan", "rowspan", "scope"]);
    builder.add_tag_attributes("td", &["align", "colspan", "rowspan"]);
    builder.add_tag_attributes("input", &["type", "checked", "disabled"]);
    builder.add_tag_attributes("details", &["open"]);
    builder.add_tag_attributes(
        "svg",
        &["viewBox", "xmlns", "width", "height", "preserveAspectRatio", "version"],
    );
    builder.add_tag_attributes("g", &["transform", "data-name"]);
    builder.add_tag_attributes(
        "path",
        &["d", "fill", "stroke", "stroke-width", "stroke-linecap", "stroke-linejoin", "opacity"],
    );
    builder.add_tag_attributes("rect", &["x", "y", "width", "height", "rx", "ry", "fill", "stroke", "stroke-width", "opacity"]);
    builder.add_tag_attributes("circle", &["cx", "cy", "r", "fill", "stroke", "stroke-width", "opacity"]);
    builder.add_tag_attributes("ellipse", &["cx", "cy", "rx", "ry", "fill", "stroke", "stroke-width", "opacity"]);
    builder.add_tag_attributes("line", &["x1", "x2", "y1", "y2", "stroke", "stroke-width", "opacity"]);
    builder.add_tag_attributes("polygon", &["points", "fill", "stroke", "stroke-width", "opacity"]);
    builder.add_tag_attributes("polyline", &["points", "fill", "stroke", "stroke-width", "opacity"]);
    builder.add_tag_attributes("text", &["x", "y", "fill", "text-anchor", "dominant-baseline", "font-size"]);
    builder.add_tag_attributes("tspan", &["x", "y", "dx", "dy", "fill", "font-size"]);
    builder.add_tag_attributes("marker", &["refX", "refY", "orient", "markerWidth", "markerHeight", "viewBox"]);
    builder.add_tag_attributes("use", &["href", "x", "y", "width", "height"]);

    builder.add_url_schemes(["http", "https", "mailto", "tel"].iter().copied());

    builder.attribute_filter(|_element, attribute, value| {
        if attribute.eq_ignore_ascii_case("style") {
            sanitize_style_attribute(value).map(Cow::Owned)
        } else {
            Some(Cow::Borrowed(value))
        }
    });

    builder
}

fn sanitize_style_attribute(value: &str) -> Option<String> {
    let mut kept = Vec::new();

    for declaration in value.split(';') {
        let decl = declaration.trim();
        if decl.is_empty() {
            continue;
        }
        if is_safe_declaration(decl) {
            kept.push(decl);
        }
    }

    if kept.is_empty() { None } else { Some(kept.join("; ")) }
}

fn is_safe_declaration(decl: &str) -> bool {
    let lower = decl.to_ascii_lowercase();

    const FORBIDDEN: [&str; 7] = [
        "expression(",
        "javascript:",
        "vbscript:",
        "-moz-binding",
        "behavior:",
        "behaviour:",
        "@import",
    ];

    if FORBIDDEN.iter().any(|needle| lower.contains(needle)) {
        return false;
    }

    !has_unsafe_url(&lower)
}

fn has_unsafe_url(lower_decl: &str) -> bool {
    let mut offset = 0;

    while let Some(start) = lower_decl[offset..].find("url(") {
        let open = offset + start + 4;
        let rest = &lower_decl[open..];
        let Some(close_rel) = rest.find(')') else {
            // Unterminated url(), treat as unsafe.
            return true;
        };
        let close = open + close_rel;
        let target = lower_decl[open..close]
            .trim_matches(|c: char| c.is_whitespace() || c == '\'' || c == '"');

        let benign_image = target.starts_with("data:image/");
        if !benign_image
            && (target.starts_with("javascript:")
                || target.starts_with("vbscript:")
                || target.starts_with("data:")
                || target.starts_with("file:"))
        {
            return true;
        }

        offset = close + 1;
    }

    false
}
