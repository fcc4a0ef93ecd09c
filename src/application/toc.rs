//! Table-of-contents construction from the flat heading stream.
//!
//! The converter hands over headings in document order tagged with their
//! level; nesting falls out of level comparison alone. A deeper heading opens
//! a child scope, an equal or shallower one closes the current scope and
//! returns control to the enclosing scan, so level gaps (an `h3` directly
//! under an `h1`) nest without inventing intermediate nodes.

use ammonia::clean_text;

use crate::domain::headings::{HeadingRecord, TocNode};

/// Build the nested tree for an ordered heading sequence.
pub fn build_tree(headings: &[HeadingRecord]) -> Vec<TocNode> {
    let mut cursor = 0usize;
    consume(headings, &mut cursor, 0)
}

/// Consume records strictly deeper than `level`, recursing for each node's
/// subtree before resuming the sibling scan.
fn consume(headings: &[HeadingRecord], cursor: &mut usize, level: u8) -> Vec<TocNode> {
    let mut nodes = Vec::new();
    while let Some(record) = headings.get(*cursor) {
        if record.level <= level {
            break;
        }
        *cursor += 1;

        let children = consume(headings, cursor, record.level);
        nodes.push(TocNode {
            anchor: record.anchor.clone(),
            text: record.text.clone(),
            children,
        });
    }
    nodes
}

/// Render a tree as a nested `<ul>` list. Empty input renders nothing.
pub fn render_list(nodes: &[TocNode]) -> String {
    let mut out = String::new();
    render_into(nodes, &mut out);
    out
}

/// Render the complete TOC block prepended to a document.
pub fn toc_block(headings: &[HeadingRecord]) -> String {
    let tree = build_tree(headings);

    let mut out = String::from(
        "<div class=\"toc-list\"><h1 id=\"table-of-contents\">Table of Contents</h1>\n<ul>",
    );
    render_into(&tree, &mut out);
    out.push_str("</ul></div>");
    out
}

fn render_into(nodes: &[TocNode], out: &mut String) {
    for node in nodes {
        out.push_str("<li><a href=\"#");
        out.push_str(&clean_text(&node.anchor));
        out.push_str("\">");
        out.push_str(&clean_text(&node.text));
        out.push_str("</a>");
        if !node.children.is_empty() {
            out.push_str("<ul>");
            render_into(&node.children, out);
            out.push_str("</ul>");
        }
        out.push_str("</li>");
    }
}
