use foglio::application::render::{
    PipelineSettings, PreparedDocument, RenderPipeline, SyntectHighlighter,
};
use foglio::application::toc;
use foglio::domain::settings::RenderToggles;

fn pipeline() -> RenderPipeline {
    RenderPipeline::new(
        PipelineSettings {
            header_prefix: "md-".to_string(),
            math_cache_capacity: 64,
            highlighter: SyntectHighlighter::shared(),
        },
        None,
    )
}

fn render(markdown: &str, toggles: RenderToggles) -> PreparedDocument {
    pipeline().render(markdown, &toggles).expect("render succeeds")
}

fn load_fixture() -> &'static str {
    include_str!("fixtures/feature_tour.md")
}

#[test]
fn heading_ladder_gets_ordered_anchor_ids() {
    let document = render(
        "# A\n## B\n### C\n## D\n",
        RenderToggles {
            math: false,
            toc: true,
        },
    );

    let positions: Vec<usize> = ["id=\"md-a\"", "id=\"md-b\"", "id=\"md-c\"", "id=\"md-d\""]
        .iter()
        .map(|needle| {
            document
                .html
                .find(needle)
                .unwrap_or_else(|| panic!("missing {needle} in {}", document.html))
        })
        .collect();

    assert!(
        positions.windows(2).all(|pair| pair[0] < pair[1]),
        "heading ids should appear in document order"
    );

    let levels: Vec<u8> = document.headings.iter().map(|h| h.level).collect();
    assert_eq!(levels, vec![1, 2, 3, 2]);
}

#[test]
fn toc_tree_nests_under_the_nearest_shallower_heading() {
    let document = render(
        "# A\n## B\n### C\n## D\n",
        RenderToggles {
            math: false,
            toc: true,
        },
    );

    let tree = toc::build_tree(&document.headings);
    assert_eq!(tree.len(), 1, "one level-1 root");
    assert_eq!(tree[0].text, "A");
    assert_eq!(tree[0].children.len(), 2, "B and D sit under A");
    assert_eq!(tree[0].children[0].text, "B");
    assert_eq!(tree[0].children[0].children.len(), 1, "C sits under B");
    assert_eq!(tree[0].children[0].children[0].text, "C");
    assert_eq!(tree[0].children[1].text, "D");
    assert!(tree[0].children[1].children.is_empty());

    let block = document.toc.expect("toc block present");
    assert!(document.html.starts_with(&block), "toc leads the document");

    let b = block.find("#md-b").expect("B link");
    let c = block.find("#md-c").expect("C link");
    let d = block.find("#md-d").expect("D link");
    assert!(b < c && c < d, "toc links keep document order");
}

#[test]
fn toc_is_absent_without_headings_or_when_disabled() {
    let without_headings = render(
        "Just a paragraph.\n",
        RenderToggles {
            math: false,
            toc: true,
        },
    );
    assert!(without_headings.toc.is_none());
    assert!(!without_headings.html.contains("toc-list"));

    let disabled = render(
        "# A\n",
        RenderToggles {
            math: false,
            toc: false,
        },
    );
    assert!(disabled.toc.is_none());
    assert!(!disabled.html.contains("toc-list"));
}

#[test]
fn feature_tour_runs_every_stage() {
    let document = render(
        load_fixture(),
        RenderToggles {
            math: true,
            toc: true,
        },
    );
    let html = &document.html;

    // TOC stage: the block leads the document and lists every section.
    let block = document.toc.as_deref().expect("toc block");
    assert!(html.starts_with(block));
    for anchor in ["#md-code", "#md-data", "#md-math", "#md-diagram", "#md-media"] {
        assert!(block.contains(anchor), "toc missing {anchor}");
    }

    // Convert stage: highlighted code with themed classes survives sanitization.
    assert!(html.contains("data-language=\"rust\""));
    assert!(html.contains("syntax-lang-rust"));
    assert!(html.contains("<table>"), "GFM table renders");
    assert!(html.contains("type=\"checkbox\""), "task list renders");

    // Restore stage: math placeholders came back as rendered fragments.
    assert!(document.contains_math);
    assert!(html.contains("data-role=\"math-inline\""));
    assert!(html.contains("data-role=\"math-block\""));
    assert!(!html.contains("__FOGLIO_MATH_"), "no placeholder leaks");

    // Diagram stage: the container keeps its escaped source for the host.
    assert!(document.contains_diagrams);
    assert!(html.contains("data-diagram=\"mermaid\""));
    assert!(html.contains("Start --&gt; Finish"));
    assert!(!html.contains("data-diagram-index"), "index attribute is internal");

    // Image stage: root-relative src gets a relative fallback annotation.
    assert!(html.contains("data-fallback-src=\"assets/chart.png\""));

    // Sanitize stage: scripts gone, inline style reduced to the safe subset.
    assert!(!html.contains("<script"));
    assert!(!html.contains("alert("));
    assert!(html.contains("color: teal"));
    assert!(!html.contains("position: fixed"));
}

#[test]
fn hostile_markup_is_neutralized() {
    let document = render(
        "# Title\n\n<script>alert(1)</script>\n\n\
         <img src=\"x.png\" onerror=\"alert(2)\">\n\n\
         <a href=\"javascript:alert(3)\">click</a>\n",
        RenderToggles {
            math: false,
            toc: false,
        },
    );

    assert!(!document.html.contains("<script"));
    assert!(!document.html.contains("onerror"));
    assert!(!document.html.contains("javascript:"));
    // The benign parts of the same elements survive.
    assert!(document.html.contains("src=\"x.png\""));
    assert!(document.html.contains("click"));
}

#[test]
fn repeated_renders_of_the_same_source_are_identical() {
    let pipeline = pipeline();
    let toggles = RenderToggles {
        math: true,
        toc: true,
    };
    let markdown = "# Doc\n\nInline $x^2$ math.\n";

    let first = pipeline.render(markdown, &toggles).expect("first render");
    // The second pass hits the memoized math cache and must not diverge.
    let second = pipeline.render(markdown, &toggles).expect("second render");

    assert_eq!(first, second);
}
