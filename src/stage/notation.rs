use std::time::Instant;

use log::{info, warn};

use super::{FailurePolicy, StageDescriptor, StageReport};
use crate::convert::NOTATION_LANGUAGE;
use crate::engine::{EngineError, NotationEngine};
use crate::tree::{Element, Node, RenderedTree, Selector};

pub const DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: "notation",
    selector: Some(Selector::CodeShell {
        language: Some(NOTATION_LANGUAGE),
    }),
    policy: FailurePolicy::InlinePanel,
};

/// Replaces the notation source's `pre`.
pub const CONTAINER_CLASS: &str = "abc-notation";
pub const ERROR_CLASS: &str = "abc-error";

pub fn error_panel(err: &EngineError) -> Element {
    let heading = Element::new("p").with_child(Node::Element(
        Element::new("strong").with_child(Node::text("Notation render failed")),
    ));
    let detail = Element::new("p")
        .with_child(Node::text("Check the tune syntax."))
        .with_child(Node::Element(Element::new("br")))
        .with_child(Node::Element(
            Element::new("code").with_child(Node::text(err.to_string())),
        ));
    Element::new("div")
        .with_attr("class", ERROR_CLASS)
        .with_child(Node::Element(heading))
        .with_child(Node::Element(detail))
}

pub fn render_all(tree: &mut RenderedTree, engine: &dyn NotationEngine) -> StageReport {
    let start = Instant::now();
    let mut report = StageReport::default();
    let Some(selector) = DESCRIPTOR.selector else {
        return report;
    };

    for path in tree.select(&selector) {
        let Some(source) = tree.element(&path).map(Element::text_content) else {
            continue;
        };
        // The selector only matches `code` directly under `pre`.
        let Some((_, pre_path)) = path.split_last() else {
            continue;
        };
        let content = match engine.render(&source) {
            Ok(svg) => {
                report.rendered += 1;
                Node::Raw(svg)
            }
            Err(e) => {
                warn!("notation: {path:?} failed: {e}");
                report.failed += 1;
                Node::Element(error_panel(&e))
            }
        };
        let container = Element::new("div")
            .with_attr("class", CONTAINER_CLASS)
            .with_child(content);
        tree.replace(pre_path, Node::Element(container));
    }

    info!(
        "notation: completed in {:.1}ms ({} rendered, {} failed)",
        start.elapsed().as_secs_f64() * 1000.0,
        report.rendered,
        report.failed
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl NotationEngine for Echo {
        fn render(&self, source: &str) -> Result<String, EngineError> {
            if source.contains('#') {
                return Err(EngineError::Parse("unexpected character '#'".into()));
            }
            Ok(format!("<svg>{}</svg>", source.trim()))
        }
    }

    #[test]
    fn replaces_pre_with_container() {
        let mut t = RenderedTree::parse(
            "<p>a</p><pre><code class=\"language-abc\">CDE\n</code></pre><p>b</p>",
        )
        .unwrap();
        let report = render_all(&mut t, &Echo);
        assert_eq!(report, StageReport { rendered: 1, failed: 0 });
        assert_eq!(
            t.to_html(),
            "<p>a</p><div class=\"abc-notation\"><svg>CDE</svg></div><p>b</p>"
        );
    }

    #[test]
    fn failure_renders_panel_and_continues() {
        let mut t = RenderedTree::parse(
            "<pre><code class=\"language-abc\">C#</code></pre>\
             <pre><code class=\"language-abc\">G</code></pre>",
        )
        .unwrap();
        let report = render_all(&mut t, &Echo);
        assert_eq!(report, StageReport { rendered: 1, failed: 1 });
        assert_eq!(
            t.to_html(),
            "<div class=\"abc-notation\"><div class=\"abc-error\">\
             <p><strong>Notation render failed</strong></p>\
             <p>Check the tune syntax.<br /><code>parse error: unexpected character '#'</code></p>\
             </div></div>\
             <div class=\"abc-notation\"><svg>G</svg></div>"
        );
    }

    #[test]
    fn other_code_is_untouched() {
        let html = "<pre><code class=\"language-rust\">fn</code></pre>";
        let mut t = RenderedTree::parse(html).unwrap();
        assert_eq!(render_all(&mut t, &Echo).total(), 0);
        assert_eq!(t.to_html(), html);
    }
}
