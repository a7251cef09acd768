use std::time::Instant;

use log::{debug, info, warn};

use super::{FailurePolicy, StageDescriptor, StageReport};
use crate::convert::NOTATION_LANGUAGE;
use crate::engine::Highlighter;
use crate::tree::{Element, Node, RenderedTree, Selector};

pub const DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: "highlight",
    selector: Some(Selector::CodeShellExcept {
        language: NOTATION_LANGUAGE,
    }),
    policy: FailurePolicy::LogOnly,
};

/// Added to every `code` element the highlighter rewrote.
pub const HIGHLIGHTED_CLASS: &str = "highlighted";

/// `language-rust` → `rust`.
pub fn code_language(code: &Element) -> Option<&str> {
    code.attr("class")?
        .split_ascii_whitespace()
        .find_map(|c| c.strip_prefix("language-"))
}

/// Highlight every generic code shell. Notation shells are left for the
/// notation stage.
pub fn highlight_all(tree: &mut RenderedTree, highlighter: &dyn Highlighter) -> StageReport {
    let start = Instant::now();
    let mut report = StageReport::default();
    let Some(selector) = DESCRIPTOR.selector else {
        return report;
    };

    for path in tree.select(&selector) {
        let Some(code) = tree.element_mut(&path) else {
            continue;
        };
        let language = code_language(code).map(str::to_string);
        let source = code.text_content();
        match highlighter.highlight(language.as_deref(), &source) {
            Ok(markup) => {
                debug!(
                    "highlight: block {path:?} ({}), {} bytes",
                    language.as_deref().unwrap_or("plain"),
                    source.len()
                );
                code.set_content(Node::Raw(markup));
                code.add_class(HIGHLIGHTED_CLASS);
                report.rendered += 1;
            }
            Err(e) => {
                warn!("highlight: block {path:?} left as plain code: {e}");
                report.failed += 1;
            }
        }
    }

    info!(
        "highlight: completed in {:.1}ms ({} blocks, {} failed)",
        start.elapsed().as_secs_f64() * 1000.0,
        report.rendered,
        report.failed
    );
    report
}
