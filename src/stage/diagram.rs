use std::time::Instant;

use log::{debug, info, warn};

use super::{FailurePolicy, StageDescriptor, StageReport};
use crate::convert::DIAGRAM_CLASS;
use crate::engine::{DiagramEngine, EngineError};
use crate::theme::ThemeKey;
use crate::tree::{Element, Node, RenderedTree, Selector};

pub const DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: "diagram",
    selector: Some(Selector::Class {
        tag: "div",
        class: DIAGRAM_CLASS,
    }),
    policy: FailurePolicy::InlinePanel,
};

pub const ERROR_CLASS: &str = "diagram-error";

/// Inline panel that takes the place of a diagram that failed to render.
pub fn error_panel(err: &EngineError) -> Element {
    let heading = Element::new("p").with_child(Node::Element(
        Element::new("strong").with_child(Node::text("Diagram render failed")),
    ));
    Element::new("div")
        .with_attr("class", ERROR_CLASS)
        .with_child(Node::Element(heading))
        .with_child(Node::Element(
            Element::new("pre").with_child(Node::text(err.to_string())),
        ))
}

/// Diagram stage with its theme cache.
///
/// The engine is (re)initialized only when the requested theme differs from
/// the last one applied, and only once a document actually has diagrams.
pub struct DiagramStage {
    engine: Box<dyn DiagramEngine>,
    cached_theme: Option<ThemeKey>,
}

impl DiagramStage {
    pub fn new(engine: Box<dyn DiagramEngine>) -> Self {
        Self {
            engine,
            cached_theme: None,
        }
    }

    pub fn cached_theme(&self) -> Option<ThemeKey> {
        self.cached_theme
    }

    /// Forget the applied theme; the next diagram forces re-initialization.
    pub fn invalidate(&mut self) {
        self.cached_theme = None;
    }

    fn ensure_theme(&mut self, theme: ThemeKey) {
        if self.cached_theme == Some(theme) {
            debug!("diagram: engine already initialized for {}", theme.name());
            return;
        }
        self.engine.initialize(theme);
        self.cached_theme = Some(theme);
    }

    pub fn render_all(&mut self, tree: &mut RenderedTree, theme: ThemeKey) -> StageReport {
        let start = Instant::now();
        let mut report = StageReport::default();
        let Some(selector) = DESCRIPTOR.selector else {
            return report;
        };
        let paths = tree.select(&selector);
        if paths.is_empty() {
            return report;
        }
        self.ensure_theme(theme);

        for path in paths {
            let Some(source) = tree.element(&path).map(Element::text_content) else {
                continue;
            };
            match self.engine.render(&source) {
                Ok(svg) => {
                    if let Some(container) = tree.element_mut(&path) {
                        container.set_content(Node::Raw(svg));
                        container.set_attr("data-processed", "true");
                    }
                    report.rendered += 1;
                }
                Err(e) => {
                    warn!("diagram: {path:?} failed: {e}");
                    tree.replace(&path, Node::Element(error_panel(&e)));
                    report.failed += 1;
                }
            }
        }

        info!(
            "diagram: completed in {:.1}ms ({} rendered, {} failed)",
            start.elapsed().as_secs_f64() * 1000.0,
            report.rendered,
            report.failed
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    /// Counts initializations; sources containing `bad` fail.
    struct Counting {
        inits: Rc<Cell<usize>>,
    }

    impl DiagramEngine for Counting {
        fn initialize(&mut self, _theme: ThemeKey) {
            self.inits.set(self.inits.get() + 1);
        }

        fn render(&mut self, source: &str) -> Result<String, EngineError> {
            if source.contains("bad") {
                Err(EngineError::Parse(format!("cannot parse {:?}", source.trim())))
            } else {
                Ok(format!("<svg>{}</svg>", source.trim().len()))
            }
        }
    }

    fn stage() -> (DiagramStage, Rc<Cell<usize>>) {
        let inits = Rc::new(Cell::new(0));
        let engine = Counting {
            inits: Rc::clone(&inits),
        };
        (DiagramStage::new(Box::new(engine)), inits)
    }

    fn tree(html: &str) -> RenderedTree {
        RenderedTree::parse(html).unwrap()
    }

    #[test]
    fn renders_each_container() {
        let (mut stage, _) = stage();
        let mut t = tree("<div class=\"mermaid\">graph</div><p>x</p><div class=\"mermaid\">flow</div>");
        let report = stage.render_all(&mut t, ThemeKey::Dark);
        assert_eq!(report, StageReport { rendered: 2, failed: 0 });
        assert_eq!(
            t.to_html(),
            "<div class=\"mermaid\" data-processed=\"true\"><svg>5</svg></div><p>x</p>\
             <div class=\"mermaid\" data-processed=\"true\"><svg>4</svg></div>"
        );
    }

    #[test]
    fn bad_diagram_is_isolated() {
        let (mut stage, _) = stage();
        let mut t = tree(
            "<div class=\"mermaid\">ok</div><div class=\"mermaid\">bad</div><div class=\"mermaid\">ok2</div>",
        );
        let report = stage.render_all(&mut t, ThemeKey::Dark);
        assert_eq!(report, StageReport { rendered: 2, failed: 1 });
        let html = t.to_html();
        assert!(html.contains("<div class=\"diagram-error\"><p><strong>Diagram render failed</strong></p>"));
        assert!(html.contains("cannot parse &quot;bad&quot;"), "{html}");
        assert_eq!(html.matches("data-processed").count(), 2);
    }

    #[test]
    fn initializes_only_on_theme_change() {
        let (mut stage, inits) = stage();
        let html = "<div class=\"mermaid\">g</div>";
        stage.render_all(&mut tree(html), ThemeKey::Dark);
        stage.render_all(&mut tree(html), ThemeKey::Dark);
        assert_eq!(inits.get(), 1);
        stage.render_all(&mut tree(html), ThemeKey::Light);
        assert_eq!(inits.get(), 2);
        assert_eq!(stage.cached_theme(), Some(ThemeKey::Light));
    }

    #[test]
    fn invalidate_forces_reinit() {
        let (mut stage, inits) = stage();
        let html = "<div class=\"mermaid\">g</div>";
        stage.render_all(&mut tree(html), ThemeKey::Dark);
        stage.invalidate();
        stage.render_all(&mut tree(html), ThemeKey::Dark);
        assert_eq!(inits.get(), 2);
    }

    #[test]
    fn no_diagrams_no_init() {
        let (mut stage, inits) = stage();
        let report = stage.render_all(&mut tree("<p>text</p>"), ThemeKey::Dark);
        assert_eq!(report.total(), 0);
        assert_eq!(inits.get(), 0);
        assert_eq!(stage.cached_theme(), None);
    }
}
