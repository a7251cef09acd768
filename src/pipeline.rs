//! Render pipeline orchestrator.
//!
//! One run: convert → highlight → diagrams → notation → math (detached) →
//! outline → scroll sync (edit-triggered runs) → present.
//!
//! A converter failure aborts the run before the preview is touched; the
//! previous render stays on screen and the notifier gets one message.
//! Stage failures stay inside their stage.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::convert::{ConvertError, Converter};
use crate::engine::abc::AbcEngine;
use crate::engine::latex::LatexTypesetter;
use crate::engine::mermaid::MermaidEngine;
use crate::engine::syntax::SyntectHighlighter;
use crate::engine::{DiagramEngine, Highlighter, MathTypesetter, NotationEngine};
use crate::outline::{OutlineEntry, build_outline};
use crate::scroll::sync_following;
use crate::stage::diagram::DiagramStage;
use crate::stage::math::{self, MathMessage, MathWorker};
use crate::stage::{CONVERT, StageReport, highlight, notation};
use crate::surface::{EditorSurface, Notifier, PreviewSurface};
use crate::theme::ThemeKey;

/// The four engines a pipeline drives.
pub struct Engines {
    pub highlighter: Box<dyn Highlighter>,
    pub diagrams: Box<dyn DiagramEngine>,
    pub notation: Box<dyn NotationEngine>,
    pub math: Arc<dyn MathTypesetter>,
}

impl Engines {
    /// syntect, mermaid-rs-renderer, the built-in ABC engine and pulldown-latex.
    pub fn builtin() -> Self {
        Self {
            highlighter: Box::new(SyntectHighlighter),
            diagrams: Box::new(MermaidEngine::default()),
            notation: Box::new(AbcEngine::default()),
            math: Arc::new(LatexTypesetter),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Rendered,
    /// Converter failure; the preview still shows the previous render.
    Aborted { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub generation: u64,
    pub outcome: RunOutcome,
    pub highlight: StageReport,
    pub diagrams: StageReport,
    pub notation: StageReport,
    /// Math spans handed to the detached worker.
    pub math_queued: usize,
    pub outline_entries: usize,
    pub scroll_synced: bool,
}

impl RunReport {
    fn aborted(generation: u64, message: String) -> Self {
        Self {
            generation,
            outcome: RunOutcome::Aborted { message },
            highlight: StageReport::default(),
            diagrams: StageReport::default(),
            notation: StageReport::default(),
            math_queued: 0,
            outline_entries: 0,
            scroll_synced: false,
        }
    }

    pub fn is_rendered(&self) -> bool {
        self.outcome == RunOutcome::Rendered
    }
}

pub struct Orchestrator<P: PreviewSurface> {
    converter: Converter,
    highlighter: Box<dyn Highlighter>,
    diagrams: DiagramStage,
    notation: Box<dyn NotationEngine>,
    math: MathWorker,
    preview: P,
    notifier: Box<dyn Notifier>,
    theme: ThemeKey,
    /// Bumped each time a new tree is installed.
    generation: u64,
    /// Generation whose math batch has not reported `Done` yet.
    math_pending: Option<u64>,
    outline: Vec<OutlineEntry>,
}

impl<P: PreviewSurface> Orchestrator<P> {
    pub fn new(
        converter: Converter,
        engines: Engines,
        mut preview: P,
        notifier: Box<dyn Notifier>,
        theme: ThemeKey,
    ) -> Self {
        preview.set_theme(theme);
        Self {
            converter,
            highlighter: engines.highlighter,
            diagrams: DiagramStage::new(engines.diagrams),
            notation: engines.notation,
            math: MathWorker::spawn(engines.math),
            preview,
            notifier,
            theme,
            generation: 0,
            math_pending: None,
            outline: Vec::new(),
        }
    }

    /// Render `text` into the preview.
    pub fn run(&mut self, text: &str) -> RunReport {
        self.execute(text, None)
    }

    /// Render the editor's buffer, then align the preview's scroll position.
    pub fn run_edit(&mut self, editor: &dyn EditorSurface) -> RunReport {
        self.execute(editor.text(), Some(editor))
    }

    fn execute(&mut self, text: &str, editor: Option<&dyn EditorSurface>) -> RunReport {
        let start = Instant::now();

        let html = match self.converter.convert(text) {
            Ok(html) => html,
            Err(e) => return self.abort(e),
        };
        // Only replaced if the HTML loads; otherwise the old tree stays.
        if let Err(e) = self.preview.tree_mut().set_inner_html(&html) {
            return self.abort(ConvertError::Tree(e));
        }
        self.generation += 1;
        let generation = self.generation;

        let tree = self.preview.tree_mut();
        let highlight = highlight::highlight_all(tree, self.highlighter.as_ref());
        let diagrams = self.diagrams.render_all(tree, self.theme);
        let notation = notation::render_all(tree, self.notation.as_ref());

        let jobs = math::collect_jobs(tree);
        let math_queued = jobs.len();
        self.math_pending = self.math.submit(generation, jobs).then_some(generation);

        self.outline = build_outline(self.preview.tree());
        self.preview.set_outline(&self.outline);

        let scroll_synced = editor
            .and_then(|editor| sync_following(editor, &mut self.preview))
            .is_some();

        self.present();

        info!(
            "pipeline: run {generation} completed in {:.1}ms \
             (highlight {}/{}, diagrams {}/{}, notation {}/{}, math queued {}, outline {})",
            start.elapsed().as_secs_f64() * 1000.0,
            highlight.rendered,
            highlight.total(),
            diagrams.rendered,
            diagrams.total(),
            notation.rendered,
            notation.total(),
            math_queued,
            self.outline.len()
        );

        RunReport {
            generation,
            outcome: RunOutcome::Rendered,
            highlight,
            diagrams,
            notation,
            math_queued,
            outline_entries: self.outline.len(),
            scroll_synced,
        }
    }

    fn abort(&mut self, err: ConvertError) -> RunReport {
        let message = format!("Preview update failed: {err}");
        error!("pipeline: {} step aborted the run: {err}", CONVERT.name);
        self.notifier.notify(&message);
        RunReport::aborted(self.generation, message)
    }

    fn present(&mut self) {
        if let Err(e) = self.preview.present() {
            error!("pipeline: present failed: {e:#}");
            self.notifier.notify(&format!("Preview could not be shown: {e:#}"));
        }
    }

    fn apply_math(&mut self, msg: MathMessage) -> usize {
        match msg {
            MathMessage::Typeset {
                generation,
                path,
                markup,
            } if generation == self.generation => {
                usize::from(math::apply(self.preview.tree_mut(), &path, markup))
            }
            MathMessage::Typeset { generation, .. } => {
                debug!("math: dropping result for stale generation {generation}");
                0
            }
            MathMessage::Done { generation, failed } => {
                if self.math_pending == Some(generation) {
                    self.math_pending = None;
                }
                if failed > 0 {
                    debug!("math: generation {generation} had {failed} failures");
                }
                0
            }
        }
    }

    /// Apply any finished math results without blocking. Presents the
    /// preview again if something changed.
    pub fn poll_math(&mut self) -> usize {
        let mut applied = 0;
        while let Some(msg) = self.math.try_recv() {
            applied += self.apply_math(msg);
        }
        if applied > 0 {
            self.present();
        }
        applied
    }

    /// Block until the current run's math batch is done or `timeout` passes.
    pub fn flush_math(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut applied = 0;
        while self.math_pending.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("math: gave up waiting after {}ms", timeout.as_millis());
                break;
            }
            match self.math.recv_timeout(remaining) {
                Some(msg) => applied += self.apply_math(msg),
                None => break,
            }
        }
        if applied > 0 {
            self.present();
        }
        applied
    }

    /// Scroll-event sync: move the preview to the editor's scroll fraction.
    /// Callers throttle this with a `ScrollThrottle`.
    pub fn sync_scroll(&mut self, editor: &dyn EditorSurface) -> Option<f64> {
        let offset = sync_following(editor, &mut self.preview)?;
        self.present();
        Some(offset)
    }

    pub fn math_pending(&self) -> bool {
        self.math_pending.is_some()
    }

    pub fn outline(&self) -> &[OutlineEntry] {
        &self.outline
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn theme(&self) -> ThemeKey {
        self.theme
    }

    /// Theme for subsequent runs, passed on to the preview. The diagram engine
    /// is re-initialized on the next run that has diagrams, if the key differs
    /// from the cached one.
    pub fn set_theme(&mut self, theme: ThemeKey) {
        info!("pipeline: theme {} -> {}", self.theme.name(), theme.name());
        self.theme = theme;
        self.preview.set_theme(theme);
    }

    /// Drop the diagram engine's cached theme.
    pub fn invalidate_diagram_theme(&mut self) {
        self.diagrams.invalidate();
    }

    pub fn diagram_theme(&self) -> Option<ThemeKey> {
        self.diagrams.cached_theme()
    }

    pub fn preview(&self) -> &P {
        &self.preview
    }

    pub fn preview_mut(&mut self) -> &mut P {
        &mut self.preview
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::convert::MarkdownOptions;
    use crate::engine::EngineError;
    use crate::scroll::PaneMetrics;
    use crate::surface::{MemoryEditor, MemoryNotifier, MemoryPreview, ScrollPane};

    struct Plain;

    impl Highlighter for Plain {
        fn highlight(&self, _language: Option<&str>, code: &str) -> Result<String, EngineError> {
            Ok(format!("<i>{}</i>", code.len()))
        }
    }

    struct Diagrams {
        inits: Rc<Cell<usize>>,
    }

    impl DiagramEngine for Diagrams {
        fn initialize(&mut self, _theme: ThemeKey) {
            self.inits.set(self.inits.get() + 1);
        }

        fn render(&mut self, source: &str) -> Result<String, EngineError> {
            if source.contains("%%") {
                return Err(EngineError::Parse("bad diagram".into()));
            }
            Ok("<svg/>".into())
        }
    }

    struct Notes;

    impl NotationEngine for Notes {
        fn render(&self, _source: &str) -> Result<String, EngineError> {
            Ok("<svg class=\"score\"/>".into())
        }
    }

    struct Tex;

    impl MathTypesetter for Tex {
        fn typeset(&self, latex: &str, _display: bool) -> Result<String, EngineError> {
            Ok(format!("<math>{latex}</math>"))
        }
    }

    struct Fixture {
        pipeline: Orchestrator<MemoryPreview>,
        notifier: MemoryNotifier,
        inits: Rc<Cell<usize>>,
    }

    fn fixture_with(converter: Converter) -> Fixture {
        let inits = Rc::new(Cell::new(0));
        let engines = Engines {
            highlighter: Box::new(Plain),
            diagrams: Box::new(Diagrams {
                inits: Rc::clone(&inits),
            }),
            notation: Box::new(Notes),
            math: Arc::new(Tex),
        };
        let notifier = MemoryNotifier::default();
        let pipeline = Orchestrator::new(
            converter,
            engines,
            MemoryPreview::new(),
            Box::new(notifier.clone()),
            ThemeKey::Dark,
        );
        Fixture {
            pipeline,
            notifier,
            inits,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Converter::default())
    }

    #[test]
    fn full_run_reports_every_stage() {
        let mut f = fixture();
        let report = f.pipeline.run(
            "# Title\n\n```rust\nfn x() {}\n```\n\n```mermaid\ngraph TD\n```\n\n```abc\nK:C\nC\n```\n\n$x$\n",
        );
        assert!(report.is_rendered());
        assert_eq!(report.generation, 1);
        assert_eq!(report.highlight, StageReport { rendered: 1, failed: 0 });
        assert_eq!(report.diagrams, StageReport { rendered: 1, failed: 0 });
        assert_eq!(report.notation, StageReport { rendered: 1, failed: 0 });
        assert_eq!(report.math_queued, 1);
        assert_eq!(report.outline_entries, 1);
        assert!(!report.scroll_synced);
        assert_eq!(f.pipeline.preview().presented(), 1);
        assert!(f.notifier.messages().is_empty());
    }

    #[test]
    fn converter_failure_keeps_previous_render() {
        let mut f = fixture_with(Converter::new(MarkdownOptions::default(), 64));
        assert!(f.pipeline.run("# Kept").is_rendered());
        let before = f.pipeline.preview().html();

        let report = f.pipeline.run(&"x".repeat(100));
        assert!(matches!(report.outcome, RunOutcome::Aborted { .. }));
        assert_eq!(report.generation, 1);
        assert_eq!(f.pipeline.preview().html(), before);
        assert_eq!(f.pipeline.outline().len(), 1);
        assert_eq!(f.notifier.messages().len(), 1);
        assert!(f.notifier.messages()[0].contains("over the 64-byte limit"));
    }

    #[test]
    fn diagram_failure_is_inline_only() {
        let mut f = fixture();
        let report = f
            .pipeline
            .run("```mermaid\n%% broken\n```\n\n```mermaid\ngraph TD\n```\n");
        assert_eq!(report.diagrams, StageReport { rendered: 1, failed: 1 });
        assert!(f.pipeline.preview().html().contains("diagram-error"));
        assert!(f.notifier.messages().is_empty());
    }

    #[test]
    fn theme_cache_spans_runs() {
        let mut f = fixture();
        let doc = "```mermaid\ngraph TD\n```\n";
        f.pipeline.run(doc);
        f.pipeline.run(doc);
        assert_eq!(f.inits.get(), 1);
        f.pipeline.set_theme(ThemeKey::Light);
        f.pipeline.run(doc);
        assert_eq!(f.inits.get(), 2);
        assert_eq!(f.pipeline.diagram_theme(), Some(ThemeKey::Light));
        f.pipeline.invalidate_diagram_theme();
        f.pipeline.run(doc);
        assert_eq!(f.inits.get(), 3);
    }

    #[test]
    fn math_is_applied_on_flush() {
        let mut f = fixture();
        f.pipeline.run("inline $a+b$ math");
        assert!(f.pipeline.preview().html().contains(">a+b</span>"));
        let applied = f.pipeline.flush_math(Duration::from_secs(5));
        assert_eq!(applied, 1);
        assert!(!f.pipeline.math_pending());
        assert!(
            f.pipeline
                .preview()
                .html()
                .contains("<span class=\"math math-inline typeset\"><math>a+b</math></span>")
        );
    }

    #[test]
    fn stale_math_results_are_dropped() {
        let mut f = fixture();
        f.pipeline.run("$old$");
        f.pipeline.run("no math here");
        // Let the first batch finish, then apply whatever arrived.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(f.pipeline.poll_math(), 0);
        assert!(!f.pipeline.preview().html().contains("<math>"));
    }

    #[test]
    fn edit_run_syncs_scroll() {
        let mut f = fixture();
        let mut editor = MemoryEditor::new("# A\n\nbody\n");
        editor.set_metrics(PaneMetrics::new(50.0, 200.0, 100.0));
        f.pipeline
            .preview_mut()
            .set_metrics(PaneMetrics::new(0.0, 1100.0, 100.0));
        let report = f.pipeline.run_edit(&editor);
        assert!(report.scroll_synced);
        assert_eq!(f.pipeline.preview().scroll().offset, 500.0);
    }

    #[test]
    fn repeated_runs_are_byte_identical() {
        let mut f = fixture();
        let doc = "# A\n\n```mermaid\n%% x\n```\n\n```abc\nK:C\nC\n```\n\n| a |\n|---|\n| 1 |\n";
        f.pipeline.run(doc);
        let first = f.pipeline.preview().html();
        f.pipeline.run(doc);
        assert_eq!(f.pipeline.preview().html(), first);
    }
}
