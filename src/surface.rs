//! Editor/preview capabilities the pipeline talks to, plus in-memory
//! implementations for tests and embedding.

use std::cell::RefCell;
use std::rc::Rc;

use log::error;

use crate::outline::OutlineEntry;
use crate::scroll::PaneMetrics;
use crate::theme::ThemeKey;
use crate::tree::RenderedTree;

pub trait ScrollPane {
    fn scroll(&self) -> PaneMetrics;
    fn set_scroll_offset(&mut self, offset: f64);
}

/// Owner of the document buffer. The pipeline only reads it.
pub trait EditorSurface: ScrollPane {
    fn text(&self) -> &str;
}

/// Owner of the rendered tree and outline sidebar.
pub trait PreviewSurface: ScrollPane {
    fn tree(&self) -> &RenderedTree;
    fn tree_mut(&mut self) -> &mut RenderedTree;
    fn set_outline(&mut self, entries: &[OutlineEntry]);
    /// Follow a light/dark switch. Surfaces without styling ignore it.
    fn set_theme(&mut self, _theme: ThemeKey) {}
    /// Make the current state visible to the user.
    fn present(&mut self) -> anyhow::Result<()>;
}

/// Whole-run failure channel (one message per aborted run).
pub trait Notifier {
    fn notify(&mut self, message: &str);
}

/// Prints to stderr.
#[derive(Debug, Default)]
pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&mut self, message: &str) {
        eprintln!("mdlive: {message}");
    }
}

/// Sends notifications to the log only.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, message: &str) {
        error!("notify: {message}");
    }
}

/// Collects messages into a shared list.
#[derive(Debug, Default, Clone)]
pub struct MemoryNotifier {
    messages: Rc<RefCell<Vec<String>>>,
}

impl MemoryNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&mut self, message: &str) {
        self.messages.borrow_mut().push(message.to_string());
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryEditor {
    text: String,
    metrics: PaneMetrics,
}

impl MemoryEditor {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metrics: PaneMetrics::default(),
        }
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn set_metrics(&mut self, metrics: PaneMetrics) {
        self.metrics = metrics;
    }
}

impl ScrollPane for MemoryEditor {
    fn scroll(&self) -> PaneMetrics {
        self.metrics
    }

    fn set_scroll_offset(&mut self, offset: f64) {
        self.metrics.offset = offset;
    }
}

impl EditorSurface for MemoryEditor {
    fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryPreview {
    tree: RenderedTree,
    outline: Vec<OutlineEntry>,
    metrics: PaneMetrics,
    presented: usize,
}

impl MemoryPreview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn html(&self) -> String {
        self.tree.to_html()
    }

    pub fn outline(&self) -> &[OutlineEntry] {
        &self.outline
    }

    /// Number of `present` calls so far.
    pub fn presented(&self) -> usize {
        self.presented
    }

    pub fn set_metrics(&mut self, metrics: PaneMetrics) {
        self.metrics = metrics;
    }
}

impl ScrollPane for MemoryPreview {
    fn scroll(&self) -> PaneMetrics {
        self.metrics
    }

    fn set_scroll_offset(&mut self, offset: f64) {
        self.metrics.offset = offset;
    }
}

impl PreviewSurface for MemoryPreview {
    fn tree(&self) -> &RenderedTree {
        &self.tree
    }

    fn tree_mut(&mut self) -> &mut RenderedTree {
        &mut self.tree
    }

    fn set_outline(&mut self, entries: &[OutlineEntry]) {
        self.outline = entries.to_vec();
    }

    fn present(&mut self) -> anyhow::Result<()> {
        self.presented += 1;
        Ok(())
    }
}
