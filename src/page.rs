//! Preview surface backed by a standalone HTML page on disk.
//!
//! `present` rewrites the page atomically (temp file + rename) with the
//! outline sidebar, the rendered tree, and the synchronized scroll position.
//! A small inline script restores that position on load.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use log::{info, warn};

use crate::engine::syntax::highlight_css;
use crate::outline::{OutlineEntry, render_outline_html};
use crate::scroll::PaneMetrics;
use crate::surface::{PreviewSurface, ScrollPane};
use crate::theme::ThemeKey;
use crate::tree::{Node, RenderedTree, escape_html};

/// Approximate characters per preview row, for height estimation.
const ROW_CHARS: usize = 80;
/// Rows reserved for one inline graphic (diagram, score).
const GRAPHIC_ROWS: usize = 12;

const STYLE: &str = "\
body{margin:0;display:flex;font-family:system-ui,sans-serif;line-height:1.5}\
body.theme-dark{background:#1e1e2e;color:#cdd6f4}\
body.theme-light{background:#fff;color:#343a40}\
nav#outline{width:16rem;height:100vh;overflow-y:auto;padding:1rem;box-sizing:border-box}\
nav#outline ul{list-style:none;margin:0;padding:0}\
nav#outline a{color:inherit;text-decoration:none}\
main#preview{flex:1;height:100vh;overflow-y:auto;padding:1rem 2rem;box-sizing:border-box}\
pre{overflow-x:auto;padding:.75rem;border-radius:4px;background:rgba(127,127,127,.12)}\
.diagram-error,.abc-error{border:1px solid #e06c75;padding:.5rem;border-radius:4px}";

const SCROLL_SCRIPT: &str = "\
(function(){var m=document.getElementById('preview');\
var f=parseFloat(m.getAttribute('data-scroll-fraction'))||0;\
window.addEventListener('load',function(){m.scrollTop=f*(m.scrollHeight-m.clientHeight);});})();";

fn code_css(theme: ThemeKey) -> String {
    highlight_css(theme).unwrap_or_else(|e| {
        warn!("page: no code stylesheet for {} theme: {e}", theme.name());
        String::new()
    })
}

/// Rough rendered height of a node in rows.
fn estimate_rows(node: &Node) -> usize {
    match node {
        Node::Text(t) if t.trim().is_empty() => 0,
        Node::Text(t) => t.chars().count().div_ceil(ROW_CHARS),
        Node::Raw(r) if r.contains("<svg") => GRAPHIC_ROWS,
        Node::Raw(r) => r.lines().count(),
        Node::Element(el) if el.tag == "pre" => el.text_content().lines().count() + 2,
        Node::Element(el) => {
            let inner: usize = el.children.iter().map(estimate_rows).sum();
            let block = matches!(
                el.tag.as_str(),
                "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "li" | "blockquote" | "table" | "tr"
            );
            if block { inner.max(1) + 1 } else { inner }
        }
    }
}

pub struct HtmlPagePreview {
    path: PathBuf,
    title: String,
    theme: ThemeKey,
    /// Code highlighting rules for `theme`.
    code_css: String,
    live_reload: Option<Duration>,
    viewport_rows: usize,
    offset: f64,
    tree: RenderedTree,
    outline: Vec<OutlineEntry>,
}

impl HtmlPagePreview {
    pub fn new(path: PathBuf, title: impl Into<String>, theme: ThemeKey, viewport_rows: usize) -> Self {
        Self {
            path,
            title: title.into(),
            theme,
            code_css: code_css(theme),
            live_reload: None,
            viewport_rows,
            offset: 0.0,
            tree: RenderedTree::default(),
            outline: Vec::new(),
        }
    }

    /// Make the browser reload the page periodically.
    pub fn with_live_reload(mut self, interval: Duration) -> Self {
        self.live_reload = Some(interval);
        self
    }

    pub fn render_page(&self) -> String {
        let metrics = self.scroll();
        let fraction = metrics.fraction().unwrap_or(0.0);
        let refresh = self
            .live_reload
            .map(|d| format!("<meta http-equiv=\"refresh\" content=\"{}\">\n", d.as_secs().max(1)))
            .unwrap_or_default();
        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n{refresh}\
             <title>{}</title>\n<style>{STYLE}</style>\n<style>{}</style>\n</head>\n\
             <body class=\"theme-{}\">\n<nav id=\"outline\">\n{}</nav>\n\
             <main id=\"preview\" data-scroll-offset=\"{:.1}\" data-scroll-fraction=\"{fraction:.4}\">\n{}\n</main>\n\
             <script>{SCROLL_SCRIPT}</script>\n</body>\n</html>\n",
            escape_html(&self.title),
            self.code_css,
            self.theme.name(),
            render_outline_html(&self.outline),
            metrics.offset,
            self.tree.to_html(),
        )
    }
}

impl ScrollPane for HtmlPagePreview {
    fn scroll(&self) -> PaneMetrics {
        let rows: usize = self.tree.nodes().iter().map(estimate_rows).sum();
        PaneMetrics::new(self.offset, rows as f64, self.viewport_rows as f64)
    }

    fn set_scroll_offset(&mut self, offset: f64) {
        self.offset = offset;
    }
}

impl PreviewSurface for HtmlPagePreview {
    fn tree(&self) -> &RenderedTree {
        &self.tree
    }

    fn tree_mut(&mut self) -> &mut RenderedTree {
        &mut self.tree
    }

    fn set_outline(&mut self, entries: &[OutlineEntry]) {
        self.outline = entries.to_vec();
    }

    fn set_theme(&mut self, theme: ThemeKey) {
        if theme != self.theme {
            self.theme = theme;
            self.code_css = code_css(theme);
        }
    }

    fn present(&mut self) -> anyhow::Result<()> {
        let start = Instant::now();
        let page = self.render_page();
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, &page).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        info!(
            "page: wrote {} ({} bytes) in {:.1}ms",
            self.path.display(),
            page.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }
}
