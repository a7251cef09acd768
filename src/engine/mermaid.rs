use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use log::{debug, info};
use mermaid_rs_renderer::{
    config::LayoutConfig, layout::compute_layout, parser::parse_mermaid, render::render_svg,
    theme::Theme,
};

use super::{DiagramEngine, EngineError, panic_message};
use crate::theme::ThemeKey;

/// Mermaid → SVG via mermaid-rs-renderer.
pub struct MermaidEngine {
    theme: Theme,
    layout: LayoutConfig,
}

impl Default for MermaidEngine {
    fn default() -> Self {
        Self {
            theme: Theme::modern(),
            layout: LayoutConfig::default(),
        }
    }
}

fn diagram_theme(key: ThemeKey) -> Theme {
    match key {
        ThemeKey::Light => Theme::modern(),
        ThemeKey::Dark => Theme {
            background: "#00000000".to_string(),
            primary_color: "#313244".to_string(),
            primary_text_color: "#cdd6f4".to_string(),
            primary_border_color: "#585b70".to_string(),
            line_color: "#7f849c".to_string(),
            secondary_color: "#45475a".to_string(),
            tertiary_color: "#313244".to_string(),
            text_color: "#cdd6f4".to_string(),
            ..Theme::modern()
        },
    }
}

impl DiagramEngine for MermaidEngine {
    fn initialize(&mut self, theme: ThemeKey) {
        info!("mermaid: initializing engine for theme {}", theme.name());
        self.theme = diagram_theme(theme);
    }

    fn render(&mut self, source: &str) -> Result<String, EngineError> {
        let start = Instant::now();
        let theme = &self.theme;
        let layout_config = &self.layout;
        // The renderer panics on some malformed graphs; keep that local to the diagram.
        let result = panic::catch_unwind(AssertUnwindSafe(|| -> Result<String, EngineError> {
            let parsed = parse_mermaid(source).map_err(|e| EngineError::Parse(e.to_string()))?;
            let layout = compute_layout(&parsed.graph, theme, layout_config);
            Ok(render_svg(&layout, theme, layout_config))
        }));
        let svg = result.map_err(|payload| EngineError::Panic(panic_message(payload.as_ref())))??;
        debug!(
            "mermaid: rendered {} bytes of source into {} bytes of SVG in {:.1}ms",
            source.len(),
            svg.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(svg)
    }
}
