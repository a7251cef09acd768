//! Rendering engines behind narrow capability traits.
//!
//! Each stage depends only on the one trait it calls, so tests can swap in
//! counting mocks and the binary wires the built-in implementations.

pub mod abc;
pub mod latex;
pub mod mermaid;
pub mod syntax;

use crate::theme::ThemeKey;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("render error: {0}")]
    Render(String),
    #[error("engine panicked: {0}")]
    Panic(String),
}

/// Language-aware highlighting of one code block.
pub trait Highlighter {
    /// Returns trusted markup replacing the block's escaped text.
    fn highlight(&self, language: Option<&str>, code: &str) -> Result<String, EngineError>;
}

/// Diagram source → inline graphic.
pub trait DiagramEngine {
    /// Configure the engine for a theme. Expensive; callers cache the key.
    fn initialize(&mut self, theme: ThemeKey);
    fn render(&mut self, source: &str) -> Result<String, EngineError>;
}

/// Music notation source → inline graphic.
pub trait NotationEngine {
    fn render(&self, source: &str) -> Result<String, EngineError>;
}

/// LaTeX → markup. Runs on the detached math worker.
pub trait MathTypesetter: Send + Sync {
    fn typeset(&self, latex: &str, display: bool) -> Result<String, EngineError>;
}

/// Message carried by a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
