use pulldown_latex::{
    Parser, Storage,
    config::{DisplayMode, RenderConfig},
    mathml::push_mathml,
};

use super::{EngineError, MathTypesetter};

/// LaTeX → MathML via pulldown-latex.
#[derive(Debug, Default, Clone, Copy)]
pub struct LatexTypesetter;

impl MathTypesetter for LatexTypesetter {
    fn typeset(&self, latex: &str, display: bool) -> Result<String, EngineError> {
        let storage = Storage::new();
        let parser = Parser::new(latex, &storage);
        let config = RenderConfig {
            display_mode: if display {
                DisplayMode::Block
            } else {
                DisplayMode::Inline
            },
            ..Default::default()
        };

        let events: Vec<_> = parser.collect();
        let errors: Vec<String> = events
            .iter()
            .filter_map(|e| e.as_ref().err().map(|err| err.to_string()))
            .collect();
        if !errors.is_empty() {
            return Err(EngineError::Parse(errors.join("; ")));
        }

        let mut mathml = String::new();
        push_mathml(&mut mathml, events.into_iter(), config)
            .map_err(|e| EngineError::Render(e.to_string()))?;
        Ok(mathml)
    }
}
