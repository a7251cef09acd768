use std::sync::LazyLock;

use syntect::highlighting::ThemeSet;
use syntect::html::{ClassStyle, ClassedHTMLGenerator, css_for_theme_with_class_style};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;

use super::{EngineError, Highlighter};
use crate::theme::ThemeKey;

static SYNTAX_SET: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);
static THEME_SET: LazyLock<ThemeSet> = LazyLock::new(ThemeSet::load_defaults);

const LIGHT_CODE_THEME: &str = "InspiredGitHub";
const DARK_CODE_THEME: &str = "base16-ocean.dark";

/// Stylesheet for the classes `SyntectHighlighter` emits, in the given theme.
pub fn highlight_css(theme: ThemeKey) -> Result<String, EngineError> {
    let name = match theme {
        ThemeKey::Light => LIGHT_CODE_THEME,
        ThemeKey::Dark => DARK_CODE_THEME,
    };
    let code_theme = THEME_SET
        .themes
        .get(name)
        .ok_or_else(|| EngineError::Render(format!("missing code theme {name}")))?;
    css_for_theme_with_class_style(code_theme, ClassStyle::Spaced)
        .map_err(|e| EngineError::Render(e.to_string()))
}

/// Class-based highlighting (`<span class="…">`); colours come from page CSS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntectHighlighter;

impl Highlighter for SyntectHighlighter {
    fn highlight(&self, language: Option<&str>, code: &str) -> Result<String, EngineError> {
        let syntax = language
            .and_then(|lang| SYNTAX_SET.find_syntax_by_token(lang))
            .unwrap_or_else(|| SYNTAX_SET.find_syntax_plain_text());
        let mut generator =
            ClassedHTMLGenerator::new_with_class_style(syntax, &SYNTAX_SET, ClassStyle::Spaced);
        for line in LinesWithEndings::from(code) {
            generator
                .parse_html_for_line_which_includes_newline(line)
                .map_err(|e| EngineError::Render(e.to_string()))?;
        }
        Ok(generator.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_language_emits_spans() {
        let html = SyntectHighlighter
            .highlight(Some("rust"), "fn main() {}\n")
            .unwrap();
        assert!(html.contains("<span class=\""), "{html}");
        assert!(html.contains("main"), "{html}");
    }

    #[test]
    fn unknown_language_falls_back_to_plain_text() {
        let html = SyntectHighlighter
            .highlight(Some("zzz"), "a < b\n")
            .unwrap();
        assert!(html.contains("a &lt; b"), "{html}");
    }

    #[test]
    fn both_themes_have_stylesheets() {
        let light = highlight_css(ThemeKey::Light).unwrap();
        let dark = highlight_css(ThemeKey::Dark).unwrap();
        assert!(light.contains(".comment"), "{light}");
        assert!(dark.contains(".comment"), "{dark}");
        assert_ne!(light, dark);
    }

    #[test]
    fn no_language_is_plain_text() {
        let html = SyntectHighlighter.highlight(None, "plain\n").unwrap();
        assert!(html.contains("plain"));
    }
}
