use std::sync::LazyLock;
use std::time::Instant;

use log::{debug, info};
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd, html};
use regex::Regex;

use crate::tree::{TreeError, escape_html};

/// Fence tag rendered as a diagram container.
pub const DIAGRAM_LANGUAGE: &str = "mermaid";
/// Fence tag rendered as a notation source shell.
pub const NOTATION_LANGUAGE: &str = "abc";
/// Class carried by diagram containers.
pub const DIAGRAM_CLASS: &str = "mermaid";

/// Largest document accepted by the default converter (10 MiB).
pub const DEFAULT_MAX_INPUT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("document is {len} bytes, over the {limit}-byte limit")]
    InputTooLarge { len: usize, limit: usize },
    #[error("rendered HTML could not be loaded: {0}")]
    Tree(#[from] TreeError),
}

/// Output shape of a fenced code block, chosen by its language tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeBlockShape {
    /// `<div class="mermaid">`
    Diagram,
    /// `<pre><code class="language-abc">`
    Notation,
    /// `<pre><code class="language-{tag}">` (or bare `<code>` without a tag)
    Generic,
}

/// Dispatch a fence language tag. Total: unknown tags are `Generic`.
pub fn classify_code_block(lang: &str) -> CodeBlockShape {
    match lang {
        DIAGRAM_LANGUAGE => CodeBlockShape::Diagram,
        NOTATION_LANGUAGE => CodeBlockShape::Notation,
        _ => CodeBlockShape::Generic,
    }
}

/// Render one code block in the shape its tag selects.
pub fn code_block_html(lang: &str, code: &str) -> String {
    let escaped = escape_html(code);
    match classify_code_block(lang) {
        CodeBlockShape::Diagram => format!("<div class=\"{DIAGRAM_CLASS}\">{escaped}</div>\n"),
        CodeBlockShape::Notation => {
            format!("<pre><code class=\"language-{NOTATION_LANGUAGE}\">{escaped}</code></pre>\n")
        }
        CodeBlockShape::Generic if lang.is_empty() => format!("<pre><code>{escaped}</code></pre>\n"),
        CodeBlockShape::Generic => format!(
            "<pre><code class=\"language-{}\">{escaped}</code></pre>\n",
            escape_html(lang)
        ),
    }
}

static NON_WORD_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w]+").unwrap());

/// Derive a heading's anchor id: lower-case, collapse each run of non-word
/// characters into one `-`, trim `-` from both ends.
///
/// Identical headings yield identical ids; collisions are not deduplicated.
pub fn heading_anchor(text: &str) -> String {
    let lowered = text.to_lowercase();
    NON_WORD_RUN
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

fn math_html(source: &str, display: bool) -> String {
    let mode = if display { "math-display" } else { "math-inline" };
    format!("<span class=\"math {mode}\">{}</span>", escape_html(source))
}

/// Markdown extensions passed to pulldown-cmark.
#[derive(Debug, Clone)]
pub struct MarkdownOptions {
    pub tables: bool,
    pub footnotes: bool,
    pub strikethrough: bool,
    pub task_lists: bool,
    /// `$…$` / `$$…$$` math spans.
    pub math: bool,
}

impl Default for MarkdownOptions {
    fn default() -> Self {
        Self {
            tables: true,
            footnotes: true,
            strikethrough: true,
            task_lists: true,
            math: true,
        }
    }
}

impl MarkdownOptions {
    fn to_pulldown_options(&self) -> Options {
        let mut opts = Options::empty();
        if self.tables {
            opts.insert(Options::ENABLE_TABLES);
        }
        if self.footnotes {
            opts.insert(Options::ENABLE_FOOTNOTES);
        }
        if self.strikethrough {
            opts.insert(Options::ENABLE_STRIKETHROUGH);
        }
        if self.task_lists {
            opts.insert(Options::ENABLE_TASKLISTS);
        }
        if self.math {
            opts.insert(Options::ENABLE_MATH);
        }
        opts
    }
}

/// Buffered fenced/indented code block.
struct CodeBuf {
    lang: String,
    source: String,
}

/// Buffered heading: inline events are rendered once the id is known.
struct HeadingBuf<'a> {
    level: HeadingLevel,
    text: String,
    inner: Vec<Event<'a>>,
}

impl HeadingBuf<'_> {
    fn finish(self) -> String {
        let id = heading_anchor(&self.text);
        let mut inner = String::new();
        html::push_html(&mut inner, self.inner.into_iter());
        let level = self.level as u8;
        debug!("convert: h{level} id={id:?}");
        format!("<h{level} id=\"{}\">{inner}</h{level}>\n", escape_html(&id))
    }
}

/// Markdown → HTML with the code-block, heading and math transforms.
#[derive(Debug, Clone)]
pub struct Converter {
    options: MarkdownOptions,
    max_input_bytes: usize,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(MarkdownOptions::default(), DEFAULT_MAX_INPUT_BYTES)
    }
}

impl Converter {
    pub fn new(options: MarkdownOptions, max_input_bytes: usize) -> Self {
        Self {
            options,
            max_input_bytes,
        }
    }

    pub fn convert(&self, markdown: &str) -> Result<String, ConvertError> {
        let start = Instant::now();
        if markdown.len() > self.max_input_bytes {
            return Err(ConvertError::InputTooLarge {
                len: markdown.len(),
                limit: self.max_input_bytes,
            });
        }

        let parser = Parser::new_ext(markdown, self.options.to_pulldown_options());
        let mut events: Vec<Event> = Vec::new();
        let mut code: Option<CodeBuf> = None;
        let mut heading: Option<HeadingBuf> = None;

        for event in parser {
            // Code block content arrives as Text events until the End tag.
            if let Some(block) = code.as_mut() {
                match event {
                    Event::Text(text) => block.source.push_str(&text),
                    Event::End(TagEnd::CodeBlock) => {
                        if let Some(block) = code.take() {
                            let html = code_block_html(&block.lang, &block.source);
                            events.push(Event::Html(html.into()));
                        }
                    }
                    _ => {}
                }
                continue;
            }

            if let Some(h) = heading.as_mut() {
                match &event {
                    Event::Text(t) | Event::Code(t) | Event::InlineMath(t) => h.text.push_str(t),
                    Event::SoftBreak | Event::HardBreak => h.text.push(' '),
                    _ => {}
                }
            }

            let event = match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match kind {
                        CodeBlockKind::Fenced(info) => {
                            info.split_whitespace().next().unwrap_or("").to_string()
                        }
                        CodeBlockKind::Indented => String::new(),
                    };
                    code = Some(CodeBuf {
                        lang,
                        source: String::new(),
                    });
                    continue;
                }
                Event::Start(Tag::Heading { level, .. }) => {
                    heading = Some(HeadingBuf {
                        level,
                        text: String::new(),
                        inner: Vec::new(),
                    });
                    continue;
                }
                Event::End(TagEnd::Heading(_)) => match heading.take() {
                    Some(h) => Event::Html(h.finish().into()),
                    None => continue,
                },
                Event::InlineMath(src) => Event::InlineHtml(math_html(&src, false).into()),
                Event::DisplayMath(src) => Event::InlineHtml(math_html(&src, true).into()),
                other => other,
            };

            match heading.as_mut() {
                Some(h) => h.inner.push(event),
                None => events.push(event),
            }
        }

        let mut output = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut output, events.into_iter());

        info!(
            "convert: completed in {:.1}ms (input: {} bytes, output: {} bytes)",
            start.elapsed().as_secs_f64() * 1000.0,
            markdown.len(),
            output.len()
        );
        Ok(output)
    }
}

/// Convert with default options and limits.
pub fn markdown_to_html(markdown: &str) -> Result<String, ConvertError> {
    Converter::default().convert(markdown)
}
