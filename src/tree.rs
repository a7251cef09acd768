//! Rendered tree: the owned HTML node tree held by the preview surface.
//!
//! Converter output is parsed with `tl` into owned nodes. Stages address
//! nodes by child-index paths and replace them 1:1, so a path collected at
//! the start of a stage stays valid until the tree is replaced by the next
//! run, and document order never changes.

use std::borrow::Cow;
use std::time::Instant;

use log::debug;
use quick_xml::escape::resolve_html5_entity;

/// Maximum element nesting accepted from converter output.
///
/// Every tree walk below is recursive; deeper input (e.g. thousands of nested
/// blockquotes) is rejected as a parse failure instead of overflowing the stack.
pub const MAX_DEPTH: usize = 512;

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose text children are kept verbatim (never entity-decoded).
const RAW_TEXT_TAGS: &[&str] = &["script", "style"];

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("HTML parse failed: {0}")]
    Parse(String),
    #[error("document nesting exceeds {MAX_DEPTH} levels")]
    TooDeep,
}

/// Child-index path from the tree root to a node.
pub type NodePath = Vec<usize>;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    /// Decoded text; escaped again on serialization.
    Text(String),
    /// Trusted markup produced by an engine (SVG, MathML, highlighted spans).
    Raw(String),
}

impl Node {
    pub fn text(s: impl Into<String>) -> Self {
        Node::Text(s.into())
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    fn push_text_content(&self, out: &mut String) {
        match self {
            Node::Element(el) => {
                for child in &el.children {
                    child.push_text_content(out);
                }
            }
            Node::Text(t) => out.push_str(t),
            Node::Raw(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, overwriting an existing value in place.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|c| c.split_ascii_whitespace().any(|c| c == class))
    }

    pub fn add_class(&mut self, class: &str) {
        if self.has_class(class) {
            return;
        }
        let value = match self.attr("class") {
            Some(existing) if !existing.trim().is_empty() => format!("{existing} {class}"),
            _ => class.to_string(),
        };
        self.set_attr("class", value);
    }

    /// `Some(1..=6)` for `h1`..`h6`.
    pub fn heading_level(&self) -> Option<u8> {
        match self.tag.as_str() {
            "h1" => Some(1),
            "h2" => Some(2),
            "h3" => Some(3),
            "h4" => Some(4),
            "h5" => Some(5),
            "h6" => Some(6),
            _ => None,
        }
    }

    /// Concatenated text of all descendants (like DOM `textContent`, minus raw markup).
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            child.push_text_content(&mut out);
        }
        out
    }

    /// Replace all children with a single node.
    pub fn set_content(&mut self, node: Node) {
        self.children.clear();
        self.children.push(node);
    }
}

/// Which nodes a stage targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// `h1`..`h6`.
    Headings,
    /// Elements with the given tag carrying the given class.
    Class {
        tag: &'static str,
        class: &'static str,
    },
    /// `pre > code`, restricted to `language-{lang}` when `Some`.
    CodeShell { language: Option<&'static str> },
    /// `pre > code` not tagged `language-{lang}`.
    CodeShellExcept { language: &'static str },
}

impl Selector {
    pub fn matches(&self, el: &Element, parent: Option<&Element>) -> bool {
        match *self {
            Selector::Headings => el.heading_level().is_some(),
            Selector::Class { tag, class } => el.tag == tag && el.has_class(class),
            Selector::CodeShell { language } => {
                is_code_shell(el, parent)
                    && language.is_none_or(|lang| el.has_class(&format!("language-{lang}")))
            }
            Selector::CodeShellExcept { language } => {
                is_code_shell(el, parent) && !el.has_class(&format!("language-{language}"))
            }
        }
    }
}

fn is_code_shell(el: &Element, parent: Option<&Element>) -> bool {
    el.tag == "code" && parent.is_some_and(|p| p.tag == "pre")
}

// ---------------------------------------------------------------------------
// RenderedTree
// ---------------------------------------------------------------------------

/// A fragment of top-level nodes (the preview container's children).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedTree {
    nodes: Vec<Node>,
}

impl RenderedTree {
    /// Parse an HTML fragment into an owned tree.
    ///
    /// Attributes are sorted by name so serialization is byte-stable across
    /// runs regardless of the parser's internal attribute order.
    pub fn parse(html: &str) -> Result<Self, TreeError> {
        let start = Instant::now();
        let dom = tl::parse(html, tl::ParserOptions::default())
            .map_err(|e| TreeError::Parse(format!("{e:?}")))?;
        let parser = dom.parser();
        let mut nodes = Vec::new();
        for handle in dom.children() {
            if let Some(node) = convert_node(*handle, parser, 0)? {
                nodes.push(node);
            }
        }
        debug!(
            "tree: parsed {} bytes into {} top-level nodes in {:.1}ms",
            html.len(),
            nodes.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(Self { nodes })
    }

    /// `innerHTML` replacement: the tree is only replaced if `html` parses.
    pub fn set_inner_html(&mut self, html: &str) -> Result<(), TreeError> {
        *self = Self::parse(html)?;
        Ok(())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            write_node(node, &mut out);
        }
        out
    }

    /// Paths of all elements matching `selector`, in document order.
    pub fn select(&self, selector: &Selector) -> Vec<NodePath> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        collect_matches(&self.nodes, None, selector, &mut path, &mut out);
        out
    }

    pub fn get(&self, path: &[usize]) -> Option<&Node> {
        let (first, rest) = path.split_first()?;
        let mut node = self.nodes.get(*first)?;
        for &i in rest {
            node = node.as_element()?.children.get(i)?;
        }
        Some(node)
    }

    pub fn get_mut(&mut self, path: &[usize]) -> Option<&mut Node> {
        let (first, rest) = path.split_first()?;
        let mut node = self.nodes.get_mut(*first)?;
        for &i in rest {
            node = node.as_element_mut()?.children.get_mut(i)?;
        }
        Some(node)
    }

    pub fn element(&self, path: &[usize]) -> Option<&Element> {
        self.get(path)?.as_element()
    }

    pub fn element_mut(&mut self, path: &[usize]) -> Option<&mut Element> {
        self.get_mut(path)?.as_element_mut()
    }

    /// Replace the node at `path`, returning the old one.
    pub fn replace(&mut self, path: &[usize], node: Node) -> Option<Node> {
        let slot = self.get_mut(path)?;
        Some(std::mem::replace(slot, node))
    }
}

fn collect_matches(
    nodes: &[Node],
    parent: Option<&Element>,
    selector: &Selector,
    path: &mut Vec<usize>,
    out: &mut Vec<NodePath>,
) {
    for (i, node) in nodes.iter().enumerate() {
        if let Node::Element(el) = node {
            path.push(i);
            if selector.matches(el, parent) {
                out.push(path.clone());
            }
            collect_matches(&el.children, Some(el), selector, path, out);
            path.pop();
        }
    }
}

fn convert_node(
    handle: tl::NodeHandle,
    parser: &tl::Parser,
    depth: usize,
) -> Result<Option<Node>, TreeError> {
    if depth > MAX_DEPTH {
        return Err(TreeError::TooDeep);
    }
    let Some(node) = handle.get(parser) else {
        return Ok(None);
    };

    match node {
        tl::Node::Tag(tag) => {
            let name = tag.name().as_utf8_str().to_lowercase();
            let mut attrs: Vec<(String, String)> = tag
                .attributes()
                .iter()
                .map(|(k, v)| {
                    let value = v.map(|v| unescape_html(&v)).unwrap_or_default();
                    (k.to_lowercase(), value)
                })
                .collect();
            attrs.sort_by(|a, b| a.0.cmp(&b.0));

            let raw_text = RAW_TEXT_TAGS.contains(&name.as_str());
            let mut element = Element {
                tag: name,
                attrs,
                children: Vec::new(),
            };
            for child in tag.children().top().iter() {
                if raw_text {
                    if let Some(tl::Node::Raw(bytes)) = child.get(parser) {
                        element
                            .children
                            .push(Node::Raw(bytes.as_utf8_str().into_owned()));
                    }
                } else if let Some(child) = convert_node(*child, parser, depth + 1)? {
                    element.children.push(child);
                }
            }
            Ok(Some(Node::Element(element)))
        }
        tl::Node::Raw(bytes) => Ok(Some(Node::Text(unescape_html(&bytes.as_utf8_str())))),
        tl::Node::Comment(_) => Ok(None),
    }
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Element(el) => {
            out.push('<');
            out.push_str(&el.tag);
            for (k, v) in &el.attrs {
                out.push(' ');
                out.push_str(k);
                out.push_str("=\"");
                out.push_str(&escape_html(v));
                out.push('"');
            }
            if VOID_TAGS.contains(&el.tag.as_str()) {
                out.push_str(" />");
                return;
            }
            out.push('>');
            for child in &el.children {
                write_node(child, out);
            }
            out.push_str("</");
            out.push_str(&el.tag);
            out.push('>');
        }
        Node::Text(t) => out.push_str(&escape_html(t)),
        Node::Raw(r) => out.push_str(r),
    }
}

// ---------------------------------------------------------------------------
// Escaping
// ---------------------------------------------------------------------------

/// Escape text for use in HTML body text and double-quoted attribute values.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Decode numeric and HTML5 named character references.
///
/// Unknown names and references without a terminating `;` are left untouched.
pub fn unescape_html(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.as_bytes()[1..]
            .iter()
            .take(MAX_REFERENCE_LEN + 1)
            .position(|&b| b == b';')
            .and_then(|semi| {
                let name = &tail[1..=semi];
                decode_reference(name).map(|text| (text, semi + 2))
            });
        match decoded {
            Some((text, consumed)) => {
                out.push_str(&text);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Longest reference name between `&` and `;` (`CounterClockwiseContourIntegral`).
const MAX_REFERENCE_LEN: usize = 32;

fn decode_reference(name: &str) -> Option<Cow<'static, str>> {
    match name.strip_prefix('#') {
        Some(num) => {
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse::<u32>().ok()?,
            };
            char::from_u32(code).map(|ch| Cow::Owned(ch.to_string()))
        }
        None => resolve_html5_entity(name).map(Cow::Borrowed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_serialize_round_trip() {
        let html = "<h1 id=\"a\">Title</h1>\n<p>one &amp; two</p>\n";
        let tree = RenderedTree::parse(html).unwrap();
        assert_eq!(tree.to_html(), html);
    }

    #[test]
    fn text_is_decoded() {
        let tree = RenderedTree::parse("<p>a &lt;b&gt; &quot;c&quot; &#39;d&#39;</p>").unwrap();
        let p = tree.element(&[0]).unwrap();
        assert_eq!(p.text_content(), "a <b> \"c\" 'd'");
    }

    #[test]
    fn void_elements_have_no_children() {
        let tree = RenderedTree::parse("<p>a<br />b</p><hr />").unwrap();
        assert_eq!(tree.to_html(), "<p>a<br />b</p><hr />");
    }

    #[test]
    fn attributes_are_sorted() {
        let tree = RenderedTree::parse("<a title=\"t\" href=\"/x\">x</a>").unwrap();
        let a = tree.element(&[0]).unwrap();
        assert_eq!(a.attrs[0].0, "href");
        assert_eq!(a.attrs[1].0, "title");
    }

    #[test]
    fn select_code_shells() {
        let html = "<pre><code class=\"language-rust\">x</code></pre>\
                    <pre><code class=\"language-abc\">X:1</code></pre>\
                    <code>inline</code>";
        let tree = RenderedTree::parse(html).unwrap();
        assert_eq!(
            tree.select(&Selector::CodeShell { language: None }),
            vec![vec![0, 0], vec![1, 0]]
        );
        assert_eq!(
            tree.select(&Selector::CodeShell { language: Some("abc") }),
            vec![vec![1, 0]]
        );
        assert_eq!(
            tree.select(&Selector::CodeShellExcept { language: "abc" }),
            vec![vec![0, 0]]
        );
    }

    #[test]
    fn select_is_document_order() {
        let html = "<h2>b</h2><blockquote><h1>a</h1></blockquote><h3>c</h3>";
        let tree = RenderedTree::parse(html).unwrap();
        let paths = tree.select(&Selector::Headings);
        let tags: Vec<_> = paths
            .iter()
            .map(|p| tree.element(p).unwrap().tag.clone())
            .collect();
        assert_eq!(tags, vec!["h2", "h1", "h3"]);
    }

    #[test]
    fn replace_keeps_siblings() {
        let mut tree = RenderedTree::parse("<p>a</p><p>b</p><p>c</p>").unwrap();
        let old = tree.replace(&[1], Node::Raw("<svg></svg>".into())).unwrap();
        assert_eq!(old.as_element().unwrap().text_content(), "b");
        assert_eq!(tree.to_html(), "<p>a</p><svg></svg><p>c</p>");
    }

    #[test]
    fn add_class_appends_once() {
        let mut el = Element::new("code").with_attr("class", "language-rust");
        el.add_class("highlighted");
        el.add_class("highlighted");
        assert_eq!(el.attr("class"), Some("language-rust highlighted"));
    }

    #[test]
    fn raw_nodes_do_not_count_as_text() {
        let el = Element::new("div")
            .with_child(Node::text("a"))
            .with_child(Node::Raw("<svg><text>zz</text></svg>".into()));
        assert_eq!(el.text_content(), "a");
    }

    #[test]
    fn set_inner_html_keeps_tree_on_failure() {
        let mut tree = RenderedTree::parse("<p>keep</p>").unwrap();
        let deep = format!(
            "{}{}",
            "<div>".repeat(MAX_DEPTH + 10),
            "</div>".repeat(MAX_DEPTH + 10)
        );
        assert!(tree.set_inner_html(&deep).is_err());
        assert_eq!(tree.to_html(), "<p>keep</p>");
    }

    #[test]
    fn unescape_decodes_named_entities() {
        assert_eq!(unescape_html("&copy; 2024 &hellip; &rarr;"), "\u{a9} 2024 \u{2026} \u{2192}");
        assert_eq!(unescape_html("&CounterClockwiseContourIntegral;"), "\u{2233}");
    }

    #[test]
    fn unescape_leaves_unknown_references() {
        assert_eq!(unescape_html("&bogus; &#x41; &amp"), "&bogus; A &amp");
    }

    #[test]
    fn named_entities_survive_a_round_trip() {
        let tree = RenderedTree::parse("<div>&copy; 2024 &hellip;</div>").unwrap();
        assert_eq!(tree.to_html(), "<div>\u{a9} 2024 \u{2026}</div>");
    }

    #[test]
    fn escape_covers_markup_characters() {
        assert_eq!(escape_html("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }
}
