use log::debug;

use crate::tree::{RenderedTree, Selector, escape_html};

/// Sidebar indent per heading level below 1.
pub const INDENT_PX: u32 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineEntry {
    /// 1..=6
    pub level: u8,
    pub text: String,
    pub id: String,
}

/// Headings h1..h6 of the tree, in document order.
pub fn build_outline(tree: &RenderedTree) -> Vec<OutlineEntry> {
    let entries: Vec<OutlineEntry> = tree
        .select(&Selector::Headings)
        .iter()
        .filter_map(|path| {
            let heading = tree.element(path)?;
            Some(OutlineEntry {
                level: heading.heading_level()?,
                text: heading.text_content(),
                id: heading.attr("id").unwrap_or_default().to_string(),
            })
        })
        .collect();
    debug!("outline: {} entries", entries.len());
    entries
}

/// Sidebar list: one `<li>` per entry, indented by level.
pub fn render_outline_html(entries: &[OutlineEntry]) -> String {
    let mut out = String::from("<ul class=\"outline\">\n");
    for entry in entries {
        let indent = u32::from(entry.level.saturating_sub(1)) * INDENT_PX;
        out.push_str(&format!(
            "<li class=\"outline-h{}\" style=\"padding-left: {indent}px\"><a href=\"#{}\">{}</a></li>\n",
            entry.level,
            escape_html(&entry.id),
            escape_html(&entry.text)
        ));
    }
    out.push_str("</ul>\n");
    out
}
