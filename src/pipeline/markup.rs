//! Markup-to-Markdown conversion for one content document.
//!
//! [`convert_fragment`] is a pure function of the markup and the current
//! [`ImageReferenceMap`]:
//!
//! ```text
//! parse ──▶ rewrite <img src> ──▶ heading spacers ──▶ render ──▶ postprocess
//! ```
//!
//! ## Line-break model
//!
//! Block elements end with a *single* line break, so consecutive paragraphs
//! land on consecutive lines. A blank line only appears where the source has
//! an empty paragraph, which is exactly what the heading spacer inserts before
//! every heading but the first. Lists, tables, block quotes and code blocks
//! are always surrounded by blank lines because Markdown needs them there.

use crate::pipeline::assets::ImageReferenceMap;
use crate::pipeline::dom::{Document, NodeId, NodeKind};
use crate::pipeline::postprocess;

/// Convert one HTML/XHTML fragment to cleaned Markdown.
pub fn convert_fragment(markup: &str, images: &ImageReferenceMap) -> String {
    let mut doc = Document::parse(markup);
    rewrite_image_sources(&mut doc, images);
    insert_heading_spacers(&mut doc);
    let raw = render_markdown(&doc);
    postprocess::clean_markdown(&raw)
}

// ── Image rewriting ──────────────────────────────────────────────────────────

/// Point every image at its published path. Returns how many were rewritten.
///
/// `<img src>` and SVG `<image href>` are both covered. References missing
/// from the map are left as they are.
pub fn rewrite_image_sources(doc: &mut Document, images: &ImageReferenceMap) -> usize {
    let mut rewritten = 0;
    for id in doc.descendants(Document::ROOT) {
        let key = match doc.element_name(id) {
            Some("img") => "src",
            Some("image") => "href",
            _ => continue,
        };
        let published = doc
            .attr(id, key)
            .and_then(|src| images.lookup(src))
            .map(str::to_string);
        if let Some(published) = published {
            doc.set_attr(id, key, published);
            rewritten += 1;
        }
    }
    rewritten
}

// ── Heading spacers ──────────────────────────────────────────────────────────

fn heading_level(name: &str) -> Option<usize> {
    match name {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn is_blank_text(doc: &Document, id: NodeId) -> bool {
    doc.text(id).is_some_and(|t| t.trim().is_empty())
}

fn is_spacer(doc: &Document, id: NodeId) -> bool {
    doc.element_name(id) == Some("p")
        && doc.children(id).iter().all(|&c| is_blank_text(doc, c))
}

/// Insert an empty `<p>` before every heading except the first.
///
/// A heading already preceded by an empty paragraph is left alone, so running
/// this twice changes nothing. Returns the number of spacers inserted.
pub fn insert_heading_spacers(doc: &mut Document) -> usize {
    let headings: Vec<NodeId> = doc
        .descendants(Document::ROOT)
        .into_iter()
        .filter(|&id| doc.element_name(id).and_then(heading_level).is_some())
        .collect();

    let mut inserted = 0;
    for &heading in headings.iter().skip(1) {
        let Some(parent) = doc.node(heading).parent else {
            continue;
        };
        let Some(index) = doc.children(parent).iter().position(|&c| c == heading) else {
            continue;
        };
        let previous = doc.children(parent)[..index]
            .iter()
            .rev()
            .copied()
            .find(|&c| !is_blank_text(&*doc, c));
        if previous.is_some_and(|p| is_spacer(&*doc, p)) {
            continue;
        }
        doc.insert_element(parent, index, "p");
        inserted += 1;
    }
    inserted
}

// ── Rendering ────────────────────────────────────────────────────────────────

/// Render a parsed document to (un-postprocessed) Markdown.
pub fn render_markdown(doc: &Document) -> String {
    let mut renderer = Renderer { doc, list_depth: 0 };
    let mut w = Writer::default();
    renderer.node(Document::ROOT, &mut w);
    w.finish()
}

/// Output buffer with deferred line breaks.
///
/// `pending` is the number of newlines owed before the next content; breaks
/// requested back to back merge instead of accumulating.
#[derive(Default)]
struct Writer {
    out: String,
    pending: usize,
}

impl Writer {
    fn at_line_start(&self) -> bool {
        self.pending > 0 || self.out.is_empty() || self.out.ends_with('\n')
    }

    fn flush(&mut self) {
        if self.pending > 0 && !self.out.is_empty() {
            let trailing = self.out.len() - self.out.trim_end_matches('\n').len();
            for _ in trailing..self.pending {
                self.out.push('\n');
            }
        }
        self.pending = 0;
    }

    fn block(&mut self, newlines: usize) {
        self.pending = self.pending.max(newlines);
    }

    fn inline(&mut self, text: &str) {
        let text = if self.at_line_start() || self.out.ends_with(' ') {
            text.trim_start()
        } else {
            text
        };
        if text.is_empty() {
            return;
        }
        self.flush();
        self.out.push_str(text);
    }

    fn raw(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.flush();
        self.out.push_str(text);
    }

    fn newline(&mut self) {
        self.flush();
        self.out.push('\n');
    }

    fn finish(self) -> String {
        self.out.trim_end().to_string()
    }
}

const SKIPPED: &[&str] = &["head", "script", "style", "title", "template", "noscript"];

const BLOCKS: &[&str] = &[
    "html", "body", "div", "section", "article", "header", "footer", "nav", "aside", "main",
    "figure", "figcaption", "address", "center", "dl", "dt", "dd", "li", "caption", "tr",
    "thead", "tbody", "tfoot", "td", "th",
];

struct Renderer<'a> {
    doc: &'a Document,
    list_depth: usize,
}

impl Renderer<'_> {
    fn children(&mut self, id: NodeId, w: &mut Writer) {
        let doc = self.doc;
        for &child in doc.children(id) {
            self.node(child, w);
        }
    }

    fn node(&mut self, id: NodeId, w: &mut Writer) {
        let doc = self.doc;
        match &doc.node(id).kind {
            NodeKind::Document => self.children(id, w),
            NodeKind::Text(text) => w.inline(&collapse_whitespace(text)),
            NodeKind::Element { name, .. } => self.element(id, name, w),
            NodeKind::Comment => {}
        }
    }

    fn element(&mut self, id: NodeId, name: &str, w: &mut Writer) {
        if SKIPPED.contains(&name) {
            return;
        }
        if let Some(level) = heading_level(name) {
            let text = one_line(&self.inline_string(id));
            w.block(1);
            if !text.is_empty() {
                w.raw(&format!("{} {}", "#".repeat(level), text));
            }
            w.block(1);
            return;
        }

        match name {
            "p" => {
                w.block(1);
                let mark = w.out.len();
                self.children(id, w);
                if w.out.len() == mark && !w.out.is_empty() {
                    w.block(2);
                }
                w.block(1);
            }
            "br" => w.newline(),
            "hr" => {
                w.block(2);
                w.raw("* * *");
                w.block(2);
            }
            "img" | "image" => self.image(id, w),
            "a" => self.link(id, w),
            "strong" | "b" => self.wrap("**", id, w),
            "em" | "i" | "cite" | "dfn" | "var" => self.wrap("*", id, w),
            "del" | "s" | "strike" => self.wrap("~~", id, w),
            "code" | "kbd" | "samp" | "tt" => {
                let code = one_line(&self.doc.text_content(id));
                if !code.is_empty() {
                    w.inline(&format!("`{code}`"));
                }
            }
            "pre" => {
                let mut code = String::new();
                self.preformatted(id, &mut code);
                let body = code.trim_start_matches('\n').trim_end();
                w.block(2);
                w.raw(&format!("```\n{body}\n```"));
                w.block(2);
            }
            "blockquote" => {
                let inner = self.inline_string(id);
                if inner.is_empty() {
                    return;
                }
                let quoted = inner
                    .lines()
                    .map(|line| {
                        if line.is_empty() {
                            ">".to_string()
                        } else {
                            format!("> {line}")
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                w.block(2);
                w.raw(&quoted);
                w.block(2);
            }
            "ul" => self.list(id, false, w),
            "ol" => self.list(id, true, w),
            "table" => self.table(id, w),
            _ if BLOCKS.contains(&name) => {
                w.block(1);
                self.children(id, w);
                w.block(1);
            }
            _ => self.children(id, w),
        }
    }

    fn image(&mut self, id: NodeId, w: &mut Writer) {
        let src = self
            .doc
            .attr(id, "src")
            .or_else(|| self.doc.attr(id, "href"))
            .unwrap_or("")
            .trim();
        if src.is_empty() {
            return;
        }
        let alt = one_line(self.doc.attr(id, "alt").unwrap_or(""));
        w.inline(&format!("![{alt}]({src})"));
    }

    fn link(&mut self, id: NodeId, w: &mut Writer) {
        let inner = self.inline_string(id);
        let text = inner.trim();
        if text.is_empty() {
            return;
        }
        match self.doc.attr(id, "href").map(str::trim) {
            Some(href) if !href.is_empty() => w.inline(&format!("[{text}]({href})")),
            _ => w.inline(text),
        }
    }

    fn wrap(&mut self, marker: &str, id: NodeId, w: &mut Writer) {
        let inner = self.inline_string(id);
        let text = inner.trim();
        let full = self.doc.text_content(id);
        if full.starts_with(char::is_whitespace) {
            w.inline(" ");
        }
        if !text.is_empty() {
            w.inline(&format!("{marker}{text}{marker}"));
        }
        if full.ends_with(char::is_whitespace) {
            w.inline(" ");
        }
    }

    fn preformatted(&self, id: NodeId, out: &mut String) {
        for &child in self.doc.children(id) {
            match &self.doc.node(child).kind {
                NodeKind::Text(text) => out.push_str(text),
                NodeKind::Element { name, .. } if name == "br" => out.push('\n'),
                NodeKind::Element { .. } => self.preformatted(child, out),
                NodeKind::Document | NodeKind::Comment => {}
            }
        }
    }

    fn list(&mut self, id: NodeId, ordered: bool, w: &mut Writer) {
        let doc = self.doc;
        // Each `li` starts an item; stray non-`li` content belongs to the item before it.
        let mut groups: Vec<Vec<NodeId>> = Vec::new();
        for &child in doc.children(id) {
            if doc.element_name(child) == Some("li") {
                groups.push(vec![child]);
            } else if is_blank_text(doc, child) {
                continue;
            } else if let Some(last) = groups.last_mut() {
                last.push(child);
            } else {
                groups.push(vec![child]);
            }
        }

        let start: usize = doc
            .attr(id, "start")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(1);

        self.list_depth += 1;
        let mut items = Vec::with_capacity(groups.len());
        for (i, group) in groups.iter().enumerate() {
            let mut sub = Writer::default();
            for &node in group {
                if doc.element_name(node) == Some("li") {
                    self.children(node, &mut sub);
                } else {
                    self.node(node, &mut sub);
                }
            }
            let body = sub.finish();
            let marker = if ordered {
                format!("{}. ", start + i)
            } else {
                "- ".to_string()
            };
            items.push(indent_item(&marker, &body));
        }
        self.list_depth -= 1;

        if items.is_empty() {
            return;
        }
        let gap = if self.list_depth > 0 { 1 } else { 2 };
        w.block(gap);
        w.raw(&items.join("\n"));
        w.block(gap);
    }

    fn table(&mut self, id: NodeId, w: &mut Writer) {
        let doc = self.doc;
        let mut rows: Vec<NodeId> = Vec::new();
        let mut captions: Vec<NodeId> = Vec::new();
        for &child in doc.children(id) {
            match doc.element_name(child) {
                Some("tr") => rows.push(child),
                Some("thead") | Some("tbody") | Some("tfoot") => rows.extend(
                    doc.children(child)
                        .iter()
                        .copied()
                        .filter(|&r| doc.element_name(r) == Some("tr")),
                ),
                Some("caption") => captions.push(child),
                _ => {}
            }
        }

        let mut cells: Vec<Vec<String>> = Vec::new();
        for row in rows {
            let mut row_cells = Vec::new();
            for &cell in doc.children(row) {
                if matches!(doc.element_name(cell), Some("td") | Some("th")) {
                    row_cells.push(one_line(&self.inline_string(cell)).replace('|', "\\|"));
                }
            }
            if !row_cells.is_empty() {
                cells.push(row_cells);
            }
        }

        for caption in captions {
            let text = one_line(&self.inline_string(caption));
            if !text.is_empty() {
                w.block(1);
                w.inline(&text);
                w.block(1);
            }
        }

        let columns = cells.iter().map(Vec::len).max().unwrap_or(0);
        if columns == 0 {
            return;
        }
        let format_row = |row: &[String]| {
            let padded: Vec<&str> = (0..columns)
                .map(|i| row.get(i).map(String::as_str).unwrap_or(""))
                .collect();
            format!("| {} |", padded.join(" | "))
        };

        let mut lines = Vec::with_capacity(cells.len() + 1);
        lines.push(format_row(&cells[0]));
        lines.push(format!("|{}", " --- |".repeat(columns)));
        for row in &cells[1..] {
            lines.push(format_row(row));
        }

        w.block(2);
        w.raw(&lines.join("\n"));
        w.block(2);
    }

    /// Inline rendering of `id`'s children, without trailing whitespace.
    fn inline_string(&mut self, id: NodeId) -> String {
        let mut sub = Writer::default();
        self.children(id, &mut sub);
        sub.finish()
    }
}

fn indent_item(marker: &str, body: &str) -> String {
    let indent = " ".repeat(marker.len());
    let mut item = String::new();
    for (i, line) in body.lines().enumerate() {
        if i == 0 {
            item.push_str(marker);
            item.push_str(line);
        } else {
            item.push('\n');
            if !line.is_empty() {
                item.push_str(&indent);
                item.push_str(line);
            }
        }
    }
    if item.is_empty() {
        item.push_str(marker.trim_end());
    }
    item
}

/// Collapse runs of ASCII whitespace to one space. Non-breaking spaces survive.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_ascii_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md(markup: &str) -> String {
        convert_fragment(markup, &ImageReferenceMap::new())
    }

    #[test]
    fn rewrites_literal_then_basename() {
        let mut map = ImageReferenceMap::new();
        map.insert("images/a.png", "/books/X/images/img1.png");
        map.insert("b.png", "/books/X/images/img2.png");

        let mut doc = Document::parse(
            r#"<p><img src="images/a.png"/><img src="../other/b.png"/><img src="c.png"/></p>"#,
        );
        assert_eq!(rewrite_image_sources(&mut doc, &map), 2);

        let srcs: Vec<String> = doc
            .descendants(Document::ROOT)
            .into_iter()
            .filter_map(|n| doc.attr(n, "src").map(str::to_string))
            .collect();
        assert_eq!(
            srcs,
            vec![
                "/books/X/images/img1.png",
                "/books/X/images/img2.png",
                "c.png"
            ]
        );
    }

    #[test]
    fn heading_spacers_are_idempotent() {
        let mut doc = Document::parse("<body><h1>A</h1><p>x</p>\n<h2>B</h2><h3>C</h3></body>");
        assert_eq!(insert_heading_spacers(&mut doc), 2);
        assert_eq!(insert_heading_spacers(&mut doc), 0);
    }

    #[test]
    fn renders_chapter() {
        let html = "<html><head><title>T</title><style>p{}</style></head><body>\n\
                    <h1>Chapter 1</h1>\n<p>Hello <b>bold</b> and <i>it</i>.</p>\n\
                    <h2>Sec</h2><p>Line<br/>two</p></body></html>";
        assert_eq!(
            md(html),
            "# Chapter 1\nHello **bold** and *it*.\n\n## Sec\nLine\ntwo\n"
        );
    }

    #[test]
    fn renders_gfm_table() {
        let html = "<table><thead><tr><th>A</th><th>B</th></tr></thead>\
                    <tbody><tr><td>1</td><td>x|y</td></tr><tr><td>2</td></tr></tbody></table>";
        assert_eq!(
            md(html),
            "| A | B |\n| --- | --- |\n| 1 | x\\|y |\n| 2 |  |\n"
        );
    }

    #[test]
    fn renders_nested_lists() {
        let html = "<ul><li>one</li><li>two<ol><li>a</li></ol></li></ul>";
        assert_eq!(md(html), "- one\n- two\n  1. a\n");
    }

    #[test]
    fn renders_links_and_skips_empty_anchors() {
        let html = r#"<p><a id="top"></a>See <a href="http://x.org">site</a>.</p>"#;
        assert_eq!(md(html), "See [site](http://x.org).\n");
    }

    #[test]
    fn renders_blockquote_and_code() {
        let html = "<blockquote><p>q1</p><p>q2</p></blockquote><pre>  fn main() {}\n</pre>\
                    <p>use <code>cargo</code></p>";
        assert_eq!(
            md(html),
            "> q1\n> q2\n\n```\n  fn main() {}\n```\n\nuse `cargo`\n"
        );
    }

    #[test]
    fn empty_pre_disappears() {
        assert_eq!(md("<p>a</p><pre> </pre><p>b</p>"), "a\n\nb\n");
    }

    #[test]
    fn bare_image_gets_placeholder_alt() {
        let mut map = ImageReferenceMap::new();
        map.insert("fig.png", "/books/1/images/f.png");
        let out = convert_fragment(r#"<p><img src="Images/fig.png"/></p>"#, &map);
        assert_eq!(out, "![image](/books/1/images/f.png)\n");
    }

    #[test]
    fn bare_ampersands_do_not_truncate_the_chapter() {
        let html = "<body><p>Q&A session<p>second paragraph</p><h2>R&D</h2><p>tail</p></body>";
        assert_eq!(
            md(html),
            "Q&A session\nsecond paragraph\n## R&D\ntail\n"
        );
    }

    #[test]
    fn conversion_is_pure() {
        let html = "<h1>A</h1><p>x</p><h2>B</h2>";
        assert_eq!(md(html), md(html));
    }
}
