//! Outline reconstruction from flat Markdown headings.
//!
//! ## Why an arena?
//!
//! The builder keeps a stack of "open" headings and appends each new heading
//! under whatever is on top. Holding `&mut` references into a growing tree
//! while also keeping them on a stack does not borrow-check, so nodes live in
//! a flat `Vec` and both the stack and child lists store indices. The arena
//! is converted into owned [`OutlineNode`]s once the pass is complete.
//!
//! ## Pop rule
//!
//! Before attaching a heading of level `L`, every open node with level `>= L`
//! is closed. Equal levels therefore become siblings, and a level jump
//! (`#` then `####`) still nests under the last shallower heading.

use crate::error::ExtractError;
use crate::layout::OutputLayout;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};
use uuid::Uuid;

static HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").unwrap());

/// Header pattern for the mind map: trailing `[...]` link decorations are
/// cut off the title.
static MIND_MAP_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(#{1,6})\s+([^#\n]+?)(?:\s*\[.*\].*)?$").unwrap());

/// One heading and the text up to the next heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineNode {
    pub title: String,
    /// Lines between this heading and the next heading, joined and trimmed.
    pub content: String,
    pub children: Vec<OutlineNode>,
    /// 1..=6; the synthetic root (never returned) is 0.
    pub level: u8,
}

/// `{"structure": [...]}` wrapper used for the JSON artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineDocument {
    pub structure: Vec<OutlineNode>,
}

struct ArenaNode {
    title: String,
    content: String,
    level: u8,
    children: Vec<usize>,
}

const ROOT: usize = 0;

/// Build the outline forest of `markdown`.
///
/// Text before the first heading belongs to the synthetic root and is
/// dropped, so a document without headings yields an empty forest.
pub fn build_outline(markdown: &str) -> Vec<OutlineNode> {
    let mut arena = vec![ArenaNode {
        title: String::new(),
        content: String::new(),
        level: 0,
        children: Vec::new(),
    }];
    let mut stack: Vec<usize> = vec![ROOT];
    let mut pending: Vec<&str> = Vec::new();

    for line in markdown.split('\n') {
        let Some(caps) = HEADING_RE.captures(line) else {
            pending.push(line);
            continue;
        };

        let top = stack[stack.len() - 1];
        flush(&mut arena[top], &mut pending);

        let level = caps[1].len() as u8;
        while stack.len() > 1 && arena[stack[stack.len() - 1]].level >= level {
            stack.pop();
        }

        let index = arena.len();
        arena.push(ArenaNode {
            title: caps[2].trim().to_string(),
            content: String::new(),
            level,
            children: Vec::new(),
        });
        let parent = stack[stack.len() - 1];
        arena[parent].children.push(index);
        stack.push(index);
    }

    let top = stack[stack.len() - 1];
    flush(&mut arena[top], &mut pending);

    debug!("Outline built: {} headings", arena.len() - 1);
    let roots = std::mem::take(&mut arena[ROOT].children);
    let mut forest = Vec::with_capacity(roots.len());
    for i in roots {
        forest.push(materialize(&mut arena, i));
    }
    forest
}

fn flush(node: &mut ArenaNode, pending: &mut Vec<&str>) {
    if pending.is_empty() {
        return;
    }
    node.content = pending.join("\n").trim().to_string();
    pending.clear();
}

fn materialize(arena: &mut [ArenaNode], index: usize) -> OutlineNode {
    let child_indices = std::mem::take(&mut arena[index].children);
    let mut children = Vec::with_capacity(child_indices.len());
    for c in child_indices {
        children.push(materialize(arena, c));
    }
    let node = &mut arena[index];
    OutlineNode {
        title: std::mem::take(&mut node.title),
        content: std::mem::take(&mut node.content),
        children,
        level: node.level,
    }
}

/// Pretty-printed `{"structure": [...]}` for `markdown`.
pub fn outline_to_json(markdown: &str) -> Result<String, ExtractError> {
    let document = OutlineDocument {
        structure: build_outline(markdown),
    };
    serde_json::to_string_pretty(&document)
        .map_err(|e| ExtractError::Internal(format!("outline serialisation: {e}")))
}

/// Outline JSON for a product, written to the layout when `save` is set.
///
/// Returns the JSON and, when saved, where it went.
pub fn structure_markdown(
    markdown: &str,
    product_code: &str,
    layout: &OutputLayout,
    save: bool,
) -> Result<(String, Option<PathBuf>), ExtractError> {
    let json = outline_to_json(markdown)?;
    if !save {
        return Ok((json, None));
    }
    crate::layout::validate_product_code(product_code)?;
    let path = layout.structure_path(product_code);
    crate::convert::write_atomic(&path, &json)?;
    info!("Outline for {} written to {}", product_code, path.display());
    Ok((json, Some(path)))
}

// ── Mind map ─────────────────────────────────────────────────────────────────

/// Collapse state of a mind-map node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MindMapStyle {
    pub collapsed: bool,
}

/// Heading-only tree for mind-map viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MindMapNode {
    pub id: Uuid,
    pub name: String,
    pub depth: u8,
    pub style: MindMapStyle,
    pub children: Vec<MindMapNode>,
}

impl MindMapNode {
    fn new(name: String, depth: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            depth,
            style: MindMapStyle {
                collapsed: depth != 0,
            },
            children: Vec::new(),
        }
    }
}

/// Headings of `markdown` as a mind map under a root named `root_name`.
///
/// Headings that are images (contain `!`) are skipped.
pub fn build_mind_map(markdown: &str, root_name: &str) -> MindMapNode {
    let headings = MIND_MAP_HEADING_RE
        .captures_iter(markdown)
        .filter_map(|caps| {
            let raw = caps[2].trim();
            if raw.contains('!') {
                debug!("Skipping image heading: {}", raw);
                return None;
            }
            Some((caps[1].len() as u8, clean_heading_text(raw)))
        })
        .filter(|(_, name)| !name.is_empty());

    // Same pop rule as `build_outline`, but each stack entry is the path of
    // child indices from the root.
    let mut root = MindMapNode::new(root_name.to_string(), 0);
    let mut stack: Vec<(Vec<usize>, u8)> = vec![(Vec::new(), 0)];

    for (level, name) in headings {
        while stack.len() > 1 && stack[stack.len() - 1].1 >= level {
            stack.pop();
        }
        let mut path = stack[stack.len() - 1].0.clone();
        let parent = node_at(&mut root, &path);
        parent.children.push(MindMapNode::new(name, level));
        path.push(parent.children.len() - 1);
        stack.push((path, level));
    }

    root
}

fn node_at<'a>(root: &'a mut MindMapNode, path: &[usize]) -> &'a mut MindMapNode {
    path.iter()
        .fold(root, |node, &i| &mut node.children[i])
}

// ── Heading text ─────────────────────────────────────────────────────────────

static ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\([.*_`\[\]{}#+\-!>])").unwrap());
static IMAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static EMPHASIS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[*_]{1,2}(.*?)[*_]{1,2}").unwrap());
static CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]*)`").unwrap());
static STRIKE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"~~(.*?)~~").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Plain text of a heading: escapes undone, images become `image`, links
/// become their text, inline markers removed, whitespace collapsed.
pub fn clean_heading_text(text: &str) -> String {
    let text = ESCAPE_RE.replace_all(text, "$1");
    let text = IMAGE_RE.replace_all(
        &text,
        crate::pipeline::postprocess::IMAGE_ALT_PLACEHOLDER,
    );
    let text = LINK_RE.replace_all(&text, "$1");
    let text = EMPHASIS_RE.replace_all(&text, "$1");
    let text = CODE_RE.replace_all(&text, "$1");
    let text = STRIKE_RE.replace_all(&text, "$1");
    let text = WHITESPACE_RE.replace_all(&text, " ");
    text.trim().to_string()
}

static LEADING_HASHES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#+\s*").unwrap());

/// First line of `markdown` with heading and emphasis markers removed.
///
/// Used as a display title when a book declares none.
pub fn first_line_title(markdown: &str) -> Option<String> {
    let line = markdown.lines().next()?;
    let line = LEADING_HASHES_RE.replace(line, "");
    let title: String = line.chars().filter(|c| !matches!(c, '`' | '*' | '_')).collect();
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}
