//! Output types returned by the extraction entry points.

use crate::error::AssetError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result of extracting one EPUB or PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// Product code the artifacts were filed under.
    pub product_code: String,

    /// The assembled Markdown document.
    pub markdown: String,

    /// Where the Markdown was written, when `save` was enabled.
    pub markdown_path: Option<PathBuf>,

    /// Title and author declared by the source document.
    pub metadata: DocumentMetadata,

    /// Assets written to the asset directory, in extraction order.
    pub assets: Vec<AssetRecord>,

    /// Assets that could not be extracted. Never fatal.
    pub asset_errors: Vec<AssetError>,

    pub stats: ExtractionStats,
}

/// Document-level metadata. Empty strings stand for "not declared".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    pub author: String,
}

impl DocumentMetadata {
    /// The `# title` and author blocks prepended to a document, if any.
    pub fn header_blocks(&self) -> Vec<String> {
        let mut blocks = Vec::new();
        let title = self.title.trim();
        if !title.is_empty() {
            blocks.push(format!("# {title}"));
        }
        let author = self.author.trim();
        if !author.is_empty() {
            blocks.push(format!("**Author: {author}**"));
        }
        blocks
    }
}

/// One persisted asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Reference as it appeared in the source (manifest href or page/index label).
    pub source: String,
    /// File name inside the asset directory.
    pub file_name: String,
    /// Path used in Markdown image references.
    pub public_path: String,
}

/// Counters for one extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Chapters (EPUB) or pages (PDF) in the source.
    pub total_units: usize,
    /// Units that contributed a non-empty Markdown block.
    pub rendered_units: usize,
    /// Units skipped because they were missing or empty.
    pub skipped_units: usize,
    pub assets_written: usize,
    pub assets_failed: usize,
    pub total_duration_ms: u64,
}

/// Ordered Markdown blocks, one per content unit.
///
/// Blocks are trimmed on insertion and empty blocks are dropped, so
/// [`MarkdownDocument::render`] never produces runs of blank lines between
/// units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkdownDocument {
    blocks: Vec<String>,
}

impl MarkdownDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block; returns false if it was empty after trimming.
    pub fn push(&mut self, block: impl AsRef<str>) -> bool {
        let trimmed = block.as_ref().trim();
        if trimmed.is_empty() {
            return false;
        }
        self.blocks.push(trimmed.to_string());
        true
    }

    /// Move every block of `other` to the end of this document.
    pub fn append(&mut self, other: MarkdownDocument) {
        self.blocks.extend(other.blocks);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks joined by a blank line, with a trailing newline.
    pub fn render(&self) -> String {
        if self.blocks.is_empty() {
            return String::new();
        }
        let mut out = self.blocks.join("\n\n");
        out.push('\n');
        out
    }
}
