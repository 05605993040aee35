//! # book-processor
//!
//! Turn EPUB and PDF books into Markdown plus extracted images, rebuild a
//! heading outline from that Markdown, and publish each product's output
//! directory to a shared store without racing sibling jobs.
//!
//! ## Why this crate?
//!
//! Each book ("product", identified by a code such as `100227-01`) goes
//! through several independent jobs: EPUB or PDF extraction, outline
//! structuring, upload. They run in parallel on different workers, yet all
//! write into the same product directory. The extraction side is a set of
//! pure, deterministic transformations; the publication side is a small
//! lock/status protocol over Redis that lets exactly one job upload and purge
//! the directory at a time.
//!
//! ## Pipeline Overview
//!
//! ```text
//! EPUB / PDF
//!  │
//!  ├─ 1. Input     resolve local file or download from URL, check magic bytes
//!  ├─ 2. Read      package document + spine (EPUB) or pages via pdfium (PDF)
//!  ├─ 3. Assets    write images, build the reference map
//!  ├─ 4. Convert   XHTML → Markdown (EPUB) / page text + image refs (PDF)
//!  ├─ 5. Polish    deterministic cleanup rules
//!  ├─ 6. Outline   heading stack → nested JSON structure (optional)
//!  └─ 7. Publish   lock ─▶ upload ─▶ purge local ─▶ status (optional)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use book_processor::{convert_epub, outline_to_json, ExtractConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractConfig::builder().save(true).build()?;
//!     let output = convert_epub("100227-01.epub", None, &config).await?;
//!     println!("{}", output.markdown);
//!     println!("{}", outline_to_json(&output.markdown)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `book-processor` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! book-processor = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod layout;
pub mod outline;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod publish;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractConfig, ExtractConfigBuilder, PublishConfig, PublishConfigBuilder};
pub use convert::{
    convert, convert_epub, convert_epub_from_bytes, convert_pdf, convert_pdf_from_bytes,
    convert_sync, convert_to_file, extract_epub, extract_paginated,
};
pub use error::{AssetError, ExtractError, PublishError, StoreError};
pub use layout::{product_code_from_filename, OutputLayout, SourceFormat};
pub use outline::{
    build_mind_map, build_outline, first_line_title, outline_to_json, structure_markdown,
    MindMapNode, OutlineNode,
};
pub use output::{AssetRecord, DocumentMetadata, ExtractionOutput, ExtractionStats, MarkdownDocument};
pub use pipeline::pages::PageSource;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use publish::{Coordinator, PublishOutcome, TaskKind, TaskRecord, TaskStatus};
