//! Pipeline stages for book extraction.
//!
//! Each submodule implements exactly one transformation step, so every stage
//! is independently testable and the two readers share everything below the
//! format-specific layer.
//!
//! ## Data Flow
//!
//! ```text
//!            ┌─▶ package ──▶ assets ──▶ dom ──▶ markup ──▶ postprocess ─┐
//! input ─────┤   (EPUB)      (images)  (XHTML)  (render)    (cleanup)    ├─▶ MarkdownDocument
//! (URL/path) └─▶ pages ────▶ encode ──▶ assets ────────────▶ postprocess ┘
//!                (PDF)       (PNG)
//! ```
//!
//! 1. [`input`]   — canonicalise the user-supplied path or URL and check magic bytes
//! 2. [`package`] — read `container.xml` and the package document of an EPUB
//! 3. [`pages`]   — page text and embedded rasters of a PDF; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 4. [`encode`]  — PNG-encode decoded rasters
//! 5. [`assets`]  — persist images and build the reference map
//! 6. [`dom`] / [`markup`] — parse one content document and render Markdown
//! 7. [`postprocess`] — deterministic text-cleanup rules

pub mod assets;
pub mod dom;
pub mod encode;
pub mod input;
pub mod markup;
pub mod package;
pub mod pages;
pub mod postprocess;
