//! Error types for the book-processor library.
//!
//! Four error types reflect four distinct failure scopes:
//!
//! * [`ExtractError`] — **Fatal to one document**: the archive is malformed,
//!   the PDF cannot be opened, no content was found. Returned as
//!   `Err(ExtractError)` from the `convert_*` entry points.
//!
//! * [`AssetError`] — **Non-fatal**: a single image could not be read,
//!   decoded or written. Logged, recorded in
//!   [`crate::output::ExtractionOutput::asset_errors`], and skipped.
//!
//! * [`PublishError`] — **Fatal to the publication step only**: lock
//!   contention that outlived the wait budget, a failed upload. The local
//!   conversion output stays valid and on disk.
//!
//! * [`StoreError`] — the lock/status store itself misbehaved.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the extraction entry points.
///
/// Asset-level failures use [`AssetError`] and are stored in
/// [`crate::output::ExtractionOutput`] rather than propagated here.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists but its leading bytes do not match the expected format.
    #[error("File '{path}' is not a valid {expected}\nFirst bytes: {magic:?}")]
    UnsupportedInput {
        path: PathBuf,
        expected: &'static str,
        magic: [u8; 4],
    },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// No product code was given and none could be derived from the file name.
    #[error("No product code for '{path}': pass one explicitly or name the file like 100227-01.epub")]
    MissingProductCode { path: PathBuf },

    // ── Container errors ──────────────────────────────────────────────────
    /// Unreadable zip, missing `META-INF/container.xml`, or unparsable package document.
    #[error("Malformed archive '{path}': {detail}")]
    MalformedArchive { path: PathBuf, detail: String },

    /// The archive (or PDF) yielded no content units at all.
    #[error("No content found in '{path}'")]
    NoContentFound { path: PathBuf },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/dir-containing-libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single extracted asset.
///
/// The extraction continues; the error is logged and kept alongside the
/// output so callers can report partial asset loss.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum AssetError {
    /// The asset bytes could not be read from the source document.
    #[error("Asset '{reference}': read failed: {detail}")]
    ReadFailed { reference: String, detail: String },

    /// An embedded raster could not be decoded or re-encoded.
    #[error("Asset '{reference}': decode failed: {detail}")]
    DecodeFailed { reference: String, detail: String },

    /// The asset could not be written to the asset directory.
    #[error("Asset '{reference}': write to '{path}' failed: {detail}")]
    WriteFailed {
        reference: String,
        path: String,
        detail: String,
    },
}

/// Errors from the lock/status store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not connect to the backing store.
    #[error("Status store connection failed: {0}")]
    Connection(String),

    /// A store command failed.
    #[error("Status store command '{command}' failed: {detail}")]
    Command { command: &'static str, detail: String },

    /// A stored record could not be interpreted.
    #[error("Corrupt task record at '{key}': {detail}")]
    Corrupt { key: String, detail: String },
}

/// Coordination-level failures of a publication attempt.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Another worker holds the product lock and it never became free.
    #[error("File lock for product '{product_code}' is held by another task")]
    LockUnavailable { product_code: String },

    /// Sibling tasks did not reach a terminal status in time.
    #[error("Timed out after {secs}s waiting for tasks {task_kinds:?} of product '{product_code}'")]
    PublicationTimeout {
        product_code: String,
        task_kinds: Vec<String>,
        secs: u64,
    },

    /// The product code cannot name a product directory.
    #[error("Refusing to publish product '{product_code}': not a single path segment")]
    InvalidProductCode { product_code: String },

    /// The product output directory does not exist.
    #[error("Product directory '{path}' does not exist")]
    MissingOutput { path: PathBuf },

    /// Uploading the product directory failed; local files were preserved.
    #[error("Upload of '{path}' failed; local files preserved")]
    UploadFailure { path: PathBuf },

    /// The lock/status store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_archive_display() {
        let e = ExtractError::MalformedArchive {
            path: PathBuf::from("book.epub"),
            detail: "missing META-INF/container.xml".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("book.epub"), "got: {msg}");
        assert!(msg.contains("container.xml"), "got: {msg}");
    }

    #[test]
    fn unsupported_input_display() {
        let e = ExtractError::UnsupportedInput {
            path: PathBuf::from("x.pdf"),
            expected: "PDF",
            magic: *b"PK\x03\x04",
        };
        assert!(e.to_string().contains("not a valid PDF"));
    }

    #[test]
    fn asset_error_serialises() {
        let e = AssetError::WriteFailed {
            reference: "images/fig1.png".into(),
            path: "/tmp/out/fig1.png".into(),
            detail: "disk full".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("WriteFailed"));
        assert!(e.to_string().contains("disk full"));
    }

    #[test]
    fn publication_timeout_display() {
        let e = PublishError::PublicationTimeout {
            product_code: "100227-01".into(),
            task_kinds: vec!["pdf-to-md".into(), "md-to-json-structure".into()],
            secs: 5,
        };
        let msg = e.to_string();
        assert!(msg.contains("5s"));
        assert!(msg.contains("100227-01"));
    }

    #[test]
    fn store_error_converts_into_publish_error() {
        let e: PublishError = StoreError::Connection("refused".into()).into();
        assert!(matches!(e, PublishError::Store(_)));
        assert!(e.to_string().contains("refused"));
    }
}
