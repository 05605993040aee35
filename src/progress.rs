//! Progress-callback trait for per-unit extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractConfigBuilder::progress_callback`] to receive
//! events as the pipeline processes each content unit. A unit is one spine
//! chapter for EPUB input and one page for PDF input.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a terminal progress bar, a status record or
//! a log line without the library knowing how the host application reports
//! progress. The trait is `Send + Sync` because the blocking extraction runs
//! on a `spawn_blocking` thread, not on the caller's task.
//!
//! # Example
//!
//! ```rust
//! use book_processor::{ExtractionProgressCallback, ExtractConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_unit_complete(&self, unit: usize, total: usize, markdown_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Unit {}/{} done ({} bytes)", unit, total, markdown_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = ExtractConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline as it processes each unit.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Units are always reported in document order.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before the first unit is processed.
    ///
    /// # Arguments
    /// * `total_units` — chapters (EPUB) or pages (PDF) that will be processed
    fn on_extraction_start(&self, total_units: usize) {
        let _ = total_units;
    }

    /// Called when a unit has been rendered to Markdown.
    ///
    /// # Arguments
    /// * `unit`         — 1-indexed unit number
    /// * `total_units`  — total units
    /// * `markdown_len` — byte length of the unit's Markdown block
    fn on_unit_complete(&self, unit: usize, total_units: usize, markdown_len: usize) {
        let _ = (unit, total_units, markdown_len);
    }

    /// Called when one embedded asset could not be extracted.
    fn on_asset_error(&self, reference: &str, error: &str) {
        let _ = (reference, error);
    }

    /// Called once after every unit has been attempted.
    ///
    /// # Arguments
    /// * `total_units`  — total units in the document
    /// * `asset_count`  — assets written to the asset directory
    fn on_extraction_complete(&self, total_units: usize, asset_count: usize) {
        let _ = (total_units, asset_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

/// Resolve an optional configured callback to a usable one.
pub(crate) fn or_noop(cb: &Option<ProgressCallback>) -> ProgressCallback {
    cb.clone().unwrap_or_else(|| Arc::new(NoopProgressCallback))
}
