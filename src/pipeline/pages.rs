//! Paginated documents: page text and embedded rasters, page by page.
//!
//! ## Why a `PageSource` trait?
//!
//! The extraction loop (page order, image naming, asset relocation, error
//! tolerance) is the part worth testing, and it has nothing to do with
//! pdfium. [`extract_pages`] is generic over [`PageSource`]; production code
//! passes a [`PdfiumPageSource`], tests pass an in-memory fake.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and blocks on every call. The async entry points in
//! [`crate::convert`] move the whole per-document loop onto a blocking thread
//! so Tokio worker threads never stall on a large PDF.

use crate::error::{AssetError, ExtractError};
use crate::output::{DocumentMetadata, MarkdownDocument};
use crate::pipeline::assets::AssetRelocator;
use crate::pipeline::encode::{encode_png, PNG_EXTENSION};
use crate::pipeline::postprocess;
use crate::progress::ExtractionProgressCallback;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Read access to a paginated document. Page indices are 0-based.
pub trait PageSource {
    fn page_count(&self) -> usize;

    /// Document-level title and author, empty when undeclared.
    fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata::default()
    }

    /// Plain text of one page.
    fn page_text(&self, index: usize) -> Result<String, String>;

    /// Embedded raster images of one page, in content-stream order.
    ///
    /// A failed decode occupies its slot as an `Err` so that image numbering
    /// stays stable.
    fn page_images(&self, index: usize) -> Vec<Result<DynamicImage, String>>;
}

/// Counters from one [`extract_pages`] run.
#[derive(Debug, Default)]
pub struct PageExtraction {
    pub document: MarkdownDocument,
    pub total_pages: usize,
    pub rendered_pages: usize,
    pub skipped_pages: usize,
}

/// File name of the `image`-th raster on page `page` (both 1-based).
pub fn page_image_name(page: usize, image: usize) -> String {
    format!("page_{page}_img_{image}.{PNG_EXTENSION}")
}

/// Walk every page in order, writing its images through `relocator`.
///
/// Each page becomes one Markdown block: the page text followed by one
/// `![image](…)` reference per successfully written image. Image failures
/// are recorded on the relocator and never abort the loop.
pub fn extract_pages<S: PageSource + ?Sized>(
    source: &S,
    relocator: &mut AssetRelocator,
    progress: &dyn ExtractionProgressCallback,
) -> PageExtraction {
    let total = source.page_count();
    progress.on_extraction_start(total);

    let mut result = PageExtraction {
        total_pages: total,
        ..Default::default()
    };

    for index in 0..total {
        let page = index + 1;
        let mut block = match source.page_text(index) {
            Ok(text) => text,
            Err(e) => {
                warn!("Page {}: text extraction failed: {}", page, e);
                String::new()
            }
        };

        for (i, image) in source.page_images(index).into_iter().enumerate() {
            let reference = format!("page {page} image {}", i + 1);
            let name = page_image_name(page, i + 1);

            let encoded = image.and_then(|img| encode_png(&img).map_err(|e| e.to_string()));
            let bytes = match encoded {
                Ok(bytes) => bytes,
                Err(detail) => {
                    let err = AssetError::DecodeFailed {
                        reference: reference.clone(),
                        detail,
                    };
                    progress.on_asset_error(&reference, &err.to_string());
                    relocator.record_error(err);
                    continue;
                }
            };

            match relocator.relocate(&reference, &[], &name, &bytes) {
                Ok(public) => {
                    block.push_str(&format!("\n\n![image]({public})\n\n"));
                }
                Err(err) => progress.on_asset_error(&reference, &err.to_string()),
            }
        }

        let cleaned = postprocess::clean_markdown(&block);
        let len = cleaned.len();
        if result.document.push(&cleaned) {
            result.rendered_pages += 1;
        } else {
            debug!("Page {} produced no content", page);
            result.skipped_pages += 1;
        }
        progress.on_unit_complete(page, total, len);
    }

    progress.on_extraction_complete(total, relocator.written());
    result
}

// ── pdfium ───────────────────────────────────────────────────────────────────

/// Bind to pdfium.
///
/// `PDFIUM_LIB_PATH` may name the library file or the directory holding it;
/// otherwise the current directory and then the system library are tried.
pub fn bind_pdfium() -> Result<Pdfium, ExtractError> {
    let candidate: PathBuf = match std::env::var_os("PDFIUM_LIB_PATH") {
        Some(p) if Path::new(&p).is_file() => PathBuf::from(p),
        Some(p) => Pdfium::pdfium_platform_library_name_at_path(&PathBuf::from(p)),
        None => Pdfium::pdfium_platform_library_name_at_path("./"),
    };

    Pdfium::bind_to_library(&candidate)
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| ExtractError::PdfiumBindingFailed(format!("{e:?}")))
}

/// [`PageSource`] over a pdfium document.
pub struct PdfiumPageSource<'a> {
    document: PdfDocument<'a>,
}

impl<'a> PdfiumPageSource<'a> {
    /// Load `path` with an already-bound pdfium instance.
    pub fn load(pdfium: &'a Pdfium, path: &Path) -> Result<Self, ExtractError> {
        let document =
            pdfium
                .load_pdf_from_file(path, None)
                .map_err(|e| ExtractError::CorruptPdf {
                    path: path.to_path_buf(),
                    detail: format!("{:?}", e),
                })?;
        info!("PDF loaded: {} pages", document.pages().len());
        Ok(Self { document })
    }
}

impl PageSource for PdfiumPageSource<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn metadata(&self) -> DocumentMetadata {
        let metadata = self.document.metadata();
        let get_meta = |tag: PdfDocumentMetadataTagType| -> String {
            metadata
                .get(tag)
                .map(|t| t.value().trim().to_string())
                .unwrap_or_default()
        };
        DocumentMetadata {
            title: get_meta(PdfDocumentMetadataTagType::Title),
            author: get_meta(PdfDocumentMetadataTagType::Author),
        }
    }

    fn page_text(&self, index: usize) -> Result<String, String> {
        let page = self
            .document
            .pages()
            .get(index as u16)
            .map_err(|e| format!("{:?}", e))?;
        let text = page.text().map_err(|e| format!("{:?}", e))?;
        Ok(text.all())
    }

    fn page_images(&self, index: usize) -> Vec<Result<DynamicImage, String>> {
        let page = match self.document.pages().get(index as u16) {
            Ok(page) => page,
            Err(e) => {
                warn!("Page {}: cannot open: {:?}", index + 1, e);
                return Vec::new();
            }
        };
        page.objects()
            .iter()
            .filter_map(|object| {
                object
                    .as_image_object()
                    .map(|img| img.get_raw_image().map_err(|e| format!("{:?}", e)))
            })
            .collect()
    }
}
