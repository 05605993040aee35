//! Extraction entry points.
//!
//! Every entry point resolves its input, picks a product code, then runs the
//! format-specific extraction on a blocking thread:
//!
//! ```text
//! convert_epub ──▶ resolve ──▶ spawn_blocking(extract_epub)      ──┐
//! convert_pdf  ──▶ resolve ──▶ spawn_blocking(extract_paginated) ──┴─▶ ExtractionOutput
//! ```
//!
//! ## Where do artifacts go?
//!
//! With `save = true` images and Markdown land in the product layout under
//! [`ExtractConfig::data_root`](crate::config::ExtractConfig::data_root). With
//! `save = false` images are written to a [`tempfile::TempDir`] that is gone
//! before the call returns; only the in-memory Markdown survives. Either way
//! the Markdown references images through the configured public prefix, so
//! the text is identical in both modes.

use crate::config::ExtractConfig;
use crate::error::{AssetError, ExtractError};
use crate::layout::{product_code_from_filename, validate_product_code, OutputLayout, SourceFormat};
use crate::output::{ExtractionOutput, ExtractionStats, MarkdownDocument};
use crate::pipeline::assets::{self, AssetRelocator};
use crate::pipeline::input;
use crate::pipeline::markup;
use crate::pipeline::package::EpubArchive;
use crate::pipeline::pages::{self, PageSource, PdfiumPageSource};
use crate::progress;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;
use tracing::{info, warn};

/// Convert an EPUB file or URL to Markdown.
///
/// # Arguments
/// * `input` — Local file path or HTTP/HTTPS URL to an EPUB
/// * `product_code` — Product the output is filed under; derived from the
///   file name (`100227-01.epub`) when `None`
/// * `config` — Extraction configuration
///
/// # Errors
/// Returns `Err(ExtractError)` only for fatal errors: unreadable input,
/// malformed archive, or no content at all. Individual images that fail are
/// reported in `output.asset_errors`.
pub async fn convert_epub(
    input_str: impl AsRef<str>,
    product_code: Option<&str>,
    config: &ExtractConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let input_str = input_str.as_ref();
    info!("Starting EPUB extraction: {}", input_str);

    let resolved =
        input::resolve_input(input_str, SourceFormat::Epub, config.download_timeout_secs).await?;
    let path = resolved.path().to_path_buf();
    let code = resolve_product_code(product_code, &path)?;
    let config = config.clone();

    let output = tokio::task::spawn_blocking(move || {
        let archive = EpubArchive::open(&path)?;
        extract_epub(archive, &code, &config)
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("EPUB task panicked: {}", e)))??;

    drop(resolved);
    Ok(output)
}

/// Convert EPUB bytes held in memory.
///
/// No temporary copy is made; the archive is read straight from the buffer.
pub async fn convert_epub_from_bytes(
    bytes: Vec<u8>,
    product_code: &str,
    config: &ExtractConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let label = PathBuf::from(format!("<memory:{product_code}.epub>"));
    if !bytes.starts_with(input::magic_bytes(SourceFormat::Epub)) {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(ExtractError::UnsupportedInput {
            path: label,
            expected: "EPUB archive",
            magic,
        });
    }
    let code = product_code.to_string();
    let config = config.clone();

    tokio::task::spawn_blocking(move || {
        let archive = EpubArchive::from_bytes(&label, bytes)?;
        extract_epub(archive, &code, &config)
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("EPUB task panicked: {}", e)))?
}

/// Convert a PDF file or URL to Markdown.
///
/// Page text and embedded images are extracted page by page through pdfium.
/// See [`convert_epub`] for the meaning of the arguments and errors.
pub async fn convert_pdf(
    input_str: impl AsRef<str>,
    product_code: Option<&str>,
    config: &ExtractConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let input_str = input_str.as_ref();
    info!("Starting PDF extraction: {}", input_str);

    let resolved =
        input::resolve_input(input_str, SourceFormat::Pdf, config.download_timeout_secs).await?;
    let path = resolved.path().to_path_buf();
    let code = resolve_product_code(product_code, &path)?;
    let config = config.clone();

    let output = tokio::task::spawn_blocking(move || {
        let pdfium = pages::bind_pdfium()?;
        let source = PdfiumPageSource::load(&pdfium, &path)?;
        extract_paginated(&source, &path, &code, &config)
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("PDF task panicked: {}", e)))??;

    drop(resolved);
    Ok(output)
}

/// Convert PDF bytes in memory.
///
/// pdfium wants a path, so the bytes are written to a managed
/// [`tempfile`] that is removed on return or panic.
pub async fn convert_pdf_from_bytes(
    bytes: &[u8],
    product_code: &str,
    config: &ExtractConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let mut tmp = tempfile::Builder::new()
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| ExtractError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| ExtractError::Internal(format!("tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();
    // `tmp` is dropped (and the file deleted) when `convert_pdf` returns
    convert_pdf(&path, Some(product_code), config).await
}

/// Convert either format, chosen by the caller.
pub async fn convert(
    input_str: impl AsRef<str>,
    format: SourceFormat,
    product_code: Option<&str>,
    config: &ExtractConfig,
) -> Result<ExtractionOutput, ExtractError> {
    match format {
        SourceFormat::Epub => convert_epub(input_str, product_code, config).await,
        SourceFormat::Pdf => convert_pdf(input_str, product_code, config).await,
    }
}

/// Convert and write the Markdown to an explicit path.
///
/// Uses atomic write (temp file + rename) to prevent partial files. This is
/// independent of `config.save`, which controls the product layout.
pub async fn convert_to_file(
    input_str: impl AsRef<str>,
    format: SourceFormat,
    product_code: Option<&str>,
    output_path: impl AsRef<Path>,
    config: &ExtractConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let output = convert(input_str, format, product_code, config).await?;
    let path = output_path.as_ref().to_path_buf();
    let markdown = output.markdown.clone();
    tokio::task::spawn_blocking(move || write_atomic(&path, &markdown))
        .await
        .map_err(|e| ExtractError::Internal(format!("write task panicked: {}", e)))??;
    Ok(output)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    format: SourceFormat,
    product_code: Option<&str>,
    config: &ExtractConfig,
) -> Result<ExtractionOutput, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input_str, format, product_code, config))
}

// ── Blocking cores ───────────────────────────────────────────────────────────

/// Extract an opened EPUB archive. Blocking.
pub fn extract_epub<R: Read + Seek>(
    mut archive: EpubArchive<R>,
    product_code: &str,
    config: &ExtractConfig,
) -> Result<ExtractionOutput, ExtractError> {
    validate_product_code(product_code)?;
    let start = Instant::now();
    let origin = archive.path().to_path_buf();
    let descriptor = archive.descriptor()?;

    let order = descriptor.processing_order();
    if order.is_empty() {
        return Err(ExtractError::NoContentFound { path: origin });
    }

    let (layout, _temp) = prepare_workspace(config)?;
    let progress = progress::or_noop(&config.progress_callback);
    let mut relocator = AssetRelocator::new(
        layout.images_dir(product_code),
        config.public_prefix_for(product_code),
    );

    // ── Assets first, so chapter markup can be rewritten against the map ──
    for item in &descriptor.image_items {
        let entry = descriptor.entry_path(&item.href);
        let bytes = match archive.read_entry(&entry) {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                let err = AssetError::ReadFailed {
                    reference: item.href.clone(),
                    detail: e.to_string(),
                };
                progress.on_asset_error(&item.href, &err.to_string());
                relocator.record_error(err);
                continue;
            }
            None => {
                let err = AssetError::ReadFailed {
                    reference: item.href.clone(),
                    detail: format!("'{entry}' not in archive"),
                };
                progress.on_asset_error(&item.href, &err.to_string());
                relocator.record_error(err);
                continue;
            }
        };
        let file_name = format!("{}{}", item.id, assets::extension(&item.href));
        let aliases = [assets::basename(&item.href), item.href.as_str()];
        if let Err(e) = relocator.relocate(&item.href, &aliases, &file_name, &bytes) {
            progress.on_asset_error(&item.href, &e.to_string());
        }
    }

    // ── Chapters in reading order ──
    let metadata = crate::output::DocumentMetadata {
        title: descriptor.title.clone(),
        author: descriptor.author.clone(),
    };
    let mut document = MarkdownDocument::new();
    if config.include_metadata_header {
        for block in metadata.header_blocks() {
            document.push(block);
        }
    }

    let total = order.len();
    progress.on_extraction_start(total);
    let mut rendered = 0;
    let mut skipped = 0;

    for (i, item) in order.iter().enumerate() {
        let entry = descriptor.entry_path(&item.href);
        let markup_text = match archive.read_text(&entry) {
            Some(Ok(text)) => text,
            Some(Err(e)) => {
                warn!("Content document '{}' unreadable: {}", entry, e);
                skipped += 1;
                progress.on_unit_complete(i + 1, total, 0);
                continue;
            }
            None => {
                warn!("Content document '{}' missing from archive", entry);
                skipped += 1;
                progress.on_unit_complete(i + 1, total, 0);
                continue;
            }
        };

        let markdown = markup::convert_fragment(&markup_text, relocator.map());
        let len = markdown.len();
        if document.push(&markdown) {
            rendered += 1;
        } else {
            skipped += 1;
        }
        progress.on_unit_complete(i + 1, total, len);
    }

    if rendered == 0 {
        return Err(ExtractError::NoContentFound { path: origin });
    }
    progress.on_extraction_complete(total, relocator.written());

    finish(
        FinishArgs {
            product_code,
            format: SourceFormat::Epub,
            config,
            layout: &layout,
            document,
            metadata,
            total_units: total,
            rendered_units: rendered,
            skipped_units: skipped,
            start,
        },
        relocator,
    )
}

/// Extract any paginated document. Blocking.
///
/// `origin` names the source in errors and logs.
pub fn extract_paginated<S: PageSource + ?Sized>(
    source: &S,
    origin: &Path,
    product_code: &str,
    config: &ExtractConfig,
) -> Result<ExtractionOutput, ExtractError> {
    validate_product_code(product_code)?;
    let start = Instant::now();
    let (layout, _temp) = prepare_workspace(config)?;
    let progress = progress::or_noop(&config.progress_callback);
    let mut relocator = AssetRelocator::new(
        layout.images_dir(product_code),
        config.public_prefix_for(product_code),
    );

    let metadata = source.metadata();
    let extraction = pages::extract_pages(source, &mut relocator, progress.as_ref());
    if extraction.document.is_empty() {
        return Err(ExtractError::NoContentFound {
            path: origin.to_path_buf(),
        });
    }

    let mut document = MarkdownDocument::new();
    if config.include_metadata_header {
        for block in metadata.header_blocks() {
            document.push(block);
        }
    }
    document.append(extraction.document);

    finish(
        FinishArgs {
            product_code,
            format: SourceFormat::Pdf,
            config,
            layout: &layout,
            document,
            metadata,
            total_units: extraction.total_pages,
            rendered_units: extraction.rendered_pages,
            skipped_units: extraction.skipped_pages,
            start,
        },
        relocator,
    )
}

// ── Internal helpers ─────────────────────────────────────────────────────────

struct FinishArgs<'a> {
    product_code: &'a str,
    format: SourceFormat,
    config: &'a ExtractConfig,
    layout: &'a OutputLayout,
    document: MarkdownDocument,
    metadata: crate::output::DocumentMetadata,
    total_units: usize,
    rendered_units: usize,
    skipped_units: usize,
    start: Instant,
}

/// Render, optionally persist, and assemble the output.
fn finish(args: FinishArgs<'_>, relocator: AssetRelocator) -> Result<ExtractionOutput, ExtractError> {
    let markdown = args.document.render();

    let markdown_path = if args.config.save {
        let path = args.layout.markdown_path(args.product_code, args.format);
        write_atomic(&path, &markdown)?;
        Some(path)
    } else {
        None
    };

    let (_map, assets, asset_errors) = relocator.into_parts();
    let stats = ExtractionStats {
        total_units: args.total_units,
        rendered_units: args.rendered_units,
        skipped_units: args.skipped_units,
        assets_written: assets.len(),
        assets_failed: asset_errors.len(),
        total_duration_ms: args.start.elapsed().as_millis() as u64,
    };

    info!(
        "Extraction complete: product {} ({}), {}/{} units, {} assets, {} asset errors, {}ms",
        args.product_code,
        args.format.as_str(),
        stats.rendered_units,
        stats.total_units,
        stats.assets_written,
        stats.assets_failed,
        stats.total_duration_ms
    );

    Ok(ExtractionOutput {
        product_code: args.product_code.to_string(),
        markdown,
        markdown_path,
        metadata: args.metadata,
        assets,
        asset_errors,
        stats,
    })
}

/// Product layout to write into, plus the temp dir backing it when not saving.
fn prepare_workspace(
    config: &ExtractConfig,
) -> Result<(OutputLayout, Option<TempDir>), ExtractError> {
    if config.save {
        return Ok((config.layout(), None));
    }
    let temp = TempDir::new().map_err(|e| ExtractError::Internal(format!("tempdir: {e}")))?;
    Ok((OutputLayout::new(temp.path()), Some(temp)))
}

fn resolve_product_code(explicit: Option<&str>, path: &Path) -> Result<String, ExtractError> {
    let code = match explicit.map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => code.to_string(),
        None => product_code_from_filename(path).ok_or_else(|| ExtractError::MissingProductCode {
            path: path.to_path_buf(),
        })?,
    };
    validate_product_code(&code)?;
    Ok(code)
}

/// Write via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), ExtractError> {
    let fail = |source: std::io::Error| ExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(fail)?;
    }
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    std::fs::write(&tmp_path, contents).map_err(fail)?;
    std::fs::rename(&tmp_path, path).map_err(fail)?;
    Ok(())
}
