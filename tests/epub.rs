//! EPUB extraction against archives synthesised in memory.
//!
//! Run with:
//!   cargo test --test epub

use book_processor::{
    convert_epub, convert_epub_from_bytes, ExtractConfig, ExtractError, ExtractionProgressCallback,
};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

// ── Test helpers ─────────────────────────────────────────────────────────────

const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

/// A tiny valid PNG is not needed; image bytes are copied verbatim.
const IMAGE_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nnot-really";

fn chapter(body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>x</title></head>\
         <body>{body}</body></html>"
    )
}

fn opf(spine: &str, manifest_extra: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Ferris Book</dc:title>
    <dc:creator>Jane Doe</dc:creator>
  </metadata>
  <manifest>
    <item id="ch2" href="Text/ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch1" href="Text/ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="img1" href="Images/cover.png" media-type="image/png"/>
    <item id="css" href="Styles/main.css" media-type="text/css"/>
    {manifest_extra}
  </manifest>
  <spine>{spine}</spine>
</package>"#
    )
}

fn build_epub(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, data) in entries {
        zip.start_file(*name, stored).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn standard_epub(spine: &str) -> Vec<u8> {
    let opf = opf(spine, "");
    let ch1 = chapter(r#"<h1>One</h1><p>first <img src="../Images/cover.png"/></p>"#);
    let ch2 = chapter("<h1>Two</h1><p>second</p>");
    build_epub(&[
        ("mimetype", b"application/epub+zip"),
        ("META-INF/container.xml", CONTAINER.as_bytes()),
        ("OEBPS/content.opf", opf.as_bytes()),
        ("OEBPS/Text/ch1.xhtml", ch1.as_bytes()),
        ("OEBPS/Text/ch2.xhtml", ch2.as_bytes()),
        ("OEBPS/Images/cover.png", IMAGE_BYTES),
    ])
}

fn config(root: &Path, save: bool) -> ExtractConfig {
    ExtractConfig::builder()
        .data_root(root)
        .save(save)
        .build()
        .unwrap()
}

fn position(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("'{needle}' not found in:\n{haystack}"))
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn spine_order_images_and_layout() {
    let data = tempfile::tempdir().unwrap();
    let bytes = standard_epub(r#"<itemref idref="ch1"/><itemref idref="ch2"/>"#);

    let output = convert_epub_from_bytes(bytes, "100227-01", &config(data.path(), true))
        .await
        .unwrap();
    let md = &output.markdown;

    // Header, then chapters in spine order, not manifest order.
    assert!(md.starts_with("# Ferris Book\n\n**Author: Jane Doe**\n\n"), "got:\n{md}");
    assert!(position(md, "# One") < position(md, "# Two"));

    // The relative reference resolves to the relocated file.
    assert!(md.contains("![image](/books/100227-01/images/img1.png)"), "got:\n{md}");
    let image = data.path().join("100227-01/images/img1.png");
    assert_eq!(std::fs::read(&image).unwrap(), IMAGE_BYTES);

    let md_path = data.path().join("100227-01/epub/100227-01.epub.md");
    assert_eq!(output.markdown_path.as_deref(), Some(md_path.as_path()));
    assert_eq!(&std::fs::read_to_string(&md_path).unwrap(), md);

    assert_eq!(output.stats.total_units, 2);
    assert_eq!(output.stats.rendered_units, 2);
    assert_eq!(output.stats.assets_written, 1);
    assert!(output.asset_errors.is_empty());
    assert_eq!(output.metadata.title, "Ferris Book");
}

#[tokio::test]
async fn manifest_order_without_spine() {
    let data = tempfile::tempdir().unwrap();
    let bytes = standard_epub("");

    let output = convert_epub_from_bytes(bytes, "100227-01", &config(data.path(), false))
        .await
        .unwrap();

    assert!(position(&output.markdown, "# Two") < position(&output.markdown, "# One"));
}

#[tokio::test]
async fn unsaved_extraction_leaves_no_files() {
    let data = tempfile::tempdir().unwrap();
    let bytes = standard_epub(r#"<itemref idref="ch1"/>"#);

    let output = convert_epub_from_bytes(bytes, "100227-01", &config(data.path(), false))
        .await
        .unwrap();

    assert!(output.markdown_path.is_none());
    assert_eq!(output.assets.len(), 1);
    assert!(output.markdown.contains("/books/100227-01/images/img1.png"));
    assert_eq!(std::fs::read_dir(data.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn product_code_comes_from_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("100227-01_final.epub");
    std::fs::write(&path, standard_epub(r#"<itemref idref="ch2"/>"#)).unwrap();

    let config = ExtractConfig::builder()
        .data_root(dir.path().join("data"))
        .include_metadata_header(false)
        .build()
        .unwrap();
    let output = convert_epub(path.to_str().unwrap(), None, &config).await.unwrap();

    assert_eq!(output.product_code, "100227-01");
    assert_eq!(output.markdown, "# Two\nsecond\n");
}

#[tokio::test]
async fn missing_product_code_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("book.epub");
    std::fs::write(&path, standard_epub("")).unwrap();

    let err = convert_epub(path.to_str().unwrap(), None, &config(dir.path(), false))
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::MissingProductCode { .. }), "got {err:?}");
}

#[tokio::test]
async fn missing_container_is_malformed() {
    let data = tempfile::tempdir().unwrap();
    let bytes = build_epub(&[("mimetype", b"application/epub+zip")]);

    let err = convert_epub_from_bytes(bytes, "100227-01", &config(data.path(), false))
        .await
        .unwrap_err();
    match err {
        ExtractError::MalformedArchive { detail, .. } => {
            assert!(detail.contains("container.xml"), "detail: {detail}")
        }
        other => panic!("expected MalformedArchive, got {other:?}"),
    }
}

#[tokio::test]
async fn non_zip_bytes_are_rejected() {
    let data = tempfile::tempdir().unwrap();
    let err = convert_epub_from_bytes(b"%PDF-1.7".to_vec(), "100227-01", &config(data.path(), false))
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::UnsupportedInput { .. }), "got {err:?}");
}

#[tokio::test]
async fn archive_without_content_items() {
    let data = tempfile::tempdir().unwrap();
    let opf = r#"<package xmlns="http://www.idpf.org/2007/opf"><metadata/>
      <manifest><item id="img1" href="cover.png" media-type="image/png"/></manifest>
      <spine/></package>"#;
    let bytes = build_epub(&[
        ("META-INF/container.xml", CONTAINER.as_bytes()),
        ("OEBPS/content.opf", opf.as_bytes()),
        ("OEBPS/cover.png", IMAGE_BYTES),
    ]);

    let err = convert_epub_from_bytes(bytes, "100227-01", &config(data.path(), false))
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::NoContentFound { .. }), "got {err:?}");
}

#[derive(Default)]
struct Recorder {
    completed: Mutex<Vec<usize>>,
    asset_errors: Mutex<Vec<String>>,
}

impl ExtractionProgressCallback for Recorder {
    fn on_unit_complete(&self, unit: usize, _total: usize, _len: usize) {
        self.completed.lock().unwrap().push(unit);
    }

    fn on_asset_error(&self, reference: &str, _error: &str) {
        self.asset_errors.lock().unwrap().push(reference.to_string());
    }
}

#[tokio::test]
async fn missing_image_and_chapter_are_tolerated() {
    let data = tempfile::tempdir().unwrap();
    let opf = opf(
        r#"<itemref idref="ch1"/><itemref idref="ghost"/><itemref idref="ch2"/>"#,
        r#"<item id="ghost" href="Text/ghost.xhtml" media-type="application/xhtml+xml"/>"#,
    );
    let ch1 = chapter("<p>one</p>");
    let ch2 = chapter("<p>two</p>");
    // No Images/cover.png in the archive.
    let bytes = build_epub(&[
        ("META-INF/container.xml", CONTAINER.as_bytes()),
        ("OEBPS/content.opf", opf.as_bytes()),
        ("OEBPS/Text/ch1.xhtml", ch1.as_bytes()),
        ("OEBPS/Text/ch2.xhtml", ch2.as_bytes()),
    ]);

    let recorder = Arc::new(Recorder::default());
    let config = ExtractConfig::builder()
        .data_root(data.path())
        .include_metadata_header(false)
        .progress_callback(recorder.clone() as Arc<dyn ExtractionProgressCallback>)
        .build()
        .unwrap();

    let output = convert_epub_from_bytes(bytes, "100227-01", &config)
        .await
        .unwrap();

    assert_eq!(output.markdown, "one\n\ntwo\n");
    assert_eq!(output.stats.total_units, 3);
    assert_eq!(output.stats.skipped_units, 1);
    assert_eq!(output.asset_errors.len(), 1);
    assert_eq!(*recorder.completed.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(*recorder.asset_errors.lock().unwrap(), vec!["Images/cover.png"]);
}

#[tokio::test]
async fn publisher_html_with_bare_ampersands_keeps_every_paragraph() {
    let data = tempfile::tempdir().unwrap();
    let opf = opf(r#"<itemref idref="ch1"/><itemref idref="ch2"/>"#, "");
    // HTML-style chapter: bare `&`, unclosed paragraphs, no XHTML namespace.
    let ch1 = "<html><body><h1>Q&A</h1><p>Ask AT&T & friends<p>second paragraph\
               <p>third & last</body></html>";
    let ch2 = chapter("<p>next chapter</p>");
    let bytes = build_epub(&[
        ("META-INF/container.xml", CONTAINER.as_bytes()),
        ("OEBPS/content.opf", opf.as_bytes()),
        ("OEBPS/Text/ch1.xhtml", ch1.as_bytes()),
        ("OEBPS/Text/ch2.xhtml", ch2.as_bytes()),
    ]);

    let config = ExtractConfig::builder()
        .data_root(data.path())
        .include_metadata_header(false)
        .build()
        .unwrap();
    let output = convert_epub_from_bytes(bytes, "100227-01", &config)
        .await
        .unwrap();

    assert_eq!(
        output.markdown,
        "# Q&A\nAsk AT&T & friends\nsecond paragraph\nthird & last\n\nnext chapter\n"
    );
}

#[tokio::test]
async fn path_like_product_code_is_refused() {
    let data = tempfile::tempdir().unwrap();
    let bytes = standard_epub(r#"<itemref idref="ch1"/>"#);

    let err = convert_epub_from_bytes(bytes, "../escape", &config(data.path(), true))
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::InvalidConfig(_)), "got {err:?}");
    assert_eq!(std::fs::read_dir(data.path()).unwrap().count(), 0);
}
