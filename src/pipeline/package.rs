//! EPUB container access: `META-INF/container.xml`, the package document,
//! and raw entry reads.
//!
//! The package document is parsed once into a [`PackageDescriptor`]; every
//! later step (asset relocation, chapter conversion) reads from it and from
//! [`EpubArchive::read_entry`]. Manifest order is preserved so that a book
//! without a spine still converts in declaration order.

use crate::error::ExtractError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Upper bound on the buffer reserved up front for one entry. The size an
/// archive declares is not trusted beyond this.
const MAX_PREALLOC: u64 = 1 << 20;

/// One manifest `<item>` kept by the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
}

/// Everything the extractor needs from the package document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageDescriptor {
    /// First `dc:title`, or empty.
    pub title: String,
    /// First `dc:creator`, or empty.
    pub author: String,
    /// `itemref/@idref` values in spine order.
    pub spine_order: Vec<String>,
    /// XHTML/HTML items in manifest order.
    pub content_items: Vec<ManifestItem>,
    /// `image/*` items in manifest order.
    pub image_items: Vec<ManifestItem>,
    /// Directory of the package document inside the archive (`""` or `OEBPS/`).
    pub root_dir: String,
}

impl PackageDescriptor {
    pub fn content_item(&self, id: &str) -> Option<&ManifestItem> {
        self.content_items.iter().find(|item| item.id == id)
    }

    /// Content items in processing order.
    ///
    /// Spine order when the spine lists any item refs, manifest order
    /// otherwise. Spine refs that are not content items are skipped.
    pub fn processing_order(&self) -> Vec<&ManifestItem> {
        if self.spine_order.is_empty() {
            return self.content_items.iter().collect();
        }
        self.spine_order
            .iter()
            .filter_map(|id| self.content_item(id))
            .collect()
    }

    /// Archive path of a manifest href.
    pub fn entry_path(&self, href: &str) -> String {
        normalize_path(&format!("{}{}", self.root_dir, href))
    }
}

fn is_content_media_type(media_type: &str) -> bool {
    matches!(media_type, "application/xhtml+xml" | "text/html")
}

fn is_image_media_type(media_type: &str) -> bool {
    media_type.starts_with("image/")
}

/// An opened EPUB archive.
pub struct EpubArchive<R: Read + Seek> {
    path: PathBuf,
    zip: ZipArchive<R>,
}

impl EpubArchive<File> {
    /// Open an EPUB file from disk.
    pub fn open(path: &Path) -> Result<Self, ExtractError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExtractError::FileNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => ExtractError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => ExtractError::MalformedArchive {
                path: path.to_path_buf(),
                detail: e.to_string(),
            },
        })?;
        Self::from_reader(path, file)
    }
}

impl EpubArchive<Cursor<Vec<u8>>> {
    /// Open an EPUB held in memory. `label` is used in error messages only.
    pub fn from_bytes(label: &Path, bytes: Vec<u8>) -> Result<Self, ExtractError> {
        Self::from_reader(label, Cursor::new(bytes))
    }
}

impl<R: Read + Seek> EpubArchive<R> {
    pub fn from_reader(path: &Path, reader: R) -> Result<Self, ExtractError> {
        let zip = ZipArchive::new(reader).map_err(|e| ExtractError::MalformedArchive {
            path: path.to_path_buf(),
            detail: format!("not a readable zip archive: {e}"),
        })?;
        debug!("Opened archive {} ({} entries)", path.display(), zip.len());
        Ok(Self {
            path: path.to_path_buf(),
            zip,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn malformed(&self, detail: impl Into<String>) -> ExtractError {
        ExtractError::MalformedArchive {
            path: self.path.clone(),
            detail: detail.into(),
        }
    }

    /// Read one entry, retrying with the percent-decoded name.
    ///
    /// Returns `None` when neither name exists.
    pub fn read_entry(&mut self, name: &str) -> Option<std::io::Result<Vec<u8>>> {
        let decoded = percent_encoding::percent_decode_str(name)
            .decode_utf8()
            .map(|s| s.into_owned())
            .ok();
        let candidates = std::iter::once(name.to_string()).chain(decoded);

        for candidate in candidates {
            let mut entry = match self.zip.by_name(&candidate) {
                Ok(entry) => entry,
                Err(zip::result::ZipError::FileNotFound) => continue,
                Err(e) => return Some(Err(std::io::Error::other(e))),
            };
            let mut buf = Vec::with_capacity(entry.size().min(MAX_PREALLOC) as usize);
            return Some(entry.read_to_end(&mut buf).map(|_| buf));
        }
        None
    }

    /// Read an entry as UTF-8 text with any BOM removed.
    pub fn read_text(&mut self, name: &str) -> Option<std::io::Result<String>> {
        self.read_entry(name).map(|res| {
            res.map(|bytes| String::from_utf8_lossy(strip_bom(&bytes)).into_owned())
        })
    }

    /// Locate and parse the package document.
    pub fn descriptor(&mut self) -> Result<PackageDescriptor, ExtractError> {
        let container = match self.read_entry(CONTAINER_PATH) {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => return Err(self.malformed(format!("{CONTAINER_PATH}: {e}"))),
            None => return Err(self.malformed(format!("missing {CONTAINER_PATH}"))),
        };
        let opf_path = parse_container(&container).map_err(|d| self.malformed(d))?;

        let opf = match self.read_text(&opf_path) {
            Some(Ok(text)) => text,
            Some(Err(e)) => return Err(self.malformed(format!("{opf_path}: {e}"))),
            None => {
                return Err(self.malformed(format!("package document '{opf_path}' not found")))
            }
        };

        let root_dir = match opf_path.rfind('/') {
            Some(i) => opf_path[..=i].to_string(),
            None => String::new(),
        };
        let descriptor = parse_package(&opf, root_dir).map_err(|d| self.malformed(d))?;
        debug!(
            "Package '{}': {} content items, {} images, {} spine refs",
            descriptor.title,
            descriptor.content_items.len(),
            descriptor.image_items.len(),
            descriptor.spine_order.len()
        );
        Ok(descriptor)
    }
}

// ── Container and package parsing ────────────────────────────────────────────

/// Find `rootfile/@full-path` in `META-INF/container.xml`.
pub fn parse_container(bytes: &[u8]) -> Result<String, String> {
    let content = String::from_utf8_lossy(strip_bom(bytes));
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e))
                if local_name(e.name().as_ref()) == b"rootfile" =>
            {
                if let Some(path) = attribute(&e, b"full-path") {
                    if !path.is_empty() {
                        return Ok(path);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("container.xml: {e}")),
            _ => {}
        }
    }
    Err("no rootfile in container.xml".to_string())
}

/// Parse an OPF package document.
pub fn parse_package(content: &str, root_dir: String) -> Result<PackageDescriptor, String> {
    let mut reader = Reader::from_str(content);
    // Untrimmed so that text around entity references keeps its spaces.
    reader.config_mut().trim_text(false);

    let mut desc = PackageDescriptor {
        root_dir,
        ..Default::default()
    };

    let mut in_metadata = false;
    let mut current: Option<&'static str> = None;
    let mut buf_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match local_name(e.name().as_ref()) {
                b"metadata" => in_metadata = true,
                b"title" if in_metadata => {
                    current = Some("title");
                    buf_text.clear();
                }
                b"creator" if in_metadata => {
                    current = Some("creator");
                    buf_text.clear();
                }
                b"item" => push_item(&mut desc, &e),
                b"itemref" => push_itemref(&mut desc, &e),
                _ => {}
            },
            Ok(Event::Empty(e)) => match local_name(e.name().as_ref()) {
                b"item" => push_item(&mut desc, &e),
                b"itemref" => push_itemref(&mut desc, &e),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if current.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::CData(e)) => {
                if current.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if current.is_some() {
                    let entity = String::from_utf8_lossy(e.as_ref());
                    if let Some(resolved) = resolve_entity(&entity) {
                        buf_text.push_str(&resolved);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if local == b"metadata" {
                    in_metadata = false;
                }
                if let Some(field) = current.take() {
                    let value = buf_text.trim().to_string();
                    // Only the first occurrence counts.
                    match field {
                        "title" if desc.title.is_empty() => desc.title = value,
                        "creator" if desc.author.is_empty() => desc.author = value,
                        _ => {}
                    }
                    buf_text.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("package document: {e}")),
            _ => {}
        }
    }

    Ok(desc)
}

fn push_item(desc: &mut PackageDescriptor, e: &BytesStart<'_>) {
    let (Some(id), Some(href)) = (attribute(e, b"id"), attribute(e, b"href")) else {
        return;
    };
    if id.is_empty() {
        return;
    }
    let media_type = attribute(e, b"media-type").unwrap_or_default();
    let item = ManifestItem {
        id,
        href,
        media_type,
    };
    if is_content_media_type(&item.media_type) {
        desc.content_items.push(item);
    } else if is_image_media_type(&item.media_type) {
        desc.image_items.push(item);
    }
}

fn push_itemref(desc: &mut PackageDescriptor, e: &BytesStart<'_>) {
    if let Some(idref) = attribute(e, b"idref") {
        desc.spine_order.push(idref);
    }
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// Remove a UTF-8 BOM if present.
pub fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}

/// Extract local name from namespaced XML name (e.g., "dc:title" -> "title").
fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

/// Resolve `.` and `..` segments in an archive path.
fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Resolve a predefined XML entity or a numeric character reference.
fn resolve_entity(entity: &str) -> Option<String> {
    if let Some(resolved) = quick_xml::escape::resolve_predefined_entity(entity) {
        return Some(resolved.to_string());
    }
    let code = match entity.strip_prefix('#') {
        Some(hex) if hex.starts_with(['x', 'X']) => u32::from_str_radix(&hex[1..], 16).ok(),
        Some(dec) => dec.parse::<u32>().ok(),
        None => None,
    };
    code.and_then(char::from_u32).map(|c| c.to_string())
}
