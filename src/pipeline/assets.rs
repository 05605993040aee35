//! Asset relocation: persist extracted images and remember where they went.
//!
//! Both readers funnel every image through an [`AssetRelocator`]. It writes
//! the bytes into the product's asset directory, records the public path the
//! Markdown should use, and for container documents fills the
//! [`ImageReferenceMap`] that the markup converter consults when rewriting
//! `<img src>` attributes.
//!
//! A failed write never aborts the extraction: the error is logged, kept in
//! the relocator and surfaced through
//! [`crate::output::ExtractionOutput::asset_errors`].

use crate::error::AssetError;
use crate::output::AssetRecord;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Original image reference → published path.
///
/// Keys are both the raw manifest href and its basename, so a content
/// document referring to `../images/fig1.png` still resolves when the
/// manifest declared `images/fig1.png`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageReferenceMap {
    entries: HashMap<String, String>,
}

impl ImageReferenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: impl Into<String>, published: impl Into<String>) {
        self.entries.insert(reference.into(), published.into());
    }

    /// Literal lookup first, then basename lookup.
    pub fn lookup(&self, src: &str) -> Option<&str> {
        if let Some(hit) = self.entries.get(src) {
            return Some(hit.as_str());
        }
        self.entries.get(basename(src)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Last path segment of a `/`-separated reference.
pub fn basename(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

/// Extension of a reference including the dot (`.png`), or empty.
pub fn extension(reference: &str) -> &str {
    let name = basename(reference);
    match name.rfind('.') {
        Some(i) if i > 0 => &name[i..],
        _ => "",
    }
}

/// Writes assets into one directory and tracks what was written.
#[derive(Debug)]
pub struct AssetRelocator {
    asset_dir: PathBuf,
    public_prefix: String,
    map: ImageReferenceMap,
    records: Vec<AssetRecord>,
    errors: Vec<AssetError>,
}

impl AssetRelocator {
    pub fn new(asset_dir: impl AsRef<Path>, public_prefix: impl Into<String>) -> Self {
        Self {
            asset_dir: asset_dir.as_ref().to_path_buf(),
            public_prefix: public_prefix.into().trim_end_matches('/').to_string(),
            map: ImageReferenceMap::new(),
            records: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn asset_dir(&self) -> &Path {
        &self.asset_dir
    }

    /// `<prefix>/<file_name>`
    pub fn public_path(&self, file_name: &str) -> String {
        format!("{}/{}", self.public_prefix, file_name)
    }

    /// Persist `bytes` as `file_name` and map each alias to its public path.
    ///
    /// On failure the error is recorded and returned; the caller decides
    /// whether to emit a reference anyway (it should not).
    pub fn relocate(
        &mut self,
        source: &str,
        aliases: &[&str],
        file_name: &str,
        bytes: &[u8],
    ) -> Result<String, AssetError> {
        let target = self.asset_dir.join(file_name);
        let written = std::fs::create_dir_all(&self.asset_dir)
            .and_then(|_| std::fs::write(&target, bytes));

        if let Err(e) = written {
            let err = AssetError::WriteFailed {
                reference: source.to_string(),
                path: target.display().to_string(),
                detail: e.to_string(),
            };
            self.record_error(err.clone());
            return Err(err);
        }

        let public = self.public_path(file_name);
        for alias in aliases {
            self.map.insert(*alias, public.clone());
        }
        debug!("Asset {} → {}", source, target.display());
        self.records.push(AssetRecord {
            source: source.to_string(),
            file_name: file_name.to_string(),
            public_path: public.clone(),
        });
        Ok(public)
    }

    /// Keep a non-fatal asset failure.
    pub fn record_error(&mut self, err: AssetError) {
        warn!("{}", err);
        self.errors.push(err);
    }

    pub fn map(&self) -> &ImageReferenceMap {
        &self.map
    }

    pub fn written(&self) -> usize {
        self.records.len()
    }

    pub fn into_parts(self) -> (ImageReferenceMap, Vec<AssetRecord>, Vec<AssetError>) {
        (self.map, self.records, self.errors)
    }
}
