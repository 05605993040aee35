//! Per-product output layout and product-code parsing.
//!
//! Every artifact a product produces lives under one directory so that the
//! publication step can upload (and later delete) it as a unit:
//!
//! ```text
//! <data_root>/<product>/
//!   epub/<product>.epub.md
//!   pdf/<product>.pdf.md
//!   json/<product>.structure.json
//!   images/
//! ```

use crate::error::ExtractError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Leading `NNNNNN-NN` of a file name.
static PRODUCT_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{6}-\d{2})").unwrap());

/// The source format an artifact was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Epub,
    Pdf,
}

impl SourceFormat {
    /// Directory and file-infix name: `epub` or `pdf`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Epub => "epub",
            SourceFormat::Pdf => "pdf",
        }
    }
}

/// Resolves artifact paths under a data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    data_root: PathBuf,
}

impl OutputLayout {
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            data_root: data_root.as_ref().to_path_buf(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// `<root>/<product>`: the unit of publication.
    pub fn product_dir(&self, product_code: &str) -> PathBuf {
        self.data_root.join(product_code)
    }

    /// `<root>/<product>/images`
    pub fn images_dir(&self, product_code: &str) -> PathBuf {
        self.product_dir(product_code).join("images")
    }

    /// `<root>/<product>/<fmt>/<product>.<fmt>.md`
    pub fn markdown_path(&self, product_code: &str, format: SourceFormat) -> PathBuf {
        let fmt = format.as_str();
        self.product_dir(product_code)
            .join(fmt)
            .join(format!("{product_code}.{fmt}.md"))
    }

    /// `<root>/<product>/json/<product>.structure.json`
    pub fn structure_path(&self, product_code: &str) -> PathBuf {
        self.product_dir(product_code)
            .join("json")
            .join(format!("{product_code}.structure.json"))
    }

    /// Public image prefix used when none is configured.
    pub fn default_public_prefix(product_code: &str) -> String {
        format!("/books/{product_code}/images")
    }
}

/// Check that `product_code` names exactly one directory below the data root.
///
/// Publication uploads and then deletes `<root>/<product>`, so empty codes,
/// `.`/`..`, separators and drive prefixes are refused before any path is
/// built from them.
pub fn validate_product_code(product_code: &str) -> Result<(), ExtractError> {
    let valid = !product_code.trim().is_empty()
        && product_code != "."
        && product_code != ".."
        && !product_code.contains(['/', '\\', ':', '\0']);
    if valid {
        Ok(())
    } else {
        Err(ExtractError::InvalidConfig(format!(
            "invalid product code {product_code:?}: must be a single path segment"
        )))
    }
}

/// Extract the product code from a file name such as `100227-01-draft.epub`.
///
/// Only a code at the very start of the file name counts.
pub fn product_code_from_filename(path: impl AsRef<Path>) -> Option<String> {
    let name = path.as_ref().file_name()?.to_str()?;
    PRODUCT_CODE_RE
        .captures(name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_layout() {
        let layout = OutputLayout::new("/data");
        assert_eq!(
            layout.markdown_path("100227-01", SourceFormat::Pdf),
            PathBuf::from("/data/100227-01/pdf/100227-01.pdf.md")
        );
        assert_eq!(
            layout.markdown_path("100227-01", SourceFormat::Epub),
            PathBuf::from("/data/100227-01/epub/100227-01.epub.md")
        );
        assert_eq!(
            layout.structure_path("100227-01"),
            PathBuf::from("/data/100227-01/json/100227-01.structure.json")
        );
        assert_eq!(
            layout.images_dir("100227-01"),
            PathBuf::from("/data/100227-01/images")
        );
    }

    #[test]
    fn product_code_parsing() {
        assert_eq!(
            product_code_from_filename("/tmp/in/100227-01.pdf").as_deref(),
            Some("100227-01")
        );
        assert_eq!(
            product_code_from_filename("123456-78_final.epub").as_deref(),
            Some("123456-78")
        );
        assert_eq!(product_code_from_filename("book-100227-01.pdf"), None);
        assert_eq!(product_code_from_filename("12345-01.pdf"), None);
    }

    #[test]
    fn product_codes_must_be_one_segment() {
        for good in ["100227-01", "p", "book.v2"] {
            assert!(validate_product_code(good).is_ok(), "{good}");
        }
        for bad in ["", " ", ".", "..", "a/b", "../x", "/abs", "a\\b", "C:", "x\0y"] {
            assert!(
                matches!(validate_product_code(bad), Err(ExtractError::InvalidConfig(_))),
                "{bad:?}"
            );
        }
    }
}
