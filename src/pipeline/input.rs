//! Input resolution: normalise a user-supplied path or URL to a local file.
//!
//! ## Why download to a temp file?
//!
//! pdfium requires a file-system path, and the EPUB reader wants a seekable
//! file. Downloading to a `TempDir` gives both readers a path while ensuring
//! cleanup happens automatically when `ResolvedInput` is dropped, even if
//! the process panics. The magic bytes are validated before returning so
//! callers get a meaningful error rather than a parser failure deep inside
//! pdfium or the zip reader.

use crate::error::ExtractError;
use crate::layout::SourceFormat;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// The resolved input — either a local path or a downloaded temp file.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; the document was downloaded to a temp directory.
    /// The `TempDir` is kept alive to prevent cleanup until processing completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the document regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Leading bytes every file of `format` starts with.
pub fn magic_bytes(format: SourceFormat) -> &'static [u8; 4] {
    match format {
        SourceFormat::Pdf => b"%PDF",
        SourceFormat::Epub => b"PK\x03\x04",
    }
}

fn format_label(format: SourceFormat) -> &'static str {
    match format {
        SourceFormat::Pdf => "PDF",
        SourceFormat::Epub => "EPUB archive",
    }
}

/// Identify a document by its leading bytes.
pub fn detect_format(bytes: &[u8]) -> Option<SourceFormat> {
    [SourceFormat::Pdf, SourceFormat::Epub]
        .into_iter()
        .find(|f| bytes.starts_with(magic_bytes(*f)))
}

fn check_magic(path: &Path, bytes: &[u8], format: SourceFormat) -> Result<(), ExtractError> {
    if bytes.starts_with(magic_bytes(format)) {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = bytes.len().min(4);
    magic[..n].copy_from_slice(&bytes[..n]);
    Err(ExtractError::UnsupportedInput {
        path: path.to_path_buf(),
        expected: format_label(format),
        magic,
    })
}

/// Resolve the input string to a local file of the expected format.
///
/// If the input is a URL, download it to a temporary directory.
/// If the input is a local file, validate it exists and is readable.
pub async fn resolve_input(
    input: &str,
    format: SourceFormat,
    timeout_secs: u64,
) -> Result<ResolvedInput, ExtractError> {
    if is_url(input) {
        download_url(input, format, timeout_secs).await
    } else {
        resolve_local(input, format)
    }
}

/// Resolve a local file path, validating existence and magic bytes.
fn resolve_local(path_str: &str, format: SourceFormat) -> Result<ResolvedInput, ExtractError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(ExtractError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            use std::io::Read;
            let mut magic = [0u8; 4];
            let n = f.read(&mut magic).unwrap_or(0);
            check_magic(&path, &magic[..n], format)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ExtractError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(ExtractError::FileNotFound { path });
        }
    }

    debug!("Resolved local {}: {}", format.as_str(), path.display());
    Ok(ResolvedInput::Local(path))
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(
    url: &str,
    format: SourceFormat,
    timeout_secs: u64,
) -> Result<ResolvedInput, ExtractError> {
    info!("Downloading {} from: {}", format.as_str(), url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ExtractError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ExtractError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = filename_from_url(url, format);

    let temp_dir = TempDir::new().map_err(|e| ExtractError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    check_magic(&file_path, &bytes, format)?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| ExtractError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// The last URL path segment if it looks like a file name.
///
/// The product code is usually part of that name, so keeping it lets
/// [`crate::layout::product_code_from_filename`] work on downloads too.
pub fn filename_from_url(url: &str, format: SourceFormat) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                let decoded = percent_encoding::percent_decode_str(last).decode_utf8_lossy();
                if !decoded.is_empty() && decoded.contains('.') {
                    return decoded.into_owned();
                }
            }
        }
    }

    format!("downloaded.{}", format.as_str())
}
