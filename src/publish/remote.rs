//! Remote object stores a product directory is published to.
//!
//! The contract is deliberately coarse: upload a directory recursively,
//! preserving relative paths under a remote prefix, and delete a local
//! directory. Both answer with one aggregate boolean; per-file failures are
//! logged, not returned.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Destination for finished product directories.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload every file under `local_dir` to `<remote_dir>/<relative path>`.
    /// True only if every file was stored.
    async fn upload_directory(&self, local_dir: &Path, remote_dir: &str) -> bool;

    /// Remove `path` and everything below it.
    async fn delete_local(&self, path: &Path) -> bool {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {
                info!("Deleted local directory {}", path.display());
                true
            }
            Err(e) => {
                warn!("Failed to delete {}: {}", path.display(), e);
                false
            }
        }
    }
}

/// Files under `dir` with their `/`-separated relative paths, sorted.
///
/// Any walk error, and any entry that is neither a directory nor a regular
/// file (symlinks included), fails the whole listing: an upload that skipped
/// something must never be followed by deleting the directory.
pub fn list_files(dir: &Path) -> io::Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", entry.path().display()),
            ));
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((entry.path().to_path_buf(), key));
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

async fn list_files_async(dir: &Path) -> Option<Vec<(PathBuf, String)>> {
    if !tokio::fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false) {
        warn!("Upload source {} is not a directory", dir.display());
        return None;
    }
    let owned = dir.to_path_buf();
    match tokio::task::spawn_blocking(move || list_files(&owned)).await {
        Ok(Ok(files)) => Some(files),
        Ok(Err(e)) => {
            warn!("Cannot list {}: {}", dir.display(), e);
            None
        }
        Err(e) => {
            warn!("Listing {} panicked: {}", dir.display(), e);
            None
        }
    }
}

/// `/`-joined object key with empty segments dropped.
pub fn object_key(remote_dir: &str, relative: &str) -> String {
    remote_dir
        .split('/')
        .chain(relative.split('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

// ── HTTP ─────────────────────────────────────────────────────────────────────

const KEY_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// S3-style store: one `PUT <endpoint>/<bucket>/<key>` per file.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
    concurrency: usize,
}

impl HttpObjectStore {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into().trim_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            concurrency: 8,
        })
    }

    /// Maximum concurrent uploads. Default: 8.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// URL an object key is uploaded to.
    pub fn object_url(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|s| utf8_percent_encode(s, KEY_SEGMENT).to_string())
            .collect();
        format!("{}/{}/{}", self.endpoint, self.bucket, encoded.join("/"))
    }

    async fn put_file(&self, path: PathBuf, key: String) -> bool {
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                return false;
            }
        };
        let mut request = self.client.put(self.object_url(&key)).body(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("Uploaded {}", key);
                true
            }
            Ok(resp) => {
                warn!("Upload of {} rejected: HTTP {}", key, resp.status());
                false
            }
            Err(e) => {
                warn!("Upload of {} failed: {}", key, e);
                false
            }
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload_directory(&self, local_dir: &Path, remote_dir: &str) -> bool {
        let Some(files) = list_files_async(local_dir).await else {
            return false;
        };
        let total = files.len();
        info!("Uploading {} files from {} to {}", total, local_dir.display(), remote_dir);

        let results: Vec<bool> = stream::iter(files.into_iter().map(|(path, relative)| {
            self.put_file(path, object_key(remote_dir, &relative))
        }))
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        let failed = results.iter().filter(|ok| !**ok).count();
        if failed > 0 {
            warn!("{} of {} uploads failed", failed, total);
        }
        failed == 0
    }
}

// ── Local mirror ─────────────────────────────────────────────────────────────

/// Mirrors uploads into a local directory. Useful for staging and tests.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload_directory(&self, local_dir: &Path, remote_dir: &str) -> bool {
        let Some(files) = list_files_async(local_dir).await else {
            return false;
        };
        for (path, relative) in files {
            let target = self.root.join(object_key(remote_dir, &relative));
            if let Some(parent) = target.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    warn!("Cannot create {}: {}", parent.display(), e);
                    return false;
                }
            }
            if let Err(e) = tokio::fs::copy(&path, &target).await {
                warn!("Cannot copy {} to {}: {}", path.display(), target.display(), e);
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_drop_empty_segments() {
        assert_eq!(object_key("books/100227-01/", "images/a.png"), "books/100227-01/images/a.png");
        assert_eq!(object_key("", "a.md"), "a.md");
    }

    #[test]
    fn object_urls_are_encoded_per_segment() {
        let store = HttpObjectStore::new("https://oss.example.com/", "/bucket/", None).unwrap();
        assert_eq!(
            store.object_url("books/x/my file#1.png"),
            "https://oss.example.com/bucket/books/x/my%20file%231.png"
        );
    }

    #[test]
    fn listing_is_relative_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images/b.png"), b"b").unwrap();
        std::fs::write(dir.path().join("a.md"), b"a").unwrap();

        let keys: Vec<String> = list_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|(_, k)| k)
            .collect();
        assert_eq!(keys, vec!["a.md", "images/b.png"]);
    }

    #[test]
    fn listing_a_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_files(&dir.path().join("gone")).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_fail_the_upload_and_keep_local_files() {
        let src = tempfile::tempdir().unwrap();
        let product = src.path().join("100227-01");
        std::fs::create_dir_all(&product).unwrap();
        std::fs::write(product.join("a.md"), b"a").unwrap();
        std::os::unix::fs::symlink(product.join("a.md"), product.join("link.md")).unwrap();

        let err = list_files(&product).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let dst = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dst.path());
        assert!(!store.upload_directory(&product, "books/100227-01").await);
        assert!(product.join("a.md").is_file());
    }

    #[tokio::test]
    async fn local_store_mirrors_and_deletes() {
        let src = tempfile::tempdir().unwrap();
        let product = src.path().join("100227-01");
        std::fs::create_dir_all(product.join("images")).unwrap();
        std::fs::write(product.join("images/p.png"), b"png").unwrap();

        let dst = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dst.path());
        assert!(store.upload_directory(&product, "books/100227-01").await);
        assert_eq!(
            std::fs::read(dst.path().join("books/100227-01/images/p.png")).unwrap(),
            b"png"
        );

        assert!(store.delete_local(&product).await);
        assert!(!product.exists());
        assert!(!store.delete_local(&product).await);
        assert!(!store.upload_directory(&product, "x").await);
    }
}
