//! Configuration types for extraction and publication.
//!
//! Extraction behaviour is controlled through [`ExtractConfig`], publication
//! behaviour through [`PublishConfig`]; both are built via builders that
//! validate on `build()`. Nothing here reads the environment: the binary maps
//! its flags and env vars onto these structs, and library callers pass them
//! explicitly into every entry point.

use crate::error::ExtractError;
use crate::layout::OutputLayout;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one EPUB or PDF extraction.
///
/// # Example
/// ```rust
/// use book_processor::ExtractConfig;
///
/// let config = ExtractConfig::builder()
///     .data_root("/srv/books/data")
///     .save(true)
///     .build()
///     .unwrap();
/// assert!(config.save);
/// ```
#[derive(Clone)]
pub struct ExtractConfig {
    /// Root of the per-product output tree. Default: `./data`.
    pub data_root: PathBuf,

    /// Public prefix written into Markdown image references.
    /// If None, uses `/books/<product_code>/images`.
    pub public_prefix: Option<String>,

    /// Persist artifacts under `data_root`. Default: false.
    ///
    /// When false, images and the Markdown file are written to a temporary
    /// directory that is removed before the call returns; only the in-memory
    /// Markdown survives.
    pub save: bool,

    /// Prepend `# <title>` and the author line when the document declares them. Default: true.
    pub include_metadata_header: bool,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-unit progress events (chapters or pages).
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            public_prefix: None,
            save: false,
            include_metadata_header: true,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractConfig")
            .field("data_root", &self.data_root)
            .field("public_prefix", &self.public_prefix)
            .field("save", &self.save)
            .field("include_metadata_header", &self.include_metadata_header)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractConfig {
    /// Create a new builder for `ExtractConfig`.
    pub fn builder() -> ExtractConfigBuilder {
        ExtractConfigBuilder {
            config: Self::default(),
        }
    }

    /// The output layout rooted at [`Self::data_root`].
    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(&self.data_root)
    }

    /// The image prefix used in Markdown for `product_code`.
    pub fn public_prefix_for(&self, product_code: &str) -> String {
        match &self.public_prefix {
            Some(prefix) => prefix.trim_end_matches('/').to_string(),
            None => OutputLayout::default_public_prefix(product_code),
        }
    }
}

/// Builder for [`ExtractConfig`].
#[derive(Debug)]
pub struct ExtractConfigBuilder {
    config: ExtractConfig,
}

impl ExtractConfigBuilder {
    pub fn data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.data_root = root.into();
        self
    }

    pub fn public_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.public_prefix = Some(prefix.into());
        self
    }

    pub fn save(mut self, v: bool) -> Self {
        self.config.save = v;
        self
    }

    pub fn include_metadata_header(mut self, v: bool) -> Self {
        self.config.include_metadata_header = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractConfig, ExtractError> {
        let c = &self.config;
        if c.data_root.as_os_str().is_empty() {
            return Err(ExtractError::InvalidConfig(
                "data_root must not be empty".into(),
            ));
        }
        if let Some(prefix) = &c.public_prefix {
            if prefix.trim().is_empty() {
                return Err(ExtractError::InvalidConfig(
                    "public_prefix must not be blank".into(),
                ));
            }
        }
        if c.download_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "download timeout must be ≥ 1s".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Configuration for the publication coordinator.
///
/// # Example
/// ```rust
/// use book_processor::PublishConfig;
/// use std::time::Duration;
///
/// let config = PublishConfig::builder()
///     .wait_timeout(Duration::from_secs(600))
///     .build()
///     .unwrap();
/// assert_eq!(config.poll_interval, Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Prefix of every key written to the status store. Default: `book-processor`.
    pub key_namespace: String,

    /// Expiry of the per-product file lock. Default: 1 hour.
    ///
    /// A crashed holder never releases its lock explicitly; the TTL bounds how
    /// long the product stays blocked afterwards.
    pub lock_ttl: Duration,

    /// Upper bound on waiting for sibling tasks when the lock is taken. Default: 1 hour.
    pub wait_timeout: Duration,

    /// Interval between status polls while waiting. Default: 1 second.
    pub poll_interval: Duration,

    /// Remote prefix every product directory is uploaded under. Default: `books`.
    pub remote_base_path: String,

    /// Skip publication entirely (no lock, no status writes, no upload). Default: false.
    pub local_mode: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            key_namespace: "book-processor".to_string(),
            lock_ttl: Duration::from_secs(3600),
            wait_timeout: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(1),
            remote_base_path: "books".to_string(),
            local_mode: false,
        }
    }
}

impl PublishConfig {
    /// Create a new builder for `PublishConfig`.
    pub fn builder() -> PublishConfigBuilder {
        PublishConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PublishConfig`].
#[derive(Debug)]
pub struct PublishConfigBuilder {
    config: PublishConfig,
}

impl PublishConfigBuilder {
    pub fn key_namespace(mut self, ns: impl Into<String>) -> Self {
        self.config.key_namespace = ns.into();
        self
    }

    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.config.lock_ttl = ttl;
        self
    }

    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.wait_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn remote_base_path(mut self, base: impl Into<String>) -> Self {
        self.config.remote_base_path = base.into();
        self
    }

    pub fn local_mode(mut self, v: bool) -> Self {
        self.config.local_mode = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PublishConfig, ExtractError> {
        let c = &self.config;
        if c.key_namespace.trim().is_empty() {
            return Err(ExtractError::InvalidConfig(
                "key namespace must not be empty".into(),
            ));
        }
        if c.poll_interval.is_zero() {
            return Err(ExtractError::InvalidConfig(
                "poll interval must be > 0".into(),
            ));
        }
        if c.lock_ttl.as_secs() == 0 {
            return Err(ExtractError::InvalidConfig(
                "lock TTL must be ≥ 1s".into(),
            ));
        }
        Ok(self.config)
    }
}
