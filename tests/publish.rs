//! Publication protocol tests on tokio's paused clock.
//!
//! Run with:
//!   cargo test --test publish

use async_trait::async_trait;
use book_processor::publish::{LocalObjectStore, MemoryStore, ObjectStore, StatusStore};
use book_processor::{
    extract_paginated, Coordinator, ExtractConfig, PageSource, PublishConfig, PublishError,
    PublishOutcome, TaskKind, TaskStatus,
};
use image::{DynamicImage, Rgba, RgbaImage};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// ── Test helpers ─────────────────────────────────────────────────────────────

const PRODUCT: &str = "100227-01";

/// Two pages; page 2 carries one embedded image.
struct TwoPages;

impl PageSource for TwoPages {
    fn page_count(&self) -> usize {
        2
    }

    fn page_text(&self, index: usize) -> Result<String, String> {
        Ok(format!("Text of page {}", index + 1))
    }

    fn page_images(&self, index: usize) -> Vec<Result<DynamicImage, String>> {
        if index == 1 {
            vec![Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                4,
                4,
                Rgba([10, 20, 30, 255]),
            )))]
        } else {
            Vec::new()
        }
    }
}

fn publish_config(wait_secs: u64) -> PublishConfig {
    PublishConfig::builder()
        .wait_timeout(Duration::from_secs(wait_secs))
        .poll_interval(Duration::from_secs(1))
        .build()
        .unwrap()
}

/// Rejects every upload.
struct RejectingStore;

#[async_trait]
impl ObjectStore for RejectingStore {
    async fn upload_directory(&self, _local_dir: &Path, _remote_dir: &str) -> bool {
        false
    }
}

fn product_with_markdown(root: &Path) -> std::path::PathBuf {
    let product_dir = root.join(PRODUCT);
    std::fs::create_dir_all(product_dir.join("epub")).unwrap();
    std::fs::write(product_dir.join("epub/100227-01.epub.md"), "# Book\n").unwrap();
    product_dir
}

fn coordinator(store: Arc<MemoryStore>, mirror: &Path, wait_secs: u64) -> Arc<Coordinator> {
    Arc::new(Coordinator::new(
        store,
        Arc::new(LocalObjectStore::new(mirror)),
        publish_config(wait_secs),
    ))
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn contended_publication_times_out_and_keeps_local_files() {
    let data = tempfile::tempdir().unwrap();
    let mirror = tempfile::tempdir().unwrap();

    // Extraction with save = true.
    let config = ExtractConfig::builder()
        .data_root(data.path())
        .save(true)
        .build()
        .unwrap();
    let output = extract_paginated(&TwoPages, Path::new("two-pages.pdf"), PRODUCT, &config).unwrap();

    assert!(output.markdown.contains("Text of page 1"));
    assert!(output.markdown.contains("Text of page 2"));
    assert_eq!(output.markdown.matches("![image](").count(), 1);
    assert!(output
        .markdown
        .contains("![image](/books/100227-01/images/page_2_img_1.png)"));
    assert_eq!(output.stats.rendered_units, 2);

    let product_dir = data.path().join(PRODUCT);
    let image = product_dir.join("images/page_2_img_1.png");
    let markdown = product_dir.join("pdf/100227-01.pdf.md");
    assert!(image.is_file());
    assert!(markdown.is_file());

    // Another worker already holds the product lock.
    let store = Arc::new(MemoryStore::new());
    let competitor = coordinator(store.clone(), mirror.path(), 30);
    assert!(competitor.lock(PRODUCT).await.unwrap());

    let publisher = coordinator(store.clone(), mirror.path(), 30);
    let started = Instant::now();
    let outcome = publisher.publish(PRODUCT, TaskKind::PdfToMd, &product_dir).await;

    assert!(
        matches!(outcome, PublishOutcome::Failed(PublishError::PublicationTimeout { .. })),
        "got {outcome:?}"
    );
    assert!(started.elapsed() >= Duration::from_secs(30));

    let record = publisher
        .get_status(PRODUCT, TaskKind::PdfToMd)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, TaskStatus::Fail);
    assert!(record.message.contains("Timed out"), "message: {}", record.message);

    // Local files intact, nothing uploaded, foreign lock untouched.
    assert!(image.is_file());
    assert!(markdown.is_file());
    assert_eq!(std::fs::read_dir(mirror.path()).unwrap().count(), 0);
    assert!(!publisher.lock(PRODUCT).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn waiting_publication_proceeds_once_sibling_finishes() {
    let data = tempfile::tempdir().unwrap();
    let mirror = tempfile::tempdir().unwrap();
    let product_dir = data.path().join(PRODUCT);
    std::fs::create_dir_all(product_dir.join("epub")).unwrap();
    std::fs::write(product_dir.join("epub/100227-01.epub.md"), "# Book\n").unwrap();

    let store = Arc::new(MemoryStore::new());
    let sibling = coordinator(store.clone(), mirror.path(), 60);
    assert!(sibling.lock(PRODUCT).await.unwrap());

    // The sibling finishes both tasks after 5 s and releases its lock.
    let finisher = sibling.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        finisher
            .set_status(PRODUCT, TaskKind::EpubToMd, TaskStatus::Success, "done")
            .await
            .unwrap();
        finisher
            .set_status(PRODUCT, TaskKind::MdToJsonStructure, TaskStatus::Success, "done")
            .await
            .unwrap();
        finisher.unlock(PRODUCT).await.unwrap();
    });

    let publisher = coordinator(store.clone(), mirror.path(), 60);
    let outcome = publisher
        .clone()
        .spawn_publication(PRODUCT.to_string(), TaskKind::EpubToMd, product_dir.clone())
        .await
        .unwrap();

    assert!(outcome.is_published(), "got {outcome:?}");
    assert!(!product_dir.exists());
    assert!(mirror
        .path()
        .join("books/100227-01/epub/100227-01.epub.md")
        .is_file());

    let record = publisher
        .get_status(PRODUCT, TaskKind::EpubToMd)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, TaskStatus::Success);
    assert!(publisher.lock(PRODUCT).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn wait_for_completion_observes_transition() {
    let store = Arc::new(MemoryStore::new());
    let c = coordinator(store, Path::new("/unused"), 60);
    let tasks = [TaskKind::PdfToMd, TaskKind::MdToJsonStructure];
    for task in tasks {
        c.set_status(PRODUCT, task, TaskStatus::Doing, "working")
            .await
            .unwrap();
    }

    let updater = c.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        updater
            .set_status(PRODUCT, TaskKind::PdfToMd, TaskStatus::Success, "ok")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        updater
            .set_status(PRODUCT, TaskKind::MdToJsonStructure, TaskStatus::Fail, "bad")
            .await
            .unwrap();
    });

    let started = Instant::now();
    assert!(c
        .wait_for_completion(PRODUCT, &tasks, Duration::from_secs(20))
        .await
        .unwrap());
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(5), "waited {waited:?}");
    assert!(waited <= Duration::from_secs(6), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn wait_for_completion_times_out() {
    let store = Arc::new(MemoryStore::new());
    let c = coordinator(store, Path::new("/unused"), 60);
    c.set_status(PRODUCT, TaskKind::PdfToMd, TaskStatus::Doing, "working")
        .await
        .unwrap();

    let started = Instant::now();
    assert!(!c
        .wait_for_completion(PRODUCT, &[TaskKind::PdfToMd], Duration::from_secs(4))
        .await
        .unwrap());
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(4), "waited {waited:?}");
    assert!(waited < Duration::from_secs(5), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn lock_then_lock_then_unlock() {
    let store = Arc::new(MemoryStore::new());
    let c = coordinator(store.clone(), Path::new("/unused"), 60);

    assert!(c.lock(PRODUCT).await.unwrap());
    assert!(!c.lock(PRODUCT).await.unwrap());
    c.unlock(PRODUCT).await.unwrap();
    assert!(c.lock(PRODUCT).await.unwrap());

    // The lock also frees itself after its TTL.
    assert!(!c.lock(PRODUCT).await.unwrap());
    tokio::time::advance(Duration::from_secs(3601)).await;
    assert!(c.lock(PRODUCT).await.unwrap());

    // The raw key is visible in the shared store.
    assert!(!store
        .set_if_absent(&c.lock_key(PRODUCT), "x", Duration::from_secs(1))
        .await
        .unwrap());
}

#[tokio::test(start_paused = true)]
async fn lock_released_early_is_taken_without_waiting_out_the_budget() {
    let data = tempfile::tempdir().unwrap();
    let mirror = tempfile::tempdir().unwrap();
    let product_dir = product_with_markdown(data.path());

    // The structuring worker holds the lock and finishes after 2 s.
    let store = Arc::new(MemoryStore::new());
    let structuring = coordinator(store.clone(), mirror.path(), 30);
    assert!(structuring.lock(PRODUCT).await.unwrap());
    let finisher = structuring.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        finisher
            .set_status(PRODUCT, TaskKind::MdToJsonStructure, TaskStatus::Success, "done")
            .await
            .unwrap();
        finisher.unlock(PRODUCT).await.unwrap();
    });

    let publisher = coordinator(store.clone(), mirror.path(), 30);
    let started = Instant::now();
    let outcome = publisher.publish(PRODUCT, TaskKind::EpubToMd, &product_dir).await;

    assert!(outcome.is_published(), "got {outcome:?}");
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(2), "waited {waited:?}");
    assert!(waited < Duration::from_secs(10), "waited {waited:?}");
    assert!(mirror
        .path()
        .join("books/100227-01/epub/100227-01.epub.md")
        .is_file());
    let record = publisher
        .get_status(PRODUCT, TaskKind::EpubToMd)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, TaskStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn finished_tasks_with_a_stuck_lock_report_lock_unavailable() {
    let data = tempfile::tempdir().unwrap();
    let mirror = tempfile::tempdir().unwrap();
    let product_dir = product_with_markdown(data.path());

    // A retry of the same job finishes both tasks after 1 s but never
    // releases its lock.
    let store = Arc::new(MemoryStore::new());
    let sibling = coordinator(store.clone(), mirror.path(), 10);
    assert!(sibling.lock(PRODUCT).await.unwrap());
    let finisher = sibling.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        for task in [TaskKind::EpubToMd, TaskKind::MdToJsonStructure] {
            finisher
                .set_status(PRODUCT, task, TaskStatus::Success, "done")
                .await
                .unwrap();
        }
    });

    let publisher = coordinator(store.clone(), mirror.path(), 10);
    let outcome = publisher.publish(PRODUCT, TaskKind::EpubToMd, &product_dir).await;

    assert!(
        matches!(outcome, PublishOutcome::Failed(PublishError::LockUnavailable { .. })),
        "got {outcome:?}"
    );
    assert!(product_dir.join("epub/100227-01.epub.md").is_file());
    // The sibling's lock is still in place.
    assert!(!publisher.lock(PRODUCT).await.unwrap());
}

#[tokio::test]
async fn failed_upload_keeps_files_marks_fail_and_releases_lock() {
    let data = tempfile::tempdir().unwrap();
    let product_dir = product_with_markdown(data.path());

    let store = Arc::new(MemoryStore::new());
    let publisher = Coordinator::new(store.clone(), Arc::new(RejectingStore), publish_config(5));
    let outcome = publisher.publish(PRODUCT, TaskKind::EpubToMd, &product_dir).await;

    assert!(
        matches!(outcome, PublishOutcome::Failed(PublishError::UploadFailure { .. })),
        "got {outcome:?}"
    );
    assert_eq!(
        std::fs::read_to_string(product_dir.join("epub/100227-01.epub.md")).unwrap(),
        "# Book\n"
    );

    let record = publisher
        .get_status(PRODUCT, TaskKind::EpubToMd)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, TaskStatus::Fail);
    assert!(record.message.contains("local files preserved"), "message: {}", record.message);

    assert!(publisher.lock(PRODUCT).await.unwrap());
}
