//! Lock, status and wait primitives plus the publication protocol.

use crate::config::PublishConfig;
use crate::error::{PublishError, StoreError};
use crate::layout::validate_product_code;
use crate::publish::remote::ObjectStore;
use crate::publish::store::StatusStore;
use crate::publish::{TaskKind, TaskRecord, TaskStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How a [`Coordinator::publish`] call ended.
#[derive(Debug)]
pub enum PublishOutcome {
    /// Uploaded; the task is marked `success`.
    Published,
    /// Publication is disabled (`local_mode`); nothing was touched.
    Skipped,
    /// The task is marked `fail` with this error's message.
    Failed(PublishError),
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published)
    }
}

/// Per-product coordination over a [`StatusStore`] and an [`ObjectStore`].
pub struct Coordinator {
    store: Arc<dyn StatusStore>,
    objects: Arc<dyn ObjectStore>,
    config: PublishConfig,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn StatusStore>,
        objects: Arc<dyn ObjectStore>,
        config: PublishConfig,
    ) -> Self {
        Self {
            store,
            objects,
            config,
        }
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    /// `<ns>::<product>::file-lock`
    pub fn lock_key(&self, product_code: &str) -> String {
        format!("{}::{}::file-lock", self.config.key_namespace, product_code)
    }

    /// `<ns>::<product>::<task>`
    pub fn task_key(&self, product_code: &str, task: TaskKind) -> String {
        format!("{}::{}::{}", self.config.key_namespace, product_code, task)
    }

    // ── Primitives ───────────────────────────────────────────────────────────

    /// Try to take the product lock. Never blocks.
    pub async fn lock(&self, product_code: &str) -> Result<bool, StoreError> {
        let acquired = self
            .store
            .set_if_absent(&self.lock_key(product_code), "1", self.config.lock_ttl)
            .await?;
        debug!("Lock {} for {}: {}", self.lock_key(product_code), product_code, acquired);
        Ok(acquired)
    }

    /// Release the product lock. Idempotent.
    pub async fn unlock(&self, product_code: &str) -> Result<(), StoreError> {
        self.store.delete(&self.lock_key(product_code)).await
    }

    /// Overwrite the record of `(product, task)`.
    pub async fn set_status(
        &self,
        product_code: &str,
        task: TaskKind,
        status: TaskStatus,
        message: &str,
    ) -> Result<(), StoreError> {
        let record = TaskRecord::new(status, message);
        self.store
            .hash_set(&self.task_key(product_code, task), &record.to_fields())
            .await?;
        info!("Task {} of {} → {}: {}", task, product_code, status, message);
        Ok(())
    }

    pub async fn get_status(
        &self,
        product_code: &str,
        task: TaskKind,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let key = self.task_key(product_code, task);
        let fields = self.store.hash_get_all(&key).await?;
        TaskRecord::from_fields(&key, &fields)
    }

    /// Poll until every task in `tasks` is terminal or `timeout` elapses.
    ///
    /// A task with no record yet counts as not terminal. Returns `Ok(true)`
    /// on completion, `Ok(false)` on timeout.
    pub async fn wait_for_completion(
        &self,
        product_code: &str,
        tasks: &[TaskKind],
        timeout: Duration,
    ) -> Result<bool, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.all_terminal(product_code, tasks).await? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    async fn all_terminal(&self, product_code: &str, tasks: &[TaskKind]) -> Result<bool, StoreError> {
        for task in tasks {
            match self.get_status(product_code, *task).await? {
                Some(record) if record.status.is_terminal() => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    // ── Protocol ─────────────────────────────────────────────────────────────

    /// Publish `product_dir` for `task` of `product_code`.
    ///
    /// Uploads to `<remote_base_path>/<product_code>` and deletes the local
    /// directory only after a successful upload. On lock contention, keeps
    /// retrying the lock for up to `wait_timeout`. A product code that is not
    /// a single path segment is refused before anything is touched.
    pub async fn publish(
        &self,
        product_code: &str,
        task: TaskKind,
        product_dir: &Path,
    ) -> PublishOutcome {
        if self.config.local_mode {
            debug!("Local mode: not publishing {}", product_code);
            return PublishOutcome::Skipped;
        }

        if validate_product_code(product_code).is_err() {
            let err = PublishError::InvalidProductCode {
                product_code: product_code.to_string(),
            };
            warn!("{}", err);
            return PublishOutcome::Failed(err);
        }

        if let Err(e) = self
            .set_status(product_code, task, TaskStatus::Doing, "publishing")
            .await
        {
            return self.fail(product_code, task, e.into()).await;
        }

        if !tokio::fs::metadata(product_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            let err = PublishError::MissingOutput {
                path: product_dir.to_path_buf(),
            };
            return self.fail(product_code, task, err).await;
        }

        if let Err(err) = self.acquire(product_code, task).await {
            return self.fail(product_code, task, err).await;
        }

        // Lock held from here on; it is released before returning.
        let result = self.upload_and_purge(product_code, product_dir).await;
        let outcome = match result {
            Ok(()) => {
                self.finish(product_code, task, TaskStatus::Success, "published")
                    .await;
                PublishOutcome::Published
            }
            Err(err) => self.fail(product_code, task, err).await,
        };

        if let Err(e) = self.unlock(product_code).await {
            error!("Failed to release lock for {}: {}", product_code, e);
        }
        outcome
    }

    /// Run [`Coordinator::publish`] on a detached task.
    pub fn spawn_publication(
        self: Arc<Self>,
        product_code: String,
        task: TaskKind,
        product_dir: PathBuf,
    ) -> JoinHandle<PublishOutcome> {
        tokio::spawn(async move { self.publish(&product_code, task, &product_dir).await })
    }

    /// Take the lock, polling it while another worker holds it.
    ///
    /// The lock is retried on every poll tick, so a holder that releases it
    /// early is noticed at once. When the wait budget runs out the error tells
    /// the two stalls apart: awaited tasks still running (`PublicationTimeout`)
    /// or all of them terminal with the lock still taken (`LockUnavailable`).
    async fn acquire(&self, product_code: &str, task: TaskKind) -> Result<(), PublishError> {
        if self.lock(product_code).await? {
            return Ok(());
        }

        let budget = self.config.wait_timeout;
        let deadline = Instant::now() + budget;
        let siblings = sibling_tasks(task);
        info!(
            "Lock for {} is held; waiting up to {}s for {:?}",
            product_code,
            budget.as_secs(),
            siblings
        );

        loop {
            let now = Instant::now();
            if now >= deadline {
                if self.all_terminal(product_code, &siblings).await? {
                    return Err(PublishError::LockUnavailable {
                        product_code: product_code.to_string(),
                    });
                }
                return Err(PublishError::PublicationTimeout {
                    product_code: product_code.to_string(),
                    task_kinds: siblings.iter().map(|t| t.to_string()).collect(),
                    secs: budget.as_secs(),
                });
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
            if self.lock(product_code).await? {
                debug!("Lock for {} acquired after waiting", product_code);
                return Ok(());
            }
        }
    }

    async fn upload_and_purge(
        &self,
        product_code: &str,
        product_dir: &Path,
    ) -> Result<(), PublishError> {
        let remote_dir = format!(
            "{}/{}",
            self.config.remote_base_path.trim_end_matches('/'),
            product_code
        );
        if !self.objects.upload_directory(product_dir, &remote_dir).await {
            return Err(PublishError::UploadFailure {
                path: product_dir.to_path_buf(),
            });
        }
        if !self.objects.delete_local(product_dir).await {
            warn!(
                "Uploaded {} but could not delete {}",
                product_code,
                product_dir.display()
            );
        }
        Ok(())
    }

    async fn fail(&self, product_code: &str, task: TaskKind, err: PublishError) -> PublishOutcome {
        warn!("Publication of {} ({}) failed: {}", product_code, task, err);
        self.finish(product_code, task, TaskStatus::Fail, &err.to_string())
            .await;
        PublishOutcome::Failed(err)
    }

    /// Terminal status write; errors can only be logged at this point.
    async fn finish(&self, product_code: &str, task: TaskKind, status: TaskStatus, message: &str) {
        if let Err(e) = self.set_status(product_code, task, status, message).await {
            error!(
                "Failed to record {} for {} ({}): {}",
                status, product_code, task, e
            );
        }
    }
}

/// Tasks whose completion is awaited while the product lock is busy.
fn sibling_tasks(task: TaskKind) -> Vec<TaskKind> {
    if task == TaskKind::MdToJsonStructure {
        vec![task]
    } else {
        vec![task, TaskKind::MdToJsonStructure]
    }
}
