//! Batch coordinator: fingerprinting, resume, duplicate detection and the
//! sequential upload loop.
//!
//! Work is split in two phases so a dry run (or a batch with nothing left to
//! do) never needs credentials:
//! 1. [`BatchCoordinator::plan`] loads or creates the checkpoint, fingerprints
//!    candidates, drops files already completed or skipped, and marks
//!    in-batch duplicates.
//! 2. [`BatchCoordinator::execute`] uploads the remaining files one at a time,
//!    persisting the checkpoint after every terminal outcome.

pub mod report;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::auth::TokenSource;
use crate::checkpoint::{CheckpointStore, SessionCheckpoint};
use crate::discover::UploadItem;
use crate::fingerprint::{self, FileIdentity};
use crate::retry::RetryConfig;
use crate::upload::{self, ChunkedUploader, IngestApi, UploadError};

pub use report::{BatchReporter, ConsoleReporter};

/// Subset of application config consumed by the coordinator.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub directory: std::path::PathBuf,
    pub metadata_file: Option<String>,
    pub api_url: String,
    pub chunk_size: u64,
    pub retry: RetryConfig,
    pub priority: u8,
    pub dry_run: bool,
}

/// Terminal result of one file in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Uploaded { dataset_id: u64 },
    Failed { error: String },
}

/// What a run will do, computed before anything is sent.
#[derive(Debug)]
pub struct BatchPlan {
    pub checkpoint: SessionCheckpoint,
    pub to_upload: Vec<UploadItem>,
    pub already_completed: Vec<String>,
    pub previously_skipped: Vec<String>,
    /// `(duplicate, first file with the same fingerprint)`
    pub duplicates: Vec<(String, String)>,
}

impl BatchPlan {
    pub fn total_bytes(&self) -> u64 {
        self.to_upload.iter().map(|i| i.file.size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.to_upload.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub uploaded: Vec<(String, u64)>,
    pub failed: Vec<(String, String)>,
    pub skipped: usize,
    pub pending: usize,
    pub elapsed: Duration,
    pub interrupted: bool,
    /// Set when an authentication failure stopped the batch.
    pub halted: Option<String>,
}

pub struct BatchCoordinator<'a> {
    api: &'a dyn IngestApi,
    config: &'a BatchConfig,
    reporter: &'a dyn BatchReporter,
    store: CheckpointStore,
    shutdown: CancellationToken,
}

impl<'a> BatchCoordinator<'a> {
    pub fn new(
        api: &'a dyn IngestApi,
        config: &'a BatchConfig,
        reporter: &'a dyn BatchReporter,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            api,
            config,
            reporter,
            store: CheckpointStore::for_directory(&config.directory),
            shutdown,
        }
    }

    async fn persist(&self, checkpoint: &SessionCheckpoint) {
        if self.config.dry_run {
            return;
        }
        if let Err(e) = self.store.save(checkpoint).await {
            tracing::error!("Failed to save checkpoint: {}", e);
        }
    }

    /// Fingerprint, filter and deduplicate `items` against the directory's
    /// checkpoint. `items` must be in a stable order (discovery sorts them).
    pub async fn plan(&self, items: Vec<UploadItem>) -> Result<BatchPlan, UploadError> {
        let mut checkpoint = self
            .store
            .load_or_create(
                &self.config.directory,
                self.config.metadata_file.clone(),
                &self.config.api_url,
            )
            .await;
        checkpoint.set_total(items.len());

        for item in &items {
            if checkpoint.cached_hash(item.filename()).is_some() {
                continue;
            }
            if self.shutdown.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            match fingerprint::fingerprint_async(item.file.path.clone()).await {
                Ok(identity) => {
                    tracing::debug!("{} fingerprint {}", item.filename(), identity.short());
                    checkpoint.record_hash(item.filename(), identity);
                }
                Err(e) => self.reporter.warn(&format!(
                    "Could not fingerprint {}, duplicate check skipped for it: {}",
                    item.filename(),
                    e
                )),
            }
        }

        // Completed files take part in duplicate detection as originals.
        let mut first_seen: HashMap<FileIdentity, String> = HashMap::new();
        for name in &checkpoint.files_completed {
            if let Some(hash) = checkpoint.cached_hash(name) {
                first_seen.entry(hash.clone()).or_insert_with(|| name.clone());
            }
        }

        let mut to_upload = Vec::new();
        let mut already_completed = Vec::new();
        let mut previously_skipped = Vec::new();
        let mut duplicates = Vec::new();

        for item in items {
            let name = item.filename().to_string();
            if checkpoint.is_completed(&name) {
                already_completed.push(name);
                continue;
            }
            if !checkpoint.should_process(&name) {
                previously_skipped.push(name);
                continue;
            }
            if let Some(hash) = checkpoint.cached_hash(&name).cloned() {
                if let Some(original) = first_seen.get(&hash) {
                    let reason = format!("duplicate of {}", original);
                    self.reporter.duplicate(&name, original);
                    checkpoint.mark_skipped(&name, &reason);
                    duplicates.push((name, original.clone()));
                    continue;
                }
                first_seen.insert(hash, name);
            }
            to_upload.push(item);
        }

        self.persist(&checkpoint).await;
        Ok(BatchPlan {
            checkpoint,
            to_upload,
            already_completed,
            previously_skipped,
            duplicates,
        })
    }

    /// Upload every planned file, strictly one after another.
    ///
    /// Per-file failures are recorded and the batch moves on. An
    /// authentication failure stops the batch; a shutdown request stops it
    /// before the next file (or chunk) and leaves the current file pending.
    pub async fn execute(&self, plan: BatchPlan, tokens: &mut dyn TokenSource) -> BatchSummary {
        let started = Instant::now();
        let BatchPlan {
            mut checkpoint,
            to_upload,
            duplicates,
            ..
        } = plan;
        let mut summary = BatchSummary {
            skipped: duplicates.len(),
            ..BatchSummary::default()
        };

        let uploader = ChunkedUploader::new(
            self.api,
            self.config.chunk_size,
            self.config.retry,
            self.shutdown.clone(),
        );
        let total = to_upload.len();

        for (i, item) in to_upload.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                summary.interrupted = true;
                break;
            }
            let filename = item.filename();
            self.reporter.file_started(i + 1, total, item);

            let reporter = self.reporter;
            let result = uploader
                .transfer(item, tokens, &|sent| reporter.bytes_sent(sent))
                .await;

            let outcome = match result {
                Ok(dataset_id) => {
                    checkpoint.mark_completed(filename, dataset_id);
                    TransferOutcome::Uploaded { dataset_id }
                }
                Err(UploadError::Cancelled) => {
                    summary.interrupted = true;
                    self.reporter.warn(&format!(
                        "Upload of {} interrupted; it will be retried on the next run",
                        filename
                    ));
                    break;
                }
                Err(e) => {
                    let error = e.to_string();
                    checkpoint.mark_failed(filename, &error);
                    if e.is_fatal() {
                        summary.halted = Some(format!("{}: {}", filename, error));
                    }
                    TransferOutcome::Failed { error }
                }
            };
            self.persist(&checkpoint).await;
            self.reporter.file_finished(filename, &outcome);

            match outcome {
                TransferOutcome::Uploaded { dataset_id } => {
                    summary.uploaded.push((filename.to_string(), dataset_id));
                    if let Err(e) = upload::trigger_processing(
                        self.api,
                        tokens,
                        dataset_id,
                        item.file.upload_type,
                        self.config.priority,
                        &self.config.retry,
                    )
                    .await
                    {
                        self.reporter.warn(&format!(
                            "{} uploaded as dataset {}, but processing could not be started: {}",
                            filename, dataset_id, e
                        ));
                        // The upload stands; a dead credential still stops the batch.
                        if e.is_fatal() {
                            summary.halted = Some(format!("{}: {}", filename, e));
                            break;
                        }
                    }
                }
                TransferOutcome::Failed { error } => {
                    summary.failed.push((filename.to_string(), error));
                    if summary.halted.is_some() {
                        break;
                    }
                }
            }
        }

        if checkpoint.is_fully_completed() {
            match self.store.remove().await {
                Ok(_) => tracing::debug!(
                    "Session {} complete, checkpoint removed",
                    checkpoint.session_id
                ),
                Err(e) => tracing::warn!("Could not remove checkpoint: {}", e),
            }
        }

        summary.pending = checkpoint.counts().pending;
        summary.elapsed = started.elapsed();
        summary
    }
}
