//! The in-memory checkpoint record and its bookkeeping rules.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fingerprint::FileIdentity;

/// Per-directory batch progress.
///
/// `files_completed`, `files_failed` and `files_skipped` are kept pairwise
/// disjoint by the `mark_*` methods. Completed is terminal within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCheckpoint {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub data_directory: PathBuf,
    #[serde(default)]
    pub metadata_file: Option<String>,
    pub api_url: String,
    #[serde(default)]
    pub files_total: usize,
    #[serde(default)]
    pub files_completed: Vec<String>,
    #[serde(default)]
    pub files_failed: BTreeMap<String, String>,
    #[serde(default)]
    pub files_skipped: BTreeMap<String, String>,
    #[serde(default)]
    pub file_hashes: BTreeMap<String, FileIdentity>,
    #[serde(default)]
    pub dataset_ids: BTreeMap<String, u64>,
}

/// Snapshot of the checkpoint counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointCounts {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
}

impl SessionCheckpoint {
    /// Fresh record with a short random session id.
    pub fn create(data_directory: &Path, metadata_file: Option<String>, api_url: &str) -> Self {
        let mut session_id = Uuid::new_v4().simple().to_string();
        session_id.truncate(8);
        Self {
            session_id,
            created_at: Utc::now(),
            data_directory: data_directory.to_path_buf(),
            metadata_file,
            api_url: api_url.to_string(),
            files_total: 0,
            files_completed: Vec::new(),
            files_failed: BTreeMap::new(),
            files_skipped: BTreeMap::new(),
            file_hashes: BTreeMap::new(),
            dataset_ids: BTreeMap::new(),
        }
    }

    pub fn is_completed(&self, filename: &str) -> bool {
        self.files_completed.iter().any(|f| f == filename)
    }

    pub fn mark_completed(&mut self, filename: &str, dataset_id: u64) {
        self.files_failed.remove(filename);
        self.files_skipped.remove(filename);
        if !self.is_completed(filename) {
            self.files_completed.push(filename.to_string());
        }
        self.dataset_ids.insert(filename.to_string(), dataset_id);
    }

    /// Record a failure; a later attempt overwrites the message.
    pub fn mark_failed(&mut self, filename: &str, error: &str) {
        if self.is_completed(filename) {
            tracing::debug!("Ignoring failure for already completed {}", filename);
            return;
        }
        self.files_skipped.remove(filename);
        self.files_failed
            .insert(filename.to_string(), error.to_string());
    }

    pub fn mark_skipped(&mut self, filename: &str, reason: &str) {
        if self.is_completed(filename) {
            tracing::debug!("Ignoring skip for already completed {}", filename);
            return;
        }
        self.files_failed.remove(filename);
        self.files_skipped
            .insert(filename.to_string(), reason.to_string());
    }

    /// Failed files stay eligible; completed and skipped ones do not.
    pub fn should_process(&self, filename: &str) -> bool {
        !self.is_completed(filename) && !self.files_skipped.contains_key(filename)
    }

    pub fn cached_hash(&self, filename: &str) -> Option<&FileIdentity> {
        self.file_hashes.get(filename)
    }

    pub fn record_hash(&mut self, filename: &str, identity: FileIdentity) {
        self.file_hashes.insert(filename.to_string(), identity);
    }

    /// Set the number of tracked files. Never drops below the number of
    /// files that already have an outcome.
    pub fn set_total(&mut self, candidates: usize) {
        self.files_total = candidates.max(self.outcomes());
    }

    fn outcomes(&self) -> usize {
        self.files_completed.len() + self.files_failed.len() + self.files_skipped.len()
    }

    pub fn counts(&self) -> CheckpointCounts {
        CheckpointCounts {
            total: self.files_total,
            completed: self.files_completed.len(),
            failed: self.files_failed.len(),
            skipped: self.files_skipped.len(),
            pending: self.files_total.saturating_sub(self.outcomes()),
        }
    }

    /// Every tracked file has been uploaded.
    pub fn is_fully_completed(&self) -> bool {
        self.files_total > 0
            && self.files_completed.len() >= self.files_total
            && self.files_failed.is_empty()
            && self.files_skipped.is_empty()
    }
}
