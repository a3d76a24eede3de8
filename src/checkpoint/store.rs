//! On-disk persistence for [`SessionCheckpoint`].

use std::path::{Path, PathBuf};

use tokio::fs;

use super::error::CheckpointError;
use super::record::SessionCheckpoint;

/// Fixed name of the checkpoint inside the data directory.
pub const CHECKPOINT_FILENAME: &str = ".upload-session.json";

/// Location of one directory's checkpoint.
///
/// Single writer: concurrent runs against the same directory are not
/// supported and nothing here locks the file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn for_directory(dir: &Path) -> Self {
        Self {
            path: dir.join(CHECKPOINT_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    /// Read the checkpoint, distinguishing "absent" from "unreadable".
    pub async fn try_load(&self) -> Result<Option<SessionCheckpoint>, CheckpointError> {
        let bytes = match fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::io(&self.path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| CheckpointError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    /// Read the checkpoint; an unreadable one is treated as absent.
    pub async fn load(&self) -> Option<SessionCheckpoint> {
        match self.try_load().await {
            Ok(cp) => cp,
            Err(e) => {
                tracing::warn!("{}; starting a fresh session", e);
                None
            }
        }
    }

    /// Resume an incomplete checkpoint, or start a new one.
    pub async fn load_or_create(
        &self,
        data_directory: &Path,
        metadata_file: Option<String>,
        api_url: &str,
    ) -> SessionCheckpoint {
        match self.load().await {
            Some(cp) if !cp.is_fully_completed() => {
                if cp.api_url != api_url {
                    tracing::warn!(
                        "Resuming session {} created for {} against {}",
                        cp.session_id,
                        cp.api_url,
                        api_url
                    );
                }
                let c = cp.counts();
                tracing::info!(
                    "Resuming session {} ({} completed, {} failed, {} skipped)",
                    cp.session_id,
                    c.completed,
                    c.failed,
                    c.skipped
                );
                cp
            }
            _ => {
                let cp = SessionCheckpoint::create(data_directory, metadata_file, api_url);
                tracing::debug!("Created session {}", cp.session_id);
                cp
            }
        }
    }

    /// Rewrite the whole record atomically: write a sibling temp file, then
    /// rename it over the checkpoint.
    pub async fn save(&self, checkpoint: &SessionCheckpoint) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(checkpoint)?;
        let tmp = self.temp_path();
        fs::write(&tmp, &json)
            .await
            .map_err(|e| CheckpointError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| CheckpointError::io(&self.path, e))?;
        Ok(())
    }

    /// Delete the checkpoint. Returns `false` if there was none.
    pub async fn remove(&self) -> Result<bool, CheckpointError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CheckpointError::io(&self.path, e)),
        }
    }
}
