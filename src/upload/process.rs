//! Post-upload "start processing" notification.

use super::api::{IngestApi, ProcessRequest};
use super::error::{ApiError, UploadError};
use crate::auth::TokenSource;
use crate::retry::{self, RetryAction, RetryConfig};
use crate::types::UploadType;

pub const DEFAULT_PRIORITY: u8 = 4;

const ANALYSIS_TASKS: [&str; 6] = [
    "cog",
    "thumbnail",
    "metadata",
    "geotiff",
    "deadwood",
    "treecover",
];

/// Server-side stages for an upload kind. Raw image archives need a
/// photogrammetry reconstruction before anything else can run.
pub fn processing_tasks(upload_type: UploadType) -> Vec<String> {
    let mut tasks = Vec::with_capacity(ANALYSIS_TASKS.len() + 1);
    if upload_type == UploadType::RawImagesZip {
        tasks.push("odm_processing".to_string());
    }
    tasks.extend(ANALYSIS_TASKS.iter().map(|t| t.to_string()));
    tasks
}

/// Ask the server to start processing a freshly uploaded dataset.
///
/// Transient failures are retried. A final error never undoes the upload;
/// only an [`UploadError::Auth`] stops the batch.
pub async fn trigger_processing(
    api: &dyn IngestApi,
    tokens: &mut dyn TokenSource,
    dataset_id: u64,
    upload_type: UploadType,
    priority: u8,
    retry_config: &RetryConfig,
) -> Result<(), UploadError> {
    let token = tokens.valid_token().await.map_err(|source| UploadError::Auth {
        stage: "processing".into(),
        source,
    })?;
    let request = ProcessRequest {
        task_types: processing_tasks(upload_type),
        priority,
    };

    tracing::debug!(
        "Starting processing of dataset {}: {}",
        dataset_id,
        request.task_types.join(", ")
    );
    let what = format!("Processing request for dataset {}", dataset_id);
    retry::retry_with_backoff(
        retry_config,
        &what,
        |e: &ApiError| {
            if e.is_transient() {
                RetryAction::Retry
            } else {
                RetryAction::Abort
            }
        },
        || api.start_processing(&token, dataset_id, &request),
    )
    .await
    .map_err(|source| UploadError::Api {
        stage: "processing".into(),
        source,
    })
}
