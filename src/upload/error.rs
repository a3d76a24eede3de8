use thiserror::Error;

use crate::auth::error::AuthError;

/// Failure of a single request to the ingestion API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Timeout, refused connection, reset mid-body.
    #[error("connection error: {0}")]
    Transport(String),

    /// The bearer token was not accepted.
    #[error("authentication rejected (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    /// A 2xx response whose body we could not use.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Transport errors and rejected statuses are retried up to the attempt
    /// budget. Auth rejections go through the refresh path instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { .. } => true,
            ApiError::Unauthorized { .. } => false,
            ApiError::InvalidResponse(_) => false,
        }
    }

    /// Server-side trouble worth retrying for best-effort calls.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Terminal failure of one file's transfer.
///
/// `stage` is where it happened: `chunk 3/9` or `processing`.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{stage}: authentication failed: {source}")]
    Auth { stage: String, source: AuthError },

    #[error("{stage}: {source}")]
    Api { stage: String, source: ApiError },

    #[error("failed to read {filename}: {source}")]
    Io {
        filename: String,
        source: std::io::Error,
    },

    #[error("{0} is empty")]
    EmptyFile(String),

    #[error("upload interrupted")]
    Cancelled,
}

impl UploadError {
    /// An authentication failure cannot be fixed by moving on to the next
    /// file; the batch has to stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UploadError::Auth { .. })
    }
}

/// `chunk 3/9` from a 0-based index.
pub(crate) fn chunk_stage(index: u64, total: u64) -> String {
    format!("chunk {}/{}", index + 1, total)
}
