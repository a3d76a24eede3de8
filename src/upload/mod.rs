//! Chunked upload to the ingestion API.
//!
//! Each file is split into fixed-size chunks sent in order under one random
//! correlation id. Every chunk is retried on its own, with the credential
//! renewed in between when needed. After the final chunk the server returns
//! the new dataset id, and processing is requested for it.

pub mod api;
pub mod error;
pub mod process;
pub mod transfer;

pub use api::{HttpIngestApi, IngestApi};
pub use error::UploadError;
pub use process::{trigger_processing, DEFAULT_PRIORITY};
pub use transfer::{ChunkedUploader, DEFAULT_CHUNK_SIZE};
