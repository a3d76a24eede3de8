//! Durable per-directory upload progress.
//!
//! A JSON record at a fixed path inside the data directory tracks which files
//! were uploaded, which failed and which were skipped, so that an interrupted
//! batch resumes without re-uploading anything:
//! - completed files are never sent again
//! - failed files are retried on the next run
//! - skipped files (duplicates) stay skipped until the session is reset

pub mod error;
pub mod record;
pub mod store;

pub use record::SessionCheckpoint;
pub use store::{CheckpointStore, CHECKPOINT_FILENAME};
