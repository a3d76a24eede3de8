//! Candidate discovery in the data directory and matching against metadata.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::checkpoint::CHECKPOINT_FILENAME;
use crate::metadata::{AcquisitionDate, DatasetMetadata, MetadataEntry};
use crate::types::UploadType;

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("Directory not found: {0}")]
    NotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Failed to list {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A file that passed the boundary checks and may be uploaded.
///
/// Format-specific inspection happens outside this crate; its only output
/// consumed here is `extracted_date`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFile {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
    pub upload_type: UploadType,
    pub extracted_date: Option<AcquisitionDate>,
}

/// A validated file together with the metadata it is uploaded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub file: ValidatedFile,
    pub metadata: DatasetMetadata,
}

impl UploadItem {
    pub fn filename(&self) -> &str {
        &self.file.filename
    }
}

/// Map an extension to the kind of upload, case-insensitively.
pub fn upload_type_for(path: &Path) -> Option<UploadType> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "tif" | "tiff" | "geotiff" => Some(UploadType::Geotiff),
        "zip" => Some(UploadType::RawImagesZip),
        _ => None,
    }
}

/// List uploadable files directly inside `dir`, sorted by filename.
///
/// Hidden files and the checkpoint are ignored. Empty files are reported
/// and left out: they would upload as zero chunks.
pub fn find_uploadable_files(dir: &Path) -> Result<Vec<ValidatedFile>, DiscoverError> {
    if !dir.exists() {
        return Err(DiscoverError::NotFound(dir.to_path_buf()));
    }
    if !dir.is_dir() {
        return Err(DiscoverError::NotADirectory(dir.to_path_buf()));
    }
    let io_err = |source| DiscoverError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let filename = entry.file_name().to_string_lossy().into_owned();
        if filename.starts_with('.') || filename == CHECKPOINT_FILENAME {
            continue;
        }
        let path = entry.path();
        let Some(upload_type) = upload_type_for(&path) else {
            continue;
        };
        let meta = entry.metadata().map_err(io_err)?;
        if !meta.is_file() {
            continue;
        }
        if meta.len() == 0 {
            tracing::warn!("Skipping empty file {}", filename);
            continue;
        }
        files.push(ValidatedFile {
            path,
            filename,
            size: meta.len(),
            upload_type,
            extracted_date: None,
        });
    }

    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    tracing::debug!("Found {} uploadable files in {}", files.len(), dir.display());
    Ok(files)
}

/// Where per-file metadata comes from.
#[derive(Debug, Clone)]
pub enum MetadataSource {
    /// The same metadata for every discovered file.
    Uniform(DatasetMetadata),
    /// Per-file entries from a manifest.
    PerFile(Vec<MetadataEntry>),
}

#[derive(Debug, Default)]
pub struct MatchResult {
    pub items: Vec<UploadItem>,
    /// Files on disk with no metadata entry.
    pub unmatched_files: Vec<String>,
    /// Metadata entries with no file on disk.
    pub unmatched_entries: Vec<String>,
}

/// Pair files with metadata by case-insensitive filename. The file order is
/// preserved. An extracted date only fills acquisition fields left unset.
pub fn match_files_to_metadata(files: Vec<ValidatedFile>, source: &MetadataSource) -> MatchResult {
    let mut result = MatchResult::default();

    let entries: HashMap<String, &MetadataEntry> = match source {
        MetadataSource::Uniform(_) => HashMap::new(),
        MetadataSource::PerFile(entries) => entries
            .iter()
            .map(|e| (e.filename.to_lowercase(), e))
            .collect(),
    };
    let mut used = std::collections::HashSet::new();

    for file in files {
        let key = file.filename.to_lowercase();
        let metadata = match source {
            MetadataSource::Uniform(m) => Some(m.clone()),
            MetadataSource::PerFile(_) => entries.get(&key).map(|e| e.metadata.clone()),
        };
        let Some(mut metadata) = metadata else {
            result.unmatched_files.push(file.filename);
            continue;
        };
        used.insert(key);
        if let Some(date) = &file.extracted_date {
            metadata.fill_date(date);
        }
        result.items.push(UploadItem { file, metadata });
    }

    if let MetadataSource::PerFile(list) = source {
        result.unmatched_entries = list
            .iter()
            .filter(|e| !used.contains(&e.filename.to_lowercase()))
            .map(|e| e.filename.clone())
            .collect();
    }

    for f in &result.unmatched_files {
        tracing::warn!("No metadata for {}, excluding it", f);
    }
    for f in &result.unmatched_entries {
        tracing::warn!("Metadata entry {} has no matching file", f);
    }
    result
}
