//! Sampled content fingerprint used for duplicate detection.
//!
//! The digest covers the decimal file size, the first 10 MiB and, for files
//! larger than that, the last 10 MiB, matching the ingestion server's own
//! duplicate check. Two files of equal size whose head and tail samples match
//! but whose middle differs produce the same fingerprint.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Bytes sampled from each end of the file.
pub const SAMPLE_SIZE: u64 = 10 * 1024 * 1024;

/// Hex-encoded SHA-256 over the sampled regions of a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileIdentity(String);

impl FileIdentity {
    /// Shortened form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(16)]
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for FileIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Compute the fingerprint of `path`, reading at most `2 * sample_size` bytes.
pub fn fingerprint_with_sample(path: &Path, sample_size: u64) -> std::io::Result<FileIdentity> {
    let mut file = std::fs::File::open(path)?;
    let size = file.metadata()?.len();

    let mut hasher = Sha256::new();
    hasher.update(size.to_string().as_bytes());

    let mut head = Vec::new();
    (&mut file).take(sample_size).read_to_end(&mut head)?;
    hasher.update(&head);

    if size > sample_size {
        file.seek(SeekFrom::End(-(sample_size as i64)))?;
        let mut tail = Vec::new();
        (&mut file).take(sample_size).read_to_end(&mut tail)?;
        hasher.update(&tail);
    }

    Ok(FileIdentity(hex::encode(hasher.finalize())))
}

pub fn fingerprint(path: &Path) -> std::io::Result<FileIdentity> {
    fingerprint_with_sample(path, SAMPLE_SIZE)
}

/// Fingerprint on the blocking pool so the runtime stays responsive while
/// 20 MiB per file is read from disk.
pub async fn fingerprint_async(path: PathBuf) -> std::io::Result<FileIdentity> {
    tokio::task::spawn_blocking(move || fingerprint(&path))
        .await
        .map_err(std::io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, data).unwrap();
        p
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), "a.tif", b"some raster bytes");
        assert_eq!(fingerprint(&p).unwrap(), fingerprint(&p).unwrap());
    }

    #[test]
    fn test_small_file_matches_reference_digest() {
        // size "5" followed by the whole content, no tail sample
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), "a.tif", b"hello");
        let mut hasher = Sha256::new();
        hasher.update(b"5");
        hasher.update(b"hello");
        let expected = hex::encode(hasher.finalize());
        assert_eq!(fingerprint(&p).unwrap().to_string(), expected);
    }

    #[test]
    fn test_large_file_hashes_head_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), "a.tif", b"0123456789");
        let mut hasher = Sha256::new();
        hasher.update(b"10");
        hasher.update(b"0123");
        hasher.update(b"6789");
        let expected = hex::encode(hasher.finalize());
        assert_eq!(fingerprint_with_sample(&p, 4).unwrap().to_string(), expected);
    }

    #[test]
    fn test_different_content_differs() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.tif", b"aaaa");
        let b = write(dir.path(), "b.tif", b"aaab");
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_size_is_part_of_identity() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.tif", b"ab");
        let b = write(dir.path(), "b.tif", b"abab");
        // with a 2-byte sample both files hash "ab" (+ "ab" tail for b)
        assert_ne!(
            fingerprint_with_sample(&a, 2).unwrap(),
            fingerprint_with_sample(&b, 2).unwrap()
        );
    }

    #[test]
    fn test_middle_difference_collides() {
        // Documented limitation: only head and tail are sampled.
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.tif", b"HEAD-xxxxxxxx-TAIL");
        let b = write(dir.path(), "b.tif", b"HEAD-yyyyyyyy-TAIL");
        assert_eq!(
            fingerprint_with_sample(&a, 5).unwrap(),
            fingerprint_with_sample(&b, 5).unwrap()
        );
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(fingerprint(&dir.path().join("nope.tif")).is_err());
    }

    #[tokio::test]
    async fn test_fingerprint_async_matches_sync() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), "a.zip", b"zip bytes");
        let sync = fingerprint(&p).unwrap();
        assert_eq!(fingerprint_async(p).await.unwrap(), sync);
    }

    #[test]
    fn test_short_form() {
        let id = FileIdentity::from("0123456789abcdef0123".to_string());
        assert_eq!(id.short(), "0123456789abcdef");
    }
}
