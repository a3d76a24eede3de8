//! Sends one file as a sequence of chunks.

use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::api::{ChunkRequest, ChunkResponse, IngestApi};
use super::error::{chunk_stage, ApiError, UploadError};
use crate::auth::error::AuthError;
use crate::auth::TokenSource;
use crate::discover::UploadItem;
use crate::retry::RetryConfig;

/// 100 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

/// Number of chunks for `size` bytes; zero for an empty file.
pub fn chunk_count(size: u64, chunk_size: u64) -> u64 {
    size.div_ceil(chunk_size.max(1))
}

/// Chunked transfer engine.
///
/// Chunks of a file go out strictly in order, one at a time, all under one
/// correlation id; the server assembles them by index.
pub struct ChunkedUploader<'a> {
    api: &'a dyn IngestApi,
    chunk_size: u64,
    retry: RetryConfig,
    shutdown: CancellationToken,
}

impl<'a> ChunkedUploader<'a> {
    pub fn new(
        api: &'a dyn IngestApi,
        chunk_size: u64,
        retry: RetryConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            api,
            chunk_size: chunk_size.max(1),
            retry,
            shutdown,
        }
    }

    /// Upload `item` and return the id of the dataset the server created.
    ///
    /// `progress` receives the cumulative number of bytes sent after every
    /// chunk.
    pub async fn transfer(
        &self,
        item: &UploadItem,
        tokens: &mut dyn TokenSource,
        progress: &(dyn Fn(u64) + Sync),
    ) -> Result<u64, UploadError> {
        let filename = item.filename();
        let io_err = |source| UploadError::Io {
            filename: filename.to_string(),
            source,
        };

        let mut file = File::open(&item.file.path).await.map_err(io_err)?;
        let size = file.metadata().await.map_err(io_err)?.len();
        if size == 0 {
            return Err(UploadError::EmptyFile(filename.to_string()));
        }

        let total = chunk_count(size, self.chunk_size);
        let upload_id = Uuid::new_v4().to_string();
        tracing::debug!(
            filename,
            upload_id = %upload_id,
            "Uploading {} bytes in {} chunk(s)",
            size,
            total
        );

        let mut sent: u64 = 0;
        let mut buf = Vec::with_capacity(self.chunk_size.min(size) as usize);
        for index in 0..total {
            if self.shutdown.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let expected = self.chunk_size.min(size - sent);
            read_chunk(&mut file, &mut buf, expected, &item.file.path)
                .await
                .map_err(io_err)?;

            let chunk = ChunkRequest {
                upload_id: &upload_id,
                filename,
                chunk_index: index,
                chunks_total: total,
                upload_type: item.file.upload_type,
                metadata: &item.metadata,
                data: &buf,
            };
            let response = self.send_with_retry(&chunk, tokens).await?;

            sent += expected;
            progress(sent);

            if chunk.is_last() {
                return response.dataset_id.ok_or_else(|| UploadError::Api {
                    stage: chunk_stage(index, total),
                    source: ApiError::InvalidResponse(
                        "final chunk response carried no dataset id".into(),
                    ),
                });
            }
        }

        // total >= 1, so the loop returned on its last iteration
        Err(UploadError::EmptyFile(filename.to_string()))
    }

    /// Send one chunk within the attempt budget.
    ///
    /// A fresh token is fetched before every attempt. An auth rejection
    /// triggers one forced refresh that does not count as an attempt; a
    /// second rejection, or a source that cannot refresh, ends the file.
    async fn send_with_retry(
        &self,
        chunk: &ChunkRequest<'_>,
        tokens: &mut dyn TokenSource,
    ) -> Result<ChunkResponse, UploadError> {
        let stage = || chunk_stage(chunk.chunk_index, chunk.chunks_total);
        let auth_err = |source| UploadError::Auth {
            stage: stage(),
            source,
        };
        let attempts = self.retry.attempts();
        let mut attempt = 0;
        let mut refreshed = false;

        loop {
            let token = tokens.valid_token().await.map_err(auth_err)?;
            let err = match self.api.send_chunk(&token, chunk).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if let ApiError::Unauthorized { status } = err {
                if refreshed || !tokens.can_refresh() {
                    return Err(auth_err(AuthError::Rejected(format!(
                        "token not accepted (HTTP {})",
                        status
                    ))));
                }
                tracing::info!(
                    filename = chunk.filename,
                    "Token rejected at {}, refreshing",
                    stage()
                );
                refreshed = true;
                tokens.force_refresh().await.map_err(auth_err)?;
                continue;
            }

            attempt += 1;
            if !err.is_retryable() || attempt >= attempts {
                return Err(UploadError::Api {
                    stage: stage(),
                    source: err,
                });
            }

            let delay = self.retry.delay_for_retry(attempt - 1);
            tracing::warn!(
                filename = chunk.filename,
                "{} failed (attempt {}/{}), retrying in {}s: {}",
                stage(),
                attempt,
                attempts,
                delay.as_secs(),
                err
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => return Err(UploadError::Cancelled),
            }
        }
    }
}

/// Fill `buf` with exactly `len` bytes from the current position.
async fn read_chunk(
    file: &mut File,
    buf: &mut Vec<u8>,
    len: u64,
    path: &Path,
) -> std::io::Result<()> {
    buf.clear();
    file.take(len).read_to_end(buf).await?;
    if (buf.len() as u64) < len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("{} shrank while uploading", path.display()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::auth::credential::testing::{credential_expiring_in, FakeIssuer};
    use crate::auth::StaticToken;
    use crate::upload::testing::{item_in, FakeApi};

    fn instant(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_secs: 0,
            max_delay_secs: 0,
        }
    }

    fn uploader(api: &FakeApi, chunk_size: u64) -> ChunkedUploader<'_> {
        ChunkedUploader::new(api, chunk_size, instant(3), CancellationToken::new())
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, 10), 0);
        assert_eq!(chunk_count(1, 10), 1);
        assert_eq!(chunk_count(10, 10), 1);
        assert_eq!(chunk_count(11, 10), 2);
        assert_eq!(chunk_count(95, 10), 10);
    }

    #[tokio::test]
    async fn test_chunks_sent_in_order_under_one_upload_id() {
        let dir = tempfile::tempdir().unwrap();
        let bytes: Vec<u8> = (0..25u8).collect();
        let item = item_in(dir.path(), "a.tif", &bytes);
        let api = FakeApi::new();
        let mut token = StaticToken::new("tok");

        let id = uploader(&api, 10)
            .transfer(&item, &mut token, &|_| {})
            .await
            .unwrap();
        assert_eq!(id, 100);

        let calls = api.chunk_calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| c.upload_id == calls[0].upload_id));
        assert!(Uuid::parse_str(&calls[0].upload_id).is_ok());
        assert_eq!(
            calls.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(calls.iter().all(|c| c.chunks_total == 3));
        let joined: Vec<u8> = calls.iter().flat_map(|c| c.data.clone()).collect();
        assert_eq!(joined, bytes);
        assert_eq!(calls[2].data.len(), 5);
    }

    #[tokio::test]
    async fn test_each_file_gets_a_new_upload_id() {
        let dir = tempfile::tempdir().unwrap();
        let a = item_in(dir.path(), "a.tif", b"aaa");
        let b = item_in(dir.path(), "b.tif", b"bbb");
        let api = FakeApi::new();
        let mut token = StaticToken::new("tok");
        let up = uploader(&api, 10);
        up.transfer(&a, &mut token, &|_| {}).await.unwrap();
        up.transfer(&b, &mut token, &|_| {}).await.unwrap();
        let calls = api.chunk_calls();
        assert_ne!(calls[0].upload_id, calls[1].upload_id);
    }

    #[tokio::test]
    async fn test_progress_is_cumulative() {
        let dir = tempfile::tempdir().unwrap();
        let item = item_in(dir.path(), "a.tif", &[7u8; 25]);
        let api = FakeApi::new();
        let mut token = StaticToken::new("tok");
        let seen = std::sync::Mutex::new(Vec::new());
        uploader(&api, 10)
            .transfer(&item, &mut token, &|n| seen.lock().unwrap().push(n))
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![10, 20, 25]);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let dir = tempfile::tempdir().unwrap();
        let item = item_in(dir.path(), "a.tif", b"data");
        let api = FakeApi::new();
        api.fail_chunks(vec![
            ApiError::Transport("timed out".into()),
            ApiError::Transport("connection reset".into()),
        ]);
        let mut token = StaticToken::new("tok");
        let id = uploader(&api, 10)
            .transfer(&item, &mut token, &|_| {})
            .await
            .unwrap();
        assert_eq!(id, 100);
        assert_eq!(api.chunk_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_name_the_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let item = item_in(dir.path(), "a.tif", &[1u8; 25]);
        let api = FakeApi::new();
        // first chunk succeeds, second fails on every attempt
        api.succeed_then_fail(
            1,
            vec![
                ApiError::Transport("timed out".into()),
                ApiError::Transport("timed out".into()),
                ApiError::Status {
                    status: 500,
                    detail: "storage offline".into(),
                },
            ],
        );
        let mut token = StaticToken::new("tok");
        let err = uploader(&api, 10)
            .transfer(&item, &mut token, &|_| {})
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "chunk 2/3: HTTP 500: storage offline");
        assert!(!err.is_fatal());
        assert_eq!(api.chunk_calls().len(), 4);
    }

    #[tokio::test]
    async fn test_expired_credential_refreshed_once_before_first_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let item = item_in(dir.path(), "a.tif", &[1u8; 25]);
        let api = FakeApi::new();
        let issuer = FakeIssuer::new();
        let mut cred = credential_expiring_in(issuer.clone(), -60);
        uploader(&api, 10)
            .transfer(&item, &mut cred, &|_| {})
            .await
            .unwrap();
        assert_eq!(issuer.refresh_count(), 1);
        assert!(api.chunk_calls().iter().all(|c| c.token == "access-1"));
    }

    #[tokio::test]
    async fn test_fresh_credential_not_refreshed() {
        let dir = tempfile::tempdir().unwrap();
        let item = item_in(dir.path(), "a.tif", &[1u8; 25]);
        let api = FakeApi::new();
        let issuer = FakeIssuer::new();
        let mut cred = credential_expiring_in(issuer.clone(), 7200);
        uploader(&api, 10)
            .transfer(&item, &mut cred, &|_| {})
            .await
            .unwrap();
        assert_eq!(issuer.refresh_count(), 0);
        assert!(api.chunk_calls().iter().all(|c| c.token == "access-0"));
    }

    #[tokio::test]
    async fn test_rejection_forces_refresh_without_using_an_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let item = item_in(dir.path(), "a.tif", b"data");
        let api = FakeApi::new();
        api.fail_chunks(vec![
            ApiError::Transport("t".into()),
            ApiError::Transport("t".into()),
            ApiError::Unauthorized { status: 401 },
        ]);
        let issuer = FakeIssuer::new();
        let mut cred = credential_expiring_in(issuer.clone(), 7200);
        let id = uploader(&api, 10)
            .transfer(&item, &mut cred, &|_| {})
            .await;
        // two transport failures + one rejection + success within 3 attempts
        assert_eq!(id.unwrap(), 100);
        assert_eq!(issuer.refresh_count(), 1);
        let calls = api.chunk_calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[3].token, "access-1");
    }

    #[tokio::test]
    async fn test_second_rejection_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let item = item_in(dir.path(), "a.tif", b"data");
        let api = FakeApi::new();
        api.fail_chunks(vec![
            ApiError::Unauthorized { status: 401 },
            ApiError::Unauthorized { status: 401 },
        ]);
        let issuer = FakeIssuer::new();
        let mut cred = credential_expiring_in(issuer.clone(), 7200);
        let err = uploader(&api, 10)
            .transfer(&item, &mut cred, &|_| {})
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().starts_with("chunk 1/1: authentication failed"));
        assert_eq!(issuer.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let item = item_in(dir.path(), "a.tif", b"data");
        let api = FakeApi::new();
        api.fail_chunks(vec![ApiError::Unauthorized { status: 401 }]);
        let issuer = FakeIssuer::new();
        issuer
            .fail_refresh
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let mut cred = credential_expiring_in(issuer, 7200);
        let err = uploader(&api, 10)
            .transfer(&item, &mut cred, &|_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::Auth {
                source: AuthError::RefreshFailed(_),
                ..
            }
        ));
        assert_eq!(api.chunk_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_bare_token_rejection_is_fatal_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let item = item_in(dir.path(), "a.tif", b"data");
        let api = FakeApi::new();
        api.fail_chunks(vec![ApiError::Unauthorized { status: 401 }]);
        let mut token = StaticToken::new("tok");
        let err = uploader(&api, 10)
            .transfer(&item, &mut token, &|_| {})
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(api.chunk_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_dataset_id_fails_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let item = item_in(dir.path(), "a.tif", b"data");
        let api = FakeApi::new();
        api.omit_dataset_id();
        let mut token = StaticToken::new("tok");
        let err = uploader(&api, 10)
            .transfer(&item, &mut token, &|_| {})
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("chunk 1/1: invalid response"));
        assert_eq!(api.chunk_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let item = item_in(dir.path(), "a.tif", b"data");
        let api = FakeApi::new();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let mut token = StaticToken::new("tok");
        let err = ChunkedUploader::new(&api, 10, instant(3), shutdown)
            .transfer(&item, &mut token, &|_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Cancelled));
        assert!(api.chunk_calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_between_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let item = item_in(dir.path(), "a.tif", &[0u8; 30]);
        let api = FakeApi::new();
        let shutdown = CancellationToken::new();
        let trip = shutdown.clone();
        let chunks_seen = Arc::new(AtomicU64::new(0));
        let seen = chunks_seen.clone();
        let mut token = StaticToken::new("tok");
        let err = ChunkedUploader::new(&api, 10, instant(3), shutdown)
            .transfer(&item, &mut token, &move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                trip.cancel();
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Cancelled));
        assert_eq!(chunks_seen.load(Ordering::SeqCst), 1);
        assert_eq!(api.chunk_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut item = item_in(dir.path(), "a.tif", b"data");
        item.file.path = dir.path().join("gone.tif");
        let api = FakeApi::new();
        let mut token = StaticToken::new("tok");
        let err = uploader(&api, 10)
            .transfer(&item, &mut token, &|_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Io { .. }));
    }
}
