//! HTTP contract of the ingestion API: one chunk endpoint and one
//! processing trigger.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::metadata::DatasetMetadata;
use crate::types::UploadType;

/// One chunk of one file, plus the metadata repeated on every chunk.
#[derive(Debug)]
pub struct ChunkRequest<'a> {
    pub upload_id: &'a str,
    pub filename: &'a str,
    pub chunk_index: u64,
    pub chunks_total: u64,
    pub upload_type: UploadType,
    pub metadata: &'a DatasetMetadata,
    pub data: &'a [u8],
}

impl ChunkRequest<'_> {
    pub fn is_last(&self) -> bool {
        self.chunk_index + 1 == self.chunks_total
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkResponse {
    /// Set on the final chunk: the id of the new dataset.
    pub dataset_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessRequest {
    pub task_types: Vec<String>,
    pub priority: u8,
}

/// The ingestion server as seen by the upload engine.
#[async_trait]
pub trait IngestApi: Send + Sync {
    async fn send_chunk(
        &self,
        token: &str,
        chunk: &ChunkRequest<'_>,
    ) -> Result<ChunkResponse, ApiError>;

    async fn start_processing(
        &self,
        token: &str,
        dataset_id: u64,
        request: &ProcessRequest,
    ) -> Result<(), ApiError>;
}

#[derive(Debug, Deserialize)]
struct ChunkReply {
    #[serde(default)]
    id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorReply {
    detail: serde_json::Value,
}

pub struct HttpIngestApi {
    client: Client,
    api_root: String,
}

impl std::fmt::Debug for HttpIngestApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIngestApi")
            .field("api_root", &self.api_root)
            .finish()
    }
}

impl HttpIngestApi {
    /// `timeout` bounds a whole request, so it must cover one chunk upload.
    pub fn new(api_root: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_root: api_root.trim_end_matches('/').to_string(),
        })
    }

    fn chunk_url(&self) -> String {
        format!("{}/datasets/chunk", self.api_root)
    }

    fn process_url(&self, dataset_id: u64) -> String {
        format!("{}/datasets/{}/process", self.api_root, dataset_id)
    }
}

fn chunk_form(chunk: &ChunkRequest<'_>) -> Form {
    let m = chunk.metadata;
    let mut form = Form::new()
        .text("upload_id", chunk.upload_id.to_string())
        .text("license", m.license.as_str())
        .text("platform", m.platform.as_str());
    for author in &m.authors {
        form = form.text("authors", author.clone());
    }
    form = form.text("data_access", m.data_access.as_str());
    // The server's form fields are spelled `aquisition_*`.
    if let Some(y) = m.acquisition_year {
        form = form.text("aquisition_year", y.to_string());
    }
    if let Some(mo) = m.acquisition_month {
        form = form.text("aquisition_month", mo.to_string());
    }
    if let Some(d) = m.acquisition_day {
        form = form.text("aquisition_day", d.to_string());
    }
    if let Some(info) = &m.additional_information {
        form = form.text("additional_information", info.clone());
    }
    if let Some(doi) = &m.citation_doi {
        form = form.text("citation_doi", doi.clone());
    }
    form.text("upload_type", chunk.upload_type.as_str())
        .text("chunk_index", chunk.chunk_index.to_string())
        .text("chunks_total", chunk.chunks_total.to_string())
        .part(
            "file",
            Part::bytes(chunk.data.to_vec()).file_name(chunk.filename.to_string()),
        )
}

/// Map a non-2xx response to an [`ApiError`], preferring a JSON `detail`.
async fn error_for(response: Response) -> ApiError {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return ApiError::Unauthorized {
            status: status.as_u16(),
        };
    }
    let text = response.text().await.unwrap_or_default();
    let detail = match serde_json::from_str::<ErrorReply>(&text) {
        Ok(ErrorReply {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorReply { detail }) => detail.to_string(),
        Err(_) if text.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("no details")
            .to_string(),
        Err(_) => text.trim().to_string(),
    };
    ApiError::Status {
        status: status.as_u16(),
        detail,
    }
}

fn transport(e: reqwest::Error) -> ApiError {
    ApiError::Transport(e.to_string())
}

#[async_trait]
impl IngestApi for HttpIngestApi {
    async fn send_chunk(
        &self,
        token: &str,
        chunk: &ChunkRequest<'_>,
    ) -> Result<ChunkResponse, ApiError> {
        let response = self
            .client
            .post(self.chunk_url())
            .bearer_auth(token)
            .multipart(chunk_form(chunk))
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(error_for(response).await);
        }

        let text = response.text().await.map_err(transport)?;
        let dataset_id = serde_json::from_str::<ChunkReply>(&text)
            .ok()
            .and_then(|r| r.id);
        Ok(ChunkResponse { dataset_id })
    }

    async fn start_processing(
        &self,
        token: &str,
        dataset_id: u64,
        request: &ProcessRequest,
    ) -> Result<(), ApiError> {
        let response = self
            .client
            .put(self.process_url(dataset_id))
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_server::serve_once;
    use super::*;
    use crate::types::{DataAccess, License, Platform};

    fn metadata() -> DatasetMetadata {
        let mut m = DatasetMetadata::new(
            License::CcBySa,
            Platform::Drone,
            vec!["Jane Doe".into(), "John Roe".into()],
        );
        m.data_access = DataAccess::ViewOnly;
        m.acquisition_year = Some(2023);
        m.acquisition_month = Some(7);
        m.citation_doi = Some("10.1/x".into());
        m
    }

    fn api(root: &str) -> HttpIngestApi {
        HttpIngestApi::new(root, Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn test_urls() {
        let api = api("https://data.example.com/api/v1/");
        assert_eq!(api.chunk_url(), "https://data.example.com/api/v1/datasets/chunk");
        assert_eq!(
            api.process_url(42),
            "https://data.example.com/api/v1/datasets/42/process"
        );
    }

    #[test]
    fn test_is_last() {
        let m = metadata();
        let mut chunk = ChunkRequest {
            upload_id: "u",
            filename: "a.tif",
            chunk_index: 0,
            chunks_total: 2,
            upload_type: UploadType::Geotiff,
            metadata: &m,
            data: b"",
        };
        assert!(!chunk.is_last());
        chunk.chunk_index = 1;
        assert!(chunk.is_last());
    }

    #[tokio::test]
    async fn test_final_chunk_sends_form_and_reads_id() {
        let (root, server) = serve_once("200 OK", r#"{"id": 314, "file_name": "a.tif"}"#).await;
        let m = metadata();
        let chunk = ChunkRequest {
            upload_id: "corr-1",
            filename: "a.tif",
            chunk_index: 0,
            chunks_total: 1,
            upload_type: UploadType::Geotiff,
            metadata: &m,
            data: b"PAYLOAD-BYTES",
        };
        let resp = api(&root).send_chunk("tok", &chunk).await.unwrap();
        assert_eq!(resp.dataset_id, Some(314));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/v1/datasets/chunk "));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer tok"));
        for field in [
            "upload_id",
            "license",
            "platform",
            "authors",
            "data_access",
            "aquisition_year",
            "aquisition_month",
            "citation_doi",
            "upload_type",
            "chunk_index",
            "chunks_total",
            "file",
        ] {
            assert!(
                request.contains(&format!("name=\"{}\"", field)),
                "missing field {}",
                field
            );
        }
        assert!(!request.contains("name=\"aquisition_day\""));
        assert!(!request.contains("name=\"acquisition_year\""));
        assert!(request.contains("2023"));
        assert!(!request.contains("name=\"additional_information\""));
        assert_eq!(request.matches("name=\"authors\"").count(), 2);
        assert!(request.contains("CC BY-SA"));
        assert!(request.contains("viewonly"));
        assert!(request.contains("PAYLOAD-BYTES"));
    }

    #[tokio::test]
    async fn test_intermediate_chunk_without_json() {
        let (root, server) = serve_once("200 OK", "ok").await;
        let m = metadata();
        let chunk = ChunkRequest {
            upload_id: "corr-1",
            filename: "a.tif",
            chunk_index: 0,
            chunks_total: 3,
            upload_type: UploadType::Geotiff,
            metadata: &m,
            data: b"x",
        };
        let resp = api(&root).send_chunk("tok", &chunk).await.unwrap();
        assert_eq!(resp.dataset_id, None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_401_is_unauthorized() {
        let (root, server) = serve_once("401 Unauthorized", r#"{"detail": "expired"}"#).await;
        let err = api(&root)
            .start_processing(
                "tok",
                1,
                &ProcessRequest {
                    task_types: vec!["cog".into()],
                    priority: 4,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized { status: 401 }));
        let request = server.await.unwrap();
        assert!(request.starts_with("PUT /api/v1/datasets/1/process "));
        assert!(request.contains(r#""task_types":["cog"]"#));
        assert!(request.contains(r#""priority":4"#));
    }

    #[tokio::test]
    async fn test_status_error_carries_detail() {
        let (root, server) =
            serve_once("422 Unprocessable Entity", r#"{"detail": "invalid license"}"#).await;
        let err = api(&root)
            .start_processing(
                "tok",
                9,
                &ProcessRequest {
                    task_types: vec![],
                    priority: 4,
                },
            )
            .await
            .unwrap_err();
        match err {
            ApiError::Status { status, detail } => {
                assert_eq!(status, 422);
                assert_eq!(detail, "invalid license");
            }
            other => panic!("unexpected {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_is_transport() {
        let api = api("http://127.0.0.1:1/api/v1");
        let err = api
            .start_processing(
                "tok",
                1,
                &ProcessRequest {
                    task_types: vec![],
                    priority: 4,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
    }
}
