use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};

use shbackup_common::backend::BackendGateway;
use shbackup_common::documents::{
    Account, CompanyRegistration, DeleteRequest, FileEvent, FolderInfo, PresignRequest,
    PresignedUpload, QuotaUpdate,
};
use shbackup_common::error_body::ErrorBody;

pub const API_KEY_HEADER: &str = "X-Company-Api-Key";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: ErrorBody },
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Client for the backup backend REST API.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn find_company(&self, api_key: &str) -> Result<Account, ApiError> {
        let resp = self
            .client
            .get(self.url("/api/companies/by-api-key"))
            .header(API_KEY_HEADER, api_key)
            .send()
            .await?;
        decode(expect_status(resp, &[StatusCode::OK], "fetching company by API key").await?).await
    }

    pub async fn get_folder_size(&self, api_key: &str, loc_tag: &str) -> Result<FolderInfo, ApiError> {
        let resp = self
            .client
            .get(format!(
                "{}?loc_tag={}",
                self.url("/api/filemeta/folder/size"),
                urlencoding::encode(loc_tag)
            ))
            .header(API_KEY_HEADER, api_key)
            .send()
            .await?;
        let info: FolderInfo =
            decode(expect_status(resp, &[StatusCode::OK], "getting folder size").await?).await?;
        info!(loc_tag = %loc_tag, total_size = info.total_size, "Got folder size");
        Ok(info)
    }

    pub async fn delete_tagged_files(&self, api_key: &str, loc_tag: &str) -> Result<(), ApiError> {
        let resp = self
            .client
            .post(self.url("/api/companies/delete/files"))
            .header(API_KEY_HEADER, api_key)
            .json(&DeleteRequest { loc_tag: loc_tag.to_string() })
            .send()
            .await?;
        expect_status(resp, &[StatusCode::OK], "deleting files").await?;
        info!(loc_tag = %loc_tag, "Deleted files");
        Ok(())
    }

    pub async fn presign_upload(
        &self,
        api_key: &str,
        loc_tag: &str,
        file_name: &str,
        content_size: i64,
    ) -> Result<PresignedUpload, ApiError> {
        let resp = self
            .client
            .post(self.url("/api/companies/generate/presigned/url/upload"))
            .header(API_KEY_HEADER, api_key)
            .json(&PresignRequest {
                file_name: file_name.to_string(),
                content_size,
                loc_tag: loc_tag.to_string(),
            })
            .send()
            .await?;
        decode(expect_status(resp, &[StatusCode::OK], "fetching presigned upload url").await?).await
    }

    /// Presign, then POST the policy fields followed by the file content.
    pub async fn upload(&self, api_key: &str, loc_tag: &str, path: &Path) -> Result<(), ApiError> {
        let io_err = |source| ApiError::Io { path: path.display().to_string(), source };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let size = tokio::fs::metadata(path).await.map_err(io_err)?.len();

        let target = self
            .presign_upload(api_key, loc_tag, &file_name, size as i64)
            .await?;

        let mut form = Form::new();
        for (name, value) in target.form_fields() {
            form = form.text(name, value);
        }
        let file = tokio::fs::File::open(path).await.map_err(io_err)?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let part = Part::stream_with_length(body, size)
            .file_name(file_name.clone())
            .mime_str(mime.as_ref())?;
        form = form.part("file", part);

        let resp = self
            .client
            .post(&target.url)
            .header(API_KEY_HEADER, api_key)
            .multipart(form)
            .send()
            .await?;
        expect_status(resp, &[StatusCode::OK, StatusCode::NO_CONTENT], "uploading file").await?;
        debug!(file = %file_name, size, "Upload complete");
        Ok(())
    }

    pub async fn insert_file_metadata(&self, event: &FileEvent) -> Result<(), ApiError> {
        let resp = self
            .client
            .post(self.url("/api/filemeta"))
            .header(API_KEY_HEADER, &self.api_key)
            .json(event)
            .send()
            .await?;
        expect_status(resp, &[StatusCode::OK, StatusCode::CREATED], "inserting file metadata").await?;
        Ok(())
    }

    pub async fn update_company_quota(&self, update: &QuotaUpdate) -> Result<(), ApiError> {
        let resp = self
            .client
            .patch(self.url("/api/companies/quota"))
            .header(API_KEY_HEADER, &self.api_key)
            .json(update)
            .send()
            .await?;
        expect_status(resp, &[StatusCode::OK], "updating company quota").await?;
        Ok(())
    }

    pub async fn register(&self, registration: &CompanyRegistration) -> Result<Account, ApiError> {
        let resp = self
            .client
            .post(self.url("/api/companies"))
            .json(registration)
            .send()
            .await?;
        decode(expect_status(resp, &[StatusCode::OK, StatusCode::CREATED], "registering company").await?)
            .await
    }
}

async fn expect_status(resp: Response, ok: &[StatusCode], action: &str) -> Result<Response, ApiError> {
    let status = resp.status();
    if ok.contains(&status) {
        return Ok(resp);
    }
    let bytes = resp.bytes().await.unwrap_or_default();
    let body = ErrorBody::parse(&bytes);
    error!(status = %status, detail = %body, "Unexpected status when {}", action);
    Err(ApiError::Status { status, body })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl BackendGateway for ApiClient {
    async fn find_account(&self, api_key: &str) -> anyhow::Result<Account> {
        Ok(self.find_company(api_key).await?)
    }

    async fn folder_size(&self, api_key: &str, loc_tag: &str) -> anyhow::Result<i64> {
        Ok(self.get_folder_size(api_key, loc_tag).await?.total_size)
    }

    async fn delete_files(&self, api_key: &str, loc_tag: &str) -> anyhow::Result<()> {
        Ok(self.delete_tagged_files(api_key, loc_tag).await?)
    }

    async fn upload_file(&self, api_key: &str, loc_tag: &str, local_path: &Path) -> anyhow::Result<()> {
        Ok(self.upload(api_key, loc_tag, local_path).await?)
    }

    async fn record_file_event(&self, event: &FileEvent) -> anyhow::Result<()> {
        Ok(self.insert_file_metadata(event).await?)
    }

    async fn update_quota(&self, update: &QuotaUpdate) -> anyhow::Result<()> {
        Ok(self.update_company_quota(update).await?)
    }

    async fn register_company(&self, registration: &CompanyRegistration) -> anyhow::Result<Account> {
        Ok(self.register(registration).await?)
    }
}
