use std::path::Path;

use crate::documents::{Account, CompanyRegistration, FileEvent, QuotaUpdate};

/// Operations the agent needs from the backup backend.
///
/// The HTTP implementation lives in the agent; tests substitute an in-memory
/// one. Every call is made at most once per run, there is no retry layer.
#[async_trait::async_trait]
pub trait BackendGateway: Send + Sync {
    /// Resolve the account owning `api_key`.
    async fn find_account(&self, api_key: &str) -> anyhow::Result<Account>;

    /// Total bytes stored under the location tag.
    async fn folder_size(&self, api_key: &str, loc_tag: &str) -> anyhow::Result<i64>;

    /// Delete every stored object under the location tag.
    async fn delete_files(&self, api_key: &str, loc_tag: &str) -> anyhow::Result<()>;

    /// Obtain a presigned target and stream the local file to it.
    async fn upload_file(&self, api_key: &str, loc_tag: &str, local_path: &Path) -> anyhow::Result<()>;

    async fn record_file_event(&self, event: &FileEvent) -> anyhow::Result<()>;

    async fn update_quota(&self, update: &QuotaUpdate) -> anyhow::Result<()>;

    /// Create a new company account. Returns the stored record, including its API key.
    async fn register_company(&self, registration: &CompanyRegistration) -> anyhow::Result<Account>;
}

/// Read-only probe of the object store backing an account.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether an object exists at `key`.
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;
}
