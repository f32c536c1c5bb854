use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::Context;
use tracing::{error, info, warn};

use shbackup_common::backend::{BackendGateway, ObjectStore};
use shbackup_common::documents::{Account, CompanyRegistration, FileEvent, QuotaUpdate, TxnType};
use shbackup_common::quota::should_delete;

use crate::config::{self, AgentSettings};
use crate::selector::ArchiveSelector;

const MB: i64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upload,
    Delete,
    ForceDelete,
}

impl Operation {
    pub fn label(self) -> &'static str {
        match self {
            Operation::Upload => "Uploading",
            Operation::Delete => "Deletion",
            Operation::ForceDelete => "Force Deletion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Register,
    Run(Operation),
}

impl Mode {
    /// First recognised flag wins; upload when none is given.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            match arg.as_ref() {
                "--register" | "-R" => return Mode::Register,
                "--upload" | "-U" | "" => return Mode::Run(Operation::Upload),
                "--delete" | "-D" => return Mode::Run(Operation::Delete),
                "--force-delete" | "-FD" => return Mode::Run(Operation::ForceDelete),
                other => warn!(arg = %other, "Ignoring unknown argument"),
            }
        }
        Mode::Run(Operation::Upload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    NothingToUpload,
    AlreadyStored { key: String },
    Uploaded { file_name: String, size: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    NothingToDelete,
    WithinQuota { usage: i64 },
    Deleted { usage: i64 },
}

/// One resolved account and the collaborators a transfer needs.
pub struct Session<'a> {
    pub gateway: &'a dyn BackendGateway,
    pub store: Option<&'a dyn ObjectStore>,
    pub account: &'a Account,
    pub api_key: &'a str,
    pub settings: &'a AgentSettings,
}

impl Session<'_> {
    pub async fn upload(&self, folder: &Path) -> anyhow::Result<UploadOutcome> {
        let selector = ArchiveSelector::new(&self.settings.archive_prefix)
            .context("Invalid archive prefix")?;
        let archive = match selector.select_latest(folder) {
            Some(a) if a.size > 0 => a,
            _ => {
                warn!(folder = %folder.display(), "No backup archive found or archive is empty");
                return Ok(UploadOutcome::NothingToUpload);
            }
        };

        let file_name = archive
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let key = self.account.object_key(&file_name);

        if let Some(store) = self.store {
            match store.exists(&key).await {
                Ok(true) => {
                    info!(key = %key, "Archive already stored, skipping upload");
                    return Ok(UploadOutcome::AlreadyStored { key });
                }
                Ok(false) => info!(key = %key, "Archive not stored yet"),
                Err(e) => warn!(key = %key, error = %e, "Existence check failed, uploading anyway"),
            }
        }

        self.gateway
            .upload_file(self.api_key, &self.settings.loc_tag, &archive.path)
            .await
            .context("Failed to upload file")?;
        let size = archive.size as i64;
        info!(file = %file_name, size, "Uploaded archive");

        let event = FileEvent::new(
            TxnType::Upload,
            self.account,
            &file_name,
            &file_name,
            size,
            "Uploaded to S3",
        );
        self.bookkeep(&event).await;

        Ok(UploadOutcome::Uploaded { file_name, size })
    }

    pub async fn delete(&self, force: bool) -> anyhow::Result<DeleteOutcome> {
        let usage = self
            .gateway
            .folder_size(self.api_key, &self.settings.loc_tag)
            .await
            .context("Failed to query stored size")?;

        if usage <= 0 {
            info!("No stored files to delete");
            return Ok(DeleteOutcome::NothingToDelete);
        }
        if !should_delete(usage, self.account.total_quota, force)? {
            info!(usage_mb = usage / MB, "Under valid quota usage");
            return Ok(DeleteOutcome::WithinQuota { usage });
        }

        self.gateway
            .delete_files(self.api_key, &self.settings.loc_tag)
            .await
            .context("Failed to delete files")?;

        let folder = &self.account.company_name;
        let event = FileEvent::new(
            TxnType::Delete,
            self.account,
            folder,
            format!("{folder}/"),
            usage,
            "Deleted files in S3",
        );
        self.bookkeep(&event).await;

        info!(usage_mb = usage / MB, folder = %folder, "Deleted stored backups");
        Ok(DeleteOutcome::Deleted { usage })
    }

    /// Record the event and adjust the quota. Failures are logged only, the
    /// transfer itself already happened.
    async fn bookkeep(&self, event: &FileEvent) {
        if let Err(e) = self.gateway.record_file_event(event).await {
            error!(error = %e, file = %event.file_name, "Failed to insert file metadata");
        }
        let update = QuotaUpdate {
            used_quota: event.file_size,
            file_txn_type: event.file_txn_type,
        };
        if let Err(e) = self.gateway.update_quota(&update).await {
            error!(error = %e, "Failed to update company quota");
        }
    }
}

/// Prompt for company details, register the company and store its credentials.
pub async fn register<R: BufRead, W: Write>(
    gateway: &dyn BackendGateway,
    api_base_url: &str,
    mut input: R,
    mut output: W,
    credential_path: &Path,
) -> anyhow::Result<Account> {
    let company_name = prompt(&mut input, &mut output, "Enter Company Name: ")?;
    let local_folder_path = prompt(&mut input, &mut output, "Enter Local Folder Path: ")?;
    if company_name.is_empty() || local_folder_path.is_empty() {
        anyhow::bail!("company name and local folder path are required");
    }

    info!(company = %company_name, folder = %local_folder_path, "Registering company");
    let account = gateway
        .register_company(&CompanyRegistration {
            company_name,
            local_folder_path,
            ..Default::default()
        })
        .await
        .context("Failed to register company")?;

    if account.company_api_key.is_empty() {
        anyhow::bail!("registration response carried no API key");
    }
    let base_url = if account.api_base_url.is_empty() {
        api_base_url
    } else {
        &account.api_base_url
    };
    config::write_credentials(credential_path, &account.company_api_key, base_url)?;
    info!(path = %credential_path.display(), "Company registered successfully");
    Ok(account)
}

fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W, label: &str) -> anyhow::Result<String> {
    output.write_all(label.as_bytes())?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use async_trait::async_trait;

    #[derive(Default)]
    struct State {
        stored: HashSet<String>,
        folder_size: i64,
        uploads: Vec<PathBuf>,
        deletes: Vec<String>,
        events: Vec<FileEvent>,
        quota_updates: Vec<QuotaUpdate>,
        registrations: Vec<CompanyRegistration>,
    }

    /// In-memory backend whose uploads become visible to the existence probe.
    #[derive(Default)]
    struct FakeBackend {
        state: Mutex<State>,
        fail_upload: bool,
        fail_bookkeeping: bool,
        fail_probe: bool,
    }

    #[async_trait]
    impl BackendGateway for FakeBackend {
        async fn find_account(&self, _api_key: &str) -> anyhow::Result<Account> {
            Ok(account())
        }

        async fn folder_size(&self, _api_key: &str, _loc_tag: &str) -> anyhow::Result<i64> {
            Ok(self.state.lock().unwrap().folder_size)
        }

        async fn delete_files(&self, _api_key: &str, loc_tag: &str) -> anyhow::Result<()> {
            let mut state = self.state.lock().unwrap();
            state.deletes.push(loc_tag.to_string());
            state.stored.clear();
            Ok(())
        }

        async fn upload_file(&self, _api_key: &str, _loc_tag: &str, local_path: &Path) -> anyhow::Result<()> {
            if self.fail_upload {
                anyhow::bail!("HTTP 500");
            }
            let name = local_path.file_name().unwrap().to_string_lossy().into_owned();
            let mut state = self.state.lock().unwrap();
            state.stored.insert(account().object_key(&name));
            state.uploads.push(local_path.to_path_buf());
            Ok(())
        }

        async fn record_file_event(&self, event: &FileEvent) -> anyhow::Result<()> {
            if self.fail_bookkeeping {
                anyhow::bail!("HTTP 503");
            }
            self.state.lock().unwrap().events.push(event.clone());
            Ok(())
        }

        async fn update_quota(&self, update: &QuotaUpdate) -> anyhow::Result<()> {
            if self.fail_bookkeeping {
                anyhow::bail!("HTTP 503");
            }
            self.state.lock().unwrap().quota_updates.push(update.clone());
            Ok(())
        }

        async fn register_company(&self, registration: &CompanyRegistration) -> anyhow::Result<Account> {
            self.state.lock().unwrap().registrations.push(registration.clone());
            Ok(Account {
                company_name: registration.company_name.clone(),
                company_api_key: "new-key".to_string(),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl ObjectStore for FakeBackend {
        async fn exists(&self, key: &str) -> anyhow::Result<bool> {
            if self.fail_probe {
                anyhow::bail!("S3 HEAD failed: HTTP 403");
            }
            Ok(self.state.lock().unwrap().stored.contains(key))
        }
    }

    fn account() -> Account {
        Account {
            id: "c-1".to_string(),
            company_name: "Acme Traders".to_string(),
            total_quota: Some(1000),
            used_quota: Some(100),
            ..Default::default()
        }
    }

    fn settings() -> AgentSettings {
        AgentSettings {
            archive_prefix: "prefix".to_string(),
            ..Default::default()
        }
    }

    fn session<'a>(
        backend: &'a FakeBackend,
        account: &'a Account,
        settings: &'a AgentSettings,
    ) -> Session<'a> {
        Session {
            gateway: backend,
            store: Some(backend),
            account,
            api_key: "key-123",
            settings,
        }
    }

    fn backup_folder() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("prefix01012023.zip"), b"old").unwrap();
        std::fs::write(dir.path().join("prefix15062024.zip"), b"newest").unwrap();
        dir
    }

    #[test]
    fn test_mode_from_args() {
        assert_eq!(Mode::from_args(Vec::<String>::new()), Mode::Run(Operation::Upload));
        assert_eq!(Mode::from_args(["-D"]), Mode::Run(Operation::Delete));
        assert_eq!(Mode::from_args(["--force-delete"]), Mode::Run(Operation::ForceDelete));
        assert_eq!(Mode::from_args(["-FD", "--upload"]), Mode::Run(Operation::ForceDelete));
        assert_eq!(Mode::from_args(["--verbose", "-R"]), Mode::Register);
        assert_eq!(Mode::from_args(["--verbose"]), Mode::Run(Operation::Upload));
    }

    #[tokio::test]
    async fn test_upload_records_event_and_quota() {
        let backend = FakeBackend::default();
        let (account, settings) = (account(), settings());
        let dir = backup_folder();

        let outcome = session(&backend, &account, &settings).upload(dir.path()).await.unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Uploaded { file_name: "prefix15062024.zip".to_string(), size: 6 }
        );

        let state = backend.state.lock().unwrap();
        assert_eq!(state.uploads, vec![dir.path().join("prefix15062024.zip")]);
        assert_eq!(state.events.len(), 1);
        let event = &state.events[0];
        assert_eq!(event.file_txn_type, TxnType::Upload);
        assert_eq!(event.file_key, "prefix15062024.zip");
        assert_eq!(event.company_id, "c-1");
        assert_eq!(event.file_txn_meta, "Uploaded to S3");
        assert_eq!(
            state.quota_updates,
            vec![QuotaUpdate { used_quota: 6, file_txn_type: TxnType::Upload }]
        );
    }

    #[tokio::test]
    async fn test_second_upload_is_noop() {
        let backend = FakeBackend::default();
        let (account, settings) = (account(), settings());
        let dir = backup_folder();
        let s = session(&backend, &account, &settings);

        s.upload(dir.path()).await.unwrap();
        let second = s.upload(dir.path()).await.unwrap();

        assert_eq!(
            second,
            UploadOutcome::AlreadyStored { key: "acme-traders/prefix15062024.zip".to_string() }
        );
        let state = backend.state.lock().unwrap();
        assert_eq!(state.uploads.len(), 1);
        assert_eq!(state.events.len(), 1);
        assert_eq!(state.quota_updates.len(), 1);
    }

    #[tokio::test]
    async fn test_probe_failure_still_uploads() {
        let backend = FakeBackend { fail_probe: true, ..Default::default() };
        let (account, settings) = (account(), settings());
        let dir = backup_folder();

        let outcome = session(&backend, &account, &settings).upload(dir.path()).await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Uploaded { .. }));
    }

    #[tokio::test]
    async fn test_empty_or_missing_archive_is_nothing_to_do() {
        let backend = FakeBackend::default();
        let (account, settings) = (account(), settings());
        let dir = tempfile::tempdir().unwrap();
        let s = session(&backend, &account, &settings);

        assert_eq!(s.upload(dir.path()).await.unwrap(), UploadOutcome::NothingToUpload);
        std::fs::write(dir.path().join("prefix01022024.zip"), b"").unwrap();
        assert_eq!(s.upload(dir.path()).await.unwrap(), UploadOutcome::NothingToUpload);
        assert!(backend.state.lock().unwrap().uploads.is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_records_nothing() {
        let backend = FakeBackend { fail_upload: true, ..Default::default() };
        let (account, settings) = (account(), settings());
        let dir = backup_folder();

        assert!(session(&backend, &account, &settings).upload(dir.path()).await.is_err());
        let state = backend.state.lock().unwrap();
        assert!(state.events.is_empty());
        assert!(state.quota_updates.is_empty());
    }

    #[tokio::test]
    async fn test_bookkeeping_failure_does_not_fail_upload() {
        let backend = FakeBackend { fail_bookkeeping: true, ..Default::default() };
        let (account, settings) = (account(), settings());
        let dir = backup_folder();

        let outcome = session(&backend, &account, &settings).upload(dir.path()).await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Uploaded { .. }));
        assert_eq!(backend.state.lock().unwrap().uploads.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_within_quota_keeps_files() {
        let backend = FakeBackend::default();
        backend.state.lock().unwrap().folder_size = 500;
        let (account, settings) = (account(), settings());

        let outcome = session(&backend, &account, &settings).delete(false).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::WithinQuota { usage: 500 });
        assert!(backend.state.lock().unwrap().deletes.is_empty());
    }

    #[tokio::test]
    async fn test_delete_over_quota() {
        let backend = FakeBackend::default();
        backend.state.lock().unwrap().folder_size = 1000;
        let (account, settings) = (account(), settings());

        let outcome = session(&backend, &account, &settings).delete(false).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted { usage: 1000 });

        let state = backend.state.lock().unwrap();
        assert_eq!(state.deletes, vec!["TallyBackups".to_string()]);
        let event = &state.events[0];
        assert_eq!(event.file_txn_type, TxnType::Delete);
        assert_eq!(event.file_name, "Acme Traders");
        assert_eq!(event.file_key, "Acme Traders/");
        assert_eq!(event.file_size, 1000);
        assert_eq!(
            state.quota_updates,
            vec![QuotaUpdate { used_quota: 1000, file_txn_type: TxnType::Delete }]
        );
    }

    #[tokio::test]
    async fn test_force_delete_ignores_quota() {
        let backend = FakeBackend::default();
        backend.state.lock().unwrap().folder_size = 1;
        let account = Account { total_quota: None, ..account() };
        let settings = settings();

        let outcome = session(&backend, &account, &settings).delete(true).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted { usage: 1 });
    }

    #[tokio::test]
    async fn test_force_delete_empty_folder() {
        let backend = FakeBackend::default();
        let (account, settings) = (account(), settings());

        let outcome = session(&backend, &account, &settings).delete(true).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::NothingToDelete);
        assert!(backend.state.lock().unwrap().deletes.is_empty());
    }

    #[tokio::test]
    async fn test_quota_gated_delete_needs_known_total() {
        let backend = FakeBackend::default();
        backend.state.lock().unwrap().folder_size = 10;
        let account = Account { total_quota: None, ..account() };
        let settings = settings();

        assert!(session(&backend, &account, &settings).delete(false).await.is_err());
        assert!(backend.state.lock().unwrap().deletes.is_empty());
    }

    #[tokio::test]
    async fn test_register_writes_credentials() {
        let backend = FakeBackend::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(config::CREDENTIAL_FILE);
        let input = std::io::Cursor::new("Acme Traders\n/data/tally\n");
        let mut output = Vec::new();

        let account = register(&backend, "https://api.example.com", input, &mut output, &path)
            .await
            .unwrap();

        assert_eq!(account.company_api_key, "new-key");
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Enter Company Name: Enter Local Folder Path: "
        );
        let registration = &backend.state.lock().unwrap().registrations[0];
        assert_eq!(registration.local_folder_path, "/data/tally");
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "API_KEY=new-key\nAPI_BASE_URL=https://api.example.com\n"
        );
    }

    #[tokio::test]
    async fn test_register_requires_input() {
        let backend = FakeBackend::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(config::CREDENTIAL_FILE);

        let result = register(&backend, "https://api.example.com", std::io::Cursor::new("\n"), Vec::new(), &path).await;
        assert!(result.is_err());
        assert!(!path.exists());
    }
}
