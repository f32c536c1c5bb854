mod api;
mod config;
mod logging;
mod modes;
mod selector;
mod store;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tracing::{error, info, warn};

use shbackup_common::backend::{BackendGateway, ObjectStore};

use api::ApiClient;
use config::{AgentConfig, AgentSettings};
use modes::{Mode, Operation, Session};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = match AgentSettings::load() {
        Ok(s) => s,
        Err(e) => {
            logging::init(&AgentSettings::default().log_dir);
            error!(error = %e, "Invalid agent settings");
            return Err(e);
        }
    };
    logging::init(&settings.log_dir);

    let mode = Mode::from_args(std::env::args().skip(1));
    let config = AgentConfig::load(settings).inspect_err(|e| {
        error!(error = %e, "Failed to load configuration");
    })?;
    let timeout = Duration::from_secs(config.settings.request_timeout_secs);

    match mode {
        Mode::Register => register(&config, timeout).await,
        Mode::Run(op) => run(op, &config, timeout).await,
    }
}

async fn register(config: &AgentConfig, timeout: Duration) -> anyhow::Result<()> {
    let client = ApiClient::new(&config.api_base_url, "", timeout)?;
    let credential_path = config::home_credential_path().inspect_err(|e| {
        error!(error = %e, "Failed to locate credential file");
    })?;

    info!("Registration Operation Started at {}...", Utc::now().to_rfc3339());
    let stdin = std::io::stdin();
    if let Err(e) = modes::register(
        &client,
        &config.api_base_url,
        stdin.lock(),
        std::io::stdout(),
        &credential_path,
    )
    .await
    {
        error!(error = %e, "Registration failed");
    }
    info!("Registration Operation Completed at {}...", Utc::now().to_rfc3339());
    Ok(())
}

async fn run(op: Operation, config: &AgentConfig, timeout: Duration) -> anyhow::Result<()> {
    let api_key = config.api_key().inspect_err(|e| {
        error!(error = %e, "Failed to load configuration");
    })?;
    let client = ApiClient::new(&config.api_base_url, api_key, timeout)
        .context("Failed to build HTTP client")?;

    let account = client.find_account(api_key).await.inspect_err(|e| {
        error!(error = %e, "Failed to fetch company");
    })?;
    if account.quota_exhausted() {
        error!(
            used = ?account.used_quota,
            total = ?account.total_quota,
            "Company has reached its usage quota"
        );
        anyhow::bail!("company {} has reached its usage quota", account.company_name);
    }
    info!(company = %account.company_name, "Company resolved");

    let store = store::from_account(&account, timeout).unwrap_or_else(|e| {
        warn!(error = %e, "Object store unavailable, skipping duplicate check");
        None
    });
    let session = Session {
        gateway: &client,
        store: store.as_ref().map(|s| s as &dyn ObjectStore),
        account: &account,
        api_key,
        settings: &config.settings,
    };

    info!("{} Operation Started at {}...", op.label(), Utc::now().to_rfc3339());
    let result = match op {
        Operation::Upload => {
            let folder = config
                .local_folder
                .clone()
                .unwrap_or_else(|| PathBuf::from(&account.local_folder));
            session.upload(&folder).await.map(|o| info!(outcome = ?o, "Upload finished"))
        }
        Operation::Delete => session.delete(false).await.map(|o| info!(outcome = ?o, "Delete finished")),
        Operation::ForceDelete => session.delete(true).await.map(|o| info!(outcome = ?o, "Delete finished")),
    };
    if let Err(e) = result {
        error!(error = %format!("{e:#}"), "{} operation failed", op.label());
    }
    info!("{} Operation Completed at {}...", op.label(), Utc::now().to_rfc3339());
    Ok(())
}
