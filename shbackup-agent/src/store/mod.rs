pub mod s3;

use std::time::Duration;

use shbackup_common::documents::Account;

use self::s3::{S3Config, S3Store};

/// Build the existence probe for an account's bucket.
///
/// Returns `Ok(None)` when the account carries no bucket credentials; uploads
/// then go ahead without the duplicate check.
pub fn from_account(account: &Account, timeout: Duration) -> anyhow::Result<Option<S3Store>> {
    if account.bucket_name.is_empty()
        || account.access_key.is_empty()
        || account.secret_key.is_empty()
    {
        return Ok(None);
    }
    let region = if account.region.is_empty() {
        "us-east-1".to_string()
    } else {
        account.region.clone()
    };
    let store = S3Store::new(
        S3Config {
            bucket: account.bucket_name.clone(),
            region,
            endpoint: std::env::var("S3_ENDPOINT").ok().filter(|e| !e.is_empty()),
            access_key_id: account.access_key.clone(),
            secret_access_key: account.secret_key.clone(),
        },
        timeout,
    )?;
    Ok(Some(store))
}
