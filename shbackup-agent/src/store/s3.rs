//! S3 existence probe.
//!
//! Signs a HEAD request with AWS Signature V4 using the bucket credentials
//! carried on the account record, so no SDK dependency is needed.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::debug;

use shbackup_common::backend::ObjectStore;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

pub struct S3Store {
    config: S3Config,
    client: Client,
}

impl S3Store {
    pub fn new(config: S3Config, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        match &self.config.endpoint {
            Some(ep) => ep.trim_end_matches('/').to_string(),
            None => format!(
                "https://s3.{}.amazonaws.com/{}",
                self.config.region, self.config.bucket
            ),
        }
    }

    /// Path component as it appears on the wire and in the canonical request.
    fn canonical_path(&self, key: &str) -> String {
        let endpoint = self.endpoint();
        let without_scheme = endpoint
            .strip_prefix("https://")
            .or_else(|| endpoint.strip_prefix("http://"))
            .unwrap_or(&endpoint);
        let base_path = without_scheme
            .find('/')
            .map(|i| &without_scheme[i..])
            .unwrap_or("");
        let encoded_key: Vec<String> = key
            .split('/')
            .map(|seg| urlencoding::encode(seg).into_owned())
            .collect();
        format!("{}/{}", base_path.trim_end_matches('/'), encoded_key.join("/"))
    }

    fn object_url(&self, key: &str) -> String {
        let endpoint = self.endpoint();
        let host = url_host(&endpoint);
        let scheme = if endpoint.starts_with("http://") { "http" } else { "https" };
        format!("{}://{}{}", scheme, host, self.canonical_path(key))
    }

    /// Authorization header value for a request with an empty body.
    fn sign(
        &self,
        method: &str,
        canonical_path: &str,
        headers: &BTreeMap<String, String>,
        body_hash: &str,
        now: DateTime<Utc>,
    ) -> String {
        let date_time = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();
        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method, canonical_path, canonical_headers, signed_headers, body_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            date_time,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signing_key =
            derive_signing_key(&self.config.secret_access_key, &date, &self.config.region);
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        format!(
            "AWS4-HMAC-SHA256 Credential={}/{},SignedHeaders={},Signature={}",
            self.config.access_key_id, credential_scope, signed_headers, signature
        )
    }
}

fn derive_signing_key(secret: &str, date: &str, region: &str) -> Vec<u8> {
    let key = format!("AWS4{}", secret);
    let k_date = hmac_sha256(key.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let now = Utc::now();
        let date_time = now.format("%Y%m%dT%H%M%SZ").to_string();
        let empty_hash = hex::encode(Sha256::digest(b""));
        let path = self.canonical_path(key);

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), url_host(&self.endpoint()));
        headers.insert("x-amz-content-sha256".to_string(), empty_hash.clone());
        headers.insert("x-amz-date".to_string(), date_time.clone());

        let auth = self.sign("HEAD", &path, &headers, &empty_hash, now);

        let resp = self
            .client
            .head(self.object_url(key))
            .header("x-amz-date", &date_time)
            .header("x-amz-content-sha256", &empty_hash)
            .header("Authorization", &auth)
            .send()
            .await
            .context("S3 HEAD request failed")?;

        match resp.status().as_u16() {
            200 => {
                debug!(key = %key, "Object exists");
                Ok(true)
            }
            404 => Ok(false),
            status => bail!("S3 HEAD failed: HTTP {} for {}", status, key),
        }
    }
}

/// Extract the host part from a URL for use in signing.
fn url_host(url: &str) -> String {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    without_scheme.split('/').next().unwrap_or(without_scheme).to_string()
}
