use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Timestamp layout used by the backend for account dates (no zone).
pub const ACCOUNT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// ── Account ──

/// Company account record as returned by `GET /api/companies/by-api-key`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Account {
    #[serde(default)]
    pub id: String,
    #[serde(default, deserialize_with = "account_time")]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub company_api_key: String,
    #[serde(default, rename = "local_folder_path")]
    pub local_folder: String,
    #[serde(default, deserialize_with = "account_time")]
    pub start_date: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "account_time")]
    pub end_date: Option<NaiveDateTime>,
    #[serde(default, rename = "total_usage_quota")]
    pub total_quota: Option<i64>,
    #[serde(default)]
    pub used_quota: Option<i64>,
    #[serde(default, rename = "aws_bucket_name")]
    pub bucket_name: String,
    #[serde(default, rename = "aws_bucket_region")]
    pub region: String,
    #[serde(default, rename = "aws_access_key")]
    pub access_key: String,
    #[serde(default, rename = "aws_secret_key")]
    pub secret_key: String,
    #[serde(default)]
    pub api_base_url: String,
}

impl Account {
    /// True when both quotas are known and usage has reached the total.
    pub fn quota_exhausted(&self) -> bool {
        matches!(
            (self.used_quota, self.total_quota),
            (Some(used), Some(total)) if used >= total
        )
    }

    /// Storage folder for this company: the slugified company name.
    pub fn folder(&self) -> String {
        slugify(&self.company_name)
    }

    /// Object key a local archive is stored under.
    pub fn object_key(&self, file_name: &str) -> String {
        format!("{}/{}", self.folder(), file_name)
    }
}

fn account_time<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(s) => NaiveDateTime::parse_from_str(s, ACCOUNT_TIME_FORMAT)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]+").expect("static regex is valid"));

/// Lowercase, collapse non-alphanumeric runs into `-`, trim dashes.
pub fn slugify(input: &str) -> String {
    let lower = input.to_lowercase();
    NON_ALPHANUMERIC
        .replace_all(&lower, "-")
        .trim_matches('-')
        .to_string()
}

// ── File events ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnType {
    Upload,
    Delete,
}

impl TxnType {
    pub fn code(self) -> i16 {
        match self {
            TxnType::Upload => 1,
            TxnType::Delete => 2,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(TxnType::Upload),
            2 => Some(TxnType::Delete),
            _ => None,
        }
    }
}

impl Serialize for TxnType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i16(self.code())
    }
}

impl<'de> Deserialize<'de> for TxnType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i16::deserialize(deserializer)?;
        TxnType::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown file_txn_type {code}")))
    }
}

/// Transfer record posted to `/api/filemeta` after an upload or delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEvent {
    pub id: String,
    pub created_at: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_key: String,
    pub company_id: String,
    pub file_txn_type: TxnType,
    pub file_txn_meta: String,
}

impl FileEvent {
    pub fn new(
        txn: TxnType,
        account: &Account,
        file_name: impl Into<String>,
        file_key: impl Into<String>,
        file_size: i64,
        note: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now().to_rfc3339(),
            file_name: file_name.into(),
            file_size,
            file_key: file_key.into(),
            company_id: account.id.clone(),
            file_txn_type: txn,
            file_txn_meta: note.into(),
        }
    }
}

/// Body of `PATCH /api/companies/quota`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotaUpdate {
    pub used_quota: i64,
    pub file_txn_type: TxnType,
}

// ── Upload / delete requests ──

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PresignRequest {
    pub file_name: String,
    pub content_size: i64,
    pub loc_tag: String,
}

/// Pre-authorised POST target for a single object upload.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PresignedUpload {
    pub url: String,
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

impl PresignedUpload {
    /// Names of the policy fields, in the order they precede the file part.
    pub const FORM_FIELDS: [&'static str; 7] = [
        "key",
        "x-amz-algorithm",
        "x-amz-credential",
        "x-amz-date",
        "policy",
        "x-amz-signature",
        "Content-Type",
    ];

    /// Non-empty form fields in submission order. The file part goes last.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        Self::FORM_FIELDS
            .iter()
            .filter_map(|name| {
                self.fields
                    .get(*name)
                    .filter(|v| !v.is_empty())
                    .map(|v| (*name, v.clone()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FolderInfo {
    #[serde(default)]
    pub loc_tag: Option<String>,
    pub total_size: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeleteRequest {
    pub loc_tag: String,
}

// ── Registration ──

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CompanyRegistration {
    pub company_name: String,
    pub local_folder_path: String,
    #[serde(rename = "aws_bucket_name", skip_serializing_if = "String::is_empty")]
    pub bucket_name: String,
    #[serde(rename = "aws_bucket_region", skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(rename = "aws_access_key", skip_serializing_if = "String::is_empty")]
    pub access_key: String,
    #[serde(rename = "aws_secret_key", skip_serializing_if = "String::is_empty")]
    pub secret_key: String,
}
