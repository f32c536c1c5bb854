//! Decoding of backend error responses.
//!
//! The backend reports failures as `{"detail": ...}` where `detail` is either
//! a plain message or a list of validation items. Anything else is kept as
//! raw text so it still reaches the logs.

use std::fmt;

use serde::Deserialize;

/// One validation failure inside a structured `detail` list.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DetailItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "loc", default)]
    pub path: Vec<serde_json::Value>,
    #[serde(rename = "msg", default)]
    pub message: String,
}

impl DetailItem {
    fn location(&self) -> String {
        self.path
            .iter()
            .map(|seg| match seg {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("->")
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
enum Detail {
    Simple(String),
    Structured(Vec<DetailItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorBody {
    Simple(String),
    Structured(Vec<DetailItem>),
    /// JSON object without a `detail` field.
    MissingDetail,
    /// `detail` present but neither a string nor a list of items.
    Unrecognized(String),
    /// Body was not a JSON object at all.
    Raw(String),
}

impl ErrorBody {
    pub fn parse(body: &[u8]) -> Self {
        let object: serde_json::Map<String, serde_json::Value> = match serde_json::from_slice(body) {
            Ok(obj) => obj,
            Err(_) => return ErrorBody::Raw(String::from_utf8_lossy(body).into_owned()),
        };
        let Some(detail) = object.get("detail") else {
            return ErrorBody::MissingDetail;
        };
        match Detail::deserialize(detail) {
            Ok(Detail::Simple(msg)) => ErrorBody::Simple(msg),
            Ok(Detail::Structured(items)) => ErrorBody::Structured(items),
            Err(_) => ErrorBody::Unrecognized(detail.to_string()),
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorBody::Simple(msg) => f.write_str(msg),
            ErrorBody::Structured(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|item| {
                        format!(
                            "Type: {}, Location: {}, Message: {}",
                            item.kind,
                            item.location(),
                            item.message
                        )
                    })
                    .collect();
                f.write_str(&parts.join("; "))
            }
            ErrorBody::MissingDetail => f.write_str("unknown error format: missing 'detail' field"),
            ErrorBody::Unrecognized(raw) => write!(f, "unrecognized detail format: {raw}"),
            ErrorBody::Raw(text) => write!(f, "unparsed error body: {text}"),
        }
    }
}
