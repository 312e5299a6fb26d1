//! Front API resource records.
//!
//! Each record names the fields the exporter reads and keeps every other
//! field in `extra`, so writing a record back out reproduces what the API
//! sent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// One page of a cursor-paginated collection.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(rename = "_results")]
    pub results: Vec<T>,
    #[serde(rename = "_pagination", default)]
    pub pagination: Option<Pagination>,
}

impl<T> Page<T> {
    /// URL of the following page, if any.
    pub fn next_url(&self) -> Option<&str> {
        self.pagination
            .as_ref()
            .and_then(|p| p.next.as_deref())
            .filter(|next| !next.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inbox {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Unix seconds, possibly fractional. Kept as sent so an integer
    /// timestamp is written back as an integer.
    pub created_at: Number,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn attachments(&self) -> &[Attachment] {
        self.attachments.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    /// Unix seconds, possibly fractional.
    pub posted_at: Number,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
