use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::CatalogItem;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: i64,
}

/// A catalog item together with its bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItemRecord {
    #[serde(flatten)]
    pub item: CatalogItem,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub models: Vec<MediaItemRecord>,
    pub videos: Vec<MediaItemRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutMediaItemRequest {
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "previewURL")]
    pub preview_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobUploadResponse {
    pub url: String,
    pub size_bytes: u64,
}
