use std::sync::Arc;

use anyhow::{Context, Result};
use shared::{
    domain::{CatalogItem, ItemId, MediaKind, UserId},
    protocol::MediaItemRecord,
};
use tracing::{info, warn};

use crate::DocumentStore;

/// Read-only snapshot of a user's models and videos, in creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    models: Vec<CatalogItem>,
    videos: Vec<CatalogItem>,
}

impl Catalog {
    pub fn new(models: Vec<CatalogItem>, videos: Vec<CatalogItem>) -> Self {
        Self {
            models: only_kind(models, MediaKind::Model),
            videos: only_kind(videos, MediaKind::Video),
        }
    }

    pub fn from_records(models: Vec<MediaItemRecord>, videos: Vec<MediaItemRecord>) -> Self {
        Self::new(
            models.into_iter().map(|r| r.item).collect(),
            videos.into_iter().map(|r| r.item).collect(),
        )
    }

    pub fn models(&self) -> &[CatalogItem] {
        &self.models
    }

    pub fn videos(&self) -> &[CatalogItem] {
        &self.videos
    }

    pub fn items(&self, kind: MediaKind) -> &[CatalogItem] {
        match kind {
            MediaKind::Model => &self.models,
            MediaKind::Video => &self.videos,
        }
    }

    /// First item of `kind` with `item_id`. Duplicate ids resolve to the
    /// earliest created.
    pub fn find(&self, kind: MediaKind, item_id: &ItemId) -> Option<&CatalogItem> {
        self.items(kind).iter().find(|item| &item.id == item_id)
    }

    pub fn len(&self) -> usize {
        self.models.len() + self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.videos.is_empty()
    }
}

fn only_kind(items: Vec<CatalogItem>, kind: MediaKind) -> Vec<CatalogItem> {
    items
        .into_iter()
        .filter(|item| {
            let matches = item.kind == kind;
            if !matches {
                warn!(item_id = %item.id, expected = %kind, actual = %item.kind, "dropping catalog item listed under the wrong kind");
            }
            matches
        })
        .collect()
}

#[derive(Clone)]
pub struct CatalogLoader {
    documents: Arc<dyn DocumentStore>,
}

impl CatalogLoader {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    /// Fetches both kinds concurrently. Fails if either listing fails.
    pub async fn load(&self, user_id: UserId) -> Result<Catalog> {
        let (models, videos) = futures::try_join!(
            self.documents.list_media(user_id, MediaKind::Model),
            self.documents.list_media(user_id, MediaKind::Video),
        )
        .context("failed to load media catalog")?;
        let catalog = Catalog::from_records(models, videos);
        info!(
            user_id = user_id.0,
            models = catalog.models().len(),
            videos = catalog.videos().len(),
            "catalog loaded"
        );
        Ok(catalog)
    }
}

#[cfg(test)]
#[path = "tests/catalog_tests.rs"]
mod tests;
