use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{CatalogItem, ItemId, MediaKind, Sequence, SequenceDocument, SequenceId, UserId},
    protocol::MediaItemRecord,
};
use tokio::sync::{Mutex, Notify};

use crate::{
    catalog::Catalog, AuthService, BlobStore, Collaborators, DocumentStore, MediaFile, StaticAuth,
};

pub const TEST_USER: UserId = UserId(7);

pub fn item(kind: MediaKind, id: &str, name: &str) -> CatalogItem {
    CatalogItem {
        id: ItemId::from(id),
        kind,
        display_name: name.to_string(),
        description: String::new(),
        preview_url: format!("http://media.test/{kind}/{id}"),
    }
}

pub fn catalog_of(items: &[CatalogItem]) -> Arc<Catalog> {
    let models = items
        .iter()
        .filter(|i| i.kind == MediaKind::Model)
        .cloned()
        .collect();
    let videos = items
        .iter()
        .filter(|i| i.kind == MediaKind::Video)
        .cloned()
        .collect();
    Arc::new(Catalog::new(models, videos))
}

pub fn auth() -> Arc<dyn AuthService> {
    Arc::new(StaticAuth(TEST_USER))
}

pub fn collaborators(documents: Arc<FakeDocumentStore>, blobs: Arc<FakeBlobStore>) -> Collaborators {
    Collaborators::new(auth(), documents, blobs)
}

/// In-memory document store that counts writes and can be told to fail.
#[derive(Default)]
pub struct FakeDocumentStore {
    media: Mutex<Vec<MediaItemRecord>>,
    sequences: Mutex<Vec<Sequence>>,
    fail_with: Mutex<Option<String>>,
    fail_media_listing: AtomicBool,
    pub put_sequence_calls: AtomicUsize,
    pub delete_sequence_calls: AtomicUsize,
    pub list_media_calls: AtomicUsize,
}

impl FakeDocumentStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn with_items(items: &[CatalogItem]) -> Arc<Self> {
        let store = Self::new();
        for item in items {
            store.put_media(TEST_USER, item).await.expect("seed media");
        }
        store
    }

    pub async fn insert_sequence(&self, id: &str, document: SequenceDocument) {
        self.sequences.lock().await.push(Sequence {
            id: SequenceId::from(id),
            document,
        });
    }

    pub async fn stored(&self, id: &SequenceId) -> Option<SequenceDocument> {
        self.sequences
            .lock()
            .await
            .iter()
            .find(|s| &s.id == id)
            .map(|s| s.document.clone())
    }

    pub async fn sequence_count(&self) -> usize {
        self.sequences.lock().await.len()
    }

    pub async fn fail_writes(&self, message: &str) {
        *self.fail_with.lock().await = Some(message.to_string());
    }

    pub async fn heal(&self) {
        *self.fail_with.lock().await = None;
    }

    pub fn fail_media_listing(&self) {
        self.fail_media_listing.store(true, Ordering::SeqCst);
    }

    pub fn puts(&self) -> usize {
        self.put_sequence_calls.load(Ordering::SeqCst)
    }

    async fn check_failure(&self) -> Result<()> {
        match self.fail_with.lock().await.as_ref() {
            Some(message) => Err(anyhow!(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for FakeDocumentStore {
    async fn list_media(&self, _user_id: UserId, kind: MediaKind) -> Result<Vec<MediaItemRecord>> {
        self.list_media_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_media_listing.load(Ordering::SeqCst) {
            return Err(anyhow!("catalog backend offline"));
        }
        Ok(self
            .media
            .lock()
            .await
            .iter()
            .filter(|r| r.item.kind == kind)
            .cloned()
            .collect())
    }

    async fn put_media(&self, _user_id: UserId, item: &CatalogItem) -> Result<MediaItemRecord> {
        self.check_failure().await?;
        let now = Utc::now();
        let mut media = self.media.lock().await;
        if let Some(existing) = media
            .iter_mut()
            .find(|r| r.item.kind == item.kind && r.item.id == item.id)
        {
            existing.item = item.clone();
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let record = MediaItemRecord {
            item: item.clone(),
            created_at: now,
            updated_at: now,
        };
        media.push(record.clone());
        Ok(record)
    }

    async fn delete_media(
        &self,
        _user_id: UserId,
        kind: MediaKind,
        item_id: &ItemId,
    ) -> Result<()> {
        self.check_failure().await?;
        let mut media = self.media.lock().await;
        let before = media.len();
        media.retain(|r| !(r.item.kind == kind && &r.item.id == item_id));
        if media.len() == before {
            return Err(anyhow!("{kind} '{item_id}' not found"));
        }
        Ok(())
    }

    async fn list_sequences(&self, _user_id: UserId) -> Result<Vec<Sequence>> {
        Ok(self.sequences.lock().await.clone())
    }

    async fn get_sequence(
        &self,
        _user_id: UserId,
        sequence_id: &SequenceId,
    ) -> Result<Option<SequenceDocument>> {
        Ok(self.stored(sequence_id).await)
    }

    async fn put_sequence(
        &self,
        _user_id: UserId,
        sequence_id: &SequenceId,
        document: &SequenceDocument,
    ) -> Result<()> {
        self.put_sequence_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure().await?;
        let mut sequences = self.sequences.lock().await;
        match sequences.iter_mut().find(|s| &s.id == sequence_id) {
            Some(existing) => existing.document = document.clone(),
            None => sequences.push(Sequence {
                id: sequence_id.clone(),
                document: document.clone(),
            }),
        }
        Ok(())
    }

    async fn delete_sequence(&self, _user_id: UserId, sequence_id: &SequenceId) -> Result<()> {
        self.delete_sequence_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure().await?;
        let mut sequences = self.sequences.lock().await;
        let before = sequences.len();
        sequences.retain(|s| &s.id != sequence_id);
        if sequences.len() == before {
            return Err(anyhow!("sequence '{sequence_id}' not found"));
        }
        Ok(())
    }
}

/// In-memory blob store. `gate` holds uploads until notified.
#[derive(Default)]
pub struct FakeBlobStore {
    blobs: Mutex<HashMap<(MediaKind, ItemId), Vec<u8>>>,
    pub gate: Option<Arc<Notify>>,
    pub fail_deletes: AtomicBool,
}

impl FakeBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Self::default()
        })
    }

    pub async fn bytes(&self, kind: MediaKind, item_id: &ItemId) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .await
            .get(&(kind, item_id.clone()))
            .cloned()
    }

    pub async fn blob_count(&self) -> usize {
        self.blobs.lock().await.len()
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn upload(
        &self,
        _user_id: UserId,
        kind: MediaKind,
        item_id: &ItemId,
        file: &MediaFile,
    ) -> Result<String> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.blobs
            .lock()
            .await
            .insert((kind, item_id.clone()), file.bytes.clone());
        Ok(format!("http://media.test/blobs/{kind}/{item_id}"))
    }

    async fn delete(&self, _user_id: UserId, kind: MediaKind, item_id: &ItemId) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(anyhow!("blob backend offline"));
        }
        self.blobs.lock().await.remove(&(kind, item_id.clone()));
        Ok(())
    }
}
