use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{CatalogItem, ItemId, MediaKind, Sequence, SequenceDocument, SequenceId, UserId},
    protocol::MediaItemRecord,
};

pub mod browser;
pub mod catalog;
pub mod editor;
pub mod entries;
pub mod error;
pub mod http;
pub mod library;

pub use browser::SequenceBrowser;
pub use catalog::{Catalog, CatalogLoader};
pub use editor::{EditorPhase, SaveOutcome, SequenceEditor};
pub use entries::{reconcile, resolve, EntryList, Reconciled, SequenceEntry};
pub use error::{EditorError, LibraryError, ResolutionError};
pub use http::{HttpBlobStore, HttpDocumentStore, HttpTransport, SessionAuth};
pub use library::MediaLibrary;

/// Yields the identity every read and write is scoped to.
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn current_user(&self) -> Result<UserId>;
}

/// Per-user document store holding catalog items and sequences.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Items of one kind in creation order.
    async fn list_media(&self, user_id: UserId, kind: MediaKind) -> Result<Vec<MediaItemRecord>>;
    async fn put_media(&self, user_id: UserId, item: &CatalogItem) -> Result<MediaItemRecord>;
    async fn delete_media(&self, user_id: UserId, kind: MediaKind, item_id: &ItemId)
        -> Result<()>;
    async fn list_sequences(&self, user_id: UserId) -> Result<Vec<Sequence>>;
    /// `Ok(None)` when no document exists under `sequence_id`.
    async fn get_sequence(
        &self,
        user_id: UserId,
        sequence_id: &SequenceId,
    ) -> Result<Option<SequenceDocument>>;
    /// Creates or fully replaces the document.
    async fn put_sequence(
        &self,
        user_id: UserId,
        sequence_id: &SequenceId,
        document: &SequenceDocument,
    ) -> Result<()>;
    async fn delete_sequence(&self, user_id: UserId, sequence_id: &SequenceId) -> Result<()>;
}

/// Binary storage for uploaded media files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the file and returns its preview URL.
    async fn upload(
        &self,
        user_id: UserId,
        kind: MediaKind,
        item_id: &ItemId,
        file: &MediaFile,
    ) -> Result<String>;
    async fn delete(&self, user_id: UserId, kind: MediaKind, item_id: &ItemId) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// A new catalog item together with the file backing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub display_name: String,
    pub description: String,
    pub file: MediaFile,
}

/// Auth for an identity that is already known, e.g. from a previous login.
pub struct StaticAuth(pub UserId);

#[async_trait]
impl AuthService for StaticAuth {
    async fn current_user(&self) -> Result<UserId> {
        Ok(self.0)
    }
}

/// Handles to the three backing services, shared by every session.
#[derive(Clone)]
pub struct Collaborators {
    pub auth: Arc<dyn AuthService>,
    pub documents: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl Collaborators {
    pub fn new(
        auth: Arc<dyn AuthService>,
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            auth,
            documents,
            blobs,
        }
    }

    /// Collaborators talking to a media server over HTTP.
    pub fn http(transport: HttpTransport, auth: Arc<SessionAuth>) -> Self {
        Self {
            auth,
            documents: Arc::new(HttpDocumentStore::new(transport.clone())),
            blobs: Arc::new(HttpBlobStore::new(transport)),
        }
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
