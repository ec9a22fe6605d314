use std::sync::atomic::{AtomicBool, Ordering};

use shared::{
    domain::{CatalogItem, ItemId, MediaKind, UserId},
    protocol::MediaItemRecord,
};
use tracing::{info, warn};

use crate::{error::LibraryError, Collaborators, MediaFile, MediaUpload};

/// Upload, edit and removal of the models and videos that sequences point at.
pub struct MediaLibrary {
    collaborators: Collaborators,
    uploading: AtomicBool,
}

struct UploadGuard<'a>(&'a AtomicBool);

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MediaLibrary {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            uploading: AtomicBool::new(false),
        }
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::Acquire)
    }

    /// Items of `kind` in creation order.
    pub async fn list(&self, kind: MediaKind) -> Result<Vec<MediaItemRecord>, LibraryError> {
        let user_id = self.user().await?;
        self.collaborators
            .documents
            .list_media(user_id, kind)
            .await
            .map_err(LibraryError::persistence)
    }

    /// Stores the file, then records the item with the returned preview URL.
    /// Only one upload may be in flight at a time.
    pub async fn upload(
        &self,
        kind: MediaKind,
        upload: MediaUpload,
    ) -> Result<MediaItemRecord, LibraryError> {
        require_name(&upload.display_name)?;
        require_bytes(&upload.file)?;
        let _guard = self.begin_upload()?;

        let user_id = self.user().await?;
        let item_id = ItemId::generate();
        let preview_url = self
            .collaborators
            .blobs
            .upload(user_id, kind, &item_id, &upload.file)
            .await
            .map_err(LibraryError::persistence)?;
        let item = CatalogItem {
            id: item_id,
            kind,
            display_name: upload.display_name,
            description: upload.description,
            preview_url,
        };
        let record = match self.collaborators.documents.put_media(user_id, &item).await {
            Ok(record) => record,
            Err(error) => {
                if let Err(cleanup) = self
                    .collaborators
                    .blobs
                    .delete(user_id, kind, &item.id)
                    .await
                {
                    warn!(%kind, item_id = %item.id, error = %format!("{cleanup:#}"), "failed to remove blob after record write failed");
                }
                return Err(LibraryError::persistence(error));
            }
        };
        info!(%kind, item_id = %record.item.id, "media uploaded");
        Ok(record)
    }

    /// Renames or re-describes an item, keeping its file.
    pub async fn update(
        &self,
        kind: MediaKind,
        item_id: &ItemId,
        display_name: &str,
        description: &str,
    ) -> Result<MediaItemRecord, LibraryError> {
        require_name(display_name)?;
        let user_id = self.user().await?;
        let mut item = self.find(user_id, kind, item_id).await?;
        item.display_name = display_name.to_string();
        item.description = description.to_string();
        self.collaborators
            .documents
            .put_media(user_id, &item)
            .await
            .map_err(LibraryError::persistence)
    }

    /// Uploads a new file for an existing item, keeping its metadata.
    pub async fn replace_file(
        &self,
        kind: MediaKind,
        item_id: &ItemId,
        file: MediaFile,
    ) -> Result<MediaItemRecord, LibraryError> {
        require_bytes(&file)?;
        let _guard = self.begin_upload()?;
        let user_id = self.user().await?;
        let mut item = self.find(user_id, kind, item_id).await?;
        item.preview_url = self
            .collaborators
            .blobs
            .upload(user_id, kind, item_id, &file)
            .await
            .map_err(LibraryError::persistence)?;
        self.collaborators
            .documents
            .put_media(user_id, &item)
            .await
            .map_err(LibraryError::persistence)
    }

    /// Deletes the file and then the record. Sequences that reference the
    /// item are left as they are.
    pub async fn delete(&self, kind: MediaKind, item_id: &ItemId) -> Result<(), LibraryError> {
        let user_id = self.user().await?;
        if let Err(error) = self.collaborators.blobs.delete(user_id, kind, item_id).await {
            warn!(%kind, item_id = %item_id, error = %format!("{error:#}"), "blob delete failed; removing record anyway");
        }
        self.collaborators
            .documents
            .delete_media(user_id, kind, item_id)
            .await
            .map_err(LibraryError::persistence)?;
        info!(%kind, item_id = %item_id, "media deleted");
        Ok(())
    }

    async fn user(&self) -> Result<UserId, LibraryError> {
        self.collaborators
            .auth
            .current_user()
            .await
            .map_err(LibraryError::persistence)
    }

    async fn find(
        &self,
        user_id: UserId,
        kind: MediaKind,
        item_id: &ItemId,
    ) -> Result<CatalogItem, LibraryError> {
        let records = self
            .collaborators
            .documents
            .list_media(user_id, kind)
            .await
            .map_err(LibraryError::persistence)?;
        records
            .into_iter()
            .map(|record| record.item)
            .find(|item| &item.id == item_id)
            .ok_or_else(|| LibraryError::NotFound {
                kind,
                item_id: item_id.clone(),
            })
    }

    fn begin_upload(&self) -> Result<UploadGuard<'_>, LibraryError> {
        self.uploading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| LibraryError::Busy)?;
        Ok(UploadGuard(&self.uploading))
    }
}

fn require_name(display_name: &str) -> Result<(), LibraryError> {
    if display_name.trim().is_empty() {
        return Err(LibraryError::Validation("display name is required".into()));
    }
    Ok(())
}

fn require_bytes(file: &MediaFile) -> Result<(), LibraryError> {
    if file.bytes.is_empty() {
        return Err(LibraryError::Validation("file is empty".into()));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/library_tests.rs"]
mod tests;
