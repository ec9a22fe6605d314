use chrono::Utc;
use shared::{
    domain::{CatalogItem, ItemId, MediaKind, Sequence, SequenceDocument, SequenceId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{BlobUploadResponse, CatalogSnapshot, MediaItemRecord, PutMediaItemRequest},
};
use storage::{Storage, StoredBlob};
use tracing::{info, warn};

pub const DEFAULT_MAX_BLOB_BYTES: usize = 64 * 1024 * 1024;
pub const MAX_FILENAME_BYTES: usize = 180;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    /// Base URL used to build `previewURL`s for stored blobs.
    pub public_url: String,
    pub max_blob_bytes: usize,
}

impl ApiContext {
    pub fn blob_url(&self, user_id: UserId, kind: MediaKind, item_id: &ItemId) -> String {
        format!(
            "{}{}",
            self.public_url.trim_end_matches('/'),
            blob_route(user_id, kind, item_id)
        )
    }
}

pub fn blob_route(user_id: UserId, kind: MediaKind, item_id: &ItemId) -> String {
    format!("/users/{}/blobs/{}/{}", user_id.0, kind, item_id)
}

pub async fn login(ctx: &ApiContext, username: &str) -> Result<UserId, ApiError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ApiError::validation("username required"));
    }
    let user_id = ctx.storage.create_user(username).await.map_err(internal)?;
    info!(user_id = user_id.0, "user logged in");
    Ok(user_id)
}

pub async fn load_catalog(ctx: &ApiContext, user_id: UserId) -> Result<CatalogSnapshot, ApiError> {
    ensure_user(ctx, user_id).await?;
    let models = ctx
        .storage
        .list_media_items(user_id, MediaKind::Model)
        .await
        .map_err(internal)?;
    let videos = ctx
        .storage
        .list_media_items(user_id, MediaKind::Video)
        .await
        .map_err(internal)?;
    Ok(CatalogSnapshot { models, videos })
}

pub async fn list_media(
    ctx: &ApiContext,
    user_id: UserId,
    kind: MediaKind,
) -> Result<Vec<MediaItemRecord>, ApiError> {
    ensure_user(ctx, user_id).await?;
    ctx.storage
        .list_media_items(user_id, kind)
        .await
        .map_err(internal)
}

pub async fn put_media_item(
    ctx: &ApiContext,
    user_id: UserId,
    kind: MediaKind,
    item_id: ItemId,
    req: PutMediaItemRequest,
) -> Result<MediaItemRecord, ApiError> {
    ensure_user(ctx, user_id).await?;
    validate_id(item_id.as_str(), "item id")?;
    let display_name = req.display_name.trim();
    if display_name.is_empty() {
        return Err(ApiError::validation("name required"));
    }
    let item = CatalogItem {
        id: item_id,
        kind,
        display_name: display_name.to_string(),
        description: req.description,
        preview_url: req.preview_url,
    };
    let record = ctx
        .storage
        .upsert_media_item(user_id, &item, Utc::now())
        .await
        .map_err(internal)?;
    info!(
        user_id = user_id.0,
        kind = %kind,
        item_id = %record.item.id,
        "media item stored"
    );
    Ok(record)
}

/// Removes a catalog item and its blob. Sequences that reference the item
/// are left untouched.
pub async fn delete_media_item(
    ctx: &ApiContext,
    user_id: UserId,
    kind: MediaKind,
    item_id: &ItemId,
) -> Result<(), ApiError> {
    ensure_user(ctx, user_id).await?;
    let removed = ctx
        .storage
        .delete_media_item(user_id, kind, item_id)
        .await
        .map_err(internal)?;
    if !removed {
        return Err(ApiError::not_found(format!("{kind} '{item_id}' not found")));
    }
    if !ctx
        .storage
        .delete_blob(user_id, kind, item_id)
        .await
        .map_err(internal)?
    {
        warn!(user_id = user_id.0, kind = %kind, item_id = %item_id, "media item had no blob");
    }
    info!(user_id = user_id.0, kind = %kind, item_id = %item_id, "media item deleted");
    Ok(())
}

pub async fn list_sequences(ctx: &ApiContext, user_id: UserId) -> Result<Vec<Sequence>, ApiError> {
    ensure_user(ctx, user_id).await?;
    ctx.storage.list_sequences(user_id).await.map_err(internal)
}

pub async fn get_sequence(
    ctx: &ApiContext,
    user_id: UserId,
    sequence_id: &SequenceId,
) -> Result<SequenceDocument, ApiError> {
    ensure_user(ctx, user_id).await?;
    ctx.storage
        .load_sequence(user_id, sequence_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found(format!("sequence '{sequence_id}' not found")))
}

/// Stores the document as given. Timestamps are owned by the editor that
/// writes them.
pub async fn put_sequence(
    ctx: &ApiContext,
    user_id: UserId,
    sequence_id: &SequenceId,
    document: SequenceDocument,
) -> Result<SequenceDocument, ApiError> {
    ensure_user(ctx, user_id).await?;
    validate_id(sequence_id.as_str(), "sequence id")?;
    if document.name.trim().is_empty() {
        return Err(ApiError::validation("name required"));
    }
    if document.updated_at < document.created_at {
        return Err(ApiError::validation("updatedAt precedes createdAt"));
    }
    ctx.storage
        .put_sequence(user_id, sequence_id, &document)
        .await
        .map_err(internal)?;
    info!(
        user_id = user_id.0,
        sequence_id = %sequence_id,
        entries = document.sequence.len(),
        "sequence stored"
    );
    Ok(document)
}

pub async fn delete_sequence(
    ctx: &ApiContext,
    user_id: UserId,
    sequence_id: &SequenceId,
) -> Result<(), ApiError> {
    ensure_user(ctx, user_id).await?;
    let removed = ctx
        .storage
        .delete_sequence(user_id, sequence_id)
        .await
        .map_err(internal)?;
    if !removed {
        return Err(ApiError::not_found(format!(
            "sequence '{sequence_id}' not found"
        )));
    }
    info!(user_id = user_id.0, sequence_id = %sequence_id, "sequence deleted");
    Ok(())
}

pub async fn store_blob(
    ctx: &ApiContext,
    user_id: UserId,
    kind: MediaKind,
    item_id: &ItemId,
    bytes: &[u8],
    mime_type: Option<&str>,
    filename: Option<&str>,
) -> Result<BlobUploadResponse, ApiError> {
    ensure_user(ctx, user_id).await?;
    validate_id(item_id.as_str(), "item id")?;
    if bytes.is_empty() {
        return Err(ApiError::validation("blob body cannot be empty"));
    }
    if bytes.len() > ctx.max_blob_bytes {
        return Err(ApiError::new(
            ErrorCode::PayloadTooLarge,
            format!("blob exceeds {} bytes", ctx.max_blob_bytes),
        ));
    }

    let filename = filename.map(str::trim).filter(|name| !name.is_empty());
    if let Some(name) = filename {
        if name.len() > MAX_FILENAME_BYTES {
            return Err(ApiError::validation("filename is too long"));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(ApiError::validation(
                "filename must not contain path separators",
            ));
        }
    }
    let mime_type = mime_type.map(str::trim).filter(|mime| !mime.is_empty());

    let size_bytes = ctx
        .storage
        .store_blob(user_id, kind, item_id, bytes, mime_type, filename)
        .await
        .map_err(internal)?;
    info!(
        user_id = user_id.0,
        kind = %kind,
        item_id = %item_id,
        size_bytes,
        "blob stored"
    );
    Ok(BlobUploadResponse {
        url: ctx.blob_url(user_id, kind, item_id),
        size_bytes,
    })
}

pub async fn load_blob(
    ctx: &ApiContext,
    user_id: UserId,
    kind: MediaKind,
    item_id: &ItemId,
) -> Result<StoredBlob, ApiError> {
    ctx.storage
        .load_blob(user_id, kind, item_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found(format!("blob for {kind} '{item_id}' not found")))
}

pub async fn delete_blob(
    ctx: &ApiContext,
    user_id: UserId,
    kind: MediaKind,
    item_id: &ItemId,
) -> Result<(), ApiError> {
    let removed = ctx
        .storage
        .delete_blob(user_id, kind, item_id)
        .await
        .map_err(internal)?;
    if !removed {
        return Err(ApiError::not_found(format!(
            "blob for {kind} '{item_id}' not found"
        )));
    }
    Ok(())
}

async fn ensure_user(ctx: &ApiContext, user_id: UserId) -> Result<(), ApiError> {
    if ctx.storage.user_exists(user_id).await.map_err(internal)? {
        Ok(())
    } else {
        Err(ApiError::not_found(format!("user {} not found", user_id.0)))
    }
}

fn validate_id(raw: &str, what: &str) -> Result<(), ApiError> {
    if raw.trim().is_empty() {
        return Err(ApiError::validation(format!("{what} required")));
    }
    if raw.contains('/') || raw.contains('\\') {
        return Err(ApiError::validation(format!(
            "{what} must not contain path separators"
        )));
    }
    Ok(())
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use shared::domain::SequenceEntryRef;

    async fn setup() -> (ApiContext, UserId) {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let user = storage.create_user("alice").await.expect("user");
        (
            ApiContext {
                storage,
                public_url: "http://media.test/".into(),
                max_blob_bytes: 16,
            },
            user,
        )
    }

    fn put_request(name: &str) -> PutMediaItemRequest {
        PutMediaItemRequest {
            display_name: name.into(),
            description: String::new(),
            preview_url: "http://media.test/preview".into(),
        }
    }

    fn document(name: &str) -> SequenceDocument {
        let created_at = Utc::now() - Duration::hours(2);
        SequenceDocument {
            name: name.into(),
            description: String::new(),
            sequence: vec![SequenceEntryRef::new(MediaKind::Model, "M1")],
            created_at,
            updated_at: created_at + Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn login_rejects_blank_username() {
        let (ctx, _) = setup().await;
        let err = login(&ctx, "   ").await.expect_err("should fail");
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[tokio::test]
    async fn catalog_lists_both_kinds() {
        let (ctx, user) = setup().await;
        put_media_item(&ctx, user, MediaKind::Model, "M1".into(), put_request("Pump"))
            .await
            .expect("model");
        put_media_item(&ctx, user, MediaKind::Video, "V1".into(), put_request("Intro"))
            .await
            .expect("video");

        let catalog = load_catalog(&ctx, user).await.expect("catalog");
        assert_eq!(catalog.models.len(), 1);
        assert_eq!(catalog.videos.len(), 1);
        assert_eq!(catalog.videos[0].item.display_name, "Intro");
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (ctx, user) = setup().await;
        let err = load_catalog(&ctx, UserId(user.0 + 42))
            .await
            .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn media_item_requires_name() {
        let (ctx, user) = setup().await;
        let err = put_media_item(&ctx, user, MediaKind::Model, "M1".into(), put_request(" "))
            .await
            .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[tokio::test]
    async fn sequence_requires_name_and_ordered_timestamps() {
        let (ctx, user) = setup().await;
        let id = SequenceId::from("S1");

        let err = put_sequence(&ctx, user, &id, document(""))
            .await
            .expect_err("blank name");
        assert_eq!(err.code, ErrorCode::Validation);

        let mut backwards = document("Lecture");
        backwards.updated_at = backwards.created_at - Duration::seconds(1);
        let err = put_sequence(&ctx, user, &id, backwards)
            .await
            .expect_err("backwards timestamps");
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[tokio::test]
    async fn sequence_round_trip_and_delete() {
        let (ctx, user) = setup().await;
        let id = SequenceId::from("S1");
        let doc = document("Lecture");
        put_sequence(&ctx, user, &id, doc.clone())
            .await
            .expect("put");
        assert_eq!(get_sequence(&ctx, user, &id).await.expect("get"), doc);

        delete_sequence(&ctx, user, &id).await.expect("delete");
        let err = get_sequence(&ctx, user, &id).await.expect_err("gone");
        assert_eq!(err.code, ErrorCode::NotFound);
        let err = delete_sequence(&ctx, user, &id)
            .await
            .expect_err("second delete");
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn deleting_media_item_leaves_sequences_alone() {
        let (ctx, user) = setup().await;
        put_media_item(&ctx, user, MediaKind::Model, "M1".into(), put_request("Pump"))
            .await
            .expect("model");
        let id = SequenceId::from("S1");
        put_sequence(&ctx, user, &id, document("Lecture"))
            .await
            .expect("put");

        delete_media_item(&ctx, user, MediaKind::Model, &ItemId::from("M1"))
            .await
            .expect("delete item");

        let doc = get_sequence(&ctx, user, &id).await.expect("get");
        assert_eq!(doc.sequence, vec![SequenceEntryRef::new(MediaKind::Model, "M1")]);
    }

    #[tokio::test]
    async fn blob_limits_are_enforced() {
        let (ctx, user) = setup().await;
        let id = ItemId::from("V1");

        let err = store_blob(&ctx, user, MediaKind::Video, &id, b"", None, None)
            .await
            .expect_err("empty");
        assert_eq!(err.code, ErrorCode::Validation);

        let err = store_blob(&ctx, user, MediaKind::Video, &id, &[0u8; 17], None, None)
            .await
            .expect_err("too large");
        assert_eq!(err.code, ErrorCode::PayloadTooLarge);

        let err = store_blob(&ctx, user, MediaKind::Video, &id, b"ok", None, Some("../x.mp4"))
            .await
            .expect_err("path separator");
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[tokio::test]
    async fn stored_blob_url_points_at_blob_route() {
        let (ctx, user) = setup().await;
        let id = ItemId::from("V1");
        let res = store_blob(
            &ctx,
            user,
            MediaKind::Video,
            &id,
            b"bytes",
            Some("video/mp4"),
            Some("intro.mp4"),
        )
        .await
        .expect("store");
        assert_eq!(
            res.url,
            format!("http://media.test/users/{}/blobs/video/V1", user.0)
        );
        assert_eq!(res.size_bytes, 5);

        let blob = load_blob(&ctx, user, MediaKind::Video, &id)
            .await
            .expect("load");
        assert_eq!(blob.mime_type.as_deref(), Some("video/mp4"));
    }
}
