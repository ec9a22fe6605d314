use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{
        CatalogItem, ItemId, MediaKind, Sequence, SequenceDocument, SequenceEntryRef, SequenceId,
        UserId,
    },
    protocol::MediaItemRecord,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub kind: MediaKind,
    pub item_id: ItemId,
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    pub size_bytes: u64,
}

const MEDIA_COLUMNS: &str =
    "kind, item_id, display_name, description, preview_url, created_at, updated_at";
const SEQUENCE_COLUMNS: &str =
    "sequence_id, name, description, entries_json, created_at, updated_at";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to `:memory:` opens its own database.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, username: &str) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (username) VALUES (?)
             ON CONFLICT(username) DO UPDATE SET username=excluded.username
             RETURNING id",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn username_for_user(&self, user_id: UserId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT username FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn user_exists(&self, user_id: UserId) -> Result<bool> {
        Ok(self.username_for_user(user_id).await?.is_some())
    }

    /// Inserts or updates a catalog item. `created_at` of an existing item is
    /// kept; `updated_at` always moves to `now`.
    pub async fn upsert_media_item(
        &self,
        user_id: UserId,
        item: &CatalogItem,
        now: DateTime<Utc>,
    ) -> Result<MediaItemRecord> {
        let now = encode_timestamp(now);
        let query = format!(
            "INSERT INTO media_items (user_id, {MEDIA_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id, kind, item_id) DO UPDATE SET
                display_name = excluded.display_name,
                description = excluded.description,
                preview_url = excluded.preview_url,
                updated_at = excluded.updated_at
             RETURNING {MEDIA_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(user_id.0)
            .bind(item.kind.as_str())
            .bind(item.id.as_str())
            .bind(&item.display_name)
            .bind(&item.description)
            .bind(&item.preview_url)
            .bind(&now)
            .bind(&now)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("failed to store {} '{}'", item.kind, item.id))?;
        media_record_from_row(&row)
    }

    pub async fn load_media_item(
        &self,
        user_id: UserId,
        kind: MediaKind,
        item_id: &ItemId,
    ) -> Result<Option<MediaItemRecord>> {
        let query = format!(
            "SELECT {MEDIA_COLUMNS} FROM media_items WHERE user_id = ? AND kind = ? AND item_id = ?"
        );
        let row = sqlx::query(&query)
            .bind(user_id.0)
            .bind(kind.as_str())
            .bind(item_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(media_record_from_row).transpose()
    }

    /// Items of one kind in creation order.
    pub async fn list_media_items(
        &self,
        user_id: UserId,
        kind: MediaKind,
    ) -> Result<Vec<MediaItemRecord>> {
        let query = format!(
            "SELECT {MEDIA_COLUMNS} FROM media_items
             WHERE user_id = ? AND kind = ?
             ORDER BY created_at ASC, rowid ASC"
        );
        let rows = sqlx::query(&query)
            .bind(user_id.0)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to list {kind} items"))?;
        rows.iter().map(media_record_from_row).collect()
    }

    pub async fn delete_media_item(
        &self,
        user_id: UserId,
        kind: MediaKind,
        item_id: &ItemId,
    ) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM media_items WHERE user_id = ? AND kind = ? AND item_id = ?")
                .bind(user_id.0)
                .bind(kind.as_str())
                .bind(item_id.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Writes the whole document, replacing any previous version.
    pub async fn put_sequence(
        &self,
        user_id: UserId,
        sequence_id: &SequenceId,
        document: &SequenceDocument,
    ) -> Result<()> {
        let entries_json = serde_json::to_string(&document.sequence)
            .context("failed to encode sequence entries")?;
        let query = format!(
            "INSERT INTO sequences (user_id, {SEQUENCE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id, sequence_id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                entries_json = excluded.entries_json,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at"
        );
        sqlx::query(&query)
            .bind(user_id.0)
            .bind(sequence_id.as_str())
            .bind(&document.name)
            .bind(&document.description)
            .bind(entries_json)
            .bind(encode_timestamp(document.created_at))
            .bind(encode_timestamp(document.updated_at))
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to store sequence '{sequence_id}'"))?;
        Ok(())
    }

    pub async fn load_sequence(
        &self,
        user_id: UserId,
        sequence_id: &SequenceId,
    ) -> Result<Option<SequenceDocument>> {
        let query = format!(
            "SELECT {SEQUENCE_COLUMNS} FROM sequences WHERE user_id = ? AND sequence_id = ?"
        );
        let row = sqlx::query(&query)
            .bind(user_id.0)
            .bind(sequence_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .as_ref()
            .map(sequence_from_row)
            .transpose()?
            .map(|sequence| sequence.document))
    }

    /// Sequences in creation order.
    pub async fn list_sequences(&self, user_id: UserId) -> Result<Vec<Sequence>> {
        let query = format!(
            "SELECT {SEQUENCE_COLUMNS} FROM sequences
             WHERE user_id = ?
             ORDER BY created_at ASC, rowid ASC"
        );
        let rows = sqlx::query(&query)
            .bind(user_id.0)
            .fetch_all(&self.pool)
            .await
            .context("failed to list sequences")?;
        rows.iter().map(sequence_from_row).collect()
    }

    pub async fn delete_sequence(&self, user_id: UserId, sequence_id: &SequenceId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sequences WHERE user_id = ? AND sequence_id = ?")
            .bind(user_id.0)
            .bind(sequence_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn store_blob(
        &self,
        user_id: UserId,
        kind: MediaKind,
        item_id: &ItemId,
        bytes: &[u8],
        mime: Option<&str>,
        filename: Option<&str>,
    ) -> Result<u64> {
        let size_bytes = i64::try_from(bytes.len()).unwrap_or(i64::MAX);
        sqlx::query(
            "INSERT INTO blobs (user_id, kind, item_id, bytes, mime_type, filename, size_bytes, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(user_id, kind, item_id) DO UPDATE SET
                bytes = excluded.bytes,
                mime_type = excluded.mime_type,
                filename = excluded.filename,
                size_bytes = excluded.size_bytes,
                updated_at = CURRENT_TIMESTAMP",
        )
        .bind(user_id.0)
        .bind(kind.as_str())
        .bind(item_id.as_str())
        .bind(bytes)
        .bind(mime)
        .bind(filename)
        .bind(size_bytes)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store blob for {kind} '{item_id}'"))?;
        Ok(size_bytes as u64)
    }

    pub async fn load_blob(
        &self,
        user_id: UserId,
        kind: MediaKind,
        item_id: &ItemId,
    ) -> Result<Option<StoredBlob>> {
        let row = sqlx::query(
            "SELECT bytes, mime_type, filename, size_bytes FROM blobs
             WHERE user_id = ? AND kind = ? AND item_id = ?",
        )
        .bind(user_id.0)
        .bind(kind.as_str())
        .bind(item_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredBlob {
            kind,
            item_id: item_id.clone(),
            bytes: r.get::<Vec<u8>, _>(0),
            mime_type: r.get::<Option<String>, _>(1),
            filename: r.get::<Option<String>, _>(2),
            size_bytes: r.get::<Option<i64>, _>(3).unwrap_or_default() as u64,
        }))
    }

    pub async fn delete_blob(
        &self,
        user_id: UserId,
        kind: MediaKind,
        item_id: &ItemId,
    ) -> Result<bool> {
        let result = sqlx::query("DELETE FROM blobs WHERE user_id = ? AND kind = ? AND item_id = ?")
            .bind(user_id.0)
            .bind(kind.as_str())
            .bind(item_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Fixed-width RFC 3339 so that `ORDER BY created_at` is chronological.
fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid stored timestamp '{raw}'"))?
        .with_timezone(&Utc))
}

fn media_record_from_row(row: &SqliteRow) -> Result<MediaItemRecord> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = kind_raw.parse::<MediaKind>()?;
    Ok(MediaItemRecord {
        item: CatalogItem {
            id: ItemId(row.try_get("item_id")?),
            kind,
            display_name: row.try_get("display_name")?,
            description: row.try_get("description")?,
            preview_url: row.try_get("preview_url")?,
        },
        created_at: decode_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: decode_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn sequence_from_row(row: &SqliteRow) -> Result<Sequence> {
    let sequence_id = SequenceId(row.try_get("sequence_id")?);
    let entries_json: String = row.try_get("entries_json")?;
    let sequence: Vec<SequenceEntryRef> = serde_json::from_str(&entries_json)
        .with_context(|| format!("corrupt entries for sequence '{sequence_id}'"))?;
    Ok(Sequence {
        id: sequence_id,
        document: SequenceDocument {
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            sequence,
            created_at: decode_timestamp(&row.try_get::<String, _>("created_at")?)?,
            updated_at: decode_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        },
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
