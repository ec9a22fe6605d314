use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use shared::{
    domain::{CatalogItem, ItemId, MediaKind, Sequence, SequenceDocument, SequenceId, UserId},
    error::{ApiError, ApiException, ErrorCode},
    protocol::{BlobUploadResponse, LoginRequest, LoginResponse, MediaItemRecord, PutMediaItemRequest},
};
use tokio::sync::RwLock;
use tracing::info;
use url::Url;

use crate::{AuthService, BlobStore, DocumentStore, MediaFile};

/// Shared HTTP client and server base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(server_url: &str) -> Result<Self> {
        let base = Url::parse(server_url)
            .with_context(|| format!("invalid server url '{server_url}'"))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("server url '{server_url}' cannot be used as a base"));
        }
        Ok(Self {
            http: Client::new(),
            base,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("server url cannot be used as a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn user_endpoint(&self, user_id: UserId, segments: &[&str]) -> Result<Url> {
        let user = user_id.0.to_string();
        let mut all = vec!["users", user.as_str()];
        all.extend_from_slice(segments);
        self.endpoint(&all)
    }
}

/// Turns non-success responses into `ApiException` errors.
async fn check(res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    let exception = match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => ApiException::from(api_error),
        Err(_) => ApiException::new(
            if status == StatusCode::NOT_FOUND {
                ErrorCode::NotFound
            } else {
                ErrorCode::Internal
            },
            format!("server returned {status}: {body}"),
        ),
    };
    Err(exception.into())
}

/// Username login against `POST /login`.
pub struct SessionAuth {
    transport: HttpTransport,
    user_id: RwLock<Option<UserId>>,
}

impl SessionAuth {
    pub fn new(transport: HttpTransport) -> Self {
        Self {
            transport,
            user_id: RwLock::new(None),
        }
    }

    pub async fn login(&self, username: &str) -> Result<UserId> {
        let res = self
            .transport
            .http
            .post(self.transport.endpoint(&["login"])?)
            .json(&LoginRequest {
                username: username.to_string(),
            })
            .send()
            .await
            .context("login request failed")?;
        let body: LoginResponse = check(res).await?.json().await?;
        let user_id = UserId(body.user_id);
        *self.user_id.write().await = Some(user_id);
        info!(user_id = body.user_id, %username, "logged in");
        Ok(user_id)
    }
}

#[async_trait]
impl AuthService for SessionAuth {
    async fn current_user(&self) -> Result<UserId> {
        let user_id = *self.user_id.read().await;
        user_id.ok_or_else(|| anyhow!("not signed in"))
    }
}

pub struct HttpDocumentStore {
    transport: HttpTransport,
}

impl HttpDocumentStore {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn list_media(&self, user_id: UserId, kind: MediaKind) -> Result<Vec<MediaItemRecord>> {
        let url = self.transport.user_endpoint(user_id, &["media", kind.as_str()])?;
        let res = self.transport.http.get(url).send().await?;
        Ok(check(res).await?.json().await?)
    }

    async fn put_media(&self, user_id: UserId, item: &CatalogItem) -> Result<MediaItemRecord> {
        let url = self
            .transport
            .user_endpoint(user_id, &["media", item.kind.as_str(), item.id.as_str()])?;
        let res = self
            .transport
            .http
            .put(url)
            .json(&PutMediaItemRequest {
                display_name: item.display_name.clone(),
                description: item.description.clone(),
                preview_url: item.preview_url.clone(),
            })
            .send()
            .await?;
        Ok(check(res).await?.json().await?)
    }

    async fn delete_media(
        &self,
        user_id: UserId,
        kind: MediaKind,
        item_id: &ItemId,
    ) -> Result<()> {
        let url = self
            .transport
            .user_endpoint(user_id, &["media", kind.as_str(), item_id.as_str()])?;
        let res = self.transport.http.delete(url).send().await?;
        check(res).await?;
        Ok(())
    }

    async fn list_sequences(&self, user_id: UserId) -> Result<Vec<Sequence>> {
        let url = self.transport.user_endpoint(user_id, &["sequences"])?;
        let res = self.transport.http.get(url).send().await?;
        Ok(check(res).await?.json().await?)
    }

    async fn get_sequence(
        &self,
        user_id: UserId,
        sequence_id: &SequenceId,
    ) -> Result<Option<SequenceDocument>> {
        let url = self
            .transport
            .user_endpoint(user_id, &["sequences", sequence_id.as_str()])?;
        let res = self.transport.http.get(url).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(res).await?.json().await?))
    }

    async fn put_sequence(
        &self,
        user_id: UserId,
        sequence_id: &SequenceId,
        document: &SequenceDocument,
    ) -> Result<()> {
        let url = self
            .transport
            .user_endpoint(user_id, &["sequences", sequence_id.as_str()])?;
        let res = self.transport.http.put(url).json(document).send().await?;
        check(res).await?;
        Ok(())
    }

    async fn delete_sequence(&self, user_id: UserId, sequence_id: &SequenceId) -> Result<()> {
        let url = self
            .transport
            .user_endpoint(user_id, &["sequences", sequence_id.as_str()])?;
        let res = self.transport.http.delete(url).send().await?;
        check(res).await?;
        Ok(())
    }
}

pub struct HttpBlobStore {
    transport: HttpTransport,
}

impl HttpBlobStore {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(
        &self,
        user_id: UserId,
        kind: MediaKind,
        item_id: &ItemId,
        file: &MediaFile,
    ) -> Result<String> {
        let mut url = self
            .transport
            .user_endpoint(user_id, &["blobs", kind.as_str(), item_id.as_str()])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(filename) = &file.filename {
                query.append_pair("filename", filename);
            }
            if let Some(mime_type) = &file.mime_type {
                query.append_pair("mime_type", mime_type);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        let res = self
            .transport
            .http
            .put(url)
            .body(file.bytes.clone())
            .send()
            .await
            .context("blob upload failed")?;
        let body: BlobUploadResponse = check(res).await?.json().await?;
        info!(%kind, item_id = %item_id, size_bytes = body.size_bytes, "blob uploaded");
        Ok(body.url)
    }

    async fn delete(&self, user_id: UserId, kind: MediaKind, item_id: &ItemId) -> Result<()> {
        let url = self
            .transport
            .user_endpoint(user_id, &["blobs", kind.as_str(), item_id.as_str()])?;
        let res = self.transport.http.delete(url).send().await?;
        check(res).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
