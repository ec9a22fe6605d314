use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use server_api::{
    delete_blob, delete_media_item, delete_sequence, get_sequence, list_media, list_sequences,
    load_blob, load_catalog, login, put_media_item, put_sequence, store_blob, ApiContext,
};
use shared::{
    domain::{ItemId, MediaKind, Sequence, SequenceDocument, SequenceId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        BlobUploadResponse, CatalogSnapshot, LoginRequest, LoginResponse, MediaItemRecord,
        PutMediaItemRequest,
    },
};
use storage::Storage;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, prepare_database_url};

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

type HttpError = (StatusCode, Json<ApiError>);

#[derive(Debug, Deserialize)]
struct BlobUploadQuery {
    filename: Option<String>,
    mime_type: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext {
        storage,
        public_url: settings.public_url(),
        max_blob_bytes: settings.max_blob_bytes,
    };

    let app = build_router(Arc::new(AppState { api }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, public_url = %settings.public_url(), "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    // Leave headroom above the blob limit so oversized bodies reach the
    // handler and get a typed error instead of a bare 413.
    let body_limit = state.api.max_blob_bytes.saturating_add(1024 * 1024);
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(http_login))
        .route("/users/:user_id/catalog", get(http_load_catalog))
        .route("/users/:user_id/media/:kind", get(http_list_media))
        .route(
            "/users/:user_id/media/:kind/:item_id",
            put(http_put_media).delete(http_delete_media),
        )
        .route("/users/:user_id/sequences", get(http_list_sequences))
        .route(
            "/users/:user_id/sequences/:sequence_id",
            get(http_get_sequence)
                .put(http_put_sequence)
                .delete(http_delete_sequence),
        )
        .route(
            "/users/:user_id/blobs/:kind/:item_id",
            put(http_upload_blob)
                .get(http_download_blob)
                .delete(http_delete_blob),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    state.api.storage.health_check().await.map_err(|e| {
        http_error(ApiError::new(ErrorCode::Internal, e.to_string()))
    })?;
    Ok("ok")
}

async fn http_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, HttpError> {
    let user_id = login(&state.api, &req.username).await.map_err(http_error)?;
    Ok(Json(LoginResponse { user_id: user_id.0 }))
}

async fn http_load_catalog(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<CatalogSnapshot>, HttpError> {
    load_catalog(&state.api, UserId(user_id))
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_list_media(
    State(state): State<Arc<AppState>>,
    Path((user_id, kind)): Path<(i64, String)>,
) -> Result<Json<Vec<MediaItemRecord>>, HttpError> {
    let kind = parse_kind(&kind)?;
    list_media(&state.api, UserId(user_id), kind)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_put_media(
    State(state): State<Arc<AppState>>,
    Path((user_id, kind, item_id)): Path<(i64, String, String)>,
    Json(req): Json<PutMediaItemRequest>,
) -> Result<Json<MediaItemRecord>, HttpError> {
    let kind = parse_kind(&kind)?;
    put_media_item(&state.api, UserId(user_id), kind, ItemId(item_id), req)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_delete_media(
    State(state): State<Arc<AppState>>,
    Path((user_id, kind, item_id)): Path<(i64, String, String)>,
) -> Result<StatusCode, HttpError> {
    let kind = parse_kind(&kind)?;
    delete_media_item(&state.api, UserId(user_id), kind, &ItemId(item_id))
        .await
        .map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_list_sequences(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<Sequence>>, HttpError> {
    list_sequences(&state.api, UserId(user_id))
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_get_sequence(
    State(state): State<Arc<AppState>>,
    Path((user_id, sequence_id)): Path<(i64, String)>,
) -> Result<Json<SequenceDocument>, HttpError> {
    get_sequence(&state.api, UserId(user_id), &SequenceId(sequence_id))
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_put_sequence(
    State(state): State<Arc<AppState>>,
    Path((user_id, sequence_id)): Path<(i64, String)>,
    Json(document): Json<SequenceDocument>,
) -> Result<Json<SequenceDocument>, HttpError> {
    put_sequence(&state.api, UserId(user_id), &SequenceId(sequence_id), document)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_delete_sequence(
    State(state): State<Arc<AppState>>,
    Path((user_id, sequence_id)): Path<(i64, String)>,
) -> Result<StatusCode, HttpError> {
    delete_sequence(&state.api, UserId(user_id), &SequenceId(sequence_id))
        .await
        .map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_upload_blob(
    State(state): State<Arc<AppState>>,
    Path((user_id, kind, item_id)): Path<(i64, String, String)>,
    Query(q): Query<BlobUploadQuery>,
    body: Bytes,
) -> Result<Json<BlobUploadResponse>, HttpError> {
    let kind = parse_kind(&kind)?;
    store_blob(
        &state.api,
        UserId(user_id),
        kind,
        &ItemId(item_id),
        &body,
        q.mime_type.as_deref(),
        q.filename.as_deref(),
    )
    .await
    .map(Json)
    .map_err(http_error)
}

async fn http_download_blob(
    State(state): State<Arc<AppState>>,
    Path((user_id, kind, item_id)): Path<(i64, String, String)>,
) -> Result<impl IntoResponse, HttpError> {
    let kind = parse_kind(&kind)?;
    let blob = load_blob(&state.api, UserId(user_id), kind, &ItemId(item_id))
        .await
        .map_err(http_error)?;

    let mut headers = HeaderMap::new();
    let content_type = blob
        .mime_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Some(filename) = blob.filename {
        if let Ok(value) = HeaderValue::from_str(&format!("inline; filename=\"{filename}\"")) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
    Ok((headers, blob.bytes))
}

async fn http_delete_blob(
    State(state): State<Arc<AppState>>,
    Path((user_id, kind, item_id)): Path<(i64, String, String)>,
) -> Result<StatusCode, HttpError> {
    let kind = parse_kind(&kind)?;
    delete_blob(&state.api, UserId(user_id), kind, &ItemId(item_id))
        .await
        .map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_kind(raw: &str) -> Result<MediaKind, HttpError> {
    raw.parse::<MediaKind>()
        .map_err(|e| http_error(ApiError::validation(e.to_string())))
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn http_error(err: ApiError) -> HttpError {
    if err.code == ErrorCode::Internal {
        error!(message = %err.message, "request failed");
    }
    (status_for(err.code), Json(err))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
