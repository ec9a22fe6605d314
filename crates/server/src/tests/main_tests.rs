use super::*;
use axum::{
    body::{self, Body},
    http::{Request, Response},
};
use chrono::{Duration, Utc};
use shared::domain::SequenceEntryRef;
use tower::ServiceExt;

async fn test_app() -> (Router, i64) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage.create_user("alice").await.expect("user");
    let api = ApiContext {
        storage,
        public_url: "http://media.test".into(),
        max_blob_bytes: 1024,
    };
    let app = build_router(Arc::new(AppState { api }));
    (app, user.0)
}

async fn json_body<T: serde::de::DeserializeOwned>(response: Response<Body>) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

fn json_request(method: &str, uri: String, value: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(value.to_string()))
        .expect("request")
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _user_id) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn login_returns_stable_user_id() {
    let (app, user_id) = test_app().await;
    let response = app
        .oneshot(json_request(
            "POST",
            "/login".into(),
            serde_json::json!({ "username": "alice" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let dto: LoginResponse = json_body(response).await;
    assert_eq!(dto.user_id, user_id);
}

#[tokio::test]
async fn media_put_then_catalog_lists_it() {
    let (app, user_id) = test_app().await;
    let put = json_request(
        "PUT",
        format!("/users/{user_id}/media/model/M1"),
        serde_json::json!({ "displayName": "Pump", "previewURL": "http://media.test/m1" }),
    );
    let response = app.clone().oneshot(put).await.expect("put");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::get(format!("/users/{user_id}/catalog"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("catalog");
    assert_eq!(response.status(), StatusCode::OK);
    let catalog: CatalogSnapshot = json_body(response).await;
    assert_eq!(catalog.models.len(), 1);
    assert_eq!(catalog.models[0].item.display_name, "Pump");
    assert!(catalog.videos.is_empty());
}

#[tokio::test]
async fn unknown_media_kind_is_bad_request() {
    let (app, user_id) = test_app().await;
    let response = app
        .oneshot(
            Request::get(format!("/users/{user_id}/media/audio"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let err: ApiError = json_body(response).await;
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn sequence_document_uses_persisted_field_names() {
    let (app, user_id) = test_app().await;
    let created_at = Utc::now() - Duration::days(1);
    let document = SequenceDocument {
        name: "Lecture 1".into(),
        description: String::new(),
        sequence: vec![
            SequenceEntryRef::new(MediaKind::Video, "V1"),
            SequenceEntryRef::new(MediaKind::Model, "M1"),
        ],
        created_at,
        updated_at: Utc::now(),
    };
    let put = json_request(
        "PUT",
        format!("/users/{user_id}/sequences/S1"),
        serde_json::to_value(&document).expect("json"),
    );
    let response = app.clone().oneshot(put).await.expect("put");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/users/{user_id}/sequences/S1"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("get");
    assert_eq!(response.status(), StatusCode::OK);
    let raw: serde_json::Value = json_body(response).await;
    assert_eq!(
        raw["sequence"],
        serde_json::json!([
            { "type": "video", "id": "V1" },
            { "type": "model", "id": "M1" }
        ])
    );

    let response = app
        .oneshot(
            Request::get(format!("/users/{user_id}/sequences"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("list");
    let listed: Vec<Sequence> = json_body(response).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, SequenceId::from("S1"));
    assert_eq!(listed[0].document, document);
}

#[tokio::test]
async fn blank_sequence_name_is_rejected() {
    let (app, user_id) = test_app().await;
    let now = Utc::now();
    let put = json_request(
        "PUT",
        format!("/users/{user_id}/sequences/S1"),
        serde_json::json!({
            "name": "",
            "description": "",
            "sequence": [],
            "createdAt": now,
            "updatedAt": now,
        }),
    );
    let response = app.oneshot(put).await.expect("put");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deleting_missing_sequence_is_not_found() {
    let (app, user_id) = test_app().await;
    let response = app
        .oneshot(
            Request::delete(format!("/users/{user_id}/sequences/missing"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("delete");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blob_upload_download_and_delete() {
    let (app, user_id) = test_app().await;
    let upload = Request::put(format!(
        "/users/{user_id}/blobs/video/V1?filename=intro.mp4&mime_type=video/mp4"
    ))
    .body(Body::from("video-bytes"))
    .expect("request");
    let response = app.clone().oneshot(upload).await.expect("upload");
    assert_eq!(response.status(), StatusCode::OK);
    let uploaded: BlobUploadResponse = json_body(response).await;
    assert_eq!(uploaded.size_bytes, 11);
    assert!(uploaded.url.ends_with(&format!("/users/{user_id}/blobs/video/V1")));

    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/users/{user_id}/blobs/video/V1"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("download");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
        Some(&b"video/mp4"[..])
    );
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(bytes.as_ref(), b"video-bytes");

    let response = app
        .clone()
        .oneshot(
            Request::delete(format!("/users/{user_id}/blobs/video/V1"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("delete");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(
            Request::get(format!("/users/{user_id}/blobs/video/V1"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("download after delete");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_blob_is_payload_too_large() {
    let (app, user_id) = test_app().await;
    let upload = Request::put(format!("/users/{user_id}/blobs/model/M1"))
        .body(Body::from(vec![7u8; 2048]))
        .expect("request");
    let response = app.oneshot(upload).await.expect("upload");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
