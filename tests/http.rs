mod common;

use axum::{
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use common::{Harness, png};
use image_intake::build_router;
use serde_json::{Value, json};
use tower::ServiceExt;

const BOUNDARY: &str = "intake-test-boundary";

fn multipart_upload(field: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"upload\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/uploads")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_is_ok() {
    let h = Harness::new().await;
    let response = build_router(h.state.clone())
        .oneshot(get(Method::GET, "/healthz"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn readyz_checks_sqlite_and_disk() {
    let h = Harness::new().await;
    let response = build_router(h.state.clone())
        .oneshot(get(Method::GET, "/readyz"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["checks"]["sqlite"]["ok"], json!(true));
    assert_eq!(body["checks"]["disk"]["ok"], json!(true));
}

#[tokio::test]
async fn upload_preview_commit_and_fetch() {
    let h = Harness::new().await;
    let app = build_router(h.state.clone());

    let response = app
        .clone()
        .oneshot(multipart_upload("file", "image/png", &png(200, 100)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let prepared = json_body(response).await;
    let temp_key = prepared["tempKey"].as_str().unwrap().to_string();
    assert_eq!(prepared["width"], json!(200));
    assert_eq!(prepared["height"], json!(100));

    let preview = app
        .clone()
        .oneshot(get(Method::GET, &format!("/uploads/{temp_key}/preview")))
        .await
        .unwrap();
    assert_eq!(preview.status(), StatusCode::OK);
    assert_eq!(preview.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(preview.headers()[header::CACHE_CONTROL], "no-store");

    let response = app
        .clone()
        .oneshot(json_post(
            "/uploads/commit",
            json!({
                "tempKey": temp_key,
                "crop": { "x": 50, "y": 0, "width": 100, "height": 100 },
                "targets": [
                    { "destinationKey": "card-7/xs", "bucket": "product-images", "width": 48, "height": 48 },
                    { "destinationKey": "card-7/wide", "bucket": "product-images", "width": 0, "height": 48 }
                ]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let committed = json_body(response).await;
    assert_eq!(
        committed["urls"]["xs"],
        json!("http://localhost:3000/assets/product-images/card-7/xs")
    );
    assert_eq!(committed["errors"]["wide"], json!("invalid_dimensions"));

    let asset = app
        .clone()
        .oneshot(get(Method::GET, "/assets/product-images/card-7/xs"))
        .await
        .unwrap();
    assert_eq!(asset.status(), StatusCode::OK);
    assert_eq!(asset.headers()[header::CONTENT_TYPE], "image/png");
    let bytes = to_bytes(asset.into_body(), usize::MAX).await.unwrap();
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (48, 48));

    let head = app
        .clone()
        .oneshot(get(Method::HEAD, "/assets/product-images/card-7/xs"))
        .await
        .unwrap();
    assert_eq!(head.status(), StatusCode::OK);
    assert_eq!(
        head.headers()[header::CONTENT_LENGTH].to_str().unwrap(),
        bytes.len().to_string()
    );

    // the preview goes away with the temp key
    let gone = app
        .oneshot(get(Method::GET, &format!("/uploads/{temp_key}/preview")))
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn commit_of_unknown_key_is_not_found() {
    let h = Harness::new().await;
    let response = build_router(h.state.clone())
        .oneshot(json_post(
            "/uploads/commit",
            json!({
                "tempKey": "0123456789abcdef0123456789abcdef",
                "crop": { "x": 0, "y": 0, "width": 10, "height": 10 },
                "targets": [
                    { "destinationKey": "card-7/xs", "bucket": "product-images", "width": 8, "height": 8 }
                ]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["kind"], json!("temp_key_not_found"));
}

#[tokio::test]
async fn commit_without_crop_is_malformed() {
    let h = Harness::new().await;
    let response = build_router(h.state.clone())
        .oneshot(json_post(
            "/uploads/commit",
            json!({ "tempKey": "0123456789abcdef0123456789abcdef", "targets": [] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["kind"], json!("malformed_request"));
}

#[tokio::test]
async fn upload_of_wrong_type_is_unsupported() {
    let h = Harness::new().await;
    let response = build_router(h.state.clone())
        .oneshot(multipart_upload("file", "application/pdf", b"%PDF-1.4"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(json_body(response).await["kind"], json!("invalid_file_type"));
}

#[tokio::test]
async fn upload_without_file_field_is_malformed() {
    let h = Harness::new().await;
    let response = build_router(h.state.clone())
        .oneshot(multipart_upload("avatar", "image/png", &png(8, 8)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn discard_always_reports_ok() {
    let h = Harness::new().await;
    let response = build_router(h.state.clone())
        .oneshot(json_post("/uploads/discard", json!({ "tempKey": "never-issued" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "status": "ok" }));
}

#[tokio::test]
async fn missing_asset_is_not_found() {
    let h = Harness::new().await;
    let response = build_router(h.state.clone())
        .oneshot(get(Method::GET, "/assets/product-images/nothing/here"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["kind"], json!("asset_not_found"));
}
