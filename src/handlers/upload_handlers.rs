//! HTTP handlers for the stage / commit / discard protocol.

use crate::{
    errors::{AppError, ErrorKind, PipelineError},
    models::{
        crop::CropRectangle,
        target::{CommitResponse, DerivationTarget},
        temp_asset::PreparedUpload,
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartError, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

/// Multipart field carrying the uploaded file.
const FILE_FIELD: &str = "file";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub temp_key: String,
    pub crop: CropRectangle,
    pub targets: Vec<DerivationTarget>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscardRequest {
    pub temp_key: String,
}

#[derive(Debug, Serialize)]
pub struct DiscardResponse {
    pub status: &'static str,
}

/// `POST /uploads`: stage a file from the `file` multipart field.
pub async fn prepare_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<PreparedUpload>), AppError> {
    let max = state.intake.settings().max_upload_bytes;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let mut buffer = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            let size = (buffer.len() + chunk.len()) as u64;
            if size > max {
                return Err(PipelineError::PayloadTooLarge { size, max }.into());
            }
            buffer.extend_from_slice(&chunk);
        }

        let prepared = state.intake.prepare(buffer.freeze(), &content_type).await?;
        return Ok((StatusCode::CREATED, Json(prepared)));
    }

    Err(AppError::bad_request(format!(
        "multipart field `{}` is required",
        FILE_FIELD
    )))
}

/// `POST /uploads/commit`: crop, derive and store every target.
pub async fn commit_upload(
    State(state): State<AppState>,
    payload: Result<Json<CommitRequest>, JsonRejection>,
) -> Result<Json<CommitResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let report = state
        .commit
        .commit(&request.temp_key, request.crop, request.targets)
        .await?;
    Ok(Json(CommitResponse::from(report)))
}

/// `POST /uploads/discard`: always succeeds for a well-formed body.
pub async fn discard_upload(
    State(state): State<AppState>,
    payload: Result<Json<DiscardRequest>, JsonRejection>,
) -> Result<Json<DiscardResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    state.intake.discard(&request.temp_key).await;
    Ok(Json(DiscardResponse { status: "ok" }))
}

/// `GET /uploads/{temp_key}/preview`: stream the preview of a staged upload.
pub async fn get_preview(
    State(state): State<AppState>,
    Path(temp_key): Path<String>,
) -> Result<Response, AppError> {
    let (asset, file) = state.intake.open_preview(&temp_key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&asset.preview_content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::PayloadTooLarge,
            err.body_text(),
        )
    } else {
        AppError::bad_request(err.body_text())
    }
}
