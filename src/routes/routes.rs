//! Defines routes for the staged image pipeline.
//!
//! ## Structure
//! - **Staging protocol**
//!   - `POST /uploads`                  - stage a multipart upload, returns temp key + preview
//!   - `POST /uploads/commit`           - crop, derive and store targets
//!   - `POST /uploads/discard`          - drop a staged upload (always succeeds)
//!   - `GET  /uploads/{temp_key}/preview` - preview of a staged upload
//!
//! - **Committed derivatives**
//!   - `GET  /assets/{bucket}/{*key}`   - download a derivative
//!   - `HEAD /assets/{bucket}/{*key}`   - headers only
//!
//! The wildcard `*key` allows nested keys like `shoe-1/xs`.

use crate::{
    handlers::{
        asset_handlers::{get_asset, head_asset},
        health_handlers::{healthz, readyz},
        upload_handlers::{commit_upload, discard_upload, get_preview, prepare_upload},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. `upload_limit` caps the multipart body of `POST /uploads`.
pub fn routes(upload_limit: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // staging protocol
        .route(
            "/uploads",
            post(prepare_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/uploads/commit", post(commit_upload))
        .route("/uploads/discard", post(discard_upload))
        .route("/uploads/{temp_key}/preview", get(get_preview))
        // committed derivatives
        .route("/assets/{bucket}/{*key}", get(get_asset).head(head_asset))
}
