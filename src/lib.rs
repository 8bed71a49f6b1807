//! Staged image intake: stage an upload under a temp key, let the client
//! pick a crop, then derive fixed-size variants into permanent storage.
//!
//! Known limitation: HEIC/HEIF originals are not decodable and are not
//! accepted (see [`models::file_type`]).

pub mod config;
pub mod controller;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::Router;
use state::AppState;

/// Full HTTP surface with state attached.
pub fn build_router(state: AppState) -> Router {
    routes::routes::routes(state.upload_body_limit()).with_state(state)
}
