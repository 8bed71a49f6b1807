//! Core data models for the image intake pipeline.
//!
//! Staged originals and stored derivatives map to SQLite rows via
//! `sqlx::FromRow`; request/response shapes serialize as camelCase JSON.

pub mod asset;
pub mod crop;
pub mod file_type;
pub mod target;
pub mod temp_asset;
