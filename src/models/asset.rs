//! A derived image stored in permanent storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata for a derivative stored under `bucket/key`.
///
/// Re-committing the same key overwrites the row and the payload; there is
/// no versioning.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredAsset {
    /// Logical namespace (e.g. `product-images`).
    pub bucket: String,

    /// Destination key within the bucket (e.g. `shoe-1/xs`).
    pub key: String,

    /// Content type of the encoded derivative.
    pub content_type: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload, hex encoded.
    pub etag: String,

    /// Timestamp of the last write.
    pub last_modified: DateTime<Utc>,
}
