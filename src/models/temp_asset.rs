//! An uploaded original awaiting a crop decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata row for a staged original.
///
/// The payload itself lives on disk next to an optional transcoded preview;
/// this struct stores what the pipeline needs without reading those bytes.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct TempAsset {
    /// Opaque, unguessable identifier issued by intake. Never reused.
    pub temp_key: String,

    /// Normalized MIME type declared at upload.
    pub content_type: String,

    /// Size of the original payload in bytes.
    pub size_bytes: i64,

    /// Pixel dimensions read from the image header at intake.
    pub width: i64,
    pub height: i64,

    /// Whether a separate transcoded preview copy was written.
    pub has_preview: bool,

    /// MIME type served by the preview endpoint.
    pub preview_content_type: String,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Returned to the client after a successful intake.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreparedUpload {
    pub temp_key: String,
    /// URL of the preview endpoint, or an inline `data:` URL for small previews.
    pub preview_url: String,
    /// Original pixel dimensions; crop rectangles are expressed in this space.
    pub width: u32,
    pub height: u32,
}
