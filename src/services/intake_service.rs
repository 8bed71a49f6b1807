//! Intake: validate an upload, stage it under a fresh temp key, and hand
//! back something the client can render immediately.

use crate::{
    config::PipelineSettings,
    errors::{PipelineError, PipelineResult},
    models::{
        file_type::is_displayable,
        temp_asset::{PreparedUpload, TempAsset},
    },
    services::temp_store::TempStore,
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::Utc;
use image::{ImageFormat, ImageReader, imageops::FilterType};
use std::io::Cursor;
use tokio::fs::File;

/// Longest side of a transcoded preview.
const PREVIEW_MAX_DIMENSION: u32 = 2048;
const PREVIEW_CONTENT_TYPE: &str = "image/png";

#[derive(Clone)]
pub struct IntakeService {
    store: TempStore,
    settings: PipelineSettings,
}

/// Result of inspecting an upload off the async runtime.
struct Inspected {
    width: u32,
    height: u32,
    preview: Option<Vec<u8>>,
}

impl IntakeService {
    pub fn new(store: TempStore, settings: PipelineSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Validate and stage an upload.
    ///
    /// Only the temporary store is touched. The original bytes are kept
    /// verbatim; formats a browser cannot show get a PNG preview copy.
    #[tracing::instrument(skip(self, file), fields(size = file.len()))]
    pub async fn prepare(&self, file: Bytes, content_type: &str) -> PipelineResult<PreparedUpload> {
        let content_type = self
            .settings
            .accepted_types
            .accept(content_type)
            .ok_or_else(|| PipelineError::InvalidFileType(content_type.to_string()))?;

        let size = file.len() as u64;
        if size == 0 {
            return Err(PipelineError::InvalidFileType(format!(
                "{} (empty payload)",
                content_type
            )));
        }
        if size > self.settings.max_upload_bytes {
            return Err(PipelineError::PayloadTooLarge {
                size,
                max: self.settings.max_upload_bytes,
            });
        }

        let temp_key = TempStore::generate_key();
        let timeout = self.settings.processing_timeout;
        match tokio::time::timeout(timeout, self.stage(&temp_key, file, content_type)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(temp_key = %temp_key, "intake timed out, discarding partial upload");
                self.discard(&temp_key).await;
                Err(PipelineError::Timeout(timeout))
            }
        }
    }

    async fn stage(
        &self,
        temp_key: &str,
        file: Bytes,
        content_type: String,
    ) -> PipelineResult<PreparedUpload> {
        let max_pixels = self.settings.max_pixels;
        let needs_preview = !is_displayable(&content_type);
        let declared = content_type.clone();
        let payload = file.clone();
        let inspected = tokio::task::spawn_blocking(move || {
            inspect(&payload, &declared, max_pixels, needs_preview)
        })
        .await
        .map_err(|e| PipelineError::Join(e.to_string()))??;

        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.settings.temp_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let preview_content_type = if inspected.preview.is_some() {
            PREVIEW_CONTENT_TYPE.to_string()
        } else {
            content_type.clone()
        };
        let asset = TempAsset {
            temp_key: temp_key.to_string(),
            content_type,
            size_bytes: file.len() as i64,
            width: inspected.width as i64,
            height: inspected.height as i64,
            has_preview: inspected.preview.is_some(),
            preview_content_type,
            created_at: now,
            expires_at: now + ttl,
        };

        self.store
            .stage(&asset, &file, inspected.preview.as_deref())
            .await?;

        let preview_bytes = inspected.preview.as_deref().unwrap_or(&file);
        let preview_url = self.preview_ref(&asset, preview_bytes);

        tracing::info!(
            temp_key = %asset.temp_key,
            content_type = %asset.content_type,
            width = asset.width,
            height = asset.height,
            transcoded = asset.has_preview,
            "staged upload"
        );

        Ok(PreparedUpload {
            temp_key: asset.temp_key,
            preview_url,
            width: inspected.width,
            height: inspected.height,
        })
    }

    /// Small previews travel inline; everything else is fetched from the
    /// preview endpoint.
    fn preview_ref(&self, asset: &TempAsset, preview: &[u8]) -> String {
        let inline_max = self.settings.inline_preview_max_bytes;
        if inline_max > 0 && preview.len() as u64 <= inline_max {
            format!(
                "data:{};base64,{}",
                asset.preview_content_type,
                general_purpose::STANDARD.encode(preview)
            )
        } else {
            format!(
                "{}/uploads/{}/preview",
                self.settings.public_base_url, asset.temp_key
            )
        }
    }

    /// Drop a staged upload. Unknown, expired, or already-consumed keys are
    /// fine, and storage failures are logged rather than returned.
    #[tracing::instrument(skip(self))]
    pub async fn discard(&self, temp_key: &str) {
        match self.store.remove(temp_key).await {
            Ok(true) => tracing::debug!("discarded staged upload"),
            Ok(false) => tracing::debug!("discard of unknown temp key ignored"),
            Err(err) => tracing::warn!(error = %err, "discard failed; expiry sweep will reclaim it"),
        }
    }

    /// Preview payload for a live temp key.
    pub async fn open_preview(&self, temp_key: &str) -> PipelineResult<(TempAsset, File)> {
        let asset = self
            .store
            .lookup(temp_key, Utc::now())
            .await?
            .ok_or_else(|| PipelineError::TempKeyNotFound(temp_key.to_string()))?;
        let file = self.store.open_preview(&asset).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                PipelineError::TempKeyNotFound(temp_key.to_string())
            } else {
                PipelineError::Io(err)
            }
        })?;
        Ok((asset, file))
    }
}

/// Read dimensions from the header, enforce the pixel ceiling, and build a
/// PNG preview when requested.
fn inspect(
    bytes: &[u8],
    content_type: &str,
    max_pixels: u64,
    needs_preview: bool,
) -> PipelineResult<Inspected> {
    let not_an_image =
        |reason: String| PipelineError::InvalidFileType(format!("{} ({})", content_type, reason));

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| not_an_image(e.to_string()))?;
    if reader.format().is_none() {
        return Err(not_an_image("unrecognized image data".into()));
    }
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| not_an_image(e.to_string()))?;

    let pixels = u64::from(width) * u64::from(height);
    if pixels > max_pixels {
        return Err(PipelineError::TooManyPixels {
            pixels,
            max: max_pixels,
        });
    }

    if !needs_preview {
        return Ok(Inspected {
            width,
            height,
            preview: None,
        });
    }

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| PipelineError::UndecodableImage(e.to_string()))?;
    let preview = if width > PREVIEW_MAX_DIMENSION || height > PREVIEW_MAX_DIMENSION {
        decoded.resize(PREVIEW_MAX_DIMENSION, PREVIEW_MAX_DIMENSION, FilterType::Triangle)
    } else {
        decoded
    };
    let mut buffer = Cursor::new(Vec::new());
    preview
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| PipelineError::UndecodableImage(e.to_string()))?;

    Ok(Inspected {
        width,
        height,
        preview: Some(buffer.into_inner()),
    })
}
