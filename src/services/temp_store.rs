//! src/services/temp_store.rs
//!
//! TempStore holds one uploaded original per temp key until it is committed,
//! discarded, or swept after expiry. Metadata lives in SQLite; payloads live
//! on disk under `base_path/{shard}/{temp_key}` with an optional
//! `{temp_key}.preview` sibling.
//!
//! Every way out of the store (`claim`, `remove`, `sweep_expired`) starts
//! with a single `DELETE ... RETURNING` statement, so racing callers see
//! exactly one winner and the rest observe a missing key.

use crate::{errors::PipelineResult, models::temp_asset::TempAsset};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const TEMP_ASSET_COLUMNS: &str = "temp_key, content_type, size_bytes, width, height, \
     has_preview, preview_content_type, created_at, expires_at";

#[derive(Clone)]
pub struct TempStore {
    /// Shared SQLite connection pool used for temp asset metadata.
    pub db: Arc<SqlitePool>,

    /// Directory holding staged payloads.
    pub base_path: PathBuf,
}

impl TempStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Issue a fresh key: 128 bits from the OS RNG via UUIDv4, hex encoded.
    pub fn generate_key() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Keys are generated by us, so anything that is not 32 lowercase hex
    /// characters cannot exist and must never reach the filesystem.
    fn is_well_formed(key: &str) -> bool {
        key.len() == 32 && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    fn shard_dir(&self, key: &str) -> PathBuf {
        self.base_path.join(&key[..2])
    }

    fn original_path(&self, key: &str) -> PathBuf {
        self.shard_dir(key).join(key)
    }

    fn preview_path(&self, key: &str) -> PathBuf {
        self.shard_dir(key).join(format!("{}.preview", key))
    }

    /// Persist the payloads, then the metadata row. If the row cannot be
    /// inserted the files are removed again.
    pub async fn stage(
        &self,
        asset: &TempAsset,
        original: &[u8],
        preview: Option<&[u8]>,
    ) -> PipelineResult<()> {
        let key = asset.temp_key.as_str();
        if !Self::is_well_formed(key) {
            return Err(io::Error::new(ErrorKind::InvalidInput, "malformed temp key").into());
        }

        fs::create_dir_all(self.shard_dir(key)).await?;
        write_file(&self.original_path(key), original).await?;
        if let Some(preview) = preview {
            if let Err(err) = write_file(&self.preview_path(key), preview).await {
                self.remove_files(key).await;
                return Err(err.into());
            }
        }

        let inserted = sqlx::query(&format!(
            "INSERT INTO temp_assets ({TEMP_ASSET_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&asset.temp_key)
        .bind(&asset.content_type)
        .bind(asset.size_bytes)
        .bind(asset.width)
        .bind(asset.height)
        .bind(asset.has_preview)
        .bind(&asset.preview_content_type)
        .bind(asset.created_at)
        .bind(asset.expires_at)
        .execute(&*self.db)
        .await;

        if let Err(err) = inserted {
            self.remove_files(key).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Fetch a live (unexpired) asset without consuming it.
    pub async fn lookup(&self, key: &str, now: DateTime<Utc>) -> PipelineResult<Option<TempAsset>> {
        if !Self::is_well_formed(key) {
            return Ok(None);
        }
        let asset = sqlx::query_as::<_, TempAsset>(&format!(
            "SELECT {TEMP_ASSET_COLUMNS} FROM temp_assets WHERE temp_key = ? AND expires_at > ?"
        ))
        .bind(key)
        .bind(now)
        .fetch_optional(&*self.db)
        .await?;
        Ok(asset)
    }

    /// Atomically take a live asset out of the store.
    ///
    /// Returns `None` when the key is unknown, already claimed, or expired.
    /// Payload files stay on disk until [`TempStore::remove_files`].
    pub async fn claim(&self, key: &str, now: DateTime<Utc>) -> PipelineResult<Option<TempAsset>> {
        if !Self::is_well_formed(key) {
            return Ok(None);
        }
        let asset = sqlx::query_as::<_, TempAsset>(&format!(
            "DELETE FROM temp_assets WHERE temp_key = ? AND expires_at > ? \
             RETURNING {TEMP_ASSET_COLUMNS}"
        ))
        .bind(key)
        .bind(now)
        .fetch_optional(&*self.db)
        .await?;
        Ok(asset)
    }

    /// Delete an asset whether or not it has expired. Returns whether a row
    /// was removed by this call.
    pub async fn remove(&self, key: &str) -> PipelineResult<bool> {
        if !Self::is_well_formed(key) {
            return Ok(false);
        }
        let removed = sqlx::query_scalar::<_, String>(
            "DELETE FROM temp_assets WHERE temp_key = ? RETURNING temp_key",
        )
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        self.remove_files(key).await;
        Ok(removed.is_some())
    }

    /// Delete every expired row and its payloads. Returns the number swept.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> PipelineResult<usize> {
        let keys = sqlx::query_scalar::<_, String>(
            "DELETE FROM temp_assets WHERE expires_at <= ? RETURNING temp_key",
        )
        .bind(now)
        .fetch_all(&*self.db)
        .await?;
        for key in &keys {
            self.remove_files(key).await;
        }
        Ok(keys.len())
    }

    pub async fn read_original(&self, key: &str) -> io::Result<Vec<u8>> {
        if !Self::is_well_formed(key) {
            return Err(io::Error::new(ErrorKind::NotFound, "malformed temp key"));
        }
        fs::read(self.original_path(key)).await
    }

    /// Open the bytes the preview endpoint serves for `asset`.
    pub async fn open_preview(&self, asset: &TempAsset) -> io::Result<File> {
        let key = asset.temp_key.as_str();
        if !Self::is_well_formed(key) {
            return Err(io::Error::new(ErrorKind::NotFound, "malformed temp key"));
        }
        let path = if asset.has_preview {
            self.preview_path(key)
        } else {
            self.original_path(key)
        };
        File::open(path).await
    }

    /// Best-effort removal of a key's payload files. Shard directories are
    /// left in place; a concurrent `stage` may be writing into them.
    pub async fn remove_files(&self, key: &str) {
        if !Self::is_well_formed(key) {
            return;
        }
        for path in [self.original_path(key), self.preview_path(key)] {
            match fs::remove_file(&path).await {
                Ok(_) => debug!("removed temp file {}", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => debug!("failed to remove temp file {}: {}", path.display(), err),
            }
        }
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    if written.is_err() {
        let _ = fs::remove_file(path).await;
    }
    written
}
