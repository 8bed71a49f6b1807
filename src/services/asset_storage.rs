//! src/services/asset_storage.rs
//!
//! Permanent storage for derived images. `AssetStorage` is the seam the
//! commit service writes through; `LocalAssetStorage` implements it with
//! SQLite metadata and on-disk payloads sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`.

use crate::models::asset::StoredAsset;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use md5::Context;
use sqlx::SqlitePool;
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` is not configured")]
    UnknownBucket(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("asset `{key}` not found in bucket `{bucket}`")]
    AssetNotFound { bucket: String, key: String },
    #[error("invalid asset key")]
    InvalidKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Permanent storage as seen by the pipeline.
///
/// `put` overwrites any previous payload at the same key and returns the
/// public URL of the stored object.
#[async_trait]
pub trait AssetStorage: Send + Sync {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> StorageResult<String>;

    /// Remove an asset. Deleting a missing key succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;
}

const MAX_ASSET_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Disk + SQLite implementation of [`AssetStorage`].
#[derive(Clone)]
pub struct LocalAssetStorage {
    /// Shared SQLite connection pool used for asset metadata.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where derivative payloads are stored.
    pub base_path: PathBuf,

    /// Prefix of every public URL, without a trailing slash.
    public_base_url: String,

    buckets: BTreeSet<String>,
}

impl LocalAssetStorage {
    /// Create storage rooted at `base_path` that only accepts `buckets`.
    ///
    /// Bucket names are validated up front so a bad configuration fails at
    /// startup rather than on the first commit.
    pub fn new<I, S>(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_base_url: &str,
        buckets: I,
    ) -> StorageResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names = BTreeSet::new();
        for bucket in buckets {
            let bucket = bucket.as_ref().trim();
            if bucket.is_empty() {
                continue;
            }
            ensure_bucket_name_safe(bucket)?;
            names.insert(bucket.to_string());
        }

        Ok(Self {
            db,
            base_path: base_path.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            buckets: names,
        })
    }

    pub fn buckets(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().map(String::as_str)
    }

    /// Public URL under which `bucket/key` is served.
    pub fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/assets/{}/{}", self.public_base_url, bucket, key)
    }

    fn ensure_bucket_known(&self, bucket: &str) -> StorageResult<()> {
        if self.buckets.contains(bucket) {
            Ok(())
        } else {
            Err(StorageError::UnknownBucket(bucket.to_string()))
        }
    }

    /// Reject keys that could escape the bucket directory.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_ASSET_KEY_LEN {
            return Err(StorageError::InvalidKey);
        }
        if key.starts_with('/') || key.ends_with('/') || key.contains("..") || key.contains("//") {
            return Err(StorageError::InvalidKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidKey);
        }
        Ok(())
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Two-level shard identifiers from MD5(bucket/key).
    fn asset_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn asset_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::asset_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_asset(&self, bucket: &str, key: &str) -> StorageResult<StoredAsset> {
        sqlx::query_as::<_, StoredAsset>(
            "SELECT bucket, key, content_type, size_bytes, etag, last_modified
             FROM assets WHERE bucket = ? AND key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::AssetNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// Metadata only, for HEAD requests.
    pub async fn asset_metadata(&self, bucket: &str, key: &str) -> StorageResult<StoredAsset> {
        self.ensure_bucket_known(bucket)?;
        self.ensure_key_safe(key)?;
        self.fetch_asset(bucket, key).await
    }

    /// Metadata plus an open file handle ready for streaming out.
    pub async fn open_asset(&self, bucket: &str, key: &str) -> StorageResult<(StoredAsset, File)> {
        let asset = self.asset_metadata(bucket, key).await?;
        let file = File::open(self.asset_path(bucket, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StorageError::AssetNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StorageError::Io(err)
                }
            })?;
        Ok((asset, file))
    }

    /// Write `bytes` to a temp file, fsync, and rename into place.
    async fn write_payload(&self, file_path: &Path, bytes: &[u8]) -> StorageResult<()> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "asset path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(&tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        Ok(())
    }

    /// Remove empty directories from `start` up to (not including) `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl AssetStorage for LocalAssetStorage {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> StorageResult<String> {
        self.ensure_bucket_known(bucket)?;
        self.ensure_key_safe(key)?;

        let file_path = self.asset_path(bucket, key);
        self.write_payload(&file_path, &bytes).await?;

        let mut digest = Context::new();
        digest.consume(&bytes);
        let etag = format!("{:x}", digest.compute());

        let upsert = sqlx::query(
            r#"
            INSERT INTO assets (bucket, key, content_type, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(bucket)
        .bind(key)
        .bind(content_type)
        .bind(bytes.len() as i64)
        .bind(&etag)
        .bind(Utc::now())
        .execute(&*self.db)
        .await;

        match upsert {
            Ok(_) => {
                debug!(bucket, key, etag = %etag, "stored asset");
                Ok(self.public_url(bucket, key))
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.ensure_bucket_known(bucket)?;
        self.ensure_key_safe(key)?;

        sqlx::query("DELETE FROM assets WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .execute(&*self.db)
            .await?;

        let file_path = self.asset_path(bucket, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed asset file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("asset file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(())
    }
}

/// Validate bucket name format.
///
/// S3-like rules: 3-63 characters of lowercase letters, digits, dots and
/// hyphens, starting and ending with a letter or digit, without `..`.
fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }
    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names_follow_s3_rules() {
        assert!(ensure_bucket_name_safe("product-images").is_ok());
        assert!(ensure_bucket_name_safe("ab").is_err());
        assert!(ensure_bucket_name_safe("Product").is_err());
        assert!(ensure_bucket_name_safe("-images").is_err());
        assert!(ensure_bucket_name_safe("a..b").is_err());
    }

    #[test]
    fn shards_are_stable_hex_pairs() {
        let (a, b) = LocalAssetStorage::asset_shards("product-images", "shoe-1/xs");
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
        assert_eq!(
            (a, b),
            LocalAssetStorage::asset_shards("product-images", "shoe-1/xs")
        );
    }
}
