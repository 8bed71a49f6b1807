//! Commit: consume a staged original, derive every requested target and
//! persist the successful ones to permanent storage.

use crate::{
    errors::{ErrorKind, PipelineError, PipelineResult},
    models::{
        crop::CropRectangle,
        target::{CommitReport, DerivationResult, DerivationTarget},
    },
    services::{
        asset_storage::AssetStorage,
        derivation_engine::{DerivationEngine, DerivedImage},
        temp_store::TempStore,
    },
};
use chrono::Utc;
use futures::future::join_all;
use std::{
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Clone)]
pub struct CommitService {
    store: TempStore,
    storage: Arc<dyn AssetStorage>,
    engine: DerivationEngine,
    timeout: Duration,
}

/// Destinations this call has started writing to; rolled back on timeout.
type WriteLog = Arc<Mutex<Vec<(String, String)>>>;

impl CommitService {
    pub fn new(
        store: TempStore,
        storage: Arc<dyn AssetStorage>,
        engine: DerivationEngine,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            storage,
            engine,
            timeout,
        }
    }

    /// Derive and store `targets` from the original staged under `temp_key`.
    ///
    /// The temp asset is claimed atomically before any work starts, so a
    /// second commit (or a racing discard) sees `TempKeyNotFound`. Once
    /// claimed, the asset is retired on every outcome. A timeout removes
    /// whatever this call already wrote to permanent storage.
    #[tracing::instrument(skip(self, targets), fields(targets = targets.len()))]
    pub async fn commit(
        &self,
        temp_key: &str,
        crop: CropRectangle,
        targets: Vec<DerivationTarget>,
    ) -> PipelineResult<CommitReport> {
        DerivationEngine::validate_targets(&targets)?;

        let asset = self
            .store
            .claim(temp_key, Utc::now())
            .await?
            .ok_or_else(|| PipelineError::TempKeyNotFound(temp_key.to_string()))?;

        if !crop.fits_within(asset.width as u32, asset.height as u32) {
            self.store.remove_files(temp_key).await;
            return Err(PipelineError::InvalidCropBounds {
                crop,
                width: asset.width as u32,
                height: asset.height as u32,
            });
        }

        let written: WriteLog = Arc::default();
        let outcome = tokio::time::timeout(
            self.timeout,
            self.derive_and_store(temp_key, crop, targets, written.clone()),
        )
        .await;

        self.store.remove_files(temp_key).await;

        match outcome {
            Ok(result) => {
                if let Ok(report) = &result {
                    let stored = report.values().filter(|r| r.url().is_some()).count();
                    tracing::info!(stored, failed = report.len() - stored, "commit finished");
                }
                result
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "commit timed out, rolling back writes");
                self.roll_back(&written).await;
                Err(PipelineError::Timeout(self.timeout))
            }
        }
    }

    async fn derive_and_store(
        &self,
        temp_key: &str,
        crop: CropRectangle,
        targets: Vec<DerivationTarget>,
        written: WriteLog,
    ) -> PipelineResult<CommitReport> {
        let original = self.store.read_original(temp_key).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                PipelineError::TempKeyNotFound(temp_key.to_string())
            } else {
                PipelineError::Io(err)
            }
        })?;

        let mut derived = self
            .engine
            .derive_blocking(original, crop, targets.clone())
            .await?;

        let writes = targets.into_iter().map(|target| {
            let result = derived
                .remove(target.image_type())
                .unwrap_or(Err(ErrorKind::ProcessingFailed));
            let written = written.clone();
            async move {
                let outcome = match result {
                    Ok(image) => self.store_target(&target, image, &written).await,
                    Err(kind) => DerivationResult::Failed { kind },
                };
                (target.image_type().to_string(), outcome)
            }
        });

        Ok(join_all(writes).await.into_iter().collect())
    }

    async fn store_target(
        &self,
        target: &DerivationTarget,
        image: DerivedImage,
        written: &WriteLog,
    ) -> DerivationResult {
        let key = target.destination_key.as_str();
        if let Ok(mut log) = written.lock() {
            log.push((target.bucket.clone(), key.to_string()));
        }
        match self
            .storage
            .put(&target.bucket, key, image.content_type, image.bytes)
            .await
        {
            Ok(url) => DerivationResult::Stored { url },
            Err(err) => {
                tracing::warn!(
                    bucket = %target.bucket,
                    key,
                    error = %err,
                    "failed to store derivative"
                );
                DerivationResult::Failed {
                    kind: ErrorKind::StorageWriteFailed,
                }
            }
        }
    }

    async fn roll_back(&self, written: &WriteLog) {
        let entries = match written.lock() {
            Ok(mut log) => std::mem::take(&mut *log),
            Err(_) => return,
        };
        for (bucket, key) in entries {
            if let Err(err) = self.storage.delete(&bucket, &key).await {
                tracing::warn!(bucket = %bucket, key = %key, error = %err, "rollback delete failed");
            }
        }
    }
}
