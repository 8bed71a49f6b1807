//! Shared handler state and service wiring.

use crate::{
    config::{AppConfig, PipelineSettings},
    services::{
        asset_storage::{LocalAssetStorage, StorageResult},
        commit_service::CommitService,
        derivation_engine::DerivationEngine,
        intake_service::IntakeService,
        sweeper::TempSweeper,
        temp_store::TempStore,
    },
};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc, time::Duration};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub storage_dir: PathBuf,
    pub intake: Arc<IntakeService>,
    pub commit: Arc<CommitService>,
    pub assets: Arc<LocalAssetStorage>,
    pub temp_store: TempStore,
}

impl AppState {
    /// Wire every service against one pool and one storage root
    /// (`tmp/` for staged originals, `assets/` for derivatives).
    pub fn new<I, S>(
        db: Arc<SqlitePool>,
        storage_dir: impl Into<PathBuf>,
        buckets: I,
        settings: PipelineSettings,
    ) -> StorageResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let storage_dir = storage_dir.into();
        let temp_store = TempStore::new(db.clone(), storage_dir.join("tmp"));
        let assets = Arc::new(LocalAssetStorage::new(
            db.clone(),
            storage_dir.join("assets"),
            &settings.public_base_url,
            buckets,
        )?);

        let commit = CommitService::new(
            temp_store.clone(),
            assets.clone(),
            DerivationEngine::new(settings.max_target_dimension),
            settings.processing_timeout,
        );
        let intake = IntakeService::new(temp_store.clone(), settings);

        Ok(Self {
            db,
            storage_dir,
            intake: Arc::new(intake),
            commit: Arc::new(commit),
            assets,
            temp_store,
        })
    }

    pub fn from_config(db: Arc<SqlitePool>, cfg: &AppConfig) -> StorageResult<Self> {
        Self::new(
            db,
            cfg.storage_dir.clone(),
            &cfg.buckets,
            cfg.pipeline.clone(),
        )
    }

    pub fn sweeper(&self, period: Duration) -> TempSweeper {
        TempSweeper::new(self.temp_store.clone(), period)
    }

    /// Upload ceiling plus room for multipart framing.
    pub fn upload_body_limit(&self) -> usize {
        let max = self.intake.settings().max_upload_bytes;
        usize::try_from(max).unwrap_or(usize::MAX).saturating_add(64 * 1024)
    }
}
