//! The three calls a controller makes, behind one trait so widgets can run
//! against the in-process services or any other transport.

use crate::{
    errors::PipelineResult,
    models::{
        crop::CropRectangle,
        target::{CommitReport, DerivationTarget},
        temp_asset::PreparedUpload,
    },
    services::{commit_service::CommitService, intake_service::IntakeService},
    state::AppState,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

#[async_trait]
pub trait PipelineApi: Send + Sync {
    async fn prepare(&self, file: Bytes, content_type: &str) -> PipelineResult<PreparedUpload>;

    async fn commit(
        &self,
        temp_key: &str,
        crop: CropRectangle,
        targets: Vec<DerivationTarget>,
    ) -> PipelineResult<CommitReport>;

    /// Best-effort; never fails.
    async fn discard(&self, temp_key: &str);
}

/// Calls the intake and commit services directly.
#[derive(Clone)]
pub struct InProcessPipeline {
    intake: Arc<IntakeService>,
    commit: Arc<CommitService>,
}

impl InProcessPipeline {
    pub fn new(intake: Arc<IntakeService>, commit: Arc<CommitService>) -> Self {
        Self { intake, commit }
    }
}

impl From<&AppState> for InProcessPipeline {
    fn from(state: &AppState) -> Self {
        Self::new(state.intake.clone(), state.commit.clone())
    }
}

#[async_trait]
impl PipelineApi for InProcessPipeline {
    async fn prepare(&self, file: Bytes, content_type: &str) -> PipelineResult<PreparedUpload> {
        self.intake.prepare(file, content_type).await
    }

    async fn commit(
        &self,
        temp_key: &str,
        crop: CropRectangle,
        targets: Vec<DerivationTarget>,
    ) -> PipelineResult<CommitReport> {
        self.commit.commit(temp_key, crop, targets).await
    }

    async fn discard(&self, temp_key: &str) {
        self.intake.discard(temp_key).await
    }
}
