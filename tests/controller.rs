mod common;

use async_trait::async_trait;
use bytes::Bytes;
use common::{BUCKET, Harness, jpeg};
use image_intake::{
    controller::{
        Applied, ControllerError, PipelineState, UploaderController,
        api::{InProcessPipeline, PipelineApi},
    },
    errors::{ErrorKind, PipelineError, PipelineResult},
    models::{
        crop::CropRectangle,
        target::{CommitReport, DerivationResult, DerivationTarget},
        temp_asset::PreparedUpload,
    },
};
use chrono::Utc;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::Notify;

/// Scripted pipeline: prepare blocks until released, commit stores every
/// target except those whose image type is listed in `failing`.
#[derive(Default)]
struct FakePipeline {
    release: Notify,
    gate_prepare: bool,
    release_commit: Notify,
    gate_commit: bool,
    failing: Vec<String>,
    discarded: Mutex<Vec<String>>,
    commits: Mutex<usize>,
}

#[async_trait]
impl PipelineApi for FakePipeline {
    async fn prepare(&self, _file: Bytes, content_type: &str) -> PipelineResult<PreparedUpload> {
        if self.gate_prepare {
            self.release.notified().await;
        }
        if content_type != "image/png" {
            return Err(PipelineError::InvalidFileType(content_type.to_string()));
        }
        Ok(PreparedUpload {
            temp_key: "a".repeat(32),
            preview_url: "http://localhost/preview".into(),
            width: 100,
            height: 100,
        })
    }

    async fn commit(
        &self,
        _temp_key: &str,
        _crop: CropRectangle,
        targets: Vec<DerivationTarget>,
    ) -> PipelineResult<CommitReport> {
        *self.commits.lock().unwrap() += 1;
        if self.gate_commit {
            self.release_commit.notified().await;
        }
        Ok(targets
            .iter()
            .map(|t| {
                let image_type = t.image_type().to_string();
                let result = if self.failing.contains(&image_type) {
                    DerivationResult::Failed {
                        kind: ErrorKind::InvalidDimensions,
                    }
                } else {
                    DerivationResult::Stored {
                        url: format!("http://cdn/{}", t.destination_key.as_str()),
                    }
                };
                (image_type, result)
            })
            .collect())
    }

    async fn discard(&self, temp_key: &str) {
        self.discarded.lock().unwrap().push(temp_key.to_string());
    }
}

fn crop() -> CropRectangle {
    CropRectangle::new(0, 0, 100, 100)
}

#[tokio::test]
async fn single_uploader_walks_the_happy_path() {
    let api = Arc::new(FakePipeline::default());
    let controller =
        UploaderController::single(api.clone(), DerivationTarget::new("avatar-1/md", BUCKET, 64, 64));
    assert_eq!(controller.state(), PipelineState::Idle);

    controller
        .select_file(Bytes::from_static(b"png"), "image/png")
        .await
        .unwrap();
    assert_eq!(controller.state().name(), "cropping");

    let applied = controller.confirm_crop(crop()).await.unwrap();
    assert_eq!(
        applied,
        Applied::Primary {
            url: "http://cdn/avatar-1/md".into()
        }
    );
    assert_eq!(controller.state(), PipelineState::Idle);
    assert!(api.discarded.lock().unwrap().is_empty());
}

#[tokio::test]
async fn events_during_an_inflight_prepare_are_refused() {
    let api = Arc::new(FakePipeline {
        gate_prepare: true,
        ..FakePipeline::default()
    });
    let controller = Arc::new(UploaderController::single(
        api.clone(),
        DerivationTarget::new("avatar-1/md", BUCKET, 64, 64),
    ));

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move {
            controller
                .select_file(Bytes::from_static(b"png"), "image/png")
                .await
        })
    };
    while controller.state() != PipelineState::Preparing {
        tokio::task::yield_now().await;
    }

    let second = controller
        .select_file(Bytes::from_static(b"png"), "image/png")
        .await;
    assert_eq!(second, Err(ControllerError::Busy { state: "preparing" }));
    assert_eq!(
        controller.confirm_crop(crop()).await,
        Err(ControllerError::Busy { state: "preparing" })
    );
    assert!(!controller.cancel());

    api.release.notify_one();
    pending.await.unwrap().unwrap();
    assert_eq!(controller.state().name(), "cropping");
}

#[tokio::test]
async fn failed_prepare_returns_to_idle_with_a_readable_message() {
    let api = Arc::new(FakePipeline::default());
    let controller =
        UploaderController::single(api, DerivationTarget::new("avatar-1/md", BUCKET, 64, 64));

    let err = controller
        .select_file(Bytes::from_static(b"%PDF"), "application/pdf")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ControllerError::Pipeline {
            kind: ErrorKind::InvalidFileType,
            message: ErrorKind::InvalidFileType.user_message().into(),
        }
    );
    assert_eq!(controller.state(), PipelineState::Idle);
}

#[tokio::test]
async fn cancel_discards_the_staged_upload() {
    let api = Arc::new(FakePipeline::default());
    let controller =
        UploaderController::single(api.clone(), DerivationTarget::new("avatar-1/md", BUCKET, 64, 64));

    assert!(!controller.cancel());
    controller
        .select_file(Bytes::from_static(b"png"), "image/png")
        .await
        .unwrap();
    assert!(controller.cancel());
    assert_eq!(controller.state(), PipelineState::Idle);

    for _ in 0..100 {
        if !api.discarded.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(*api.discarded.lock().unwrap(), vec!["a".repeat(32)]);
    assert_eq!(*api.commits.lock().unwrap(), 0);
}

#[tokio::test]
async fn confirm_without_a_file_is_an_invalid_transition() {
    let api = Arc::new(FakePipeline::default());
    let controller =
        UploaderController::single(api, DerivationTarget::new("avatar-1/md", BUCKET, 64, 64));
    assert!(matches!(
        controller.confirm_crop(crop()).await,
        Err(ControllerError::InvalidTransition { state: "idle", .. })
    ));
}

#[tokio::test]
async fn batch_uploader_distributes_urls_to_fields() {
    let api = Arc::new(FakePipeline {
        failing: vec!["lg".into()],
        ..FakePipeline::default()
    });
    let controller = UploaderController::batch(
        api,
        vec![
            ("thumbnail_url".into(), DerivationTarget::new("shoe-1/xs", BUCKET, 74, 74)),
            ("gallery_url".into(), DerivationTarget::new("shoe-1/sm", BUCKET, 300, 300)),
            ("zoom_url".into(), DerivationTarget::new("shoe-1/lg", BUCKET, 1200, 1200)),
        ],
    );

    controller
        .select_file(Bytes::from_static(b"png"), "image/png")
        .await
        .unwrap();
    let Applied::Fields { urls, failed } = controller.confirm_crop(crop()).await.unwrap() else {
        panic!("batch uploader applies fields");
    };

    assert_eq!(urls["thumbnail_url"], "http://cdn/shoe-1/xs");
    assert_eq!(urls["gallery_url"], "http://cdn/shoe-1/sm");
    assert_eq!(failed["zoom_url"], ErrorKind::InvalidDimensions);
    assert_eq!(controller.state(), PipelineState::Idle);
}

#[tokio::test]
async fn single_uploader_surfaces_a_failed_primary_target() {
    let api = Arc::new(FakePipeline {
        failing: vec!["md".into()],
        ..FakePipeline::default()
    });
    let controller =
        UploaderController::single(api, DerivationTarget::new("avatar-1/md", BUCKET, 64, 64));

    controller
        .select_file(Bytes::from_static(b"png"), "image/png")
        .await
        .unwrap();
    let err = controller.confirm_crop(crop()).await.unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Pipeline {
            kind: ErrorKind::InvalidDimensions,
            ..
        }
    ));
    assert_eq!(controller.state(), PipelineState::Idle);
}

#[tokio::test]
async fn in_process_pipeline_drives_real_services() {
    let h = Harness::new().await;
    let api = Arc::new(InProcessPipeline::from(&h.state));
    let controller =
        UploaderController::single(api, DerivationTarget::new("hero-3/banner", BUCKET, 320, 90));

    let prepared = controller
        .select_file(Bytes::from(jpeg(1600, 900)), "image/jpeg")
        .await
        .unwrap();
    assert_eq!((prepared.width, prepared.height), (1600, 900));

    let applied = controller
        .confirm_crop(CropRectangle::new(0, 225, 1600, 450))
        .await
        .unwrap();
    assert_eq!(
        applied,
        Applied::Primary {
            url: "http://localhost:3000/assets/product-images/hero-3/banner".into()
        }
    );
    let (_, banner) = h.stored_image("hero-3/banner").await;
    assert_eq!((banner.width(), banner.height()), (320, 90));
}

async fn wait_for(controller: &UploaderController, name: &str) {
    while controller.state().name() != name {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn events_during_an_inflight_commit_are_refused() {
    let api = Arc::new(FakePipeline {
        gate_commit: true,
        ..FakePipeline::default()
    });
    let controller = Arc::new(UploaderController::single(
        api.clone(),
        DerivationTarget::new("avatar-1/md", BUCKET, 64, 64),
    ));
    controller
        .select_file(Bytes::from_static(b"png"), "image/png")
        .await
        .unwrap();

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.confirm_crop(crop()).await })
    };
    wait_for(&controller, "committing").await;

    assert_eq!(
        controller
            .select_file(Bytes::from_static(b"png"), "image/png")
            .await,
        Err(ControllerError::Busy { state: "committing" })
    );
    assert_eq!(
        controller.confirm_crop(crop()).await,
        Err(ControllerError::Busy { state: "committing" })
    );
    assert!(!controller.cancel());
    assert_eq!(*api.commits.lock().unwrap(), 1);

    api.release_commit.notify_one();
    assert!(pending.await.unwrap().is_ok());
    assert_eq!(controller.state(), PipelineState::Idle);
}

#[tokio::test]
async fn abandoned_requests_return_the_widget_to_idle() {
    let api = Arc::new(FakePipeline {
        gate_prepare: true,
        gate_commit: true,
        ..FakePipeline::default()
    });
    let controller = Arc::new(UploaderController::single(
        api.clone(),
        DerivationTarget::new("avatar-1/md", BUCKET, 64, 64),
    ));

    let preparing = {
        let controller = controller.clone();
        tokio::spawn(async move {
            controller
                .select_file(Bytes::from_static(b"png"), "image/png")
                .await
        })
    };
    wait_for(&controller, "preparing").await;
    preparing.abort();
    assert!(preparing.await.unwrap_err().is_cancelled());
    assert_eq!(controller.state(), PipelineState::Idle);

    // the widget is usable again
    let selecting = {
        let controller = controller.clone();
        tokio::spawn(async move {
            controller
                .select_file(Bytes::from_static(b"png"), "image/png")
                .await
        })
    };
    wait_for(&controller, "preparing").await;
    api.release.notify_one();
    selecting.await.unwrap().unwrap();

    let committing = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.confirm_crop(crop()).await })
    };
    wait_for(&controller, "committing").await;
    committing.abort();
    assert!(committing.await.unwrap_err().is_cancelled());
    assert_eq!(controller.state(), PipelineState::Idle);
}

#[tokio::test]
async fn commit_rejected_before_claim_discards_the_upload() {
    let h = Harness::new().await;
    let api = Arc::new(InProcessPipeline::from(&h.state));
    let controller = UploaderController::batch(
        api,
        vec![
            ("front_url".into(), DerivationTarget::new("front/sm", BUCKET, 64, 64)),
            ("back_url".into(), DerivationTarget::new("back/sm", BUCKET, 64, 64)),
        ],
    );

    let prepared = controller
        .select_file(Bytes::from(jpeg(200, 200)), "image/jpeg")
        .await
        .unwrap();
    let err = controller
        .confirm_crop(CropRectangle::new(0, 0, 200, 200))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ControllerError::Pipeline {
            kind: ErrorKind::MalformedRequest,
            ..
        }
    ));
    assert_eq!(controller.state(), PipelineState::Idle);
    assert!(
        h.state
            .temp_store
            .lookup(&prepared.temp_key, Utc::now())
            .await
            .unwrap()
            .is_none()
    );
}
