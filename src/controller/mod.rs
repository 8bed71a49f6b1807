//! Client-side driver for one uploader widget.
//!
//! ```text
//! idle --select_file--> preparing --ok--> cropping --confirm_crop--> committing --> idle
//!                            \--err--> idle      \--cancel--> idle (discard, fire-and-forget)
//! ```
//!
//! While `preparing` or `committing` a request is in flight and every new
//! event is refused with [`ControllerError::Busy`]. Each controller owns at
//! most one temp key at a time; independent widgets use independent
//! controllers.

pub mod api;

use crate::{
    errors::{ErrorKind, PipelineError},
    models::{
        crop::CropRectangle,
        target::{CommitReport, DerivationTarget},
        temp_asset::PreparedUpload,
    },
};
use api::PipelineApi;
use bytes::Bytes;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Preparing,
    Cropping { upload: PreparedUpload },
    Committing { temp_key: String },
}

impl PipelineState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Cropping { .. } => "cropping",
            Self::Committing { .. } => "committing",
        }
    }
}

/// How a widget consumes the commit result.
#[derive(Debug, Clone)]
pub enum UploaderKind {
    /// One image slot; applies the URL of `primary_type`.
    Single { primary_type: String },
    /// Several slots; `fields` maps image type to the form field it fills.
    Batch { fields: BTreeMap<String, String> },
}

/// What the widget should apply after a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Primary {
        url: String,
    },
    Fields {
        urls: BTreeMap<String, String>,
        failed: BTreeMap<String, ErrorKind>,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("a request is already in flight ({state})")]
    Busy { state: &'static str },
    #[error("cannot {event} while {state}")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },
    #[error("{message}")]
    Pipeline { kind: ErrorKind, message: String },
}

impl ControllerError {
    fn from_kind(kind: ErrorKind) -> Self {
        Self::Pipeline {
            kind,
            message: kind.user_message().to_string(),
        }
    }
}

impl From<PipelineError> for ControllerError {
    fn from(err: PipelineError) -> Self {
        Self::from_kind(err.kind())
    }
}

pub struct UploaderController {
    api: Arc<dyn PipelineApi>,
    kind: UploaderKind,
    targets: Vec<DerivationTarget>,
    state: Mutex<PipelineState>,
}

impl UploaderController {
    pub fn new(api: Arc<dyn PipelineApi>, kind: UploaderKind, targets: Vec<DerivationTarget>) -> Self {
        Self {
            api,
            kind,
            targets,
            state: Mutex::new(PipelineState::Idle),
        }
    }

    /// A single-slot uploader for one target.
    pub fn single(api: Arc<dyn PipelineApi>, target: DerivationTarget) -> Self {
        let kind = UploaderKind::Single {
            primary_type: target.image_type().to_string(),
        };
        Self::new(api, kind, vec![target])
    }

    /// A batch uploader; each target is paired with the field it fills.
    pub fn batch(api: Arc<dyn PipelineApi>, slots: Vec<(String, DerivationTarget)>) -> Self {
        let fields = slots
            .iter()
            .map(|(field, target)| (target.image_type().to_string(), field.clone()))
            .collect();
        let targets = slots.into_iter().map(|(_, target)| target).collect();
        Self::new(api, UploaderKind::Batch { fields }, targets)
    }

    pub fn state(&self) -> PipelineState {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, next: PipelineState) {
        *self.lock() = next;
    }

    /// `idle -> preparing -> cropping | idle`.
    pub async fn select_file(
        &self,
        file: Bytes,
        content_type: &str,
    ) -> Result<PreparedUpload, ControllerError> {
        {
            let mut state = self.lock();
            match &*state {
                PipelineState::Idle => *state = PipelineState::Preparing,
                busy @ (PipelineState::Preparing | PipelineState::Committing { .. }) => {
                    return Err(ControllerError::Busy { state: busy.name() });
                }
                other => {
                    return Err(ControllerError::InvalidTransition {
                        state: other.name(),
                        event: "select a file",
                    });
                }
            }
        }

        let reset = ResetOnDrop::new(self);
        let result = self.api.prepare(file, content_type).await;
        reset.disarm();

        match result {
            Ok(upload) => {
                self.set(PipelineState::Cropping {
                    upload: upload.clone(),
                });
                Ok(upload)
            }
            Err(err) => {
                tracing::debug!(error = %err, "prepare failed");
                self.set(PipelineState::Idle);
                Err(err.into())
            }
        }
    }

    /// `cropping -> committing -> idle`.
    ///
    /// Once commit has claimed the temp key it retires it on every outcome.
    /// A `MalformedRequest` is rejected before the claim, so that one case
    /// discards the upload here.
    pub async fn confirm_crop(&self, crop: CropRectangle) -> Result<Applied, ControllerError> {
        let temp_key = {
            let mut state = self.lock();
            let temp_key = match &*state {
                PipelineState::Cropping { upload } => upload.temp_key.clone(),
                busy @ (PipelineState::Preparing | PipelineState::Committing { .. }) => {
                    return Err(ControllerError::Busy { state: busy.name() });
                }
                PipelineState::Idle => {
                    return Err(ControllerError::InvalidTransition {
                        state: "idle",
                        event: "confirm a crop",
                    });
                }
            };
            *state = PipelineState::Committing {
                temp_key: temp_key.clone(),
            };
            temp_key
        };

        let reset = ResetOnDrop::new(self);
        let result = self.api.commit(&temp_key, crop, self.targets.clone()).await;
        let rejected_before_claim =
            matches!(&result, Err(err) if err.kind() == ErrorKind::MalformedRequest);
        if rejected_before_claim {
            self.api.discard(&temp_key).await;
        }
        drop(reset);

        let report = result?;
        self.apply(report)
    }

    /// `cropping -> idle`, discarding the staged upload in the background.
    /// Returns false (and does nothing) from any other state.
    pub fn cancel(&self) -> bool {
        let temp_key = {
            let mut state = self.lock();
            match &*state {
                PipelineState::Cropping { upload } => {
                    let key = upload.temp_key.clone();
                    *state = PipelineState::Idle;
                    key
                }
                _ => return false,
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let api = self.api.clone();
                handle.spawn(async move { api.discard(&temp_key).await });
            }
            Err(_) => tracing::warn!("no runtime to discard upload; expiry sweep will reclaim it"),
        }
        true
    }

    fn apply(&self, mut report: CommitReport) -> Result<Applied, ControllerError> {
        match &self.kind {
            UploaderKind::Single { primary_type } => match report.remove(primary_type) {
                Some(result) => match (result.url(), result.error_kind()) {
                    (Some(url), _) => Ok(Applied::Primary {
                        url: url.to_string(),
                    }),
                    (None, Some(kind)) => Err(ControllerError::from_kind(kind)),
                    (None, None) => Err(ControllerError::from_kind(ErrorKind::Internal)),
                },
                None => Err(ControllerError::from_kind(ErrorKind::Internal)),
            },
            UploaderKind::Batch { fields } => {
                let mut urls = BTreeMap::new();
                let mut failed = BTreeMap::new();
                for (image_type, result) in report {
                    let field = fields.get(&image_type).cloned().unwrap_or(image_type);
                    match (result.url(), result.error_kind()) {
                        (Some(url), _) => {
                            urls.insert(field, url.to_string());
                        }
                        (None, kind) => {
                            failed.insert(field, kind.unwrap_or(ErrorKind::Internal));
                        }
                    }
                }
                Ok(Applied::Fields { urls, failed })
            }
        }
    }
}

/// Returns the controller to `idle` when an in-flight call is abandoned,
/// e.g. because the caller dropped the future.
struct ResetOnDrop<'a> {
    controller: &'a UploaderController,
    armed: bool,
}

impl<'a> ResetOnDrop<'a> {
    fn new(controller: &'a UploaderController) -> Self {
        Self {
            controller,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller.set(PipelineState::Idle);
        }
    }
}
