use crate::{models::crop::CropRectangle, services::asset_storage::StorageError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt, io, time::Duration};
use thiserror::Error;

/// Machine-readable error kind shared by the HTTP boundary, per-target
/// commit results and the client controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TempKeyNotFound,
    MalformedRequest,
    InvalidFileType,
    PayloadTooLarge,
    InvalidCropBounds,
    UndecodableImage,
    InvalidDimensions,
    ProcessingFailed,
    StorageWriteFailed,
    AssetNotFound,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// Stable wire name, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TempKeyNotFound => "temp_key_not_found",
            Self::MalformedRequest => "malformed_request",
            Self::InvalidFileType => "invalid_file_type",
            Self::PayloadTooLarge => "payload_too_large",
            Self::InvalidCropBounds => "invalid_crop_bounds",
            Self::UndecodableImage => "undecodable_image",
            Self::InvalidDimensions => "invalid_dimensions",
            Self::ProcessingFailed => "processing_failed",
            Self::StorageWriteFailed => "storage_write_failed",
            Self::AssetNotFound => "asset_not_found",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }

    /// The one message shown to a person for this kind of failure.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::TempKeyNotFound => "This upload has expired. Please select the file again.",
            Self::MalformedRequest => "The upload request was incomplete. Please try again.",
            Self::InvalidFileType => "This file type is not supported. Please choose an image.",
            Self::PayloadTooLarge => "This image is too large. Please choose a smaller file.",
            Self::InvalidCropBounds => "The selected crop area lies outside the image.",
            Self::UndecodableImage => "This image could not be read. It may be corrupt.",
            Self::InvalidDimensions => "One of the requested image sizes is invalid.",
            Self::ProcessingFailed => "The image could not be processed.",
            Self::StorageWriteFailed => "The image could not be saved. Please try again.",
            Self::AssetNotFound => "The requested image does not exist.",
            Self::Timeout => "Processing took too long. Please try again.",
            Self::Internal => "Something went wrong. Please try again.",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            Self::TempKeyNotFound | Self::AssetNotFound => StatusCode::NOT_FOUND,
            Self::MalformedRequest | Self::InvalidDimensions => StatusCode::BAD_REQUEST,
            Self::InvalidFileType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidCropBounds | Self::UndecodableImage => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::ProcessingFailed | Self::StorageWriteFailed | Self::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures of the intake / commit pipeline as a whole.
///
/// Per-target derivation failures are not represented here; they are reported
/// inside the commit result map.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("temp key `{0}` not found or expired")]
    TempKeyNotFound(String),
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("content type `{0}` is not accepted")]
    InvalidFileType(String),
    #[error("payload of {size} bytes exceeds the limit of {max} bytes")]
    PayloadTooLarge { size: u64, max: u64 },
    #[error("image of {pixels} pixels exceeds the limit of {max} pixels")]
    TooManyPixels { pixels: u64, max: u64 },
    #[error("crop {crop} is outside the {width}x{height} original")]
    InvalidCropBounds {
        crop: CropRectangle,
        width: u32,
        height: u32,
    },
    #[error("image could not be decoded: {0}")]
    UndecodableImage(String),
    #[error("processing exceeded {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("background task failed: {0}")]
    Join(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TempKeyNotFound(_) => ErrorKind::TempKeyNotFound,
            Self::MalformedRequest(_) => ErrorKind::MalformedRequest,
            Self::InvalidFileType(_) => ErrorKind::InvalidFileType,
            Self::PayloadTooLarge { .. } | Self::TooManyPixels { .. } => {
                ErrorKind::PayloadTooLarge
            }
            Self::InvalidCropBounds { .. } => ErrorKind::InvalidCropBounds,
            Self::UndecodableImage(_) => ErrorKind::UndecodableImage,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Storage(_) => ErrorKind::StorageWriteFailed,
            Self::Sqlx(_) | Self::Io(_) | Self::Join(_) => ErrorKind::Internal,
        }
    }
}

/// HTTP-facing error: a status, a machine-readable kind and a message.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal, msg)
    }

    /// Shortcut for 400 with `malformed_request`
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::MalformedRequest, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "kind": self.kind,
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let kind = err.kind();
        if kind == ErrorKind::Internal {
            tracing::error!(error = %err, "internal pipeline error");
        }
        AppError::new(kind.status(), kind, err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::AssetNotFound { .. } => AppError::new(
                StatusCode::NOT_FOUND,
                ErrorKind::AssetNotFound,
                err.to_string(),
            ),
            StorageError::UnknownBucket(_) | StorageError::InvalidKey => {
                AppError::bad_request(err.to_string())
            }
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
