//! Derivation targets and their per-target outcomes.

use crate::errors::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Permanent-storage path of a derivative: `{slug}/{image_type}`.
///
/// The image type is the last `/`-separated segment, so free-form keys such as
/// `banners/home/hero` still resolve to a label (`hero`).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct DestinationKey(String);

impl DestinationKey {
    /// Compose a key from a logical grouping identifier and an image-type label.
    pub fn new(slug: &str, image_type: &str) -> Self {
        let slug = slug.trim_matches('/');
        if slug.is_empty() {
            Self(image_type.to_string())
        } else {
            Self(format!("{}/{}", slug, image_type))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn image_type(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn slug(&self) -> Option<&str> {
        self.0.rsplit_once('/').map(|(slug, _)| slug)
    }
}

impl From<&str> for DestinationKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DestinationKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One requested output variant.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DerivationTarget {
    pub destination_key: DestinationKey,
    pub bucket: String,
    pub width: u32,
    pub height: u32,
}

impl DerivationTarget {
    pub fn new(destination_key: impl Into<DestinationKey>, bucket: &str, width: u32, height: u32) -> Self {
        Self {
            destination_key: destination_key.into(),
            bucket: bucket.to_string(),
            width,
            height,
        }
    }

    pub fn image_type(&self) -> &str {
        self.destination_key.image_type()
    }
}

/// Outcome of producing and storing one target.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DerivationResult {
    Stored { url: String },
    Failed { kind: ErrorKind },
}

impl DerivationResult {
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Stored { url } => Some(url),
            Self::Failed { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Stored { .. } => None,
            Self::Failed { kind } => Some(*kind),
        }
    }
}

/// Per-target results of one commit, keyed by image type. The key set always
/// equals the set of requested targets.
pub type CommitReport = BTreeMap<String, DerivationResult>;

/// Wire shape of a commit response: stored URLs and per-target error kinds.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitResponse {
    pub urls: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, ErrorKind>,
}

impl From<CommitReport> for CommitResponse {
    fn from(report: CommitReport) -> Self {
        let mut response = CommitResponse::default();
        for (image_type, result) in report {
            match result {
                DerivationResult::Stored { url } => {
                    response.urls.insert(image_type, url);
                }
                DerivationResult::Failed { kind } => {
                    response.errors.insert(image_type, kind);
                }
            }
        }
        response
    }
}
