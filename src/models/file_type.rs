//! File-type allow-list enforced at intake.
//!
//! Camera-native TIFF is accepted and previewed through a PNG copy.
//! HEIC/HEIF is not supported: the `image` decoder cannot read it, so it is
//! left out of [`DEFAULT_ACCEPTED_TYPES`]. Listing it in `ACCEPTED_TYPES`
//! anyway makes intake refuse such payloads as `invalid_file_type`.

use std::collections::BTreeSet;

/// Formats a browser renders directly; anything else needs a preview copy.
const DISPLAYABLE_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/gif"];

pub const DEFAULT_ACCEPTED_TYPES: [&str; 6] = [
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/tiff",
    "image/bmp",
];

/// Accepted MIME types, loaded from configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileTypePolicy {
    accepted: BTreeSet<String>,
}

impl FileTypePolicy {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let accepted = types
            .into_iter()
            .map(|t| normalize_content_type(t.as_ref()))
            .filter(|t| !t.is_empty())
            .collect();
        Self { accepted }
    }

    /// Parse a comma separated list such as `image/jpeg,image/png`.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Return the normalized type when it is on the allow-list.
    pub fn accept(&self, content_type: &str) -> Option<String> {
        let normalized = normalize_content_type(content_type);
        self.accepted.contains(&normalized).then_some(normalized)
    }

    pub fn accepted(&self) -> impl Iterator<Item = &str> {
        self.accepted.iter().map(String::as_str)
    }
}

impl Default for FileTypePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ACCEPTED_TYPES)
    }
}

/// Lowercase, drop parameters and fold common aliases.
pub fn normalize_content_type(content_type: &str) -> String {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "image/x-png" => "image/png".to_string(),
        "image/x-ms-bmp" => "image/bmp".to_string(),
        _ => essence,
    }
}

/// True when `content_type` (already normalized) can be shown without transcoding.
pub fn is_displayable(content_type: &str) -> bool {
    DISPLAYABLE_TYPES.contains(&content_type)
}
