pub mod youtube;

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::acquire::MediaAsset;
use crate::auth::Credential;
use crate::config::{self, ReelpostConfig};

pub use crate::config::Privacy;
pub use youtube::YoutubeUploader;

/// Everything one upload needs.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub title: String,
    pub description: String,
    pub category_id: String,
    pub privacy: Privacy,
    pub tags: Vec<String>,
    pub media_path: PathBuf,
    pub media_size: u64,
    pub credential: Credential,
}

impl PublishRequest {
    /// Build a request with the fixed description and the configured
    /// category, privacy and tags. The title is normalised.
    pub fn new(title: &str, asset: &MediaAsset, credential: Credential, cfg: &ReelpostConfig) -> Self {
        Self {
            title: normalize_title(title),
            description: config::STATIC_DESCRIPTION.to_string(),
            category_id: cfg.category_id.clone(),
            privacy: cfg.privacy,
            tags: cfg.tags.clone(),
            media_path: asset.path().to_path_buf(),
            media_size: asset.size(),
            credential,
        }
    }
}

/// Append the short-form marker unless the title already carries it.
pub fn normalize_title(title: &str) -> String {
    let title = title.trim();
    if title.to_lowercase().contains(&config::SHORTS_MARKER.to_lowercase()) {
        title.to_string()
    } else if title.is_empty() {
        config::SHORTS_MARKER.to_string()
    } else {
        format!("{title} {}", config::SHORTS_MARKER)
    }
}

/// A successfully created video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub video_id: String,
}

impl Published {
    pub fn watch_url(&self) -> String {
        format!("{}{}", config::WATCH_URL_BASE, self.video_id)
    }

    pub fn shorts_url(&self) -> String {
        format!("{}{}", config::SHORTS_URL_BASE, self.video_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishErrorKind {
    /// The credential was rejected or revoked.
    Unauthorized,
    /// Daily quota or upload limit reached.
    Quota,
    /// The platform refused the request itself (bad metadata, bad file).
    Malformed,
    /// Network trouble or a server-side error.
    Transient,
}

impl fmt::Display for PublishErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublishErrorKind::Unauthorized => "unauthorized",
            PublishErrorKind::Quota => "quota exceeded",
            PublishErrorKind::Malformed => "rejected",
            PublishErrorKind::Transient => "transient failure",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("publish {kind}: {message}")]
pub struct PublishError {
    pub kind: PublishErrorKind,
    pub message: String,
}

impl PublishError {
    pub fn new(kind: PublishErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Re-submitting the same asset may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind == PublishErrorKind::Transient
    }

    /// A fresh credential is needed before trying again.
    pub fn requires_reauth(&self) -> bool {
        self.kind == PublishErrorKind::Unauthorized
    }

    /// Classify an HTTP error response from the upload API.
    ///
    /// `reason` is the first `error.errors[].reason` of the body, if any.
    pub fn from_status(status: u16, reason: Option<&str>, message: impl Into<String>) -> Self {
        let kind = match (status, reason) {
            (401, _) => PublishErrorKind::Unauthorized,
            (403, Some("quotaExceeded" | "uploadLimitExceeded" | "rateLimitExceeded" | "dailyLimitExceeded")) => {
                PublishErrorKind::Quota
            }
            (403, _) => PublishErrorKind::Unauthorized,
            (408 | 429, _) => PublishErrorKind::Transient,
            (s, _) if s >= 500 => PublishErrorKind::Transient,
            _ => PublishErrorKind::Malformed,
        };
        Self::new(kind, message)
    }
}

/// The upload-platform collaborator.
pub trait Publisher {
    fn publish(&self, request: &PublishRequest) -> Result<Published, PublishError>;
}
