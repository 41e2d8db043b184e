use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::cache::{DirectoryRole, ImageLibrary, Thumbnail, ThumbnailCache};
use crate::error::{GalleryError, GalleryResult};
use crate::image_processing::{extension_of, is_allowed_image};

/// Extra `_<n>` suffixes tried once both the plain and the timestamped
/// name are taken.
const MAX_SUFFIX_ATTEMPTS: u32 = 64;

pub trait Clock: Send + Sync {
    fn unix_timestamp(&self) -> i64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_timestamp(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Reduces a client supplied name to `[A-Za-z0-9_.-]`, with no directory
/// part and no leading dots. Accents are decomposed first, so `café` keeps
/// its `e`. May return an empty string.
pub fn secure_filename(raw: &str) -> String {
    let spaced: String = raw
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub raw_name: String,
    pub bytes: Vec<u8>,
}

impl IncomingFile {
    pub fn new(raw_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            raw_name: raw_name.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Saved,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub name: String,
    pub status: UploadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_as: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub role: DirectoryRole,
    pub results: Vec<UploadOutcome>,
}

impl UploadReport {
    /// Stored names in submission order.
    pub fn saved(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|outcome| outcome.stored_as.clone())
            .collect()
    }

    pub fn last_saved(&self) -> Option<&str> {
        self.results
            .iter()
            .rev()
            .find_map(|outcome| outcome.stored_as.as_deref())
    }
}

#[derive(Clone)]
pub struct UploadIngestor {
    library: Arc<ImageLibrary>,
    thumbnails: Arc<ThumbnailCache>,
    clock: Arc<dyn Clock>,
}

impl UploadIngestor {
    pub fn new(
        library: Arc<ImageLibrary>,
        thumbnails: Arc<ThumbnailCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            library,
            thumbnails,
            clock,
        }
    }

    /// Stores every acceptable file of the batch. One bad file never stops
    /// the rest; its outcome says what happened.
    pub async fn ingest(&self, role: DirectoryRole, files: Vec<IncomingFile>) -> UploadReport {
        let mut results = Vec::with_capacity(files.len());
        for file in files {
            let outcome = match self.store(role, &file).await {
                Ok(stored) => {
                    info!(role = role.url_segment(), file = %stored, "upload saved");
                    self.warm_thumbnail(role, &stored).await;
                    UploadOutcome {
                        name: file.raw_name,
                        status: UploadStatus::Saved,
                        stored_as: Some(stored),
                        error: None,
                    }
                }
                Err(err @ GalleryError::UnsupportedExtension(_)) => {
                    debug!(name = %file.raw_name, "upload skipped: {err}");
                    UploadOutcome {
                        name: file.raw_name,
                        status: UploadStatus::Skipped,
                        stored_as: None,
                        error: Some(err.to_string()),
                    }
                }
                Err(err) => {
                    warn!(name = %file.raw_name, "upload failed: {err}");
                    UploadOutcome {
                        name: file.raw_name,
                        status: UploadStatus::Failed,
                        stored_as: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            results.push(outcome);
        }
        UploadReport { role, results }
    }

    async fn store(&self, role: DirectoryRole, file: &IncomingFile) -> GalleryResult<String> {
        let file_name = secure_filename(&file.raw_name);
        if !is_allowed_image(&file_name) {
            return Err(GalleryError::UnsupportedExtension(file.raw_name.clone()));
        }
        for candidate in self.candidate_names(&file_name) {
            if self
                .library
                .create_new(role, &candidate, &file.bytes)
                .await?
                .is_some()
            {
                return Ok(candidate);
            }
            debug!(file = %candidate, "name taken, trying next");
        }
        Err(GalleryError::NameExhausted(file_name))
    }

    /// `leaf.png`, then `leaf_<unix>.png`, then `leaf_<unix>_1.png`, ...
    fn candidate_names(&self, file_name: &str) -> impl Iterator<Item = String> + use<> {
        let stem = Path::new(file_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = extension_of(file_name).unwrap_or_default();
        let timestamp = self.clock.unix_timestamp();
        let timestamped = format!("{stem}_{timestamp}.{ext}");
        std::iter::once(file_name.to_string())
            .chain(std::iter::once(timestamped))
            .chain((1..=MAX_SUFFIX_ATTEMPTS).map(move |n| format!("{stem}_{timestamp}_{n}.{ext}")))
    }

    async fn warm_thumbnail(&self, role: DirectoryRole, file_name: &str) {
        match self.thumbnails.get_or_create(role, file_name).await {
            Ok(Thumbnail::Unavailable { .. }) => {}
            Ok(_) => debug!(file = %file_name, "thumbnail warmed"),
            Err(err) => warn!(file = %file_name, "thumbnail warm-up failed: {err}"),
        }
    }
}
