use std::env;
use std::path::PathBuf;

use tracing::warn;

use crate::cache::ThumbnailNaming;
use crate::image_processing::ThumbnailSettings;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_MAX_UPLOAD_MB: usize = 50;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_address: String,
    pub dataset_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub thumbnail: ThumbnailSettings,
    pub thumbnail_naming: ThumbnailNaming,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let host = get("GALLERY_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_or(get("GALLERY_PORT"), "GALLERY_PORT", DEFAULT_PORT);
        let base_dir = get("GALLERY_BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_base_dir);
        let dataset_dir = get("IMAGES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| base_dir.join("images"));
        let uploads_dir = get("UPLOADS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| base_dir.join("uploads"));
        let max_upload_mb = parse_or(get("MAX_UPLOAD_MB"), "MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB);

        let mut thumbnail = ThumbnailSettings::default();
        let quality = parse_or(get("THUMB_QUALITY"), "THUMB_QUALITY", thumbnail.quality);
        thumbnail.quality = quality.clamp(1, 100);

        let thumbnail_naming = match get("THUMB_NAMING") {
            Some(raw) => ThumbnailNaming::parse(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "unknown THUMB_NAMING, using stem");
                ThumbnailNaming::Stem
            }),
            None => ThumbnailNaming::Stem,
        };

        Self {
            bind_address: format!("{host}:{port}"),
            dataset_dir,
            uploads_dir,
            max_upload_bytes: max_upload_mb.saturating_mul(1024 * 1024),
            thumbnail,
            thumbnail_naming,
        }
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!(key, value = %value, "invalid value, using default");
            default
        }),
        None => default,
    }
}

fn default_base_dir() -> PathBuf {
    let mut base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push("image-gallery");
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[("GALLERY_BASE_DIR", "/srv/gallery")]);
        assert_eq!(config.bind_address, "0.0.0.0:5000");
        assert_eq!(config.dataset_dir, PathBuf::from("/srv/gallery/images"));
        assert_eq!(config.uploads_dir, PathBuf::from("/srv/gallery/uploads"));
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(config.thumbnail, ThumbnailSettings::default());
        assert_eq!(config.thumbnail_naming, ThumbnailNaming::Stem);
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("GALLERY_HOST", "127.0.0.1"),
            ("GALLERY_PORT", "8080"),
            ("IMAGES_DIR", "/data/set"),
            ("UPLOADS_DIR", "/data/in"),
            ("MAX_UPLOAD_MB", "5"),
            ("THUMB_QUALITY", "150"),
            ("THUMB_NAMING", "filename"),
        ]);
        assert_eq!(config.bind_address, "127.0.0.1:8080");
        assert_eq!(config.dataset_dir, PathBuf::from("/data/set"));
        assert_eq!(config.uploads_dir, PathBuf::from("/data/in"));
        assert_eq!(config.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(config.thumbnail.quality, 100);
        assert_eq!(config.thumbnail_naming, ThumbnailNaming::FileName);
    }

    #[test]
    fn blank_and_invalid_values_fall_back() {
        let config = config(&[
            ("GALLERY_BASE_DIR", "base"),
            ("GALLERY_PORT", "not-a-port"),
            ("GALLERY_HOST", "   "),
            ("THUMB_NAMING", "hash"),
        ]);
        assert_eq!(config.bind_address, "0.0.0.0:5000");
        assert_eq!(config.thumbnail_naming, ThumbnailNaming::Stem);
    }
}
