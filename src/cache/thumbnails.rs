use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::fs;
use tracing::{debug, warn};

use crate::cache::storage::{DirectoryRole, ImageLibrary, write_atomic};
use crate::error::{GalleryError, GalleryResult};
use crate::image_processing::{self, ThumbnailSettings};

/// Turns the raw bytes of a source image into encoded thumbnail bytes.
pub trait ThumbnailEncoder: Send + Sync {
    fn encode(&self, source: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JpegThumbnailer {
    pub settings: ThumbnailSettings,
}

impl JpegThumbnailer {
    pub fn new(settings: ThumbnailSettings) -> Self {
        Self { settings }
    }
}

impl ThumbnailEncoder for JpegThumbnailer {
    fn encode(&self, source: &[u8]) -> Result<Vec<u8>> {
        image_processing::encode_thumbnail(source, &self.settings)
    }
}

/// How a source filename maps to its file under `thumbs/`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThumbnailNaming {
    /// `cat.png` -> `cat.jpg`. `cat.png` and `cat.gif` share one thumbnail.
    #[default]
    Stem,
    /// `cat.png` -> `cat.png.jpg`.
    FileName,
}

impl ThumbnailNaming {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "stem" => Some(ThumbnailNaming::Stem),
            "filename" | "file_name" | "full" => Some(ThumbnailNaming::FileName),
            _ => None,
        }
    }

    pub fn thumbnail_name(&self, file_name: &str) -> String {
        match self {
            ThumbnailNaming::Stem => {
                let stem = Path::new(file_name)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file_name.to_string());
                format!("{stem}.jpg")
            }
            ThumbnailNaming::FileName => format!("{file_name}.jpg"),
        }
    }
}

#[derive(Debug)]
pub enum Thumbnail {
    /// Already on disk; served as-is.
    Cached { path: PathBuf, source: PathBuf },
    /// Rendered by this call.
    Generated { path: PathBuf, source: PathBuf },
    /// Rendering failed; serve the original instead.
    Unavailable { source: PathBuf, error: GalleryError },
}

impl Thumbnail {
    pub fn source(&self) -> &Path {
        match self {
            Thumbnail::Cached { source, .. }
            | Thumbnail::Generated { source, .. }
            | Thumbnail::Unavailable { source, .. } => source,
        }
    }

    /// Thumbnail file, if one exists.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Thumbnail::Cached { path, .. } | Thumbnail::Generated { path, .. } => Some(path),
            Thumbnail::Unavailable { .. } => None,
        }
    }
}

#[derive(Clone)]
pub struct ThumbnailCache {
    library: Arc<ImageLibrary>,
    encoder: Arc<dyn ThumbnailEncoder>,
    naming: ThumbnailNaming,
}

impl ThumbnailCache {
    pub fn new(
        library: Arc<ImageLibrary>,
        encoder: Arc<dyn ThumbnailEncoder>,
        naming: ThumbnailNaming,
    ) -> Self {
        Self {
            library,
            encoder,
            naming,
        }
    }

    pub fn thumbnail_path(&self, role: DirectoryRole, file_name: &str) -> PathBuf {
        self.library
            .thumbs_dir(role)
            .join(self.naming.thumbnail_name(file_name))
    }

    /// Returns the cached thumbnail for `file_name`, rendering it on a miss.
    ///
    /// Only a missing or out-of-root source is an error. Anything that goes
    /// wrong while rendering comes back as [`Thumbnail::Unavailable`] so the
    /// caller can fall back to the original.
    pub async fn get_or_create(
        &self,
        role: DirectoryRole,
        file_name: &str,
    ) -> GalleryResult<Thumbnail> {
        let source = self.library.resolve_source(role, file_name).await?;
        let path = self.thumbnail_path(role, file_name);

        if fs::try_exists(&path).await.unwrap_or(false) {
            debug!(thumbnail = %path.display(), "thumbnail cache hit");
            return Ok(Thumbnail::Cached { path, source });
        }

        match self.render(&source, &path).await {
            Ok(()) => {
                debug!(thumbnail = %path.display(), "thumbnail generated");
                Ok(Thumbnail::Generated { path, source })
            }
            Err(err) => {
                let error = GalleryError::ThumbnailGenerationFailed {
                    path: source.clone(),
                    reason: format!("{err:#}"),
                };
                warn!(%error, "serving original instead of thumbnail");
                Ok(Thumbnail::Unavailable { source, error })
            }
        }
    }

    async fn render(&self, source: &Path, dest: &Path) -> Result<()> {
        let bytes = fs::read(source)
            .await
            .map_err(|err| anyhow!("read source failed: {err}"))?;
        let encoder = Arc::clone(&self.encoder);
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let encoded = encoder.encode(&bytes)?;
            write_atomic(&dest, &encoded)
                .map_err(|err| anyhow!("write thumbnail {} failed: {err}", dest.display()))
        })
        .await
        .map_err(|err| anyhow!("thumbnail task failed: {err}"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingEncoder {
        inner: JpegThumbnailer,
        calls: AtomicUsize,
    }

    impl ThumbnailEncoder for CountingEncoder {
        fn encode(&self, source: &[u8]) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.encode(source)
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 7])
        });
        let mut buffer = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .expect("encode png");
        buffer
    }

    type Fixture = (TempDir, Arc<ImageLibrary>, Arc<CountingEncoder>, ThumbnailCache);

    async fn setup(naming: ThumbnailNaming) -> Fixture {
        let dir = TempDir::new().expect("tempdir");
        let library = Arc::new(ImageLibrary::new(
            dir.path().join("images"),
            dir.path().join("uploads"),
        ));
        library.ensure_layout().await.expect("layout");
        let encoder = Arc::new(CountingEncoder {
            inner: JpegThumbnailer::default(),
            calls: AtomicUsize::new(0),
        });
        let cache = ThumbnailCache::new(library.clone(), encoder.clone(), naming);
        (dir, library, encoder, cache)
    }

    #[tokio::test]
    async fn miss_renders_once_then_hits() {
        let (dir, _library, encoder, cache) = setup(ThumbnailNaming::Stem).await;
        std::fs::write(dir.path().join("images/leaf.png"), png_bytes(800, 600)).expect("write");

        let first = cache.get_or_create(DirectoryRole::Dataset, "leaf.png").await.expect("first");
        let expected = dir.path().join("images/thumbs/leaf.jpg");
        assert!(matches!(&first, Thumbnail::Generated { path, .. } if *path == expected));

        let bytes = std::fs::read(&expected).expect("thumbnail on disk");
        let decoded = image::load_from_memory(&bytes).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (213, 160));
        assert_eq!(std::fs::read_dir(dir.path().join("images/thumbs")).expect("dir").count(), 1);

        let second = cache.get_or_create(DirectoryRole::Dataset, "leaf.png").await.expect("second");
        assert!(matches!(second, Thumbnail::Cached { .. }));
        assert_eq!(std::fs::read(&expected).expect("read"), bytes);
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn existing_thumbnail_is_never_refreshed() {
        let (dir, _library, encoder, cache) = setup(ThumbnailNaming::Stem).await;
        std::fs::write(dir.path().join("uploads/cat.png"), png_bytes(40, 40)).expect("write");
        std::fs::write(dir.path().join("uploads/thumbs/cat.jpg"), b"stale").expect("write");

        let thumbnail = cache
            .get_or_create(DirectoryRole::Uploads, "cat.png")
            .await
            .expect("thumb");
        assert!(matches!(thumbnail, Thumbnail::Cached { .. }));
        let cached = std::fs::read(dir.path().join("uploads/thumbs/cat.jpg")).expect("read");
        assert_eq!(cached, b"stale");
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn corrupt_source_falls_back_to_original() {
        let (dir, _library, _encoder, cache) = setup(ThumbnailNaming::Stem).await;
        let source = dir.path().join("uploads/broken.png");
        std::fs::write(&source, b"\x89PNG\r\n\x1a\nnot really").expect("write");

        let thumbnail = cache
            .get_or_create(DirectoryRole::Uploads, "broken.png")
            .await
            .expect("thumb");
        match thumbnail {
            Thumbnail::Unavailable { source: original, error } => {
                assert_eq!(original, source);
                assert!(matches!(error, GalleryError::ThumbnailGenerationFailed { .. }));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
        assert!(!dir.path().join("uploads/thumbs/broken.jpg").exists());
        assert_eq!(std::fs::read(&source).expect("read"), b"\x89PNG\r\n\x1a\nnot really");
    }

    #[tokio::test]
    async fn missing_source_is_not_found() {
        let (_dir, _library, encoder, cache) = setup(ThumbnailNaming::Stem).await;
        for name in ["ghost.png", "../images/ghost.png"] {
            let result = cache.get_or_create(DirectoryRole::Dataset, name).await;
            assert!(matches!(result, Err(GalleryError::SourceNotFound(_))));
        }
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn filename_naming_keeps_same_stem_apart() {
        let (dir, _library, encoder, cache) = setup(ThumbnailNaming::FileName).await;
        std::fs::write(dir.path().join("images/cat.png"), png_bytes(30, 20)).expect("write");
        std::fs::write(dir.path().join("images/cat.bmp"), png_bytes(20, 30)).expect("write");

        cache.get_or_create(DirectoryRole::Dataset, "cat.png").await.expect("png");
        cache.get_or_create(DirectoryRole::Dataset, "cat.bmp").await.expect("bmp");
        assert!(dir.path().join("images/thumbs/cat.png.jpg").exists());
        assert!(dir.path().join("images/thumbs/cat.bmp.jpg").exists());
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn naming_parses_config_values() {
        assert_eq!(ThumbnailNaming::parse("Stem"), Some(ThumbnailNaming::Stem));
        assert_eq!(ThumbnailNaming::parse(" filename "), Some(ThumbnailNaming::FileName));
        assert_eq!(ThumbnailNaming::parse("hash"), None);
        assert_eq!(ThumbnailNaming::Stem.thumbnail_name("my.photo.webp"), "my.photo.jpg");
    }
}
