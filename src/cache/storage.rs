use std::io::Write;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tokio::{fs, io::AsyncWriteExt};

use crate::error::{GalleryError, GalleryResult};
use crate::image_processing::is_allowed_image;

pub const THUMBS_SUBDIR: &str = "thumbs";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryRole {
    Dataset,
    Uploads,
}

impl DirectoryRole {
    pub const ALL: [DirectoryRole; 2] = [DirectoryRole::Dataset, DirectoryRole::Uploads];

    /// Path segment used in thumbnail URLs and the last-upload cookie.
    pub fn url_segment(&self) -> &'static str {
        match self {
            DirectoryRole::Dataset => "images",
            DirectoryRole::Uploads => "uploads",
        }
    }

    pub fn from_url_segment(segment: &str) -> Option<Self> {
        match segment {
            "images" => Some(DirectoryRole::Dataset),
            "uploads" => Some(DirectoryRole::Uploads),
            _ => None,
        }
    }
}

/// The two image roots on disk. The filesystem is the only index.
#[derive(Clone, Debug)]
pub struct ImageLibrary {
    dataset_dir: PathBuf,
    uploads_dir: PathBuf,
}

impl ImageLibrary {
    pub fn new(dataset_dir: PathBuf, uploads_dir: PathBuf) -> Self {
        Self {
            dataset_dir,
            uploads_dir,
        }
    }

    pub fn root(&self, role: DirectoryRole) -> &Path {
        match role {
            DirectoryRole::Dataset => &self.dataset_dir,
            DirectoryRole::Uploads => &self.uploads_dir,
        }
    }

    pub fn thumbs_dir(&self, role: DirectoryRole) -> PathBuf {
        self.root(role).join(THUMBS_SUBDIR)
    }

    pub async fn ensure_layout(&self) -> std::io::Result<()> {
        for role in DirectoryRole::ALL {
            fs::create_dir_all(self.thumbs_dir(role)).await?;
        }
        Ok(())
    }

    /// Joins `file_name` onto the role's root. Only a single plain path
    /// component is accepted, so nothing can escape the root.
    pub fn resolve_path(&self, role: DirectoryRole, file_name: &str) -> GalleryResult<PathBuf> {
        if !is_plain_file_name(file_name) {
            return Err(GalleryError::InvalidFilename(file_name.to_string()));
        }
        Ok(self.root(role).join(file_name))
    }

    /// Like [`resolve_path`](Self::resolve_path), but the file must exist.
    pub async fn resolve_source(
        &self,
        role: DirectoryRole,
        file_name: &str,
    ) -> GalleryResult<PathBuf> {
        let path = self
            .resolve_path(role, file_name)
            .map_err(|_| GalleryError::SourceNotFound(self.root(role).join(file_name)))?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(GalleryError::SourceNotFound(path)),
        }
    }

    pub async fn list_images(&self, role: DirectoryRole) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = match fs::read_dir(self.root(role)).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err),
        };
        while let Some(entry) = dir.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_allowed_image(&name) {
                continue;
            }
            if entry.file_type().await?.is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Writes `data` to a file that must not exist yet. Returns `Ok(None)`
    /// when the name is taken. A failed write removes the partial file.
    pub async fn create_new(
        &self,
        role: DirectoryRole,
        file_name: &str,
        data: &[u8],
    ) -> GalleryResult<Option<PathBuf>> {
        let path = self.resolve_path(role, file_name)?;
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
            Err(source) => return Err(GalleryError::WriteFailure { path, source }),
        };
        let written = async {
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(source) = written {
            drop(file);
            let _ = fs::remove_file(&path).await;
            return Err(GalleryError::WriteFailure { path, source });
        }
        Ok(Some(path))
    }
}

/// Writes through a temp file in the destination directory and renames it
/// into place, so readers see either nothing or the whole file.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn is_plain_file_name(file_name: &str) -> bool {
    if file_name.is_empty() || file_name.contains('\\') {
        return false;
    }
    let mut components = Path::new(file_name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !file_name.ends_with('/')
}
