pub mod storage;
pub mod thumbnails;

pub use storage::{DirectoryRole, ImageLibrary, THUMBS_SUBDIR, write_atomic};
pub use thumbnails::{JpegThumbnailer, Thumbnail, ThumbnailCache, ThumbnailEncoder, ThumbnailNaming};
