pub mod cache;
pub mod config;
pub mod error;
pub mod image_processing;
pub mod logging;
pub mod uploads;
pub mod web_pages;

pub use error::{GalleryError, GalleryResult};
