use std::path::Path;

use anyhow::{Result, anyhow};
use image::{DynamicImage, ImageFormat, codecs::jpeg::JpegEncoder, imageops::FilterType};

pub const ALLOWED_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "bmp", "webp"];

pub const THUMBNAIL_MAX_WIDTH: u32 = 260;
pub const THUMBNAIL_MAX_HEIGHT: u32 = 160;
pub const THUMBNAIL_QUALITY: u8 = 80;

/// Bounding box and JPEG quality used when rendering thumbnails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThumbnailSettings {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            max_width: THUMBNAIL_MAX_WIDTH,
            max_height: THUMBNAIL_MAX_HEIGHT,
            quality: THUMBNAIL_QUALITY,
        }
    }
}

/// Lowercased extension of `file_name`, without the leading dot.
pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_lowercase())
}

pub fn is_allowed_image(file_name: &str) -> bool {
    extension_of(file_name)
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Largest size with the source aspect ratio that fits the box. Never enlarges.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    let new_width = ((width as f64 * scale).round() as u32).clamp(1, max_width.max(1));
    let new_height = ((height as f64 * scale).round() as u32).clamp(1, max_height.max(1));
    (new_width, new_height)
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    let mime_type =
        detect_mime_type(bytes).ok_or_else(|| anyhow!("unrecognised image signature"))?;
    let format = mime_to_format(mime_type)?;
    image::load_from_memory_with_format(bytes, format)
        .map_err(|err| anyhow!("decode image failed: {err}"))
}

/// Decodes `bytes`, flattens to RGB, shrinks into the bounding box and
/// encodes the result as JPEG.
pub fn encode_thumbnail(bytes: &[u8], settings: &ThumbnailSettings) -> Result<Vec<u8>> {
    let rgb = decode_image(bytes)?.to_rgb8();
    let (width, height) = rgb.dimensions();
    let (new_width, new_height) =
        fit_within(width, height, settings.max_width, settings.max_height);
    let resized = if (new_width, new_height) == (width, height) {
        rgb
    } else {
        image::imageops::resize(&rgb, new_width, new_height, FilterType::Lanczos3)
    };

    let mut output = Vec::new();
    JpegEncoder::new_with_quality(&mut output, settings.quality)
        .encode_image(&resized)
        .map_err(|err| anyhow!("encode jpeg failed: {err}"))?;
    Ok(output)
}

pub fn detect_mime_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.starts_with(b"BM") {
        return Some("image/bmp");
    }
    None
}

pub fn mime_to_format(mime_type: &str) -> Result<ImageFormat> {
    match mime_type {
        "image/png" => Ok(ImageFormat::Png),
        "image/jpeg" | "image/jpg" => Ok(ImageFormat::Jpeg),
        "image/gif" => Ok(ImageFormat::Gif),
        "image/webp" => Ok(ImageFormat::WebP),
        "image/bmp" => Ok(ImageFormat::Bmp),
        _ => Err(anyhow!("unsupported mime type: {mime_type}")),
    }
}
