//! Thumbnail encoding and base64 payload decoding.

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Error decoding base64 image: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Error decoding image: {0}")]
    Decode(image::ImageError),

    #[error("Error encoding image: {0}")]
    Encode(image::ImageError),
}

/// Turns downloaded or decoded image bytes into what gets embedded.
pub trait ImageCodec {
    fn thumbnail(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// Shrinks images to fit a bounding box and re-encodes them as RGB JPEG.
pub struct JpegThumbnailer {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
}

/// Largest size with the same aspect ratio that fits `max_width` x
/// `max_height`. Images that already fit keep their size.
pub fn fit_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = f64::min(
        f64::from(max_width) / f64::from(width),
        f64::from(max_height) / f64::from(height),
    );
    let scaled = |side: u32, max: u32| ((f64::from(side) * scale).round() as u32).clamp(1, max.max(1));
    (scaled(width, max_width), scaled(height, max_height))
}

impl ImageCodec for JpegThumbnailer {
    fn thumbnail(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        let decoded = image::load_from_memory(bytes).map_err(CodecError::Decode)?;
        let (width, height) = fit_dimensions(
            decoded.width(),
            decoded.height(),
            self.max_width,
            self.max_height,
        );
        let resized = if (width, height) == (decoded.width(), decoded.height()) {
            decoded
        } else {
            decoded.resize_exact(width, height, FilterType::Lanczos3)
        };
        // JPEG has no alpha or palette; flatten everything to RGB first.
        let rgb = resized.to_rgb8();

        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode_image(&rgb)
            .map_err(CodecError::Encode)?;
        Ok(out)
    }
}

fn data_url_prefix() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^data:image/[a-zA-Z]+;base64,").ok())
        .as_ref()
}

/// Decodes a base64 image payload.
///
/// Accepts an optional `data:image/<type>;base64,` prefix, embedded
/// whitespace and missing `=` padding.
pub fn decode_base64_image(payload: &str) -> Result<Vec<u8>, CodecError> {
    let trimmed = payload.trim();
    let body = match data_url_prefix() {
        Some(re) => re.replace(trimmed, ""),
        None => trimmed.into(),
    };
    let mut cleaned: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    let missing = cleaned.len() % 4;
    if missing != 0 {
        cleaned.push_str(&"=".repeat(4 - missing));
    }
    Ok(base64::engine::general_purpose::STANDARD.decode(cleaned)?)
}

const IMAGE_EXTENSIONS: [&str; 6] = [".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp"];

/// True when `url` mentions a known image extension.
pub fn validate_image_url(url: &str) -> bool {
    let lower = url.trim().to_lowercase();
    !lower.is_empty() && IMAGE_EXTENSIONS.iter().any(|ext| lower.contains(ext))
}

#[cfg(test)]
#[path = "tests/codec_tests.rs"]
mod tests;
