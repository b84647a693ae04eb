//! Embedded image strings: `data:<mime>;base64,<payload>` or a bare base64
//! payload with no header at all.

use base64::{engine::general_purpose, Engine as _};
use image::ImageFormat;

const DATA_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64,";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EmbeddedImageError {
    #[error("inputImage is required")]
    Empty,
    #[error("inputImage is not valid base64")]
    InvalidBase64,
    #[error("inputImage is not a recognised image")]
    NotAnImage,
}

/// A parsed embedded image. `mime` is `None` for bare payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImage {
    mime: Option<String>,
    payload: String,
}

impl EmbeddedImage {
    /// Split a client-supplied string into header and payload. The payload
    /// is not decoded here.
    pub fn parse(raw: &str) -> Result<Self, EmbeddedImageError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(EmbeddedImageError::Empty);
        }

        // The last marker wins, so a mime with parameters still splits cleanly.
        if let Some(rest) = raw.strip_prefix(DATA_PREFIX) {
            if let Some(at) = rest.rfind(BASE64_MARKER) {
                let mime = &rest[..at];
                let payload = &rest[at + BASE64_MARKER.len()..];
                return Ok(Self {
                    mime: (!mime.is_empty()).then(|| mime.to_owned()),
                    payload: payload.to_owned(),
                });
            }
        }

        Ok(Self {
            mime: None,
            payload: raw.to_owned(),
        })
    }

    pub fn from_bytes(mime: &str, bytes: &[u8]) -> Self {
        Self {
            mime: Some(mime.to_owned()),
            payload: general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Wrap a payload that is already base64 without decoding it.
    pub fn from_base64(mime: &str, payload: impl Into<String>) -> Self {
        Self {
            mime: Some(mime.to_owned()),
            payload: payload.into(),
        }
    }

    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    /// Decode the payload. Whitespace anywhere in it, such as line wrapping,
    /// is ignored.
    pub fn decode(&self) -> Result<Vec<u8>, EmbeddedImageError> {
        let payload: String = self
            .payload
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        if payload.is_empty() {
            return Err(EmbeddedImageError::Empty);
        }
        general_purpose::STANDARD
            .decode(&payload)
            .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(&payload))
            .map_err(|_| EmbeddedImageError::InvalidBase64)
    }

    /// Render as a self-contained data URL, filling in `fallback_mime` when
    /// the image carries no type.
    pub fn to_data_url(&self, fallback_mime: &str) -> String {
        let mime = self.mime.as_deref().unwrap_or(fallback_mime);
        format!("{DATA_PREFIX}{mime}{BASE64_MARKER}{}", self.payload)
    }
}

/// Decode and sniff an uploaded image. Returns the raw bytes and the
/// detected format.
pub fn decode_upload(raw: &str) -> Result<(Vec<u8>, ImageFormat), EmbeddedImageError> {
    let bytes = EmbeddedImage::parse(raw)?.decode()?;
    let format = image::guess_format(&bytes).map_err(|_| EmbeddedImageError::NotAnImage)?;
    Ok((bytes, format))
}

pub fn mime_for_format(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Tiff => "image/tiff",
        ImageFormat::Avif => "image/avif",
        _ => "application/octet-stream",
    }
}

/// Mime type for a file extension, as used when seeding the cache from disk.
pub fn mime_for_extension(ext: &str) -> String {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png".to_owned(),
        "jpg" | "jpeg" => "image/jpeg".to_owned(),
        other => format!("image/{other}"),
    }
}
