use std::io::Cursor;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use md5::{Digest, Md5};

use crate::error::{CoreError, FormatError, Result};

pub const PNG_MIME: &str = "image/png";
pub const JPEG_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime: String,
    pub data: Vec<u8>,
}

impl DataUri {
    /// Parses `data:<mime>;base64,<payload>`.
    pub fn parse(text: &str) -> std::result::Result<Self, FormatError> {
        let rest = text
            .strip_prefix("data:")
            .ok_or_else(|| FormatError::InvalidDataUri("missing `data:` prefix".to_string()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| FormatError::InvalidDataUri("missing `,` separator".to_string()))?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or_else(|| FormatError::InvalidDataUri("payload is not base64".to_string()))?;
        let data = STANDARD
            .decode(payload.trim())
            .map_err(|e| FormatError::InvalidDataUri(e.to_string()))?;
        Ok(Self {
            mime: mime.to_string(),
            data,
        })
    }

    pub fn to_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.data))
    }

    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            JPEG_MIME | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

pub(crate) fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

fn decode(bytes: &[u8], context: &str) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|source| CoreError::Image {
        context: context.to_string(),
        source,
    })
}

/// Main screenshot payload; anything that is not already PNG is re-encoded.
pub(crate) fn to_png(bytes: &[u8]) -> Result<Vec<u8>> {
    if image::guess_format(bytes).ok() == Some(ImageFormat::Png) {
        decode(bytes, "source image")?;
        return Ok(bytes.to_vec());
    }
    let decoded = decode(bytes, "source image")?;
    let mut out = Cursor::new(Vec::new());
    decoded
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|source| CoreError::Image {
            context: "encoding PNG".to_string(),
            source,
        })?;
    Ok(out.into_inner())
}

/// JPEG thumbnail resized to exactly `size` with bilinear filtering.
pub(crate) fn thumbnail(bytes: &[u8], size: (u32, u32), quality: u8) -> Result<Vec<u8>> {
    let decoded = decode(bytes, "source image")?;
    let resized = decoded.resize_exact(size.0, size.1, FilterType::Triangle);
    let rgb = resized.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&rgb)
        .map_err(|source| CoreError::Image {
            context: "encoding thumbnail".to_string(),
            source,
        })?;
    Ok(out)
}

pub(crate) fn dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    let decoded = decode(bytes, "thumbnail")?;
    Ok((decoded.width(), decoded.height()))
}
