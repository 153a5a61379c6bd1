use crate::core::store::StoreError;
use image::{DynamicImage, ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

const JPEG_START_OF_SCAN: [u8; 2] = [0xFF, 0xDA];
const JPEG_END_OF_IMAGE: [u8; 2] = [0xFF, 0xD9];

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Image not found: {path}")]
    Missing { path: String },

    #[error("Image data ends early: {path}")]
    Truncated { path: String },

    #[error("Invalid image location: {0}")]
    Location(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),
}

/// BLAKE3 digest of an image's RGB8 pixel buffer, hex encoded.
///
/// Two files that decode to the same pixels share a hash regardless of
/// container format or metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn of_image(image: &DynamicImage) -> Self {
        let digest = match image.as_rgb8() {
            Some(rgb) => blake3::hash(rgb.as_raw()),
            None => blake3::hash(image.to_rgb8().as_raw()),
        };
        Self(digest.to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Open and fully decode an image, sniffing the format from its content rather
/// than trusting the `.jpg` extension.
///
/// The JPEG decoder pads a cut-off scan instead of failing, so JPEG data
/// must also carry an end-of-image marker after its last scan.
pub fn open_image(path: &Path) -> Result<DynamicImage, DecodeError> {
    if !path.exists() {
        return Err(DecodeError::Missing {
            path: path.to_string_lossy().to_string(),
        });
    }
    let bytes = fs::read(path)?;
    let reader = ImageReader::new(Cursor::new(bytes.as_slice())).with_guessed_format()?;
    if reader.format() == Some(ImageFormat::Jpeg) && !jpeg_is_complete(&bytes) {
        return Err(DecodeError::Truncated {
            path: path.to_string_lossy().to_string(),
        });
    }
    Ok(reader.decode()?)
}

/// Markers are never escaped inside entropy-coded data, so the last
/// start-of-scan belongs to the main image even when an EXIF thumbnail
/// precedes it.
fn jpeg_is_complete(bytes: &[u8]) -> bool {
    let last_scan = bytes
        .windows(2)
        .rposition(|pair| pair == JPEG_START_OF_SCAN)
        .unwrap_or(0);
    bytes[last_scan..]
        .windows(2)
        .any(|pair| pair == JPEG_END_OF_IMAGE)
}

pub fn compute_content_hash(path: &Path) -> Result<ContentHash, DecodeError> {
    let image = open_image(path)?;
    Ok(ContentHash::of_image(&image))
}
