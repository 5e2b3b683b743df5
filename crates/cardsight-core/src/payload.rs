//! Card image payloads: decoded images, raw file bytes, or base64 text with
//! an optional `data:image/...;base64,` prefix.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use std::borrow::Cow;
use std::io::Cursor;
use thiserror::Error;

const DATA_URL_MARKER: &str = "data:image";
const BASE64_MARKER: &str = "base64,";

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unreadable image: {0}")]
    Image(#[from] image::ImageError),
}

/// A card image as handed to the matcher or reader.
#[derive(Debug, Clone)]
pub enum CardImage {
    /// Already decoded pixels.
    Decoded(DynamicImage),
    /// Encoded image file bytes (PNG, JPEG, ...).
    Bytes(Vec<u8>),
    /// Base64 image bytes, optionally a `data:image/...;base64,` URL.
    Encoded(String),
}

impl CardImage {
    /// Decode into pixels, borrowing when already decoded.
    pub fn decode(&self) -> Result<Cow<'_, DynamicImage>, PayloadError> {
        match self {
            CardImage::Decoded(img) => Ok(Cow::Borrowed(img)),
            CardImage::Bytes(bytes) => Ok(Cow::Owned(image::load_from_memory(bytes)?)),
            CardImage::Encoded(text) => {
                let bytes = decode_base64(text)?;
                Ok(Cow::Owned(image::load_from_memory(&bytes)?))
            }
        }
    }
}

impl From<DynamicImage> for CardImage {
    fn from(img: DynamicImage) -> Self {
        CardImage::Decoded(img)
    }
}

impl From<String> for CardImage {
    fn from(text: String) -> Self {
        CardImage::Encoded(text)
    }
}

impl From<&str> for CardImage {
    fn from(text: &str) -> Self {
        CardImage::Encoded(text.to_string())
    }
}

impl From<Vec<u8>> for CardImage {
    fn from(bytes: Vec<u8>) -> Self {
        CardImage::Bytes(bytes)
    }
}

/// Strip a data-URL prefix if present. Text without the marker passes through.
pub fn strip_data_url(text: &str) -> &str {
    let text = text.trim();
    if text.starts_with(DATA_URL_MARKER) {
        if let Some(idx) = text.find(BASE64_MARKER) {
            return &text[idx + BASE64_MARKER.len()..];
        }
    }
    text
}

/// Decode base64 image text, ignoring a data-URL prefix and line breaks.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, PayloadError> {
    let body = strip_data_url(text);
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}

/// Encode `img` as a `data:<mime>;base64,...` URL.
///
/// JPEG output drops any alpha channel first, since the encoder only
/// accepts opaque pixels.
pub fn encode_data_url(img: &DynamicImage, format: ImageFormat) -> Result<String, PayloadError> {
    let mut buf = Vec::new();
    if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut Cursor::new(&mut buf), format)?;
    } else {
        img.write_to(&mut Cursor::new(&mut buf), format)?;
    }
    Ok(format!("data:{};base64,{}", format.to_mime_type(), STANDARD.encode(&buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::textured_card;

    #[test]
    fn test_strip_data_url() {
        assert_eq!(strip_data_url("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_url("  QUJD\n"), "QUJD");
        // Marker without base64 section is left alone.
        assert_eq!(strip_data_url("data:image/png,raw"), "data:image/png,raw");
    }

    #[test]
    fn test_png_data_url_roundtrip_is_lossless() {
        let img = textured_card(1, 64, 48);
        let url = encode_data_url(&img, ImageFormat::Png).unwrap();
        assert!(url.starts_with("data:image/png;base64,"));

        let card = CardImage::from(url);
        let decoded = card.decode().unwrap();
        assert_eq!(decoded.to_luma8(), img.to_luma8());
    }

    #[test]
    fn test_jpeg_data_url_from_rgba() {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::new(16, 16));
        let url = encode_data_url(&img, ImageFormat::Jpeg).unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
        let card = CardImage::Encoded(url);
        let decoded = card.decode().unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
    }

    #[test]
    fn test_decoded_is_borrowed() {
        let img = textured_card(2, 32, 32);
        let card = CardImage::Decoded(img);
        assert!(matches!(card.decode().unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_invalid_base64() {
        let err = CardImage::from("data:image/png;base64,@@@not-base64@@@").decode().unwrap_err();
        assert!(matches!(err, PayloadError::Base64(_)));
    }

    #[test]
    fn test_valid_base64_invalid_image() {
        let err = CardImage::from("aGVsbG8gd29ybGQ=").decode().unwrap_err();
        assert!(matches!(err, PayloadError::Image(_)));
    }

    #[test]
    fn test_raw_bytes() {
        let img = textured_card(4, 40, 40);
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        let card = CardImage::Bytes(buf);
        let decoded = card.decode().unwrap();
        assert_eq!(decoded.to_luma8(), img.to_luma8());
    }
}
