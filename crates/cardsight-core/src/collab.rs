//! Seams for the external engines the reader depends on.
//!
//! OCR and face detection are supplied from outside; any engine that honours
//! these one-method contracts can be plugged into a [`CardReader`].
//!
//! [`CardReader`]: crate::reader::CardReader

use crate::geometry::FaceBox;
use crate::types::TextToken;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// OCR engine: every text fragment on the image with its quadrilateral.
///
/// Token order is unspecified.
pub trait TextRecognizer {
    fn recognize(&mut self, image: &DynamicImage) -> Result<Vec<TextToken>, CollaboratorError>;
}

/// Face detector: the primary (largest) face, or `None`.
pub trait FaceLocator {
    fn locate(&mut self, image: &DynamicImage) -> Result<Option<FaceBox>, CollaboratorError>;
}

impl<T: TextRecognizer + ?Sized> TextRecognizer for Box<T> {
    fn recognize(&mut self, image: &DynamicImage) -> Result<Vec<TextToken>, CollaboratorError> {
        (**self).recognize(image)
    }
}

impl<T: FaceLocator + ?Sized> FaceLocator for Box<T> {
    fn locate(&mut self, image: &DynamicImage) -> Result<Option<FaceBox>, CollaboratorError> {
        (**self).locate(image)
    }
}

/// Tokens produced ahead of time by an external OCR run.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: Vec<TextToken>,
}

impl StaticTokens {
    pub fn new(tokens: Vec<TextToken>) -> Self {
        Self { tokens }
    }

    /// Parse a JSON array of `{"quad": [[x, y] ×4], "text": ..., "confidence": ...}`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(json)?))
    }
}

impl TextRecognizer for StaticTokens {
    fn recognize(&mut self, _image: &DynamicImage) -> Result<Vec<TextToken>, CollaboratorError> {
        Ok(self.tokens.clone())
    }
}

/// A face box known in advance, or the knowledge that there is none.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedFace(pub Option<FaceBox>);

impl FaceLocator for FixedFace {
    fn locate(&mut self, _image: &DynamicImage) -> Result<Option<FaceBox>, CollaboratorError> {
        Ok(self.0)
    }
}
