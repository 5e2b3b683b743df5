//! Card reader: owns the OCR and face collaborators and runs the field
//! extractor over one card at a time.

use crate::collab::{CollaboratorError, FaceLocator, TextRecognizer};
use crate::fields::{extract_fields, ReaderConfig};
use crate::geometry::{FaceBox, PixelRect};
use crate::payload::CardImage;
use crate::types::{ParsedCard, TextToken};
use image::DynamicImage;
use serde::{Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadError {
    #[error("could not decode card image: {0}")]
    Decode(String),
    #[error("text recognition failed: {0}")]
    Recognition(CollaboratorError),
    #[error("face detection failed: {0}")]
    FaceDetection(CollaboratorError),
}

fn serialize_error<S: Serializer>(error: &Option<ReadError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

/// Everything learned from one card.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CardReading {
    pub fields: ParsedCard,
    pub face_found: bool,
    /// Face box as reported by the locator, before the margin is applied.
    pub face_box: Option<FaceBox>,
    /// Face crop with the margin applied.
    #[serde(skip)]
    pub face_image: Option<DynamicImage>,
    /// Raw OCR tokens the fields were read from.
    pub tokens: Vec<TextToken>,
    #[serde(serialize_with = "serialize_error", skip_serializing_if = "Option::is_none")]
    pub error: Option<ReadError>,
}

impl CardReading {
    fn failed(error: ReadError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Long-lived reader handle. Construct once, then call [`CardReader::read`]
/// per card.
pub struct CardReader<R, F> {
    recognizer: R,
    faces: F,
    config: ReaderConfig,
}

impl<R: TextRecognizer, F: FaceLocator> CardReader<R, F> {
    pub fn new(recognizer: R, faces: F, config: ReaderConfig) -> Self {
        tracing::info!(
            face_margin = config.face_margin,
            line_threshold = config.line_threshold,
            "card reader ready"
        );
        Self {
            recognizer,
            faces,
            config,
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Read one card with the configured face margin.
    pub fn read(&mut self, image: &DynamicImage) -> CardReading {
        let margin = self.config.face_margin;
        self.read_with_margin(image, margin)
    }

    /// Read one card, growing the face crop by `margin` on every side.
    ///
    /// Collaborator failures end the read with `error` set; tokens recognized
    /// before a face detection failure are kept. A card where nothing could
    /// be read is not a failure.
    pub fn read_with_margin(&mut self, image: &DynamicImage, margin: f32) -> CardReading {
        let tokens = match self.recognizer.recognize(image) {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(error = %e, "text recognition failed");
                return CardReading::failed(ReadError::Recognition(e));
            }
        };

        let face_box = match self.faces.locate(image) {
            Ok(face) => face,
            Err(e) => {
                tracing::warn!(error = %e, tokens = tokens.len(), "face detection failed");
                return CardReading {
                    tokens,
                    ..CardReading::failed(ReadError::FaceDetection(e))
                };
            }
        };

        let face_image = face_box
            .and_then(|face| face.expand(margin, image.width(), image.height()))
            .map(|rect| crop(image, rect));

        let fields = extract_fields(&tokens, face_box.as_ref(), image.height(), &self.config);

        tracing::info!(
            width = image.width(),
            height = image.height(),
            tokens = tokens.len(),
            face = face_box.is_some(),
            resolved = fields.resolved(),
            "card read"
        );

        CardReading {
            fields,
            face_found: face_box.is_some(),
            face_box,
            face_image,
            tokens,
            error: None,
        }
    }

    /// Read a card from a payload (decoded image, file bytes or base64).
    pub fn read_payload(&mut self, card: &CardImage) -> CardReading {
        match card.decode() {
            Ok(image) => self.read(&image),
            Err(e) => {
                tracing::warn!(error = %e, "card payload rejected");
                CardReading::failed(ReadError::Decode(e.to_string()))
            }
        }
    }

    /// Read a card from encoded image file bytes.
    pub fn read_bytes(&mut self, bytes: &[u8]) -> CardReading {
        self.read_payload(&CardImage::Bytes(bytes.to_vec()))
    }
}

fn crop(image: &DynamicImage, rect: PixelRect) -> DynamicImage {
    image.crop_imm(rect.x, rect.y, rect.width, rect.height)
}
