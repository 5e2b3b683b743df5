//! cardsight-core — Card fingerprint matching and spatial field extraction.
//!
//! The matcher compares ORB-style (or gradient histogram) descriptors of two
//! card photos and searches a pool of stored cards for the owner of a presented card.
//! The reader merges OCR tokens into lines and reads company, name, title and
//! labelled fields from their layout.

pub mod collab;
pub mod features;
pub mod fields;
pub mod geometry;
pub mod lines;
pub mod matcher;
pub mod payload;
pub mod prefill;
pub mod preprocess;
pub mod reader;
#[cfg(feature = "scrfd")]
pub mod scrfd;
pub mod types;

#[cfg(test)]
mod fixtures;

pub use collab::{CollaboratorError, FaceLocator, FixedFace, StaticTokens, TextRecognizer};
pub use features::{Algorithm, FeatureExtractor, FeatureSet};
pub use fields::{extract_fields, ReaderConfig};
pub use geometry::{FaceBox, Quad};
pub use matcher::{CardMatcher, MatchError, MatchResult, MatcherConfig, PoolDecision};
pub use payload::{CardImage, PayloadError};
pub use prefill::{build_profile, CardProfile, Gender};
pub use reader::{CardReader, CardReading, ReadError};
pub use types::{Field, MergedLine, ParsedCard, TextToken};
