//! Signup form pre-fill from a card reading.

use crate::payload::{encode_data_url, PayloadError};
use crate::reader::CardReading;
use chrono::NaiveDate;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

/// Printed date layouts, tried in order.
const BIRTH_DATE_FORMATS: [&str; 4] = ["%d/%m/%Y", "%d.%m.%Y", "%d-%m-%Y", "%Y-%m-%d"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    /// Map a printed gender code. Anything unrecognised is `Other`.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_uppercase().as_str() {
            "E" | "ERKEK" | "M" => Gender::Male,
            "K" | "KADIN" | "F" => Gender::Female,
            _ => Gender::Other,
        }
    }
}

/// Values proposed for a new account. Empty strings mean "not found".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardProfile {
    pub name: String,
    pub email: String,
    pub company: String,
    pub title: String,
    pub id_number: String,
    pub location: String,
    /// ISO `YYYY-MM-DD`, or empty when the printed date was unreadable.
    pub birth_date: String,
    pub gender: Option<Gender>,
    /// Face crop as a JPEG data URL.
    pub profile_pic: Option<String>,
    /// Whole card as a JPEG data URL, ready to store for later matching.
    pub card_image: String,
    pub face_found: bool,
}

/// Reformat a printed birth date as `YYYY-MM-DD`; empty when no layout fits.
pub fn normalize_birth_date(raw: &str) -> String {
    let raw = raw.trim();
    BIRTH_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Build the pre-fill profile for `card`, read as `reading`.
pub fn build_profile(reading: &CardReading, card: &DynamicImage) -> Result<CardProfile, PayloadError> {
    let fields = &reading.fields;
    let text = |value: &Option<String>| value.clone().unwrap_or_default();

    let profile_pic = reading
        .face_image
        .as_ref()
        .map(|face| encode_data_url(face, ImageFormat::Jpeg))
        .transpose()?;

    Ok(CardProfile {
        name: text(&fields.full_name),
        email: text(&fields.email),
        company: text(&fields.company),
        title: text(&fields.title),
        id_number: text(&fields.id_number),
        location: text(&fields.location),
        birth_date: fields
            .birth_date
            .as_deref()
            .map(normalize_birth_date)
            .unwrap_or_default(),
        gender: fields.gender.as_deref().map(Gender::from_code),
        profile_pic,
        card_image: encode_data_url(card, ImageFormat::Jpeg)?,
        face_found: reading.face_found,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParsedCard;

    #[test]
    fn test_birth_date_formats() {
        assert_eq!(normalize_birth_date("04/11/1990"), "1990-11-04");
        assert_eq!(normalize_birth_date("04.11.1990"), "1990-11-04");
        assert_eq!(normalize_birth_date("04-11-1990"), "1990-11-04");
        assert_eq!(normalize_birth_date(" 1990-11-04 "), "1990-11-04");
    }

    #[test]
    fn test_birth_date_day_first() {
        // Ambiguous dates read day first.
        assert_eq!(normalize_birth_date("02/03/2001"), "2001-03-02");
    }

    #[test]
    fn test_birth_date_unreadable() {
        assert_eq!(normalize_birth_date("31/02/1990"), "");
        assert_eq!(normalize_birth_date("sometime"), "");
        assert_eq!(normalize_birth_date(""), "");
    }

    #[test]
    fn test_gender_codes() {
        assert_eq!(Gender::from_code("E"), Gender::Male);
        assert_eq!(Gender::from_code("erkek"), Gender::Male);
        assert_eq!(Gender::from_code("M"), Gender::Male);
        assert_eq!(Gender::from_code("K"), Gender::Female);
        assert_eq!(Gender::from_code("KADIN"), Gender::Female);
        assert_eq!(Gender::from_code(" f "), Gender::Female);
        assert_eq!(Gender::from_code("X"), Gender::Other);
    }

    #[test]
    fn test_build_profile() {
        let reading = CardReading {
            fields: ParsedCard {
                full_name: Some("Jane Roe".into()),
                email: Some("jane@acme.io".into()),
                birth_date: Some("04.11.1990".into()),
                gender: Some("K".into()),
                ..ParsedCard::default()
            },
            face_found: true,
            face_image: Some(DynamicImage::new_rgb8(20, 24)),
            ..CardReading::default()
        };
        let profile = build_profile(&reading, &DynamicImage::new_rgb8(64, 40)).unwrap();

        assert_eq!(profile.name, "Jane Roe");
        assert_eq!(profile.company, "");
        assert_eq!(profile.birth_date, "1990-11-04");
        assert_eq!(profile.gender, Some(Gender::Female));
        assert!(profile.face_found);
        assert!(profile.profile_pic.unwrap().starts_with("data:image/jpeg;base64,"));
        assert!(profile.card_image.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_build_profile_without_face() {
        let profile = build_profile(&CardReading::default(), &DynamicImage::new_rgb8(16, 16)).unwrap();
        assert!(!profile.face_found);
        assert!(profile.profile_pic.is_none());
        assert!(profile.gender.is_none());
        assert_eq!(profile.birth_date, "");
    }

    #[test]
    fn test_gender_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Gender::Other).unwrap(), "\"other\"");
    }
}
