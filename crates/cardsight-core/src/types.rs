use crate::geometry::Quad;
use serde::{Deserialize, Serialize};

/// A single OCR detection: where it sits, what it says, how sure the engine is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextToken {
    pub quad: Quad,
    pub text: String,
    #[serde(default)]
    pub confidence: f32,
}

impl TextToken {
    pub fn new(quad: Quad, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            quad,
            text: text.into(),
            confidence,
        }
    }
}

/// One text row rebuilt from one or more tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedLine {
    /// Axis-aligned extent of every member token.
    pub quad: Quad,
    /// Member texts, left to right, separated by single spaces.
    pub text: String,
}

/// Semantic fields recognized on a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Company,
    FullName,
    Title,
    IdNumber,
    Email,
    Location,
    BirthDate,
    Gender,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Company,
        Field::FullName,
        Field::Title,
        Field::IdNumber,
        Field::Email,
        Field::Location,
        Field::BirthDate,
        Field::Gender,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Company => "company",
            Field::FullName => "full_name",
            Field::Title => "title",
            Field::IdNumber => "id_number",
            Field::Email => "email",
            Field::Location => "location",
            Field::BirthDate => "birth_date",
            Field::Gender => "gender",
        }
    }
}

/// Field values read from one card. Absent fields had no qualifying text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedCard {
    pub company: Option<String>,
    pub full_name: Option<String>,
    pub title: Option<String>,
    pub id_number: Option<String>,
    pub email: Option<String>,
    pub location: Option<String>,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
}

impl ParsedCard {
    pub fn get(&self, field: Field) -> Option<&str> {
        self.slot(field).as_deref()
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        *self.slot_mut(field) = Some(value.into());
    }

    /// Store `value` unless the field already holds a value at least as long.
    ///
    /// Length is counted in characters. Returns whether the field changed.
    pub fn offer(&mut self, field: Field, value: &str) -> bool {
        let slot = self.slot_mut(field);
        let replace = match slot {
            None => true,
            Some(existing) => value.chars().count() > existing.chars().count(),
        };
        if replace {
            *slot = Some(value.to_string());
        }
        replace
    }

    /// Number of fields holding a value.
    pub fn resolved(&self) -> usize {
        Field::ALL.iter().filter(|f| self.get(**f).is_some()).count()
    }

    fn slot(&self, field: Field) -> &Option<String> {
        match field {
            Field::Company => &self.company,
            Field::FullName => &self.full_name,
            Field::Title => &self.title,
            Field::IdNumber => &self.id_number,
            Field::Email => &self.email,
            Field::Location => &self.location,
            Field::BirthDate => &self.birth_date,
            Field::Gender => &self.gender,
        }
    }

    fn slot_mut(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Company => &mut self.company,
            Field::FullName => &mut self.full_name,
            Field::Title => &mut self.title,
            Field::IdNumber => &mut self.id_number,
            Field::Email => &mut self.email,
            Field::Location => &mut self.location,
            Field::BirthDate => &mut self.birth_date,
            Field::Gender => &mut self.gender,
        }
    }
}
