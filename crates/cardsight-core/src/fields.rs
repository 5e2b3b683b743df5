//! Spatial field extraction from OCR tokens.
//!
//! Three rules run over one card, each filling its own fields:
//!
//! 1. **Header**: the lowest merged line in the top quarter of the card is
//!    the company name (a logo wordmark usually sits above it).
//! 2. **Name/title**: with a face present, the first two merged lines in a
//!    band below the face are the holder's name and title.
//! 3. **Anchors**: tokens containing a known label ("EMAIL", "KONUM", ...)
//!    take the closest token printed directly beneath them as their value.

use crate::geometry::{horizontal_offset, vertical_gap, FaceBox};
use crate::lines::{merge_lines, DEFAULT_LINE_THRESHOLD};
use crate::types::{Field, MergedLine, ParsedCard, TextToken};
use std::cmp::Ordering;

/// Label substrings and the field they introduce, checked in order; the
/// first label contained in a token decides its field.
pub const ANCHORS: [(&str, Field); 7] = [
    ("ID / SICIL NO", Field::IdNumber),
    ("EMAIL", Field::Email),
    ("KONUM", Field::Location),
    ("DOĞUM T.", Field::BirthDate),
    ("CINSIYET", Field::Gender),
    ("DOĞUM", Field::BirthDate),
    ("ID", Field::IdNumber),
];

/// Layout heuristics. Pixel values apply to the card as scanned unless
/// `reference_height` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    /// Face box growth per side, as a fraction of its width/height.
    pub face_margin: f32,
    /// Vertical centre distance that still counts as the same line (px).
    pub line_threshold: f32,
    /// Share of the card height treated as header.
    pub header_fraction: f32,
    /// Height of the name/title band below the face, as a share of the card.
    pub name_band_fraction: f32,
    /// Maximum horizontal centre offset between an anchor and its value (px).
    pub anchor_max_dx: f32,
    /// Maximum gap between an anchor's bottom and its value's top (px).
    pub anchor_max_dy: f32,
    /// Card height the pixel values were tuned on. When set, pixel values
    /// scale by `image_height / reference_height`.
    pub reference_height: Option<f32>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            face_margin: 0.5,
            line_threshold: DEFAULT_LINE_THRESHOLD,
            header_fraction: 0.25,
            name_band_fraction: 0.3,
            anchor_max_dx: 200.0,
            anchor_max_dy: 120.0,
            reference_height: None,
        }
    }
}

impl ReaderConfig {
    /// Multiplier applied to pixel thresholds for a card `image_height` tall.
    pub fn pixel_scale(&self, image_height: u32) -> f32 {
        match self.reference_height {
            Some(reference) if reference > 0.0 && image_height > 0 => image_height as f32 / reference,
            _ => 1.0,
        }
    }
}

/// Field the token labels, if its upper-cased text contains an anchor.
pub fn anchor_field(text: &str) -> Option<Field> {
    let upper = text.trim().to_uppercase();
    ANCHORS
        .iter()
        .find(|(label, _)| upper.contains(label))
        .map(|(_, field)| *field)
}

/// Run every rule over one card's tokens.
///
/// `face` is the unexpanded face box, if one was found. Missing fields are
/// left empty; this never fails.
pub fn extract_fields(
    tokens: &[TextToken],
    face: Option<&FaceBox>,
    image_height: u32,
    config: &ReaderConfig,
) -> ParsedCard {
    let scale = config.pixel_scale(image_height);
    let lines = merge_lines(tokens, config.line_threshold * scale);
    let height = image_height as f32;

    let mut card = ParsedCard::default();

    if let Some(company) = header_line(&lines, height * config.header_fraction) {
        card.set(Field::Company, company);
    }

    if let Some(face) = face {
        let mut band = lines_below(&lines, face.y2, height * config.name_band_fraction);
        if let Some(name) = band.next() {
            card.set(Field::FullName, name);
        }
        if let Some(title) = band.next() {
            card.set(Field::Title, title);
        }
    }

    resolve_anchors(
        tokens,
        &mut card,
        config.anchor_max_dx * scale,
        config.anchor_max_dy * scale,
    );

    tracing::debug!(
        tokens = tokens.len(),
        lines = lines.len(),
        resolved = card.resolved(),
        face = face.is_some(),
        "extracted card fields"
    );

    card
}

/// Text of the lowest line whose centre lies above `header_bottom`.
fn header_line(lines: &[MergedLine], header_bottom: f32) -> Option<&str> {
    let mut header: Vec<&MergedLine> = lines
        .iter()
        .filter(|l| l.quad.center_y() < header_bottom)
        .collect();
    header.sort_by(|a, b| {
        a.quad
            .center_y()
            .partial_cmp(&b.quad.center_y())
            .unwrap_or(Ordering::Equal)
    });
    header.last().map(|l| l.text.as_str())
}

/// Lines centred strictly inside `(face_bottom, face_bottom + band)`, in line order.
fn lines_below(lines: &[MergedLine], face_bottom: f32, band: f32) -> impl Iterator<Item = &str> {
    lines
        .iter()
        .filter(move |l| {
            let cy = l.quad.center_y();
            cy > face_bottom && cy < face_bottom + band
        })
        .map(|l| l.text.as_str())
}

/// Pair every anchor token with the nearest token below it and offer the
/// value to the anchor's field (longer values replace shorter ones).
fn resolve_anchors(tokens: &[TextToken], card: &mut ParsedCard, max_dx: f32, max_dy: f32) {
    for (i, anchor) in tokens.iter().enumerate() {
        let Some(field) = anchor_field(&anchor.text) else {
            continue;
        };

        let mut best: Option<(&str, f32)> = None;
        for (j, candidate) in tokens.iter().enumerate() {
            if i == j {
                continue;
            }
            let gap = vertical_gap(&anchor.quad, &candidate.quad);
            if gap <= 0.0 || gap >= max_dy {
                continue;
            }
            if horizontal_offset(&anchor.quad, &candidate.quad) >= max_dx {
                continue;
            }
            if best.map_or(true, |(_, d)| gap < d) {
                best = Some((candidate.text.as_str(), gap));
            }
        }

        if let Some((value, gap)) = best.filter(|(v, _)| !v.is_empty()) {
            let stored = card.offer(field, value);
            tracing::debug!(
                anchor = %anchor.text,
                field = field.as_str(),
                gap,
                stored,
                "anchor resolved"
            );
        }
    }
}
