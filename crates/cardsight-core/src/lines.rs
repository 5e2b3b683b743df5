//! Group OCR tokens into text rows by vertical proximity.

use crate::geometry::Quad;
use crate::types::{MergedLine, TextToken};
use std::cmp::Ordering;

pub const DEFAULT_LINE_THRESHOLD: f32 = 20.0;

/// Merge tokens into lines, top of the image first.
///
/// Tokens are visited in order of vertical centre. A token joins the current
/// line while its centre is within `y_threshold` of the line's *first*
/// token; otherwise the line is closed and a new one starts. Every token ends
/// up in exactly one line.
pub fn merge_lines(tokens: &[TextToken], y_threshold: f32) -> Vec<MergedLine> {
    let mut sorted: Vec<&TextToken> = tokens.iter().collect();
    sorted.sort_by(|a, b| {
        a.quad
            .center_y()
            .partial_cmp(&b.quad.center_y())
            .unwrap_or(Ordering::Equal)
    });

    let mut lines = Vec::new();
    let mut current: Vec<&TextToken> = Vec::new();

    for token in sorted {
        if let Some(first) = current.first() {
            if (token.quad.center_y() - first.quad.center_y()).abs() >= y_threshold {
                lines.extend(close_line(std::mem::take(&mut current)));
            }
        }
        current.push(token);
    }
    lines.extend(close_line(current));

    lines
}

/// Order members left to right, join their text, take their joint extent.
fn close_line(mut members: Vec<&TextToken>) -> Option<MergedLine> {
    members.sort_by(|a, b| a.quad.left().partial_cmp(&b.quad.left()).unwrap_or(Ordering::Equal));
    let quad = Quad::bounding(members.iter().map(|t| &t.quad))?;
    let text = members
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    Some(MergedLine { quad, text })
}
