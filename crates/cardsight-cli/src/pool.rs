//! Directory-backed card pool: one stored card per file, identity = file stem.

use anyhow::{Context, Result};
use cardsight_core::CardImage;
use std::path::Path;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];
const TEXT_EXTENSIONS: [&str; 2] = ["txt", "b64"];

/// Load every card in `dir`, sorted by file name.
///
/// Image files are kept as encoded bytes; `.txt`/`.b64` files hold base64
/// payloads (optionally data URLs) as stored at signup. Other files are skipped.
pub fn load_dir(dir: &Path) -> Result<Vec<(String, CardImage)>> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("reading pool directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut pool = Vec::new();
    for path in paths {
        let Some(identity) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        if !is_card_file(&path) {
            tracing::debug!(path = %path.display(), "not a card file, skipping");
            continue;
        }
        let card = load_card(&path)?;
        pool.push((identity, card));
    }

    tracing::info!(dir = %dir.display(), cards = pool.len(), "loaded card pool");
    Ok(pool)
}

/// Load one card file: base64 text for `.txt`/`.b64`, encoded image bytes otherwise.
pub fn load_card(path: &Path) -> Result<CardImage> {
    if TEXT_EXTENSIONS.contains(&extension(path).as_str()) {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Ok(CardImage::Encoded(text))
    } else {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Ok(CardImage::Bytes(bytes))
    }
}

fn is_card_file(path: &Path) -> bool {
    let ext = extension(path);
    IMAGE_EXTENSIONS.contains(&ext.as_str()) || TEXT_EXTENSIONS.contains(&ext.as_str())
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}
