//! Intensity normalization ahead of keypoint detection: grayscale, CLAHE.

use image::{DynamicImage, GrayImage};
use std::ops::Range;

// --- Named constants ---
/// Tile grid along each axis.
pub const CLAHE_TILES: u32 = 8;
/// Clip limit as a multiple of the mean histogram bin height.
pub const CLAHE_CLIP_LIMIT: f32 = 2.0;

/// Convert to grayscale and equalize local contrast.
///
/// Both matcher inputs go through this exact sequence so their descriptors
/// are comparable.
pub fn normalize(image: &DynamicImage) -> GrayImage {
    let mut gray = image.to_luma8();
    clahe_enhance(&mut gray, CLAHE_TILES, CLAHE_CLIP_LIMIT);
    gray
}

/// Apply Contrast-Limited Adaptive Histogram Equalization (CLAHE) in-place.
///
/// Divides the image into a `tiles × tiles` grid, clips each tile histogram
/// at `clip_limit` times the mean bin height, redistributes the excess,
/// builds per-tile CDFs and maps every pixel by bilinear interpolation
/// between the four nearest tile CDFs. When the size is not a multiple of
/// the grid, the last tile row and column absorb the remainder so every pixel
/// is counted. Images smaller than the grid are left untouched.
pub fn clahe_enhance(gray: &mut GrayImage, tiles: u32, clip_limit: f32) {
    let w = gray.width() as usize;
    let h = gray.height() as usize;
    let t = tiles as usize;
    if w == 0 || h == 0 || t == 0 {
        return;
    }

    let tile_w = w / t;
    let tile_h = h / t;
    if tile_w == 0 || tile_h == 0 {
        return;
    }

    let data: &mut [u8] = gray.as_mut();

    let mut cdfs: Vec<[f32; 256]> = Vec::with_capacity(t * t);
    for row in 0..t {
        let rows = tile_span(row, t, tile_h, h);
        for col in 0..t {
            let cols = tile_span(col, t, tile_w, w);
            let tile_pixels = rows.len() * cols.len();
            let clip = ((clip_limit * tile_pixels as f32 / 256.0) as u32).max(1);

            let mut hist = [0u32; 256];
            for y in rows.clone() {
                for x in cols.clone() {
                    hist[data[y * w + x] as usize] += 1;
                }
            }

            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let redist = excess / 256;
            let leftover = (excess % 256) as usize;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += redist;
                if i < leftover {
                    *bin += 1;
                }
            }

            let mut cdf = [0f32; 256];
            cdf[0] = hist[0] as f32;
            for i in 1..256 {
                cdf[i] = cdf[i - 1] + hist[i] as f32;
            }
            let cdf_min = cdf.iter().find(|&&v| v > 0.0).copied().unwrap_or(0.0);
            let denom = tile_pixels as f32 - cdf_min;
            if denom > 0.0 {
                for v in cdf.iter_mut() {
                    *v = ((*v - cdf_min) / denom * 255.0).clamp(0.0, 255.0);
                }
            } else {
                // Flat tile: identity mapping keeps the intensity unchanged.
                for (i, v) in cdf.iter_mut().enumerate() {
                    *v = i as f32;
                }
            }
            cdfs.push(cdf);
        }
    }

    for y in 0..h {
        for x in 0..w {
            let pixel = data[y * w + x] as usize;

            let fy = (y as f32 / tile_h as f32 - 0.5).clamp(0.0, (t - 1) as f32);
            let fx = (x as f32 / tile_w as f32 - 0.5).clamp(0.0, (t - 1) as f32);

            let r0 = fy as usize;
            let c0 = fx as usize;
            let r1 = (r0 + 1).min(t - 1);
            let c1 = (c0 + 1).min(t - 1);
            let dy = fy - r0 as f32;
            let dx = fx - c0 as f32;

            let top = cdfs[r0 * t + c0][pixel] * (1.0 - dx) + cdfs[r0 * t + c1][pixel] * dx;
            let bot = cdfs[r1 * t + c0][pixel] * (1.0 - dx) + cdfs[r1 * t + c1][pixel] * dx;
            let val = top * (1.0 - dy) + bot * dy;

            data[y * w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Pixel range of tile `index` along an axis of `len` pixels; the last tile
/// runs to the edge.
fn tile_span(index: usize, tiles: usize, tile_len: usize, len: usize) -> Range<usize> {
    let start = index * tile_len;
    let end = if index + 1 == tiles { len } else { start + tile_len };
    start..end
}
