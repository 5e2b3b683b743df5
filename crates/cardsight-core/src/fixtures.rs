//! Synthetic card images for tests.

use image::{DynamicImage, GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A grey card covered in overlapping rectangles of random intensity.
///
/// Every seed produces a different, corner-rich layout; the same seed always
/// produces the same pixels.
pub fn textured_card(seed: u64, width: u32, height: u32) -> DynamicImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = GrayImage::from_pixel(width, height, Luma([128]));

    let count = (width * height / 320).max(20);
    for _ in 0..count {
        let w = rng.gen_range(8..40).min(width);
        let h = rng.gen_range(8..40).min(height);
        let x0 = rng.gen_range(0..=width - w);
        let y0 = rng.gen_range(0..=height - h);
        let level = Luma([rng.gen_range(0..=255u8)]);
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, level);
            }
        }
    }

    DynamicImage::ImageLuma8(img)
}

/// A flat image with no texture at all.
pub fn blank_card(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([200])))
}
