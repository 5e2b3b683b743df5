//! Scale- and rotation-tolerant keypoints with binary or float descriptors.
//!
//! Detection is ORB-style: FAST-9 corners over an image pyramid, 3×3
//! non-maximum suppression, a geometric per-level feature budget and
//! intensity-centroid orientation. Two descriptor strategies share those
//! keypoints:
//!
//! * [`OrbExtractor`]: steered BRIEF, 256 bits, compared by Hamming distance.
//! * [`GradientExtractor`]: 128-d oriented gradient histogram, compared by
//!   Euclidean distance. Finer, slower.

use crate::preprocess;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

// --- Named constants ---
pub const DEFAULT_MAX_FEATURES: usize = 2000;
const PYRAMID_LEVELS: usize = 8;
const PYRAMID_SCALE: f32 = 1.2;
const FAST_THRESHOLD: u8 = 20;
/// Radius of the disc used for the intensity centroid.
const ORIENTATION_RADIUS: i32 = 15;
/// Keypoints closer than this to a level edge cannot be described.
const EDGE_BORDER: u32 = 19;
/// Diameter of the described patch at level 0.
const PATCH_SIZE: f32 = 31.0;
const BLUR_SIGMA: f32 = 2.0;

const BRIEF_BITS: usize = 256;
const BRIEF_BYTES: usize = BRIEF_BITS / 8;
/// Test pair coordinates are drawn from `[-BRIEF_SPAN, BRIEF_SPAN]`.
const BRIEF_SPAN: i32 = 13;
const BRIEF_SEED: u64 = 0x5EED_CA4D;

const GRADIENT_WINDOW: usize = 16;
const GRADIENT_CELLS: usize = 4;
const GRADIENT_BINS: usize = 8;
pub const GRADIENT_DIM: usize = GRADIENT_CELLS * GRADIENT_CELLS * GRADIENT_BINS;
const GRADIENT_CLIP: f32 = 0.2;

/// Descriptor strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Binary steered-BRIEF descriptors (fast).
    #[default]
    Orb,
    /// Float gradient-histogram descriptors (precise, slower).
    Gradient,
}

impl Algorithm {
    /// Resolve an algorithm by name. Unknown names fall back to ORB.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "orb" => Algorithm::Orb,
            "gradient" | "sift" => Algorithm::Gradient,
            other => {
                tracing::warn!(requested = other, "unknown descriptor algorithm, using ORB");
                Algorithm::Orb
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Orb => "orb",
            Algorithm::Gradient => "gradient",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected keypoint in level-0 (input image) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Orientation in radians, `atan2` convention.
    pub angle: f32,
    /// Diameter of the described patch in input pixels.
    pub size: f32,
    /// Pyramid level the keypoint was found on.
    pub octave: u8,
    /// FAST corner score.
    pub response: f32,
}

/// Descriptor vectors, one per keypoint, in keypoint order.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptors {
    Binary(Vec<[u8; BRIEF_BYTES]>),
    Float(Vec<Vec<f32>>),
}

impl Descriptors {
    pub fn len(&self) -> usize {
        match self {
            Descriptors::Binary(d) => d.len(),
            Descriptors::Float(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keypoints and their descriptors for one image.
///
/// `descriptors` is `None` when the image has too little texture for any
/// keypoint to survive. That is an expected outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Option<Descriptors>,
}

impl FeatureSet {
    pub fn empty() -> Self {
        Self {
            keypoints: Vec::new(),
            descriptors: None,
        }
    }
}

/// Strategy for turning an image into a [`FeatureSet`].
pub trait FeatureExtractor: Send + Sync {
    fn algorithm(&self) -> Algorithm;
    fn extract(&self, image: &DynamicImage) -> FeatureSet;
}

/// Build the extractor for `algorithm` with a total keypoint budget.
pub fn extractor_for(algorithm: Algorithm, max_features: usize) -> Box<dyn FeatureExtractor> {
    let detector = KeypointDetector::new(max_features);
    match algorithm {
        Algorithm::Orb => Box::new(OrbExtractor { detector }),
        Algorithm::Gradient => Box::new(GradientExtractor { detector }),
    }
}

/// One pyramid level: the intensity image and its scale relative to level 0.
struct Level {
    image: GrayImage,
    scale: f32,
}

/// A keypoint in level coordinates, before descriptor computation.
struct LevelKeypoint {
    x: u32,
    y: u32,
    angle: f32,
    response: f32,
}

/// Pyramid FAST detector shared by both descriptor strategies.
#[derive(Debug, Clone)]
pub struct KeypointDetector {
    max_features: usize,
}

impl KeypointDetector {
    pub fn new(max_features: usize) -> Self {
        Self { max_features }
    }

    /// Run detection on an already normalized image and describe every
    /// keypoint on its Gaussian-smoothed level. Keypoints `describe` rejects
    /// are dropped, so both returned vectors stay index-aligned.
    fn detect_and_describe<D>(
        &self,
        gray: &GrayImage,
        mut describe: impl FnMut(&GrayImage, &LevelKeypoint) -> Option<D>,
    ) -> (Vec<Keypoint>, Vec<D>) {
        let levels = build_pyramid(gray);
        let budgets = level_budgets(self.max_features, levels.len());

        let mut keypoints = Vec::new();
        let mut descriptors = Vec::new();

        for (octave, (level, budget)) in levels.iter().zip(budgets).enumerate() {
            let found = detect_level(&level.image, budget);
            if found.is_empty() {
                continue;
            }

            let smoothed = gaussian_blur_f32(&level.image, BLUR_SIGMA);
            for kp in &found {
                let Some(desc) = describe(&smoothed, kp) else {
                    continue;
                };
                keypoints.push(Keypoint {
                    x: kp.x as f32 * level.scale,
                    y: kp.y as f32 * level.scale,
                    angle: kp.angle,
                    size: PATCH_SIZE * level.scale,
                    octave: octave as u8,
                    response: kp.response,
                });
                descriptors.push(desc);
            }
        }

        tracing::debug!(
            keypoints = keypoints.len(),
            levels = levels.len(),
            width = gray.width(),
            height = gray.height(),
            "detected keypoints"
        );

        (keypoints, descriptors)
    }
}

/// Steered-BRIEF binary descriptors.
#[derive(Debug, Clone)]
pub struct OrbExtractor {
    detector: KeypointDetector,
}

impl OrbExtractor {
    pub fn new(max_features: usize) -> Self {
        Self {
            detector: KeypointDetector::new(max_features),
        }
    }
}

impl FeatureExtractor for OrbExtractor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Orb
    }

    fn extract(&self, image: &DynamicImage) -> FeatureSet {
        let gray = preprocess::normalize(image);
        let (keypoints, descriptors) = self
            .detector
            .detect_and_describe(&gray, |smoothed, kp| Some(steered_brief(smoothed, kp)));

        if keypoints.is_empty() {
            return FeatureSet::empty();
        }
        FeatureSet {
            keypoints,
            descriptors: Some(Descriptors::Binary(descriptors)),
        }
    }
}

/// Oriented gradient-histogram float descriptors.
#[derive(Debug, Clone)]
pub struct GradientExtractor {
    detector: KeypointDetector,
}

impl GradientExtractor {
    pub fn new(max_features: usize) -> Self {
        Self {
            detector: KeypointDetector::new(max_features),
        }
    }
}

impl FeatureExtractor for GradientExtractor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Gradient
    }

    fn extract(&self, image: &DynamicImage) -> FeatureSet {
        let gray = preprocess::normalize(image);
        let (keypoints, descriptors) = self
            .detector
            .detect_and_describe(&gray, |smoothed, kp| gradient_histogram(smoothed, kp));

        if keypoints.is_empty() {
            return FeatureSet::empty();
        }
        FeatureSet {
            keypoints,
            descriptors: Some(Descriptors::Float(descriptors)),
        }
    }
}

/// Downscale by [`PYRAMID_SCALE`] per level until a level can no longer hold
/// a described patch.
fn build_pyramid(gray: &GrayImage) -> Vec<Level> {
    let min_side = 2 * EDGE_BORDER + 1;
    let (w0, h0) = gray.dimensions();
    let mut levels = Vec::with_capacity(PYRAMID_LEVELS);

    if w0 < min_side || h0 < min_side {
        return levels;
    }
    levels.push(Level {
        image: gray.clone(),
        scale: 1.0,
    });

    for i in 1..PYRAMID_LEVELS {
        let factor = PYRAMID_SCALE.powi(i as i32);
        let w = (w0 as f32 / factor).round() as u32;
        let h = (h0 as f32 / factor).round() as u32;
        if w < min_side || h < min_side {
            break;
        }
        levels.push(Level {
            image: imageops::resize(gray, w, h, FilterType::Triangle),
            scale: w0 as f32 / w as f32,
        });
    }

    levels
}

/// Split `total` features over `levels` levels, shrinking by the pyramid
/// area ratio so coarse levels get fewer keypoints.
fn level_budgets(total: usize, levels: usize) -> Vec<usize> {
    if levels == 0 {
        return Vec::new();
    }
    let factor = 1.0 / PYRAMID_SCALE;
    let first = total as f32 * (1.0 - factor) / (1.0 - factor.powi(levels as i32));

    let mut budgets = Vec::with_capacity(levels);
    let mut assigned = 0usize;
    let mut desired = first;
    for _ in 0..levels - 1 {
        let n = (desired.round() as usize).min(total - assigned);
        budgets.push(n);
        assigned += n;
        desired *= factor;
    }
    budgets.push(total - assigned);
    budgets
}

/// FAST-9 corners on one level, suppressed to 3×3 local maxima, kept away
/// from the border, strongest first, at most `budget`.
fn detect_level(image: &GrayImage, budget: usize) -> Vec<LevelKeypoint> {
    if budget == 0 {
        return Vec::new();
    }
    let (w, h) = image.dimensions();
    let corners = corners_fast9(image, FAST_THRESHOLD);

    let mut scores = vec![0f32; (w * h) as usize];
    for c in &corners {
        scores[(c.y * w + c.x) as usize] = c.score.max(f32::MIN_POSITIVE);
    }

    let mut kept: Vec<(u32, u32, f32)> = corners
        .iter()
        .filter(|c| {
            c.x >= EDGE_BORDER && c.y >= EDGE_BORDER && c.x + EDGE_BORDER < w && c.y + EDGE_BORDER < h
        })
        .filter(|c| {
            let s = scores[(c.y * w + c.x) as usize];
            (c.y - 1..=c.y + 1).all(|ny| {
                (c.x - 1..=c.x + 1).all(|nx| scores[(ny * w + nx) as usize] <= s)
            })
        })
        .map(|c| (c.x, c.y, c.score))
        .collect();

    kept.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
    kept.truncate(budget);

    kept.into_iter()
        .map(|(x, y, response)| LevelKeypoint {
            x,
            y,
            angle: intensity_centroid_angle(image, x, y),
            response,
        })
        .collect()
}

/// Orientation from the intensity centroid of a disc around `(cx, cy)`.
fn intensity_centroid_angle(image: &GrayImage, cx: u32, cy: u32) -> f32 {
    let w = image.width() as i32;
    let data = image.as_raw();
    let (cx, cy) = (cx as i32, cy as i32);
    let r = ORIENTATION_RADIUS;

    let mut m01 = 0f32;
    let mut m10 = 0f32;
    for dy in -r..=r {
        let span = ((r * r - dy * dy) as f32).sqrt() as i32;
        for dx in -span..=span {
            let v = data[((cy + dy) * w + cx + dx) as usize] as f32;
            m10 += dx as f32 * v;
            m01 += dy as f32 * v;
        }
    }
    m01.atan2(m10)
}

type TestPair = ((f32, f32), (f32, f32));

/// The 256 BRIEF test pairs, identical for every image in the process.
fn brief_pattern() -> &'static [TestPair] {
    static PATTERN: OnceLock<Vec<TestPair>> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(BRIEF_SEED);
        let mut pairs = Vec::with_capacity(BRIEF_BITS);
        while pairs.len() < BRIEF_BITS {
            let a = (rng.gen_range(-BRIEF_SPAN..=BRIEF_SPAN), rng.gen_range(-BRIEF_SPAN..=BRIEF_SPAN));
            let b = (rng.gen_range(-BRIEF_SPAN..=BRIEF_SPAN), rng.gen_range(-BRIEF_SPAN..=BRIEF_SPAN));
            if a == b {
                continue;
            }
            pairs.push(((a.0 as f32, a.1 as f32), (b.0 as f32, b.1 as f32)));
        }
        pairs
    })
}

/// Sample `image` at `(cx, cy) + R(angle) * offset`, rounded to the nearest
/// pixel and clamped to the image.
fn sample_rotated(image: &GrayImage, cx: u32, cy: u32, cos: f32, sin: f32, offset: (f32, f32)) -> f32 {
    let (w, h) = image.dimensions();
    let x = cx as f32 + offset.0 * cos - offset.1 * sin;
    let y = cy as f32 + offset.0 * sin + offset.1 * cos;
    let x = (x.round() as i64).clamp(0, w as i64 - 1) as u32;
    let y = (y.round() as i64).clamp(0, h as i64 - 1) as u32;
    image.as_raw()[(y * w + x) as usize] as f32
}

fn steered_brief(smoothed: &GrayImage, kp: &LevelKeypoint) -> [u8; BRIEF_BYTES] {
    let (sin, cos) = kp.angle.sin_cos();
    let mut desc = [0u8; BRIEF_BYTES];
    for (i, &(p1, p2)) in brief_pattern().iter().enumerate() {
        let a = sample_rotated(smoothed, kp.x, kp.y, cos, sin, p1);
        let b = sample_rotated(smoothed, kp.x, kp.y, cos, sin, p2);
        if a < b {
            desc[i / 8] |= 1 << (i % 8);
        }
    }
    desc
}

/// 4×4 cells × 8 orientation bins over a 16×16 window aligned with the
/// keypoint orientation, Gaussian weighted, normalized, clipped and
/// renormalized. `None` for a patch with no gradient at all.
fn gradient_histogram(smoothed: &GrayImage, kp: &LevelKeypoint) -> Option<Vec<f32>> {
    let (sin, cos) = kp.angle.sin_cos();
    let half = GRADIENT_WINDOW as f32 / 2.0;
    let cell = GRADIENT_WINDOW / GRADIENT_CELLS;
    let sigma2 = 2.0 * half * half;
    let two_pi = std::f32::consts::TAU;

    let mut desc = vec![0f32; GRADIENT_DIM];
    for row in 0..GRADIENT_WINDOW {
        for col in 0..GRADIENT_WINDOW {
            let u = col as f32 - half + 0.5;
            let v = row as f32 - half + 0.5;

            let sample = |du: f32, dv: f32| sample_rotated(smoothed, kp.x, kp.y, cos, sin, (u + du, v + dv));
            let gx = sample(1.0, 0.0) - sample(-1.0, 0.0);
            let gy = sample(0.0, 1.0) - sample(0.0, -1.0);
            let magnitude = (gx * gx + gy * gy).sqrt();
            if magnitude == 0.0 {
                continue;
            }

            // Gradients are sampled along the rotated axes, so the angle is
            // already relative to the keypoint orientation.
            let theta = gy.atan2(gx).rem_euclid(two_pi);
            let bin = ((theta / two_pi * GRADIENT_BINS as f32) as usize).min(GRADIENT_BINS - 1);
            let weight = (-(u * u + v * v) / sigma2).exp();

            let idx = ((row / cell) * GRADIENT_CELLS + col / cell) * GRADIENT_BINS + bin;
            desc[idx] += magnitude * weight;
        }
    }

    if !l2_normalize(&mut desc) {
        return None;
    }
    for v in desc.iter_mut() {
        *v = v.min(GRADIENT_CLIP);
    }
    l2_normalize(&mut desc);
    Some(desc)
}

fn l2_normalize(values: &mut [f32]) -> bool {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= 0.0 {
        return false;
    }
    for v in values.iter_mut() {
        *v /= norm;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::textured_card;
    use image::Luma;

    #[test]
    fn test_level_budgets_sum_to_total() {
        let budgets = level_budgets(2000, 8);
        assert_eq!(budgets.len(), 8);
        assert_eq!(budgets.iter().sum::<usize>(), 2000);
        assert!(budgets[0] > budgets[7], "finer levels get more features: {budgets:?}");
    }

    #[test]
    fn test_level_budgets_single_level() {
        assert_eq!(level_budgets(500, 1), vec![500]);
        assert!(level_budgets(500, 0).is_empty());
    }

    #[test]
    fn test_pyramid_stops_at_min_size() {
        let gray = GrayImage::new(120, 80);
        let levels = build_pyramid(&gray);
        assert!(!levels.is_empty());
        for level in &levels {
            assert!(level.image.width() > 2 * EDGE_BORDER);
            assert!(level.image.height() > 2 * EDGE_BORDER);
        }
        assert!(levels.len() < PYRAMID_LEVELS);
    }

    #[test]
    fn test_pyramid_tiny_image_is_empty() {
        assert!(build_pyramid(&GrayImage::new(20, 20)).is_empty());
    }

    #[test]
    fn test_brief_pattern_is_stable() {
        let a = brief_pattern();
        let b = brief_pattern();
        assert_eq!(a.len(), BRIEF_BITS);
        assert!(std::ptr::eq(a, b));
        assert!(a.iter().all(|(p, q)| p != q));
    }

    #[test]
    fn test_centroid_angle_points_to_bright_side() {
        // Bright right half: centroid lies along +x, angle ≈ 0.
        let img = GrayImage::from_fn(64, 64, |x, _| Luma([if x > 32 { 220 } else { 20 }]));
        let angle = intensity_centroid_angle(&img, 32, 32);
        assert!(angle.abs() < 0.1, "angle = {angle}");

        // Bright bottom half: angle ≈ +π/2.
        let img = GrayImage::from_fn(64, 64, |_, y| Luma([if y > 32 { 220 } else { 20 }]));
        let angle = intensity_centroid_angle(&img, 32, 32);
        assert!((angle - std::f32::consts::FRAC_PI_2).abs() < 0.1, "angle = {angle}");
    }

    #[test]
    fn test_flat_image_has_no_descriptors() {
        let flat = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 120, Luma([128])));
        let set = OrbExtractor::new(DEFAULT_MAX_FEATURES).extract(&flat);
        assert!(set.keypoints.is_empty());
        assert!(set.descriptors.is_none());
    }

    #[test]
    fn test_textured_image_yields_descriptors() {
        let card = textured_card(7, 320, 200);
        let set = OrbExtractor::new(DEFAULT_MAX_FEATURES).extract(&card);
        let descriptors = set.descriptors.expect("textured card must produce descriptors");
        assert_eq!(descriptors.len(), set.keypoints.len());
        assert!(set.keypoints.len() >= 30, "only {} keypoints", set.keypoints.len());
        assert!(set.keypoints.len() <= DEFAULT_MAX_FEATURES);
    }

    #[test]
    fn test_keypoints_within_image() {
        let card = textured_card(11, 300, 180);
        let set = OrbExtractor::new(500).extract(&card);
        for kp in &set.keypoints {
            assert!(kp.x >= 0.0 && kp.x < 300.0, "x = {}", kp.x);
            assert!(kp.y >= 0.0 && kp.y < 180.0, "y = {}", kp.y);
        }
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let card = textured_card(3, 240, 160);
        let extractor = OrbExtractor::new(DEFAULT_MAX_FEATURES);
        assert_eq!(extractor.extract(&card), extractor.extract(&card));
    }

    #[test]
    fn test_gradient_descriptors_are_unit_length() {
        let card = textured_card(5, 240, 160);
        let set = GradientExtractor::new(300).extract(&card);
        let Some(Descriptors::Float(descs)) = set.descriptors else {
            panic!("expected float descriptors");
        };
        assert!(!descs.is_empty());
        for d in &descs {
            assert_eq!(d.len(), GRADIENT_DIM);
            let norm = d.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-3, "norm = {norm}");
        }
    }

    #[test]
    fn test_algorithm_from_name() {
        assert_eq!(Algorithm::from_name("ORB"), Algorithm::Orb);
        assert_eq!(Algorithm::from_name("gradient"), Algorithm::Gradient);
        assert_eq!(Algorithm::from_name("sift"), Algorithm::Gradient);
        assert_eq!(Algorithm::from_name("akaze"), Algorithm::Orb);
    }
}
