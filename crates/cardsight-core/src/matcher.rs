//! Card-to-card matching and best-candidate pool search.

use crate::features::{self, Algorithm, Descriptors, FeatureExtractor, FeatureSet};
use crate::payload::CardImage;
use serde::{Serialize, Serializer};
use thiserror::Error;

// --- Named constants ---
pub const DEFAULT_RATIO_THRESHOLD: f32 = 0.75;
pub const DEFAULT_MIN_GOOD_MATCHES: usize = 30;
pub const DEFAULT_MIN_SIMILARITY: f32 = 20.0;
pub const DEFAULT_AUTH_FLOOR: f32 = 60.0;

/// Why a comparison produced no verdict. Carried inside results, never raised.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("could not decode card image: {0}")]
    Decode(String),
    #[error("no features could be extracted; the image may be too blurry or too plain")]
    InsufficientFeatures,
    #[error("no stored cards to compare against")]
    EmptyPool,
}

impl MatchError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            MatchError::Decode(_) => "decode_failed",
            MatchError::InsufficientFeatures => "insufficient_features",
            MatchError::EmptyPool => "empty_pool",
        }
    }
}

fn serialize_error<S: Serializer>(error: &Option<MatchError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

/// Tunables for comparison and authentication.
#[derive(Debug, Clone, PartialEq)]
pub struct MatcherConfig {
    pub algorithm: Algorithm,
    /// Lowe ratio: keep a match only if `d1 < ratio * d2`.
    pub ratio_threshold: f32,
    /// Absolute floor on ratio-test survivors for `is_match`.
    pub min_good_matches: usize,
    /// Relative floor on confidence (0–100) for `is_match`.
    pub min_similarity: f32,
    /// Confidence a pool winner needs before it authenticates.
    pub auth_floor: f32,
    /// Total keypoint budget per image.
    pub max_features: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Orb,
            ratio_threshold: DEFAULT_RATIO_THRESHOLD,
            min_good_matches: DEFAULT_MIN_GOOD_MATCHES,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            auth_floor: DEFAULT_AUTH_FLOOR,
            max_features: features::DEFAULT_MAX_FEATURES,
        }
    }
}

/// Outcome of comparing two cards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub is_match: bool,
    /// `100 × good / min(|keypoints A|, |keypoints B|)`, two decimals.
    pub confidence: f32,
    /// Matches that passed the ratio test.
    pub good_matches: usize,
    /// Query descriptors that found at least one neighbour.
    pub total_matches: usize,
    pub algorithm: Algorithm,
    #[serde(serialize_with = "serialize_error", skip_serializing_if = "Option::is_none")]
    pub error: Option<MatchError>,
}

impl MatchResult {
    pub fn failed(algorithm: Algorithm, error: MatchError) -> Self {
        Self {
            is_match: false,
            confidence: 0.0,
            good_matches: 0,
            total_matches: 0,
            algorithm,
            error: Some(error),
        }
    }
}

/// Outcome of searching a pool of stored cards for the owner of a presented card.
#[derive(Debug, Clone, Serialize)]
pub struct PoolDecision<I> {
    /// Identity of the authenticated card owner, if any.
    pub accepted: Option<I>,
    /// Confidence of the best matching candidate (0 when none matched).
    pub confidence: f32,
    /// Pool entries compared.
    pub candidates: usize,
    /// Full result for the best matching candidate.
    pub best: Option<MatchResult>,
    #[serde(serialize_with = "serialize_error", skip_serializing_if = "Option::is_none")]
    pub error: Option<MatchError>,
}

impl<I> PoolDecision<I> {
    fn rejected(candidates: usize, error: Option<MatchError>) -> Self {
        Self {
            accepted: None,
            confidence: 0.0,
            candidates,
            best: None,
            error,
        }
    }
}

/// Ratio-test statistics for one ordered descriptor pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RatioStats {
    pub good: usize,
    pub total: usize,
}

/// Pairwise card matcher. Stateless between calls; share by reference.
pub struct CardMatcher {
    extractor: Box<dyn FeatureExtractor>,
    config: MatcherConfig,
}

impl CardMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        let extractor = features::extractor_for(config.algorithm, config.max_features);
        tracing::info!(
            algorithm = %config.algorithm,
            ratio = config.ratio_threshold,
            max_features = config.max_features,
            "card matcher ready"
        );
        Self { extractor, config }
    }

    /// Use a custom extractor; `config.algorithm` is overridden by the
    /// extractor's own.
    pub fn with_extractor(extractor: Box<dyn FeatureExtractor>, mut config: MatcherConfig) -> Self {
        config.algorithm = extractor.algorithm();
        Self { extractor, config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn algorithm(&self) -> Algorithm {
        self.extractor.algorithm()
    }

    /// Extract features from a payload; decode failures become [`MatchError::Decode`].
    pub fn features(&self, card: &CardImage) -> Result<FeatureSet, MatchError> {
        let img = card.decode().map_err(|e| MatchError::Decode(e.to_string()))?;
        Ok(self.extractor.extract(&img))
    }

    /// Compare two card images.
    pub fn compare(&self, a: &CardImage, b: &CardImage) -> MatchResult {
        let fa = match self.features(a) {
            Ok(f) => f,
            Err(e) => return MatchResult::failed(self.algorithm(), e),
        };
        let fb = match self.features(b) {
            Ok(f) => f,
            Err(e) => return MatchResult::failed(self.algorithm(), e),
        };
        self.compare_features(&fa, &fb)
    }

    /// Compare two precomputed feature sets.
    pub fn compare_features(&self, a: &FeatureSet, b: &FeatureSet) -> MatchResult {
        let (Some(da), Some(db)) = (&a.descriptors, &b.descriptors) else {
            return MatchResult::failed(self.algorithm(), MatchError::InsufficientFeatures);
        };

        let stats = ratio_test(da, db, self.config.ratio_threshold);
        let denom = a.keypoints.len().min(b.keypoints.len());
        let similarity = if denom > 0 {
            100.0 * stats.good as f32 / denom as f32
        } else {
            0.0
        };

        let is_match =
            stats.good >= self.config.min_good_matches && similarity >= self.config.min_similarity;

        tracing::debug!(
            good = stats.good,
            total = stats.total,
            similarity,
            is_match,
            "compared card features"
        );

        MatchResult {
            is_match,
            confidence: (similarity * 100.0).round() / 100.0,
            good_matches: stats.good,
            total_matches: stats.total,
            algorithm: self.algorithm(),
            error: None,
        }
    }

    /// Find the pool entry that best matches `presented` and decide whether it
    /// authenticates.
    ///
    /// Only entries whose comparison is itself a match compete; the highest
    /// confidence wins and must also reach [`MatcherConfig::auth_floor`].
    /// Every entry is compared, and the presented card is decoded and described once.
    pub fn search<I>(
        &self,
        presented: &CardImage,
        pool: impl IntoIterator<Item = (I, CardImage)>,
    ) -> PoolDecision<I> {
        let mut pool = pool.into_iter().peekable();
        if pool.peek().is_none() {
            tracing::info!("pool search: no stored cards");
            return PoolDecision::rejected(0, Some(MatchError::EmptyPool));
        }

        let presented_features = match self.features(presented) {
            Ok(f) => f,
            Err(e) => return PoolDecision::rejected(0, Some(e)),
        };
        if presented_features.descriptors.is_none() {
            return PoolDecision::rejected(0, Some(MatchError::InsufficientFeatures));
        }

        let mut candidates = 0usize;
        let mut best: Option<(I, MatchResult)> = None;

        for (identity, card) in pool {
            candidates += 1;
            let result = match self.features(&card) {
                Ok(stored) => self.compare_features(&presented_features, &stored),
                Err(e) => {
                    tracing::warn!(error = %e, candidate = candidates, "stored card unreadable, skipping");
                    MatchResult::failed(self.algorithm(), e)
                }
            };

            let best_confidence = best.as_ref().map_or(0.0, |(_, r)| r.confidence);
            if result.is_match && result.confidence > best_confidence {
                best = Some((identity, result));
            }
        }

        let Some((identity, result)) = best else {
            tracing::info!(candidates, "pool search: no candidate matched");
            return PoolDecision::rejected(candidates, None);
        };

        let accepted = result.confidence >= self.config.auth_floor;
        tracing::info!(
            candidates,
            confidence = result.confidence,
            floor = self.config.auth_floor,
            accepted,
            "pool search finished"
        );

        PoolDecision {
            accepted: accepted.then_some(identity),
            confidence: result.confidence,
            candidates,
            best: Some(result),
            error: None,
        }
    }
}

/// k=2 nearest-neighbour search from `a` into `b` with Lowe's ratio test.
///
/// Queries with fewer than two neighbours cannot be tested and do not count
/// as good. Descriptor kinds must agree; mixed kinds yield no matches.
pub fn ratio_test(a: &Descriptors, b: &Descriptors, ratio: f32) -> RatioStats {
    match (a, b) {
        (Descriptors::Binary(a), Descriptors::Binary(b)) => {
            let b: Vec<[u64; 4]> = b.iter().map(pack_bits).collect();
            knn_ratio(a.iter().map(pack_bits), &b, ratio, |x, y| hamming(x, y) as f32)
        }
        (Descriptors::Float(a), Descriptors::Float(b)) => {
            knn_ratio(a.iter(), b, ratio, |x: &&Vec<f32>, y: &Vec<f32>| euclidean(x, y))
        }
        _ => {
            tracing::warn!("descriptor kinds differ, no matches possible");
            RatioStats::default()
        }
    }
}

fn knn_ratio<Q, T>(
    queries: impl Iterator<Item = Q>,
    train: &[T],
    ratio: f32,
    distance: impl Fn(&Q, &T) -> f32,
) -> RatioStats {
    let mut stats = RatioStats::default();
    if train.is_empty() {
        return stats;
    }

    for q in queries {
        stats.total += 1;
        let mut d1 = f32::INFINITY;
        let mut d2 = f32::INFINITY;
        for t in train {
            let d = distance(&q, t);
            if d < d1 {
                d2 = d1;
                d1 = d;
            } else if d < d2 {
                d2 = d;
            }
        }
        if d2.is_finite() && d1 < ratio * d2 {
            stats.good += 1;
        }
    }
    stats
}

fn pack_bits(desc: &[u8; 32]) -> [u64; 4] {
    std::array::from_fn(|i| {
        let mut chunk = [0u8; 8];
        chunk.copy_from_slice(&desc[i * 8..i * 8 + 8]);
        u64::from_le_bytes(chunk)
    })
}

fn hamming(a: &[u64; 4], b: &[u64; 4]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{blank_card, textured_card};
    use crate::payload::encode_data_url;
    use image::imageops::FilterType;
    use image::{DynamicImage, ImageFormat};

    fn matcher() -> CardMatcher {
        CardMatcher::new(MatcherConfig::default())
    }

    fn binary(rows: &[[u8; 32]]) -> Descriptors {
        Descriptors::Binary(rows.to_vec())
    }

    #[test]
    fn test_ratio_test_accepts_distinct_nearest() {
        let a = binary(&[[0x00; 32]]);
        // Exact copy plus a far neighbour: 0 < 0.75 * 256.
        let b = binary(&[[0x00; 32], [0xFF; 32]]);
        assert_eq!(ratio_test(&a, &b, 0.75), RatioStats { good: 1, total: 1 });
    }

    #[test]
    fn test_ratio_test_rejects_ambiguous() {
        let mut near1 = [0u8; 32];
        near1[0] = 0b0000_0111; // distance 3
        let mut near2 = [0u8; 32];
        near2[1] = 0b0000_1111; // distance 4
        let a = binary(&[[0x00; 32]]);
        let b = binary(&[near1, near2]);
        // 3 < 0.75 * 4 is false.
        assert_eq!(ratio_test(&a, &b, 0.75).good, 0);
    }

    #[test]
    fn test_ratio_test_needs_two_neighbours() {
        let a = binary(&[[0x00; 32]]);
        let b = binary(&[[0x00; 32]]);
        assert_eq!(ratio_test(&a, &b, 0.75), RatioStats { good: 0, total: 1 });
    }

    #[test]
    fn test_ratio_test_duplicate_train_is_ambiguous() {
        let a = binary(&[[0x0F; 32]]);
        let b = binary(&[[0x0F; 32], [0x0F; 32]]);
        assert_eq!(ratio_test(&a, &b, 0.75).good, 0);
    }

    #[test]
    fn test_ratio_test_float() {
        let a = Descriptors::Float(vec![vec![1.0, 0.0]]);
        let b = Descriptors::Float(vec![vec![1.0, 0.1], vec![0.0, 1.0]]);
        assert_eq!(ratio_test(&a, &b, 0.75).good, 1);
    }

    #[test]
    fn test_ratio_test_mixed_kinds() {
        let a = binary(&[[0x00; 32]]);
        let b = Descriptors::Float(vec![vec![0.0; 4], vec![1.0; 4]]);
        assert_eq!(ratio_test(&a, &b, 0.75), RatioStats::default());
    }

    #[test]
    fn test_self_match_passes_auth_floor() {
        let card = CardImage::from(textured_card(42, 320, 200));
        let result = matcher().compare(&card, &card);
        assert!(result.error.is_none());
        assert!(result.is_match, "{result:?}");
        assert!(result.confidence >= DEFAULT_AUTH_FLOOR, "{result:?}");
        assert!(result.good_matches >= DEFAULT_MIN_GOOD_MATCHES);
    }

    #[test]
    fn test_unrelated_cards_do_not_match() {
        let m = matcher();
        let pairs = [(1, 2), (3, 4), (5, 6), (7, 8), (10, 11)];
        let mut total = 0.0;
        for (sa, sb) in pairs {
            let a = CardImage::from(textured_card(sa, 320, 200));
            let b = CardImage::from(textured_card(sb, 320, 200));
            let result = m.compare(&a, &b);
            assert!(!result.is_match, "seeds {sa}/{sb}: {result:?}");
            assert!(result.confidence < DEFAULT_MIN_SIMILARITY, "seeds {sa}/{sb}: {result:?}");
            total += result.confidence;
        }
        let mean = total / pairs.len() as f32;
        assert!(mean < 5.0, "mean unrelated confidence {mean}");
    }

    /// Compare `original` against a transformed copy and require a match.
    fn assert_copy_matches(m: &CardMatcher, original: &DynamicImage, copy: DynamicImage, what: &str) {
        let result = m.compare(&CardImage::from(original.clone()), &CardImage::from(copy));
        assert!(result.error.is_none(), "{what}: {result:?}");
        assert!(result.is_match, "{what}: {result:?}");
    }

    #[test]
    fn test_rotated_copies_match() {
        let m = matcher();
        let card = textured_card(9, 320, 200);
        assert_copy_matches(&m, &card, card.rotate90(), "rotated 90");
        assert_copy_matches(&m, &card, card.rotate180(), "rotated 180");
    }

    #[test]
    fn test_rescaled_copies_match() {
        let m = matcher();
        let card = textured_card(9, 320, 200);
        assert_copy_matches(&m, &card, card.resize_exact(256, 160, FilterType::Triangle), "scaled 0.8");
        assert_copy_matches(&m, &card, card.resize_exact(400, 250, FilterType::Triangle), "scaled 1.25");
    }

    #[test]
    fn test_jpeg_copy_matches() {
        let m = matcher();
        let card = textured_card(9, 320, 200);
        let jpeg = CardImage::from(encode_data_url(&card, ImageFormat::Jpeg).unwrap());
        let result = m.compare(&CardImage::from(card), &jpeg);
        assert!(result.is_match, "{result:?}");
    }

    #[test]
    fn test_same_pixels_any_payload_symmetric() {
        let m = matcher();
        let img = textured_card(9, 320, 200);
        let a = CardImage::from(img.clone());
        let b = CardImage::from(encode_data_url(&img, ImageFormat::Png).unwrap());

        let ab = m.compare(&a, &b);
        let ba = m.compare(&b, &a);
        assert!(ab.good_matches.abs_diff(ba.good_matches) <= 1, "{ab:?} vs {ba:?}");
        assert!((ab.confidence.round() - ba.confidence.round()).abs() <= 1.0);
    }

    #[test]
    fn test_argument_order_symmetry_on_rotated_pair() {
        // Keypoints on the two sides differ slightly, so the directions may
        // disagree by a few ambiguous queries.
        let m = matcher();
        let card = textured_card(9, 320, 200);
        let a = CardImage::from(card.clone());
        let b = CardImage::from(card.rotate180());

        let ab = m.compare(&a, &b);
        let ba = m.compare(&b, &a);
        assert!(ab.is_match && ba.is_match, "{ab:?} vs {ba:?}");
        let tolerance = (ab.good_matches.max(ba.good_matches) / 20).max(1);
        assert!(ab.good_matches.abs_diff(ba.good_matches) <= tolerance, "{ab:?} vs {ba:?}");
        assert!((ab.confidence - ba.confidence).abs() <= 5.0, "{ab:?} vs {ba:?}");
    }

    #[test]
    fn test_blank_image_is_insufficient() {
        let m = matcher();
        let result = m.compare(&CardImage::from(blank_card(200, 120)), &CardImage::from(textured_card(1, 200, 120)));
        assert!(!result.is_match);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.error, Some(MatchError::InsufficientFeatures));
    }

    #[test]
    fn test_undecodable_payload() {
        let m = matcher();
        let result = m.compare(&CardImage::from("data:image/png;base64,!!!!"), &CardImage::from(textured_card(1, 64, 64)));
        assert!(!result.is_match);
        assert!(matches!(result.error, Some(MatchError::Decode(_))));
        assert_eq!(result.error.as_ref().map(MatchError::code), Some("decode_failed"));
    }

    #[test]
    fn test_decision_needs_absolute_count() {
        // Few keypoints, all matched: 100% similarity but under the count floor.
        let m = matcher();
        let rows: Vec<[u8; 32]> = (0..10u8).map(|i| [i.wrapping_mul(37); 32]).collect();
        let kp = crate::features::Keypoint { x: 0.0, y: 0.0, angle: 0.0, size: 31.0, octave: 0, response: 1.0 };
        let set = FeatureSet { keypoints: vec![kp; rows.len()], descriptors: Some(Descriptors::Binary(rows)) };
        let result = m.compare_features(&set, &set);
        assert_eq!(result.good_matches, 10);
        assert_eq!(result.confidence, 100.0);
        assert!(!result.is_match);
    }

    #[test]
    fn test_search_empty_pool() {
        let presented = CardImage::from(textured_card(1, 200, 120));
        let decision = matcher().search(&presented, Vec::<(String, CardImage)>::new());
        assert!(decision.accepted.is_none());
        assert_eq!(decision.candidates, 0);
        assert_eq!(decision.error, Some(MatchError::EmptyPool));
    }

    #[test]
    fn test_search_picks_owner() {
        let m = matcher();
        let owner = textured_card(21, 320, 200);
        let pool = vec![
            ("alice".to_string(), CardImage::from(textured_card(22, 320, 200))),
            ("bob".to_string(), CardImage::from(owner.clone())),
            ("carol".to_string(), CardImage::from(textured_card(23, 320, 200))),
        ];
        let decision = m.search(&CardImage::from(owner), pool);
        assert_eq!(decision.accepted.as_deref(), Some("bob"));
        assert_eq!(decision.candidates, 3);
        assert!(decision.confidence >= DEFAULT_AUTH_FLOOR);
        assert!(decision.best.is_some_and(|r| r.is_match));
    }

    #[test]
    fn test_search_rejects_strangers() {
        let m = matcher();
        let pool = vec![
            (1u32, CardImage::from(textured_card(31, 320, 200))),
            (2u32, CardImage::from("not an image")),
        ];
        let decision = m.search(&CardImage::from(textured_card(30, 320, 200)), pool);
        assert!(decision.accepted.is_none());
        assert_eq!(decision.candidates, 2);
        assert!(decision.error.is_none());
    }

    #[test]
    fn test_search_floor_is_stricter_than_match() {
        let config = MatcherConfig { auth_floor: 101.0, ..MatcherConfig::default() };
        let m = CardMatcher::new(config);
        let card = textured_card(5, 320, 200);
        let decision = m.search(&CardImage::from(card.clone()), vec![("x", CardImage::from(card))]);
        assert!(decision.accepted.is_none(), "no confidence can exceed 100");
        assert!(decision.best.is_some_and(|r| r.is_match));
    }

    #[test]
    fn test_result_json_carries_error_message() {
        let result = MatchResult::failed(Algorithm::Orb, MatchError::EmptyPool);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error"], "no stored cards to compare against");
        assert_eq!(json["algorithm"], "orb");
        assert_eq!(json["is_match"], false);
    }
}
