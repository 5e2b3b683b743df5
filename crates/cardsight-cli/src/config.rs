use cardsight_core::features::{Algorithm, DEFAULT_MAX_FEATURES};
use cardsight_core::matcher::{
    MatcherConfig, DEFAULT_AUTH_FLOOR, DEFAULT_MIN_GOOD_MATCHES, DEFAULT_MIN_SIMILARITY,
    DEFAULT_RATIO_THRESHOLD,
};
use cardsight_core::ReaderConfig;
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Descriptor strategy ("orb" or "gradient").
    pub algorithm: Algorithm,
    /// Lowe ratio for the k=2 nearest-neighbour test.
    pub ratio_threshold: f32,
    /// Ratio-test survivors required for a match.
    pub min_good_matches: usize,
    /// Confidence (0–100) required for a match.
    pub min_similarity: f32,
    /// Confidence a pool winner needs to authenticate.
    pub auth_floor: f32,
    /// Keypoint budget per image.
    pub max_features: usize,
    /// Face crop growth per side, as a fraction of the face box.
    pub face_margin: f32,
    /// Timeout in seconds for a pool search.
    pub search_timeout_secs: u64,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
}

impl Config {
    /// Load configuration from `CARDSIGHT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let algorithm = std::env::var("CARDSIGHT_ALGORITHM")
            .map(|name| Algorithm::from_name(&name))
            .unwrap_or_default();

        Self {
            algorithm,
            ratio_threshold: env_f32("CARDSIGHT_RATIO_THRESHOLD", DEFAULT_RATIO_THRESHOLD),
            min_good_matches: env_usize("CARDSIGHT_MIN_GOOD_MATCHES", DEFAULT_MIN_GOOD_MATCHES),
            min_similarity: env_f32("CARDSIGHT_MIN_SIMILARITY", DEFAULT_MIN_SIMILARITY),
            auth_floor: env_f32("CARDSIGHT_AUTH_FLOOR", DEFAULT_AUTH_FLOOR),
            max_features: env_usize("CARDSIGHT_MAX_FEATURES", DEFAULT_MAX_FEATURES),
            face_margin: env_f32("CARDSIGHT_FACE_MARGIN", 0.5),
            search_timeout_secs: env_u64("CARDSIGHT_SEARCH_TIMEOUT_SECS", 30),
            model_dir: std::env::var("CARDSIGHT_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models")),
        }
    }

    /// Matcher settings, with an optional algorithm override from the command line.
    pub fn matcher_config(&self, algorithm: Option<&str>) -> MatcherConfig {
        MatcherConfig {
            algorithm: algorithm.map_or(self.algorithm, Algorithm::from_name),
            ratio_threshold: self.ratio_threshold,
            min_good_matches: self.min_good_matches,
            min_similarity: self.min_similarity,
            auth_floor: self.auth_floor,
            max_features: self.max_features,
        }
    }

    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            face_margin: self.face_margin,
            ..ReaderConfig::default()
        }
    }

    /// Path to the SCRFD detection model.
    #[cfg_attr(not(feature = "scrfd"), allow(dead_code))]
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
