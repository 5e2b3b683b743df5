use anyhow::{bail, Context, Result};
use cardsight_core::{
    build_profile, CardImage, CardMatcher, CardReader, FaceBox, FaceLocator, FixedFace, StaticTokens,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod pool;

use config::Config;

#[derive(Parser)]
#[command(name = "cardsight", about = "Card matching and field extraction")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two card images
    Match {
        first: PathBuf,
        second: PathBuf,
        /// Descriptor strategy ("orb" or "gradient")
        #[arg(short, long)]
        algorithm: Option<String>,
    },
    /// Find the owner of a card among stored cards
    Login {
        card: PathBuf,
        /// Directory of stored cards, one file per identity
        #[arg(short, long)]
        pool: PathBuf,
        #[arg(short, long)]
        algorithm: Option<String>,
    },
    /// Read fields from a card
    Read {
        image: PathBuf,
        /// OCR tokens as a JSON array of {quad, text, confidence}
        #[arg(short, long)]
        tokens: Option<PathBuf>,
        /// Known face box as x1,y1,x2,y2
        #[arg(long)]
        face: Option<String>,
        /// Face crop growth per side (overrides CARDSIGHT_FACE_MARGIN)
        #[arg(long)]
        margin: Option<f32>,
        /// Write the face crop to this file
        #[arg(long)]
        save_face: Option<PathBuf>,
        /// Print a signup profile instead of the raw reading
        #[arg(long)]
        prefill: bool,
    },
    /// Show keypoint and descriptor statistics for a card
    Features {
        image: PathBuf,
        #[arg(short, long)]
        algorithm: Option<String>,
    },
}

#[derive(Serialize)]
struct FeatureSummary {
    algorithm: String,
    width: u32,
    height: u32,
    keypoints: usize,
    descriptors: usize,
    per_octave: Vec<usize>,
}

/// Outcome of a pool search bounded by a timeout.
enum Bounded<T> {
    Finished(T),
    TimedOut,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    block_on_detached(run(cli, config))?
}

/// Drive `future` on a fresh runtime and return without joining blocking
/// tasks it left behind. A timed-out pool search still occupies its thread.
fn block_on_detached<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    Ok(output)
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Match { first, second, algorithm } => {
            let matcher = CardMatcher::new(config.matcher_config(algorithm.as_deref()));
            let result = matcher.compare(&pool::load_card(&first)?, &pool::load_card(&second)?);
            print_json(&result)?;
        }
        Commands::Login { card, pool, algorithm } => {
            login(&config, &card, &pool, algorithm.as_deref()).await?;
        }
        Commands::Read { image, tokens, face, margin, save_face, prefill } => {
            let card = pool::load_card(&image)?
                .decode()
                .with_context(|| format!("decoding {}", image.display()))?
                .into_owned();

            let recognizer = match tokens {
                Some(path) => {
                    let json = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    StaticTokens::from_json(&json).with_context(|| format!("parsing {}", path.display()))?
                }
                None => {
                    tracing::warn!("no OCR tokens supplied; only the face will be read");
                    StaticTokens::default()
                }
            };

            let mut reader = CardReader::new(recognizer, face_locator(&config, face.as_deref())?, config.reader_config());
            let reading = match margin {
                Some(m) => reader.read_with_margin(&card, m),
                None => reader.read(&card),
            };

            if let (Some(path), Some(face_image)) = (&save_face, &reading.face_image) {
                face_image
                    .save(path)
                    .with_context(|| format!("writing face crop to {}", path.display()))?;
                tracing::info!(path = %path.display(), "face crop saved");
            }

            if prefill {
                print_json(&build_profile(&reading, &card)?)?;
            } else {
                print_json(&reading)?;
            }
        }
        Commands::Features { image, algorithm } => {
            let matcher = CardMatcher::new(config.matcher_config(algorithm.as_deref()));
            let decoded = pool::load_card(&image)?.decode()?.into_owned();
            let (width, height) = (decoded.width(), decoded.height());
            let features = matcher.features(&CardImage::Decoded(decoded))?;

            let mut per_octave = Vec::new();
            for kp in &features.keypoints {
                let octave = kp.octave as usize;
                if per_octave.len() <= octave {
                    per_octave.resize(octave + 1, 0);
                }
                per_octave[octave] += 1;
            }

            print_json(&FeatureSummary {
                algorithm: matcher.algorithm().to_string(),
                width,
                height,
                keypoints: features.keypoints.len(),
                descriptors: features.descriptors.as_ref().map_or(0, |d| d.len()),
                per_octave,
            })?;
        }
    }

    Ok(())
}

/// Pool search on a blocking task, bounded by the configured timeout.
async fn login(config: &Config, card: &Path, pool_dir: &Path, algorithm: Option<&str>) -> Result<()> {
    let matcher = Arc::new(CardMatcher::new(config.matcher_config(algorithm)));
    let presented = pool::load_card(card)?;
    let pool = pool::load_dir(pool_dir)?;
    let timeout = Duration::from_secs(config.search_timeout_secs);

    match bounded(timeout, move || matcher.search(&presented, pool)).await? {
        Bounded::Finished(decision) => print_json(&decision)?,
        Bounded::TimedOut => {
            tracing::warn!(timeout_secs = config.search_timeout_secs, "pool search timed out");
            print_json(&serde_json::json!({
                "decision": null,
                "reason": "timeout",
                "timeout_secs": config.search_timeout_secs,
            }))?;
        }
    }
    Ok(())
}

/// Run `work` on a blocking thread; give up waiting after `timeout`.
async fn bounded<T, W>(timeout: Duration, work: W) -> Result<Bounded<T>>
where
    T: Send + 'static,
    W: FnOnce() -> T + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(work)).await {
        Ok(joined) => Ok(Bounded::Finished(joined.context("pool search task failed")?)),
        Err(_) => Ok(Bounded::TimedOut),
    }
}

/// A fixed box from the command line, else the SCRFD model when built in and
/// present, else no face.
fn face_locator(config: &Config, face: Option<&str>) -> Result<Box<dyn FaceLocator>> {
    if let Some(text) = face {
        return Ok(Box::new(FixedFace(Some(parse_face_box(text)?))));
    }

    #[cfg(feature = "scrfd")]
    match cardsight_core::scrfd::ScrfdLocator::load(&config.scrfd_model_path()) {
        Ok(locator) => return Ok(Box::new(locator)),
        Err(e) => tracing::warn!(error = %e, "SCRFD unavailable, reading without a face"),
    }
    #[cfg(not(feature = "scrfd"))]
    let _ = config;

    Ok(Box::new(FixedFace(None)))
}

fn parse_face_box(text: &str) -> Result<FaceBox> {
    let values: Vec<f32> = text
        .split(',')
        .map(|v| v.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("face box must be x1,y1,x2,y2, got {text:?}"))?;
    let [x1, y1, x2, y2] = values[..] else {
        bail!("face box must have 4 values, got {}", values.len());
    };
    if x2 <= x1 || y2 <= y1 {
        bail!("face box {text:?} is empty");
    }
    Ok(FaceBox { x1, y1, x2, y2 })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
