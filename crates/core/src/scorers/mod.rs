//! Signal scorers. Each one reads a single stream and reports bounded metrics.

pub mod audio;
pub mod text;
pub mod video;

use crate::error::ScorerError;
use crate::ingest::SessionStream;
use crate::session::Domain;
#[cfg(test)]
use mockall::automock;
use std::collections::BTreeMap;

pub use audio::AudioScorer;
pub use text::{TextScorer, TopicCoverage};
pub use video::VideoScorer;

/// Metric name to value, expected in `[0, 100]`.
pub type MetricsMap = BTreeMap<String, f64>;

/// A per-domain analyzer.
///
/// Scoring is CPU-bound, so implementations are synchronous and the pipeline
/// runs each one on the blocking pool. Implementations must not share mutable
/// state: the three scorers of a run execute concurrently.
#[cfg_attr(test, automock)]
pub trait Scorer: Send + Sync {
    fn domain(&self) -> Domain;

    /// `topic` is a hint only; a scorer must produce sensible output without it.
    fn score(&self, stream: &SessionStream, topic: &str) -> Result<MetricsMap, ScorerError>;
}

/// The reference audio, video and text scorers.
pub fn default_scorers() -> Vec<std::sync::Arc<dyn Scorer>> {
    vec![
        std::sync::Arc::new(AudioScorer::default()),
        std::sync::Arc::new(VideoScorer::default()),
        std::sync::Arc::new(TextScorer::default()),
    ]
}

/// Maps `value / full_scale` onto `[0, 1]`.
pub(crate) fn unit(value: f64, full_scale: f64) -> f64 {
    if full_scale <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    (value / full_scale).clamp(0.0, 1.0)
}

/// Rounds a `[0, 1]` fraction to a score with one decimal place.
pub(crate) fn to_score(fraction: f64) -> f64 {
    (fraction.clamp(0.0, 1.0) * 1000.0).round() / 10.0
}

pub(crate) fn wrong_stream(domain: Domain, stream: &SessionStream) -> ScorerError {
    ScorerError::WrongStream {
        domain,
        received: stream.domain(),
    }
}
