use super::{MetricsMap, Scorer, to_score, unit, wrong_stream};
use crate::error::ScorerError;
use crate::ingest::SessionStream;
use crate::media::VideoStream;
use crate::session::Domain;

/// Scores on-camera activity from the mean absolute difference between
/// consecutive downscaled frames.
#[derive(Debug, Clone)]
pub struct VideoScorer {
    /// Motion (fraction of full scale) above which a transition is active.
    pub active_threshold: f64,
    /// Motion above which a transition is treated as a cut, not a gesture.
    pub cut_threshold: f64,
    /// Mean motion at which intensity saturates.
    pub full_intensity: f64,
}

impl Default for VideoScorer {
    fn default() -> Self {
        Self {
            active_threshold: 0.02,
            cut_threshold: 0.15,
            full_intensity: 0.06,
        }
    }
}

impl Scorer for VideoScorer {
    fn domain(&self) -> Domain {
        Domain::Video
    }

    fn score(&self, stream: &SessionStream, _topic: &str) -> Result<MetricsMap, ScorerError> {
        let SessionStream::Video(video) = stream else {
            return Err(wrong_stream(Domain::Video, stream));
        };
        self.score_video(video)
    }
}

impl VideoScorer {
    pub fn score_video(&self, video: &VideoStream) -> Result<MetricsMap, ScorerError> {
        let frame_len = video.width * video.height;
        let frames: Vec<&[u8]> = video
            .frames
            .iter()
            .filter(|f| frame_len > 0 && f.len() == frame_len)
            .map(Vec::as_slice)
            .collect();
        if frames.len() < 2 {
            return Err(ScorerError::insufficient(
                Domain::Video,
                format!("{} usable frame(s)", frames.len()),
            ));
        }

        let motion: Vec<f64> = frames.windows(2).map(|w| frame_difference(w[0], w[1])).collect();
        let transitions = motion.len() as f64;

        let active = motion.iter().filter(|m| **m > self.active_threshold).count() as f64;
        let gestures = motion
            .iter()
            .filter(|m| **m > self.active_threshold && **m <= self.cut_threshold)
            .count() as f64;
        // Cuts say nothing about the presenter, so they are left out of intensity.
        let in_shot: Vec<f64> = motion
            .iter()
            .copied()
            .filter(|m| *m <= self.cut_threshold)
            .collect();
        let intensity = if in_shot.is_empty() {
            0.0
        } else {
            unit(in_shot.iter().sum::<f64>() / in_shot.len() as f64, self.full_intensity)
        };

        let activity = active / transitions;
        let engagement = 0.6 * activity + 0.4 * intensity;

        tracing::debug!(
            "Video: {} transitions, {:.0}% active, intensity {intensity:.2}",
            motion.len(),
            activity * 100.0
        );

        Ok(MetricsMap::from([
            ("engagement_score".to_string(), to_score(engagement)),
            ("gesture_index".to_string(), to_score(gestures / transitions)),
        ]))
    }
}

/// Mean absolute pixel difference as a fraction of full scale.
fn frame_difference(a: &[u8], b: &[u8]) -> f64 {
    let total: u64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| u64::from(x.abs_diff(*y)))
        .sum();
    total as f64 / (a.len() as f64 * 255.0)
}
